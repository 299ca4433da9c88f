use super::LoggedInUser;
use crate::keyvalue;
use std::path::Path;

/// Reads `config/loginusers.vdf`, most recent account first.
///
/// A missing or unreadable file yields an empty list.
pub fn list_logged_in_users(root: &Path) -> Vec<LoggedInUser> {
    let path = root.join("config").join("loginusers.vdf");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    parse_login_users(&content)
}

pub(crate) fn parse_login_users(content: &str) -> Vec<LoggedInUser> {
    let doc = keyvalue::parse(content);
    let Some(users) = doc
        .get_any(&["users", "Users"])
        .and_then(|node| node.as_map())
    else {
        return Vec::new();
    };

    let mut result: Vec<(LoggedInUser, u64)> = users
        .iter()
        .filter_map(|(key, node)| {
            let id64: u64 = key.trim().parse().ok()?;
            let entry = node.as_map()?;
            let display_name = entry
                .get_str("PersonaName")
                .filter(|s| !s.is_empty())
                .or_else(|| entry.get_str("AccountName"))
                .unwrap_or_default()
                .to_string();
            let most_recent = entry
                .get_any(&["MostRecent", "mostrecent"])
                .and_then(|n| n.as_str())
                .is_some_and(|v| v.trim() == "1");
            let timestamp = entry.get_u64("Timestamp").unwrap_or(0);
            Some((
                LoggedInUser {
                    id64,
                    account_id: (id64 & 0xFFFF_FFFF) as u32,
                    display_name,
                    most_recent,
                },
                timestamp,
            ))
        })
        .collect();

    result.sort_by(|(a, a_ts), (b, b_ts)| {
        b.most_recent
            .cmp(&a.most_recent)
            .then(b_ts.cmp(a_ts))
    });
    result.into_iter().map(|(user, _)| user).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOGIN_USERS: &str = r#"
"users"
{
    "76561197960287930"
    {
        "AccountName"   "gabe"
        "PersonaName"   "Rabscuttle"
        "MostRecent"    "0"
        "Timestamp"     "1600000000"
    }
    "76561198000000001"
    {
        "AccountName"   "second"
        "PersonaName"   ""
        "MostRecent"    "1"
        "Timestamp"     "1500000000"
    }
    "not-an-id" { "AccountName" "ignored" }
}
"#;

    #[test]
    fn test_parse_login_users_orders_most_recent_first() {
        let users = parse_login_users(LOGIN_USERS);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id64, 76561198000000001);
        assert!(users[0].most_recent);
        assert_eq!(users[0].display_name, "second");
        assert_eq!(users[1].display_name, "Rabscuttle");
    }

    #[test]
    fn test_account_id_is_lower_32_bits() {
        let users = parse_login_users(LOGIN_USERS);
        let gabe = users.iter().find(|u| u.display_name == "Rabscuttle").unwrap();
        assert_eq!(gabe.account_id, 22202);
    }

    #[test]
    fn test_missing_file_yields_empty_list() {
        let temp = TempDir::new().unwrap();
        assert!(list_logged_in_users(temp.path()).is_empty());
    }

    #[test]
    fn test_garbage_file_yields_empty_list() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("config")).unwrap();
        std::fs::write(temp.path().join("config/loginusers.vdf"), "{{{ garbage").unwrap();
        assert!(list_logged_in_users(temp.path()).is_empty());
    }

    #[test]
    fn test_ties_broken_by_timestamp() {
        let content = r#""users" {
            "1" { "AccountName" "old" "Timestamp" "10" }
            "2" { "AccountName" "new" "Timestamp" "20" }
        }"#;
        let names: Vec<String> = parse_login_users(content)
            .into_iter()
            .map(|u| u.display_name)
            .collect();
        assert_eq!(names, vec!["new", "old"]);
    }
}
