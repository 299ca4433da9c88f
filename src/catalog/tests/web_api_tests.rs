use super::*;
use serde_json::json;

#[test]
fn test_parse_schema_fixture() {
    let body = json!({
        "game": {
            "gameName": "Spacewar",
            "availableGameStats": {
                "achievements": [
                    {
                        "name": "ACH_WIN_ONE_GAME",
                        "defaultvalue": 0,
                        "displayName": "Winner",
                        "hidden": 0,
                        "description": "Win one game.",
                        "icon": "https://cdn/icon.jpg",
                        "icongray": "https://cdn/gray.jpg"
                    },
                    { "name": "ACH_SECRET", "displayName": "Secret", "hidden": "1" },
                    { "displayName": "nameless" }
                ],
                "stats": [
                    { "name": "NumGames", "defaultvalue": 0, "displayName": "Games" },
                    { "name": "MaxFeet", "defaultvalue": "2.5", "displayName": "" }
                ]
            }
        }
    });

    let schema = parse_schema(&body);
    assert_eq!(schema.achievements.len(), 2);
    let first = &schema.achievements[0];
    assert_eq!(first.api_name, "ACH_WIN_ONE_GAME");
    assert_eq!(first.display_name, "Winner");
    assert!(!first.hidden);
    assert_eq!(first.icon_gray.as_deref(), Some("https://cdn/gray.jpg"));

    let secret = &schema.achievements[1];
    assert!(secret.hidden);
    assert_eq!(secret.description, "");
    assert_eq!(secret.icon, None);

    assert_eq!(schema.stats.len(), 2);
    assert_eq!(schema.stats[1].default_value, 2.5);
}

#[test]
fn test_parse_schema_without_stats_block() {
    let schema = parse_schema(&json!({ "game": {} }));
    assert_eq!(schema, GameSchema::default());
}

#[test]
fn test_parse_global_percentages_string_and_number() {
    let body = json!({
        "achievementpercentages": {
            "achievements": [
                { "name": "A", "percent": 55.5 },
                { "name": "B", "percent": "3.25" },
                { "name": "C", "percent": "n/a" }
            ]
        }
    });
    let map = parse_global_percentages(&body);
    assert_eq!(map.len(), 2);
    assert_eq!(map["A"], 55.5);
    assert_eq!(map["B"], 3.25);
}

#[test]
fn test_parse_player_achievements() {
    let body = json!({
        "playerstats": {
            "steamID": "76561197960287930",
            "success": true,
            "achievements": [
                { "apiname": "A", "achieved": 1, "unlocktime": 1700000000 },
                { "apiname": "B", "achieved": 0, "unlocktime": 0 }
            ]
        }
    });
    let map = parse_player_achievements(&body);
    assert!(map["A"].achieved);
    assert_eq!(map["A"].unlocked_at.unwrap().timestamp(), 1_700_000_000);
    assert!(!map["B"].achieved);
    assert_eq!(map["B"].unlocked_at, None);
}

#[test]
fn test_parse_player_achievements_failure_payload() {
    let body = json!({ "playerstats": { "error": "Requested app has no stats", "success": false } });
    assert!(parse_player_achievements(&body).is_empty());
}

#[tokio::test]
async fn test_schema_requires_api_key() {
    let catalog = WebApiCatalog::new(&CatalogConfig::default());
    let err = catalog.fetch_schema(480, None).await.unwrap_err();
    assert!(err.to_string().contains("API key"));
}

#[tokio::test]
async fn test_best_effort_lookups_return_empty_when_unreachable() {
    let config = CatalogConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_ms: 500,
    };
    let catalog = WebApiCatalog::new(&config);
    assert!(catalog.fetch_global_percentages(480).await.is_empty());
    assert!(catalog
        .fetch_player_achievements(480, 76561197960287930, Some("key"))
        .await
        .is_empty());
    assert!(catalog.fetch_schema(480, Some("key")).await.is_err());
}
