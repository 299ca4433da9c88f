//! Scripted in-process workers for bridge and supervisor tests.

use super::launcher::{ProcessControl, WorkerIo, WorkerLauncher};
use crate::errors::BridgeError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

/// What a fake worker does with one request.
pub enum Reply {
    Ok(Value),
    Err(String),
    /// Never answer.
    Ignore,
    /// Answer nothing and exit, as if the process crashed.
    Exit,
}

pub type Script = dyn Fn(usize, &Value) -> Reply + Send + Sync;

/// Something a fake worker observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Spawned { instance: usize, app_id: u32 },
    Request { instance: usize, request: Value },
    Closed { instance: usize },
    Killed { instance: usize },
}

#[derive(Clone)]
pub struct FakeLauncher {
    script: Arc<Script>,
    events: Arc<Mutex<Vec<Event>>>,
    ignore_eof: bool,
}

impl FakeLauncher {
    pub fn new(script: impl Fn(usize, &Value) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            events: Arc::new(Mutex::new(Vec::new())),
            ignore_eof: false,
        }
    }

    /// Workers keep running after stdin closes, so only a forced kill ends
    /// them.
    pub fn ignoring_eof(mut self) -> Self {
        self.ignore_eof = true;
        self
    }

    /// Every request succeeds; INIT answers like a real worker.
    pub fn healthy() -> Self {
        Self::new(|_, request| match request["type"].as_str() {
            Some("INIT") => Reply::Ok(init_payload(request["appId"].as_u64().unwrap_or(0))),
            _ => Reply::Ok(json!({})),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Spawned { .. }))
            .count()
    }

    /// `(instance, request)` pairs whose `type` equals `kind`.
    pub fn requests_of(&self, kind: &str) -> Vec<(usize, Value)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Request { instance, request } if request["type"] == kind => {
                    Some((instance, request))
                }
                _ => None,
            })
            .collect()
    }
}

pub fn init_payload(app_id: u64) -> Value {
    json!({
        "appId": app_id,
        "buildSha": crate::protocol::BUILD_SHA,
        "readiness": {"stable": true, "probes": 3}
    })
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self, app_id: u32) -> Result<WorkerIo, BridgeError> {
        let instance = {
            let mut events = self.events.lock().unwrap();
            let instance = events
                .iter()
                .filter(|e| matches!(e, Event::Spawned { .. }))
                .count();
            events.push(Event::Spawned { instance, app_id });
            instance
        };

        let (stdin, worker_in) = tokio::io::duplex(64 * 1024);
        let (mut worker_out, stdout) = tokio::io::duplex(64 * 1024);
        let script = Arc::clone(&self.script);
        let events = Arc::clone(&self.events);
        let ignore_eof = self.ignore_eof;

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(worker_in).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                events.lock().unwrap().push(Event::Request {
                    instance,
                    request: request.clone(),
                });
                let response = match script(instance, &request) {
                    Reply::Ok(data) => json!({"id": request["id"], "ok": true, "data": data}),
                    Reply::Err(error) => json!({"id": request["id"], "ok": false, "error": error}),
                    Reply::Ignore => continue,
                    Reply::Exit => return,
                };
                let line = format!("{}\n", response);
                if worker_out.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
            }
            if ignore_eof {
                std::future::pending::<()>().await;
            }
            events.lock().unwrap().push(Event::Closed { instance });
        });

        Ok(WorkerIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: None,
            control: Box::new(FakeControl {
                instance,
                task,
                finished: false,
                events: Arc::clone(&self.events),
            }),
        })
    }
}

struct FakeControl {
    instance: usize,
    task: JoinHandle<()>,
    finished: bool,
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn wait(&mut self) -> Option<i32> {
        if !self.finished {
            let _ = (&mut self.task).await;
            self.finished = true;
        }
        Some(0)
    }

    async fn kill(&mut self) {
        self.task.abort();
        self.events.lock().unwrap().push(Event::Killed {
            instance: self.instance,
        });
    }

    fn id(&self) -> Option<u32> {
        None
    }
}

/// Lets spawned tasks run until `condition` holds.
pub async fn settle_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}
