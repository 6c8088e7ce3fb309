//! Fire-and-forget monitoring events.
//!
//! Events are queued on a channel and delivered to the sink by a small fixed
//! pool of workers, so a slow sink never blocks a stage. [`EventDispatcher::shutdown`]
//! drains the queue and joins every worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ecotax_shared::{EcotaxError, Result};

/// Lifecycle status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Completed,
    Skipped,
    Failed,
}

/// One monitoring event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    pub run_id: Uuid,
    pub stage: String,
    pub status: EventStatus,
    #[serde(default)]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Monitoring sink: `record_event(payload)`.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    async fn record_event(&self, event: &MonitoringEvent) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlMonitoringSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlMonitoringSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MonitoringSink for JsonlMonitoringSink {
    async fn record_event(&self, event: &MonitoringEvent) -> Result<()> {
        let mut line =
            serde_json::to_string(event).map_err(|e| EcotaxError::Monitoring(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EcotaxError::io(parent, e))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EcotaxError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| EcotaxError::io(&self.path, e))?;
        Ok(())
    }
}

/// Queues events for a bounded worker pool.
pub struct EventDispatcher {
    run_id: Uuid,
    sender: Option<mpsc::UnboundedSender<MonitoringEvent>>,
    workers: Vec<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Start `workers` delivery tasks. Without a sink, events are only logged.
    pub fn start(sink: Option<Arc<dyn MonitoringSink>>, workers: usize) -> Self {
        let run_id = Uuid::now_v7();
        let (sender, receiver) = mpsc::unbounded_channel::<MonitoringEvent>();
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let sink = sink.clone();
                tokio::spawn(async move {
                    loop {
                        // The lock is held only while waiting for the next event.
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else { break };
                        match &sink {
                            Some(sink) => {
                                if let Err(e) = sink.record_event(&event).await {
                                    warn!(worker, stage = %event.stage, error = %e, "monitoring sink failed");
                                }
                            }
                            None => info!(
                                run_id = %event.run_id,
                                stage = %event.stage,
                                status = ?event.status,
                                details = %event.details,
                                "pipeline event"
                            ),
                        }
                    }
                    debug!(worker, "monitoring worker stopped");
                })
            })
            .collect();

        Self {
            run_id,
            sender: Some(sender),
            workers: handles,
        }
    }

    /// A dispatcher that drops every event.
    pub fn disabled() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            sender: None,
            workers: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Queue an event; never blocks and never fails.
    pub fn emit(&self, stage: &str, status: EventStatus, details: serde_json::Value) {
        let Some(sender) = &self.sender else { return };
        let event = MonitoringEvent {
            run_id: self.run_id,
            stage: stage.to_string(),
            status,
            details,
            timestamp: Utc::now(),
        };
        if sender.send(event).is_err() {
            warn!(stage, "monitoring queue closed, event dropped");
        }
    }

    /// Close the queue and wait until every queued event is delivered.
    pub async fn shutdown(mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "monitoring worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowCounter {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MonitoringSink for SlowCounter {
        async fn record_event(&self, _event: &MonitoringEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl MonitoringSink for Broken {
        async fn record_event(&self, _event: &MonitoringEvent) -> Result<()> {
            Err(EcotaxError::Monitoring("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn shutdown_drains_every_event() {
        let sink = Arc::new(SlowCounter {
            seen: AtomicUsize::new(0),
        });
        let dispatcher = EventDispatcher::start(Some(sink.clone()), 2);
        for i in 0..20 {
            dispatcher.emit("clustering", EventStatus::Started, json!({ "i": i }));
        }
        dispatcher.shutdown().await;
        assert_eq!(sink.seen.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!("ecotax_test_{}_events.jsonl", Uuid::now_v7()));
        let dispatcher = EventDispatcher::start(Some(Arc::new(JsonlMonitoringSink::new(&path))), 1);
        let run_id = dispatcher.run_id();
        dispatcher.emit("data_loader", EventStatus::Started, json!({}));
        dispatcher.emit("data_loader", EventStatus::Completed, json!({ "titles": 3 }));
        dispatcher.shutdown().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<MonitoringEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.run_id == run_id));
        assert_eq!(events[1].status, EventStatus::Completed);
        assert_eq!(events[1].details["titles"], 3);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failing_sink_and_disabled_dispatcher_are_harmless() {
        let dispatcher = EventDispatcher::start(Some(Arc::new(Broken)), 2);
        dispatcher.emit("mapping", EventStatus::Failed, json!({ "error": "boom" }));
        dispatcher.shutdown().await;

        let disabled = EventDispatcher::disabled();
        disabled.emit("mapping", EventStatus::Skipped, json!({}));
        disabled.shutdown().await;

        let logged = EventDispatcher::start(None, 1);
        logged.emit("mapping", EventStatus::Completed, json!({}));
        logged.shutdown().await;
    }
}
