//! Monitoring state events (`spec.md` §6 "Monitoring state event shape").
//!
//! Both the [`crate::scheduler::Scheduler`] and the [`crate::engine::Engine`]
//! write into the same state bag — scheduler fields (`queue_length`,
//! `is_running`, `active_tasks`, ...) and engine fields (`pipeline`,
//! `current_step`, ...) are two views onto one opaque, documented-shape
//! object, so a single hub merges updates from both and rebroadcasts the
//! full snapshot on every change.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{Pipeline, PipelineStep, TimestampMs, now_ms};

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringState {
    pub queue_length: usize,
    pub is_running: bool,
    pub active_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub last_update: TimestampMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Pipeline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<PipelineStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_steps: Option<Pipeline>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl MonitoringState {
    fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            queue_length: 0,
            is_running: false,
            active_tasks: 0,
            max_concurrent_tasks,
            last_update: now_ms(),
            current_context: None,
            pipeline: None,
            current_step_index: None,
            current_step: None,
            modified_steps: None,
            explanation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "state")]
pub struct MonitoringEvent {
    #[serde(rename = "type")]
    pub type_tag: &'static str,
    pub message: String,
    pub timestamp: TimestampMs,
    pub metadata: MonitoringMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringMetadata {
    pub state: MonitoringState,
}

/// Shared sink for `spec.md` §6's monitoring state event; subscribable for
/// the optional websocket log-stream endpoint (`spec.md` §6, §4.9).
pub struct MonitoringHub {
    state: Mutex<MonitoringState>,
    tx: broadcast::Sender<MonitoringEvent>,
}

impl MonitoringHub {
    #[must_use]
    pub fn new(max_concurrent_tasks: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(1024);
        Arc::new(Self { state: Mutex::new(MonitoringState::new(max_concurrent_tasks)), tx })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitoringEvent> {
        self.tx.subscribe()
    }

    /// Apply `f` to the shared state bag, bump `last_update`, and
    /// rebroadcast the merged snapshot tagged with `message`.
    pub fn update(&self, message: impl Into<String>, f: impl FnOnce(&mut MonitoringState)) {
        let mut guard = self.state.lock();
        f(&mut guard);
        guard.last_update = now_ms();
        let event = MonitoringEvent {
            type_tag: "state",
            message: message.into(),
            timestamp: guard.last_update,
            metadata: MonitoringMetadata { state: guard.clone() },
        };
        drop(guard);
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn snapshot(&self) -> MonitoringState {
        self.state.lock().clone()
    }
}
