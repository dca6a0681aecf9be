//! Analytics Wrapper (`spec.md` §4.7).
//!
//! Wraps every capability execution with an ordered list of `Tracker`
//! hooks producing structured telemetry, without letting tracker failures
//! affect the call they are observing.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::model::TimestampMs;
use crate::{Error, Result};

/// The context passed to every hook for one capability execution
/// (`spec.md` §4.7).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub capability_id: String,
    pub model_id: String,
    pub operation_label: String,
    pub input: Value,
    pub config: Option<Value>,
    pub start_time: TimestampMs,
    pub metadata: Value,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(capability_id: String, model_id: String, operation_label: impl Into<String>, input: Value, config: Option<Value>) -> Self {
        Self {
            capability_id,
            model_id,
            operation_label: operation_label.into(),
            input,
            config,
            start_time: crate::model::now_ms(),
            metadata: Value::Null,
        }
    }
}

/// A pluggable telemetry sink, identified by a stable string id
/// (`spec.md` §4.7: "Trackers are identified by string id and each returns
/// a free-form data bag").
#[async_trait]
pub trait Tracker: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Run before the capability executes. Errors are isolated, logged,
    /// and never propagated to the call being observed.
    async fn before_execution(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Run after a successful execution; returns the tracker's free-form
    /// telemetry payload.
    async fn after_execution(&self, ctx: &ExecutionContext, result: &Value) -> Value;

    /// Run after a failed execution; returns the tracker's free-form
    /// telemetry payload.
    async fn on_error(&self, ctx: &ExecutionContext, error: &Error) -> Value;
}

/// One emitted telemetry record (`spec.md` §6 "Analytics event shapes").
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum AnalyticsEvent {
    #[serde(rename = "analytics")]
    Success {
        tracker_id: String,
        operation_label: String,
        capability_id: String,
        model_id: String,
        timestamp: TimestampMs,
        duration_ms: i64,
        data: Value,
    },
    #[serde(rename = "analytics.error")]
    Error {
        tracker_id: String,
        operation_label: String,
        capability_id: String,
        model_id: String,
        timestamp: TimestampMs,
        duration_ms: i64,
        error: String,
        data: Value,
    },
}

/// Wraps capability executions with the registered tracker list.
pub struct AnalyticsWrapper {
    trackers: RwLock<Vec<Arc<dyn Tracker>>>,
    events: broadcast::Sender<AnalyticsEvent>,
}

impl Default for AnalyticsWrapper {
    fn default() -> Self {
        let (events, _rx) = broadcast::channel(1024);
        Self { trackers: RwLock::new(Vec::new()), events }
    }
}

impl AnalyticsWrapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tracker(&self, tracker: Arc<dyn Tracker>) {
        self.trackers.write().push(tracker);
    }

    /// Subscribe to emitted analytics events (e.g. for the HTTP log/event
    /// stream).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyticsEvent> {
        self.events.subscribe()
    }

    /// Run `f` wrapped by before/after/error hooks for every registered
    /// tracker, in registration order (`spec.md` §4.7).
    pub async fn run<F, Fut>(&self, ctx: ExecutionContext, f: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let trackers: Vec<Arc<dyn Tracker>> = self.trackers.read().clone();

        for tracker in &trackers {
            if let Err(e) = tracker.before_execution(&ctx).await {
                warn!(tracker = tracker.id(), error = %e, "tracker before_execution hook failed; isolated");
            }
        }

        match f().await {
            Ok(result) => {
                let duration_ms = crate::model::now_ms() - ctx.start_time;
                for tracker in &trackers {
                    let data = tracker.after_execution(&ctx, &result).await;
                    let _ = self.events.send(AnalyticsEvent::Success {
                        tracker_id: tracker.id().to_string(),
                        operation_label: ctx.operation_label.clone(),
                        capability_id: ctx.capability_id.clone(),
                        model_id: ctx.model_id.clone(),
                        timestamp: crate::model::now_ms(),
                        duration_ms,
                        data,
                    });
                }
                Ok(result)
            }
            Err(e) => {
                let duration_ms = crate::model::now_ms() - ctx.start_time;
                for tracker in &trackers {
                    let data = tracker.on_error(&ctx, &e).await;
                    let _ = self.events.send(AnalyticsEvent::Error {
                        tracker_id: tracker.id().to_string(),
                        operation_label: ctx.operation_label.clone(),
                        capability_id: ctx.capability_id.clone(),
                        model_id: ctx.model_id.clone(),
                        timestamp: crate::model::now_ms(),
                        duration_ms,
                        error: e.to_string(),
                        data,
                    });
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTracker {
        before: Arc<AtomicUsize>,
        after: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tracker for CountingTracker {
        fn id(&self) -> &str {
            "counting"
        }
        async fn before_execution(&self, _ctx: &ExecutionContext) -> Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn after_execution(&self, _ctx: &ExecutionContext, _result: &Value) -> Value {
            self.after.fetch_add(1, Ordering::SeqCst);
            json!({})
        }
        async fn on_error(&self, _ctx: &ExecutionContext, _error: &Error) -> Value {
            self.errors.fetch_add(1, Ordering::SeqCst);
            json!({})
        }
    }

    #[tokio::test]
    async fn success_runs_before_and_after_not_error() {
        let wrapper = AnalyticsWrapper::new();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        wrapper.register_tracker(Arc::new(CountingTracker {
            before: before.clone(),
            after: after.clone(),
            errors: errors.clone(),
        }));

        let ctx = ExecutionContext::new("cap".into(), "model".into(), "op", json!({}), None);
        let result = wrapper.run(ctx, || async { Ok(json!({"ok": true})) }).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_re_raises_after_on_error_hook() {
        let wrapper = AnalyticsWrapper::new();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        wrapper.register_tracker(Arc::new(CountingTracker {
            before: before.clone(),
            after: after.clone(),
            errors: errors.clone(),
        }));

        let ctx = ExecutionContext::new("cap".into(), "model".into(), "op", json!({}), None);
        let result = wrapper.run(ctx, || async { Err(Error::Internal("boom".into())) }).await;
        assert!(result.is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }
}
