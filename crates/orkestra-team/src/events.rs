// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! An explicit event-sourcing wrapper around [`orkestra_session::Session`].
//! The coordinator passes a `&EventRecorder` into every method that needs
//! to record something — never a reflection-based decorator, never ambient
//! receiver-state capture. Every call renders its own parameters before
//! handing them to the recorder.

use orkestra_session::Session;
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_VERBATIM_ITEMS: usize = 10;

/// Wraps one JSON value the way a hand-written logging call would: small
/// primitives and short collections pass through verbatim, larger
/// collections collapse to a type-and-length summary, and anything else
/// becomes a `<TypeName instance>` placeholder.
pub fn render_param(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() <= MAX_VERBATIM_ITEMS => Value::Array(items.clone()),
        Value::Array(items) => json!({"type": "array", "length": items.len()}),
        Value::Object(map) if map.len() <= MAX_VERBATIM_ITEMS => Value::Object(map.clone()),
        Value::Object(map) => json!({"type": "object", "length": map.len()}),
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => value.clone(),
    }
}

/// Renders a `(name, value)` parameter list into the `parameters` object
/// attached to an event record.
pub fn render_params(pairs: &[(&str, Value)]) -> Value {
    Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), render_param(v))).collect())
}

/// Records `{function, module, parameters, status}` against the session's
/// append-only event log. `timestamp` is stamped by [`Session::record_event`].
pub struct EventRecorder {
    session: Arc<Session>,
}

impl EventRecorder {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Records a successful step.
    pub async fn record(&self, function: &str, module: &str, parameters: Value) {
        let data = json!({"module": module, "parameters": parameters, "status": "ok"});
        if let Err(e) = self.session.record_event(function, data).await {
            tracing::warn!(error = %e, function, "failed to record event");
        }
    }

    /// Records a step that raised: `exception` carries its type name and message.
    pub async fn record_failed(&self, function: &str, module: &str, parameters: Value, exception_type: &str, message: &str) {
        let data = json!({
            "module": module,
            "parameters": parameters,
            "status": "failed",
            "exception": {"type": exception_type, "message": message},
        });
        if let Err(e) = self.session.record_event(function, data).await {
            tracing::warn!(error = %e, function, "failed to record event");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_param_keeps_short_array_verbatim() {
        let v = json!(["a", "b", "c"]);
        assert_eq!(render_param(&v), v);
    }

    #[test]
    fn render_param_summarizes_long_array() {
        let items: Vec<Value> = (0..20).map(Value::from).collect();
        let v = Value::Array(items);
        let rendered = render_param(&v);
        assert_eq!(rendered["type"], "array");
        assert_eq!(rendered["length"], 20);
    }

    #[test]
    fn render_param_passes_primitives_through() {
        assert_eq!(render_param(&json!(42)), json!(42));
        assert_eq!(render_param(&json!("x")), json!("x"));
        assert_eq!(render_param(&json!(true)), json!(true));
        assert_eq!(render_param(&Value::Null), Value::Null);
    }

    #[test]
    fn render_params_builds_object_from_pairs() {
        let params = render_params(&[("role", json!("developer")), ("sequence", json!(0))]);
        assert_eq!(params["role"], "developer");
        assert_eq!(params["sequence"], 0);
    }

    #[tokio::test]
    async fn record_writes_ok_status_event() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new_session(root.path()).await.unwrap());
        let recorder = EventRecorder::new(session.clone());
        recorder.record("task_started", "coordinator", render_params(&[("role", json!("developer"))])).await;
        let events = session.get_events(Some("task_started")).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["status"], "ok");
        assert_eq!(events[0].data["parameters"]["role"], "developer");
    }

    #[tokio::test]
    async fn record_failed_writes_exception_block() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new_session(root.path()).await.unwrap());
        let recorder = EventRecorder::new(session.clone());
        recorder
            .record_failed("task_failed", "coordinator", render_params(&[("role", json!("developer"))]), "LoopStuck", "no progress")
            .await;
        let events = session.get_events(Some("task_failed")).await.unwrap();
        assert_eq!(events[0].data["status"], "failed");
        assert_eq!(events[0].data["exception"]["type"], "LoopStuck");
    }
}
