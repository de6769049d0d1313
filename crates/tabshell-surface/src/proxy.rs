//! Content message proxy
//!
//! Request/response correlation for messages exchanged with loaded content.
//! Each outbound request gets a proxy-wide unique id; the reply bearing that
//! id consumes the pending entry and runs its callback exactly once.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::SurfaceError;
use crate::surface::{Callback, RenderingSurface};
use crate::Result;

/// Map of correlation ids to the waiting request.
type CorrelationMap = HashMap<String, PendingRequest>;

struct PendingRequest {
    surface: String,
    callback: Callback<Value>,
}

pub struct MessageProxy {
    counter: AtomicU64,
    pending: Mutex<CorrelationMap>,
    closed: AtomicBool,
}

impl MessageProxy {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            pending: Mutex::new(CorrelationMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Post `message` into `surface`'s content and register `callback` for
    /// the reply. `message` must be a JSON object (or null); its `id` field
    /// is overwritten with the correlation id, which is also returned.
    pub fn send_message(
        &self,
        surface: &dyn RenderingSurface,
        message: Value,
        callback: Callback<Value>,
    ) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SurfaceError::ProxyClosed);
        }

        let mut data = match message {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(SurfaceError::InvalidMessage(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        let id = self.counter.fetch_add(1, Ordering::SeqCst).to_string();
        data.insert("id".to_string(), Value::String(id.clone()));
        let text = Value::Object(data).to_string();

        // Store correlation before sending
        self.pending.lock().insert(
            id.clone(),
            PendingRequest {
                surface: surface.label().to_string(),
                callback,
            },
        );
        surface.post_message(&text);

        tracing::trace!(id = %id, surface = %surface.label(), "Content request sent");
        Ok(id)
    }

    /// Route one inbound message. Returns whether a pending request was
    /// completed.
    ///
    /// Messages without data, without a parseable body or without an id are
    /// logged and dropped; no pending entry is touched.
    pub fn handle_message(&self, raw: Option<&str>) -> bool {
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            tracing::warn!("Message from guest contains no data");
            return false;
        };

        let data: Value = match serde_json::from_str(raw) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse message from guest");
                return false;
            }
        };

        let id = match data.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                tracing::warn!(message = %data, "Message from guest carries no correlation id");
                return false;
            }
        };

        let request = self.pending.lock().remove(&id);
        match request {
            Some(request) => {
                tracing::trace!(id = %id, surface = %request.surface, "Content reply received");
                (request.callback)(data);
                true
            }
            None => {
                tracing::warn!(id = %id, "Reply for unknown request");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pending_for(&self, surface: &str) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|request| request.surface == surface)
            .count()
    }

    /// Drop every pending request addressed to `surface`. Their callbacks
    /// never run.
    pub fn forget_surface(&self, surface: &str) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, request| request.surface != surface);
        let dropped = before - pending.len();

        if dropped > 0 {
            tracing::debug!(surface = %surface, dropped, "Dropped pending content requests");
        }
        dropped
    }

    /// Reject further sends and drop all pending requests.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = self.pending.lock().drain().count();
        tracing::debug!(dropped, "Message proxy shut down");
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MessageProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{CaptureParams, ClearDataOptions, ClearDataTypes, ScriptDescriptor};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Default)]
    struct Outbox {
        posted: Mutex<Vec<String>>,
    }

    impl RenderingSurface for Outbox {
        fn label(&self) -> &str {
            "outbox"
        }
        fn set_partition(&self, _partition: &str) {}
        fn navigate(&self, _url: &str) {}
        fn can_go_back(&self) -> bool {
            false
        }
        fn can_go_forward(&self) -> bool {
            false
        }
        fn back(&self) {}
        fn forward(&self) {}
        fn stop(&self) {}
        fn reload(&self) {}
        fn set_zoom(&self, _factor: f64) {}
        fn capture_visible_region(
            &self,
            _params: &CaptureParams,
            callback: Callback<Result<String>>,
        ) {
            callback(Ok(String::new()));
        }
        fn clear_data(
            &self,
            _options: &ClearDataOptions,
            _types: &ClearDataTypes,
            callback: Callback<Result<()>>,
        ) {
            callback(Ok(()));
        }
        fn execute_script(
            &self,
            _script: &ScriptDescriptor,
            callback: Callback<Result<Vec<Value>>>,
        ) {
            callback(Ok(Vec::new()));
        }
        fn post_message(&self, message: &str) {
            self.posted.lock().push(message.to_string());
        }
    }

    fn counting_callback(calls: &Arc<AtomicUsize>) -> Callback<Value> {
        let calls = Arc::clone(calls);
        Box::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_round_trip_consumes_entry_once() {
        let proxy = MessageProxy::new();
        let surface = Outbox::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let id = proxy
            .send_message(&surface, json!({"kind": "title"}), counting_callback(&calls))
            .unwrap();
        assert_eq!(proxy.pending(), 1);

        let posted: Value = serde_json::from_str(&surface.posted.lock()[0]).unwrap();
        assert_eq!(posted["id"], id.as_str());
        assert_eq!(posted["kind"], "title");

        let reply = json!({"id": id, "title": "Example"}).to_string();
        assert!(proxy.handle_message(Some(&reply)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.pending(), 0);

        // already consumed
        assert!(!proxy.handle_message(Some(&reply)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let proxy = MessageProxy::new();
        let surface = Outbox::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = proxy
            .send_message(&surface, Value::Null, counting_callback(&calls))
            .unwrap();
        let b = proxy
            .send_message(&surface, json!({}), counting_callback(&calls))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(proxy.pending_for("outbox"), 2);
    }

    #[test]
    fn test_malformed_messages_are_dropped() {
        let proxy = MessageProxy::new();
        let surface = Outbox::default();
        let calls = Arc::new(AtomicUsize::new(0));
        proxy
            .send_message(&surface, json!({}), counting_callback(&calls))
            .unwrap();

        assert!(!proxy.handle_message(None));
        assert!(!proxy.handle_message(Some("")));
        assert!(!proxy.handle_message(Some("not json")));
        assert!(!proxy.handle_message(Some(r#"{"title": "no id"}"#)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(proxy.pending(), 1);
    }

    #[test]
    fn test_non_object_message_rejected() {
        let proxy = MessageProxy::new();
        let surface = Outbox::default();
        let result = proxy.send_message(&surface, json!([1, 2]), Box::new(|_| {}));
        assert!(matches!(result, Err(SurfaceError::InvalidMessage(_))));
        assert_eq!(proxy.pending(), 0);
        assert!(surface.posted.lock().is_empty());
    }

    #[test]
    fn test_forget_and_shutdown() {
        let proxy = MessageProxy::new();
        let surface = Outbox::default();
        let calls = Arc::new(AtomicUsize::new(0));
        proxy
            .send_message(&surface, json!({}), counting_callback(&calls))
            .unwrap();
        proxy
            .send_message(&surface, json!({}), counting_callback(&calls))
            .unwrap();

        assert_eq!(proxy.forget_surface("outbox"), 2);
        assert_eq!(proxy.pending(), 0);

        proxy
            .send_message(&surface, json!({}), counting_callback(&calls))
            .unwrap();
        assert_eq!(proxy.shutdown(), 1);
        assert!(proxy.is_closed());
        assert_eq!(
            proxy.send_message(&surface, json!({}), counting_callback(&calls)),
            Err(SurfaceError::ProxyClosed)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
