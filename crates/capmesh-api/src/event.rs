//! Push-event ingestion.
//!
//! Devices report attribute changes as discrete push events. An
//! [`EventHub`] is the ingestion point: transports hand it raw JSON
//! envelopes (or already-decoded events) and it fans them out through a
//! [`tokio::sync::broadcast`] channel to every subscriber.
//!
//! # Example
//!
//! ```rust,ignore
//! let hub = EventHub::new();
//! let mut rx = hub.subscribe();
//!
//! hub.ingest(r#"{ "events": [ { "eventType": "DEVICE_EVENT", "deviceEvent": { ... } } ] }"#);
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}/{}/{}", event.component_id, event.capability, event.attribute);
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

const DEVICE_EVENT_TYPE: &str = "DEVICE_EVENT";

// ── DeviceEvent ──────────────────────────────────────────────────────

/// A single attribute change pushed by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub device_id: String,

    /// Component the attribute lives on (`"main"` for the root).
    #[serde(default = "default_component")]
    pub component_id: String,

    pub capability: String,

    pub attribute: String,

    #[serde(default)]
    pub value: Value,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub data: Option<Value>,

    /// Whether the vendor considers this a state change (vs. a re-report).
    #[serde(default = "default_state_change")]
    pub state_change: bool,
}

fn default_component() -> String {
    crate::device::MAIN_COMPONENT.to_owned()
}

fn default_state_change() -> bool {
    true
}

impl DeviceEvent {
    pub fn new(
        device_id: impl Into<String>,
        component_id: impl Into<String>,
        capability: impl Into<String>,
        attribute: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            component_id: component_id.into(),
            capability: capability.into(),
            attribute: attribute.into(),
            value,
            unit: None,
            data: None,
            state_change: true,
        }
    }
}

// ── EventHub ─────────────────────────────────────────────────────────

/// Fan-out point for device push events.
///
/// Cheap to clone; all clones publish into the same channel. Subscribers
/// that fall behind receive [`broadcast::error::RecvError::Lagged`].
#[derive(Clone)]
pub struct EventHub {
    event_tx: broadcast::Sender<Arc<DeviceEvent>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Publish one decoded event. Returns the number of subscribers it reached.
    pub fn publish(&self, event: DeviceEvent) -> usize {
        // No subscribers is not an error -- nobody is listening yet.
        self.event_tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Decode a raw push envelope and publish every device event inside.
    ///
    /// Malformed envelopes and non-device events are dropped with a debug log.
    /// Returns how many device events were published.
    pub fn ingest(&self, text: &str) -> usize {
        let events = parse_envelope(text);
        let count = events.len();
        for event in events {
            self.publish(event);
        }
        count
    }

    /// Get a new receiver for the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DeviceEvent>> {
        self.event_tx.subscribe()
    }

    /// Subscribe as a `Stream` for use with `StreamExt` combinators.
    pub fn stream(&self) -> BroadcastStream<Arc<DeviceEvent>> {
        BroadcastStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

// ── Envelope parsing ─────────────────────────────────────────────────

/// Raw envelope pushed by the vendor: `{ "events": [ { "eventType", ... } ] }`.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(default)]
    events: Vec<Value>,
}

fn parse_envelope(text: &str) -> Vec<DeviceEvent> {
    let envelope: PushEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse push envelope");
            return Vec::new();
        }
    };

    envelope
        .events
        .into_iter()
        .filter_map(|raw| {
            let event_type = raw.get("eventType").and_then(Value::as_str).unwrap_or("");
            if event_type != DEVICE_EVENT_TYPE {
                tracing::trace!(event_type, "ignoring non-device push event");
                return None;
            }
            let body = raw.get("deviceEvent")?.clone();
            match serde_json::from_value::<DeviceEvent>(body) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::debug!(error = %e, "could not decode device event");
                    None
                }
            }
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_device_event_defaults() {
        let event: DeviceEvent = serde_json::from_value(json!({
            "deviceId": "d1",
            "capability": "switch",
            "attribute": "switch",
            "value": "on"
        }))
        .unwrap();
        assert_eq!(event.component_id, "main");
        assert!(event.state_change);
        assert!(event.unit.is_none());
    }

    #[test]
    fn ingest_publishes_device_events_only() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        let raw = json!({
            "events": [
                {
                    "eventType": "DEVICE_EVENT",
                    "deviceEvent": {
                        "deviceId": "d1",
                        "componentId": "main",
                        "capability": "switch",
                        "attribute": "switch",
                        "value": "off"
                    }
                },
                { "eventType": "TIMER_EVENT", "timerEvent": {} },
                { "eventType": "DEVICE_EVENT", "deviceEvent": { "deviceId": "d2" } }
            ]
        });

        assert_eq!(hub.ingest(&raw.to_string()), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.device_id, "d1");
        assert_eq!(event.value, json!("off"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ingest_malformed_json() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.ingest("not json at all"), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers() {
        let hub = EventHub::new();
        assert_eq!(hub.publish(DeviceEvent::new("d1", "main", "switch", "switch", json!("on"))), 0);
    }

    #[tokio::test]
    async fn stream_yields_published_events() {
        use futures_util::StreamExt;

        let hub = EventHub::new();
        let mut stream = hub.stream();
        hub.publish(DeviceEvent::new("d1", "main", "battery", "battery", json!(40)));

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.capability, "battery");
    }

    #[test]
    fn slow_subscriber_sees_lag() {
        let hub = EventHub::with_capacity(2);
        let mut rx = hub.subscribe();
        for level in 0..4 {
            hub.publish(DeviceEvent::new("d1", "main", "switchLevel", "level", json!(level)));
        }

        tokio_test::assert_err!(rx.try_recv());
        let event = tokio_test::assert_ok!(rx.try_recv());
        assert_eq!(event.value, json!(2));
    }
}
