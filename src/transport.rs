//! Transport capability: pub/sub plumbing the crate drives but does not
//! implement (SPEC_FULL.md §5). The transport's receive callback runs on a
//! transport-owned thread and may run concurrently with task-pool work.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Inbound message callback: `(full_topic, payload)`.
pub type InboundHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

pub trait Transport: Send + Sync {
    fn publish(&self, full_topic: &str, payload: &[u8]) -> Result<()>;
    fn subscribe(&self, full_topic: &str) -> Result<()>;
    fn unsubscribe(&self, full_topic: &str) -> Result<()>;
    /// Register the single callback invoked for every inbound message on any
    /// subscribed topic. Called once during client construction.
    fn set_inbound_handler(&self, handler: InboundHandler);
}

pub type ArcTransport = Arc<dyn Transport>;

#[cfg(test)]
pub struct RecordingTransport {
    pub published: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
    pub subscribed: std::sync::Mutex<Vec<String>>,
    handler: std::sync::Mutex<Option<InboundHandler>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            published: std::sync::Mutex::new(Vec::new()),
            subscribed: std::sync::Mutex::new(Vec::new()),
            handler: std::sync::Mutex::new(None),
        }
    }

    pub fn deliver(&self, full_topic: &str, payload: &[u8]) {
        if let Some(h) = self.handler.lock().unwrap().as_ref() {
            h(full_topic, payload);
        }
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn publish(&self, full_topic: &str, payload: &[u8]) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((full_topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, full_topic: &str) -> Result<()> {
        self.subscribed.lock().unwrap().push(full_topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, full_topic: &str) -> Result<()> {
        self.subscribed.lock().unwrap().retain(|t| t != full_topic);
        Ok(())
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_transport_tracks_publish_and_subscribe() {
        let t = RecordingTransport::new();
        t.subscribe("root/directive").unwrap();
        t.publish("root/event", b"x").unwrap();
        assert_eq!(t.subscribed.lock().unwrap().as_slice(), &["root/directive".to_string()]);
        assert_eq!(t.published.lock().unwrap().len(), 1);
        t.unsubscribe("root/directive").unwrap();
        assert!(t.subscribed.lock().unwrap().is_empty());
    }

    #[test]
    fn inbound_handler_receives_delivered_messages() {
        let t = RecordingTransport::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        t.set_inbound_handler(Arc::new(move |topic, payload| {
            s.lock().unwrap().push((topic.to_string(), payload.to_vec()));
        }));
        t.deliver("root/directive", b"payload");
        assert_eq!(seen.lock().unwrap()[0].0, "root/directive");
    }
}
