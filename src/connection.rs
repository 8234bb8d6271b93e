//! Connection Manager: the session state machine and reconnect backoff
//! (SPEC_FULL.md §4.7).

use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::error::{ConnectAckCode, DisconnectCode};
use crate::task_pool::{ArcTaskPool, JobHandle};
use crate::topic::Topic;
use crate::transport::ArcTransport;

const ACK_DEADLINE_MS: u64 = 10_000;
const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// `backoff(n) = uniform(0, min(base * 2^n, maxBackoff))` milliseconds.
pub fn backoff_ms(retry_num: u32) -> u64 {
    let cap = BASE_BACKOFF_MS.saturating_mul(1u64 << retry_num.min(63)).min(MAX_BACKOFF_MS);
    if cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=cap)
    }
}

struct Inner {
    state: ConnectionState,
    retry_num: u32,
    ack_timer: Option<JobHandle>,
    reconnect_timer: Option<JobHandle>,
}

/// Callbacks the host/facade registers for connection lifecycle events.
pub struct ConnectionCallbacks {
    pub on_connected: Box<dyn Fn() + Send + Sync>,
    pub on_connect_rejected: Box<dyn Fn(ConnectAckCode) + Send + Sync>,
    pub on_disconnected: Box<dyn Fn(DisconnectCode) + Send + Sync>,
}

pub struct ConnectionManager {
    topic_root: String,
    aws_account_id: String,
    client_id: String,
    transport: ArcTransport,
    task_pool: ArcTaskPool,
    callbacks: ConnectionCallbacks,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(
        topic_root: String,
        aws_account_id: String,
        client_id: String,
        transport: ArcTransport,
        task_pool: ArcTaskPool,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        Self {
            topic_root,
            aws_account_id,
            client_id,
            transport,
            task_pool,
            callbacks,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                retry_num: 0,
                ack_timer: None,
                reconnect_timer: None,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    fn full(&self, topic: Topic) -> String {
        topic.full_topic(&self.topic_root)
    }

    pub fn connect(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = ConnectionState::Connecting;
        }
        let _ = self.transport.subscribe(&self.full(Topic::Directive));
        let _ = self.transport.subscribe(&self.full(Topic::Speaker));
        let _ = self.transport.subscribe(&self.full(Topic::CapabilitiesAcknowledge));
        let _ = self.transport.subscribe(&self.full(Topic::ConnectionFromService));

        let payload = serde_json::json!({
            "header": {"name": "Connect", "messageId": uuid::Uuid::new_v4().to_string()},
            "payload": {"awsAccountId": self.aws_account_id, "clientId": self.client_id},
        });
        let _ = self.transport.publish(
            &self.full(Topic::ConnectionFromClient),
            &serde_json::to_vec(&payload).unwrap_or_default(),
        );

        let this = self.clone();
        let handle = self.task_pool.schedule_after(
            ACK_DEADLINE_MS,
            Box::new(move || this.on_ack_timeout()),
        );
        self.inner.lock().unwrap().ack_timer = Some(handle);
    }

    fn on_ack_timeout(self: &Arc<Self>) {
        let still_connecting = matches!(self.inner.lock().unwrap().state, ConnectionState::Connecting);
        if !still_connecting {
            return;
        }
        let retry_num = {
            let mut inner = self.inner.lock().unwrap();
            let n = inner.retry_num;
            inner.retry_num += 1;
            n
        };
        let delay = backoff_ms(retry_num);
        let this = self.clone();
        let handle = self.task_pool.schedule_after(delay, Box::new(move || this.connect()));
        self.inner.lock().unwrap().reconnect_timer = Some(handle);
    }

    /// Handle `ConnectionAcknowledge` received from the service.
    pub fn on_ack(&self, code: &str, _description: Option<&str>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(h) = inner.ack_timer.take() {
                self.task_pool.try_cancel(h);
            }
        }
        let ack = ConnectAckCode::from_str(code);
        if matches!(ack, ConnectAckCode::ConnectionEstablished) {
            let mut inner = self.inner.lock().unwrap();
            inner.state = ConnectionState::Connected;
            inner.retry_num = 0;
            if let Some(h) = inner.reconnect_timer.take() {
                drop(inner);
                self.task_pool.try_cancel(h);
            }
            (self.callbacks.on_connected)();
        } else {
            (self.callbacks.on_connect_rejected)(ack);
        }
    }

    /// Client-initiated disconnect.
    pub fn disconnect(&self, code: DisconnectCode, description: Option<&str>) {
        self.inner.lock().unwrap().state = ConnectionState::Disconnecting;
        let _ = self.transport.unsubscribe(&self.full(Topic::Directive));
        let _ = self.transport.unsubscribe(&self.full(Topic::Speaker));
        let _ = self.transport.unsubscribe(&self.full(Topic::CapabilitiesAcknowledge));
        let _ = self.transport.unsubscribe(&self.full(Topic::ConnectionFromService));

        let mut payload = serde_json::json!({"code": code.as_str()});
        if let Some(desc) = description {
            payload["description"] = serde_json::Value::String(desc.to_string());
        }
        let envelope = serde_json::json!({
            "header": {"name": "Disconnect", "messageId": uuid::Uuid::new_v4().to_string()},
            "payload": payload,
        });
        let _ = self.transport.publish(
            &self.full(Topic::ConnectionFromClient),
            &serde_json::to_vec(&envelope).unwrap_or_default(),
        );
        self.inner.lock().unwrap().state = ConnectionState::Disconnected;
        (self.callbacks.on_disconnected)(code);
    }

    /// Handle a `Disconnect` pushed by the service.
    pub fn on_service_disconnect(&self, code: &str) {
        let _ = self.transport.unsubscribe(&self.full(Topic::Directive));
        let _ = self.transport.unsubscribe(&self.full(Topic::Speaker));
        let _ = self.transport.unsubscribe(&self.full(Topic::CapabilitiesAcknowledge));
        let _ = self.transport.unsubscribe(&self.full(Topic::ConnectionFromService));
        self.inner.lock().unwrap().state = ConnectionState::Disconnected;
        let typed = DisconnectCode::from_str(code).unwrap_or(DisconnectCode::GoingOffline);
        (self.callbacks.on_disconnected)(typed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_pool::ManualTaskPool;
    use crate::transport::RecordingTransport;
    use std::sync::atomic::{AtomicU32 as AU32, Ordering};

    fn make(transport: Arc<RecordingTransport>, pool: Arc<ManualTaskPool>, connected: Arc<AU32>, rejected: Arc<AU32>, disconnected: Arc<AU32>) -> Arc<ConnectionManager> {
        let c = connected.clone();
        let r = rejected.clone();
        let d = disconnected.clone();
        Arc::new(ConnectionManager::new(
            "root".to_string(),
            "acct".to_string(),
            "client".to_string(),
            transport,
            pool,
            ConnectionCallbacks {
                on_connected: Box::new(move || { c.fetch_add(1, Ordering::SeqCst); }),
                on_connect_rejected: Box::new(move |_code| { r.fetch_add(1, Ordering::SeqCst); }),
                on_disconnected: Box::new(move |_code| { d.fetch_add(1, Ordering::SeqCst); }),
            },
        ))
    }

    #[test]
    fn connect_subscribes_and_publishes_connect() {
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let (connected, rejected, disconnected) = (Arc::new(AU32::new(0)), Arc::new(AU32::new(0)), Arc::new(AU32::new(0)));
        let mgr = make(transport.clone(), pool, connected, rejected, disconnected);
        mgr.connect();
        assert_eq!(transport.subscribed.lock().unwrap().len(), 4);
        assert_eq!(transport.published.lock().unwrap().len(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    #[test]
    fn ack_established_transitions_to_connected_and_resets_retry() {
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let (connected, rejected, disconnected) = (Arc::new(AU32::new(0)), Arc::new(AU32::new(0)), Arc::new(AU32::new(0)));
        let mgr = make(transport, pool, connected.clone(), rejected, disconnected);
        mgr.connect();
        mgr.on_ack("CONNECTION_ESTABLISHED", None);
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ack_rejection_invokes_rejection_callback() {
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let (connected, rejected, disconnected) = (Arc::new(AU32::new(0)), Arc::new(AU32::new(0)), Arc::new(AU32::new(0)));
        let mgr = make(transport, pool, connected, rejected.clone(), disconnected);
        mgr.connect();
        mgr.on_ack("INVALID_CLIENT_ID", None);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_ne!(mgr.state(), ConnectionState::Connected);
    }

    #[test]
    fn ack_timeout_schedules_reconnect_with_backoff() {
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let (connected, rejected, disconnected) = (Arc::new(AU32::new(0)), Arc::new(AU32::new(0)), Arc::new(AU32::new(0)));
        let mgr = make(transport.clone(), pool.clone(), connected, rejected, disconnected);
        mgr.connect();
        assert_eq!(transport.published.lock().unwrap().len(), 1);
        pool.advance(ACK_DEADLINE_MS);
        // backoff(0) is in [0, base], so well under maxBackoff; advance past it.
        pool.advance(BASE_BACKOFF_MS + 1);
        assert_eq!(transport.published.lock().unwrap().len(), 2);
    }

    #[test]
    fn disconnect_unsubscribes_and_publishes_disconnect() {
        let transport = Arc::new(RecordingTransport::new());
        let pool = Arc::new(ManualTaskPool::new());
        let (connected, rejected, disconnected) = (Arc::new(AU32::new(0)), Arc::new(AU32::new(0)), Arc::new(AU32::new(0)));
        let mgr = make(transport.clone(), pool, connected, rejected, disconnected.clone());
        mgr.connect();
        mgr.on_ack("CONNECTION_ESTABLISHED", None);
        mgr.disconnect(DisconnectCode::GoingOffline, None);
        assert!(transport.subscribed.lock().unwrap().is_empty());
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn backoff_is_bounded_by_max() {
        for _ in 0..20 {
            assert!(backoff_ms(40) <= MAX_BACKOFF_MS);
        }
    }
}
