//! Broadcast hub.
//!
//! Keeps the set of live socket connections and, per conversation, the
//! connections subscribed to it. Every connection owns a bounded outbound
//! queue; a publish never waits on a slow reader. When a queue is full the
//! connection is dropped: it is unsubscribed everywhere and its session is
//! told to close, so the client reconnects and catches up from history.
//!
//! The registry is sharded (`DashMap`) so unrelated conversations never
//! contend on one lock. A publish holds its conversation's entry for the
//! whole fan-out, which gives every subscriber the same event order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use huddle_proto::ServerEvent;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

use crate::error::{ChatError, ChatResult};

pub type ConnectionId = u64;

/// Decides whether a user may observe a conversation.
///
/// Blocking; the hub calls it from `spawn_blocking`.
pub trait MembershipCheck: Send + Sync + 'static {
    /// `NotFound` for an unknown conversation, `Forbidden` for a non-participant.
    fn check_membership(&self, conversation_id: &str, user_id: &str) -> ChatResult<()>;
}

/// Outcome of queueing one frame for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the connection has missed this frame
    Lagged,
    /// The session already went away
    Closed,
}

/// Counts from one `publish`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub stale: usize,
}

/// Hub-side view of one socket connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: String,
    tx: mpsc::Sender<Arc<str>>,
    subscriptions: Mutex<HashSet<String>>,
    lagged: AtomicBool,
    kicked: Notify,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_lagged(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }

    /// Resolves once the hub has dropped this connection.
    pub async fn kicked(&self) {
        self.kicked.notified().await
    }

    fn send_frame(&self, frame: Arc<str>) -> Delivery {
        if self.is_lagged() {
            return Delivery::Lagged;
        }
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.lagged.store(true, Ordering::Release);
                Delivery::Lagged
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Hub {
    membership: Arc<dyn MembershipCheck>,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// conversation_id -> subscribed connections
    subscriptions: DashMap<String, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Hub {
    pub fn new(membership: Arc<dyn MembershipCheck>, queue_capacity: usize) -> Self {
        Self {
            membership,
            connections: DashMap::new(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register an authenticated connection and hand back its outbound queue.
    pub fn register(&self, user_id: &str) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ConnectionHandle {
            id,
            user_id: user_id.to_string(),
            tx,
            subscriptions: Mutex::new(HashSet::new()),
            lagged: AtomicBool::new(false),
            kicked: Notify::new(),
        });
        self.connections.insert(id, handle.clone());
        debug!(connection_id = id, user_id, "Connection registered");
        (handle, rx)
    }

    /// Subscribe a connection after checking its user belongs to the
    /// conversation. On any error nothing is recorded.
    pub async fn subscribe(&self, connection_id: ConnectionId, conversation_id: &str) -> ChatResult<()> {
        let handle = self.handle(connection_id)?;

        let membership = self.membership.clone();
        let conversation = conversation_id.to_string();
        let user_id = handle.user_id.clone();
        tokio::task::spawn_blocking(move || membership.check_membership(&conversation, &user_id))
            .await??;

        self.subscriptions
            .entry(conversation_id.to_string())
            .or_default()
            .insert(connection_id, handle.clone());
        handle.lock_subscriptions().insert(conversation_id.to_string());

        // Deregistered while the membership check ran
        if !self.connections.contains_key(&connection_id) {
            self.detach(&handle);
            return Err(ChatError::not_found(format!("connection {}", connection_id)));
        }

        debug!(connection_id, conversation_id, "Subscribed");
        Ok(())
    }

    /// Returns whether the connection was subscribed.
    pub fn unsubscribe(&self, connection_id: ConnectionId, conversation_id: &str) -> bool {
        let Some(handle) = self.connections.get(&connection_id).map(|h| h.clone()) else {
            return false;
        };
        let was_subscribed = handle.lock_subscriptions().remove(conversation_id);
        self.remove_subscriber(conversation_id, connection_id);
        was_subscribed
    }

    /// Drop every subscription of a connection, returning how many there were.
    pub fn unsubscribe_all(&self, connection_id: ConnectionId) -> usize {
        match self.connections.get(&connection_id).map(|h| h.clone()) {
            Some(handle) => self.detach(&handle),
            None => 0,
        }
    }

    /// Forget a connection entirely. Safe to call more than once.
    pub fn deregister(&self, connection_id: ConnectionId) {
        if let Some((_, handle)) = self.connections.remove(&connection_id) {
            let released = self.detach(&handle);
            debug!(connection_id, released, "Connection deregistered");
        }
    }

    /// Fan an event out to every subscriber of the conversation.
    pub fn publish(&self, conversation_id: &str, event: &ServerEvent) -> PublishReport {
        let mut report = PublishReport::default();
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(conversation_id, "Failed to serialize event: {}", e);
                return report;
            }
        };

        let mut lagged = Vec::new();
        {
            // Write guard: concurrent publishes to one conversation take turns
            let Some(subscribers) = self.subscriptions.get_mut(conversation_id) else {
                return report;
            };
            for handle in subscribers.values() {
                match handle.send_frame(frame.clone()) {
                    Delivery::Queued => report.delivered += 1,
                    Delivery::Lagged => {
                        report.dropped += 1;
                        lagged.push(handle.clone());
                    }
                    Delivery::Closed => report.stale += 1,
                }
            }
        }

        for handle in lagged {
            self.drop_connection(&handle);
        }
        report
    }

    /// Queue a reply for a single connection, dropping it if its queue is full.
    pub fn send_direct(&self, handle: &Arc<ConnectionHandle>, event: &ServerEvent) -> Delivery {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(connection_id = handle.id, "Failed to serialize reply: {}", e);
                return Delivery::Closed;
            }
        };
        let delivery = handle.send_frame(frame);
        if delivery == Delivery::Lagged {
            self.drop_connection(handle);
        }
        delivery
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.subscriptions
            .get(conversation_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Conversations a connection is subscribed to, sorted
    pub fn subscriptions_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let Some(handle) = self.connections.get(&connection_id).map(|h| h.clone()) else {
            return Vec::new();
        };
        let mut conversations: Vec<String> = handle.lock_subscriptions().iter().cloned().collect();
        conversations.sort();
        conversations
    }

    fn handle(&self, connection_id: ConnectionId) -> ChatResult<Arc<ConnectionHandle>> {
        self.connections
            .get(&connection_id)
            .map(|h| h.clone())
            .ok_or_else(|| ChatError::not_found(format!("connection {}", connection_id)))
    }

    fn drop_connection(&self, handle: &Arc<ConnectionHandle>) {
        let released = self.detach(handle);
        warn!(
            connection_id = handle.id,
            user_id = %handle.user_id,
            released,
            "Outbound queue full, dropping connection"
        );
        handle.kicked.notify_one();
    }

    fn detach(&self, handle: &ConnectionHandle) -> usize {
        let conversations = std::mem::take(&mut *handle.lock_subscriptions());
        for conversation_id in &conversations {
            self.remove_subscriber(conversation_id, handle.id);
        }
        conversations.len()
    }

    fn remove_subscriber(&self, conversation_id: &str, connection_id: ConnectionId) {
        if let Some(mut subscribers) = self.subscriptions.get_mut(conversation_id) {
            subscribers.remove(&connection_id);
        }
        self.subscriptions
            .remove_if(conversation_id, |_, subscribers| subscribers.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_proto::Message;
    use std::time::Duration;

    /// conversation -> members; anything else is unknown
    struct Members(HashMap<&'static str, Vec<&'static str>>);

    impl MembershipCheck for Members {
        fn check_membership(&self, conversation_id: &str, user_id: &str) -> ChatResult<()> {
            match self.0.get(conversation_id) {
                None => Err(ChatError::not_found(conversation_id)),
                Some(members) if members.contains(&user_id) => Ok(()),
                Some(_) => Err(ChatError::forbidden(user_id)),
            }
        }
    }

    fn hub(capacity: usize) -> Hub {
        let members = Members(HashMap::from([
            ("c1", vec!["u1", "u2"]),
            ("c2", vec!["u1", "u3"]),
        ]));
        Hub::new(Arc::new(members), capacity)
    }

    fn event(n: usize) -> ServerEvent {
        ServerEvent::NewMessage {
            message: Message {
                id: format!("m{}", n),
                conversation_id: "c1".to_string(),
                sender_id: "u1".to_string(),
                content: Some(format!("hello {}", n)),
                media_url: None,
                media_type: None,
                replied_to_id: None,
                replied_to: None,
                is_pinned: false,
                created_at: n as i64,
                updated_at: n as i64,
                deleted_at: None,
            },
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame.to_string());
        }
        frames
    }

    #[tokio::test]
    async fn test_subscribe_and_publish_reaches_only_subscribers() {
        let hub = hub(16);
        let (a, mut rx_a) = hub.register("u1");
        let (b, mut rx_b) = hub.register("u2");
        let (c, mut rx_c) = hub.register("u3");

        hub.subscribe(a.id(), "c1").await.unwrap();
        hub.subscribe(b.id(), "c1").await.unwrap();
        hub.subscribe(c.id(), "c2").await.unwrap();

        let report = hub.publish("c1", &event(1));
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_subscribe_records_nothing() {
        let hub = hub(16);
        let (outsider, _rx) = hub.register("u3");

        let err = hub.subscribe(outsider.id(), "c1").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert_eq!(hub.subscriber_count("c1"), 0);
        assert!(hub.subscriptions_of(outsider.id()).is_empty());

        let err = hub.subscribe(outsider.id(), "nope").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection() {
        let hub = hub(16);
        let err = hub.subscribe(42, "c1").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_entry() {
        let hub = hub(16);
        let (a, mut rx) = hub.register("u1");
        hub.subscribe(a.id(), "c1").await.unwrap();
        hub.subscribe(a.id(), "c2").await.unwrap();

        assert!(hub.unsubscribe(a.id(), "c1"));
        assert!(!hub.unsubscribe(a.id(), "c1"));
        assert_eq!(hub.subscriber_count("c1"), 0);
        assert_eq!(hub.subscriptions_of(a.id()), vec!["c2"]);

        hub.publish("c1", &event(1));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_deregister_cleans_up() {
        let hub = hub(16);
        let (a, _rx) = hub.register("u1");
        hub.subscribe(a.id(), "c1").await.unwrap();
        hub.subscribe(a.id(), "c2").await.unwrap();

        hub.deregister(a.id());
        hub.deregister(a.id());

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.subscriber_count("c1"), 0);
        assert_eq!(hub.subscriber_count("c2"), 0);
        assert_eq!(hub.unsubscribe_all(a.id()), 0);
    }

    #[tokio::test]
    async fn test_publish_to_closed_connection_is_noop() {
        let hub = hub(16);
        let (a, rx) = hub.register("u1");
        hub.subscribe(a.id(), "c1").await.unwrap();
        drop(rx);

        let report = hub.publish("c1", &event(1));
        assert_eq!(report.stale, 1);
        assert_eq!(report.delivered, 0);
        assert!(!a.is_lagged());
    }

    #[tokio::test]
    async fn test_full_queue_drops_connection() {
        let hub = hub(2);
        let (slow, mut rx_slow) = hub.register("u1");
        let (fast, mut rx_fast) = hub.register("u2");
        hub.subscribe(slow.id(), "c1").await.unwrap();
        hub.subscribe(fast.id(), "c1").await.unwrap();

        hub.publish("c1", &event(1));
        hub.publish("c1", &event(2));
        drain(&mut rx_fast);

        let report = hub.publish("c1", &event(3));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
        assert!(slow.is_lagged());
        assert!(hub.subscriptions_of(slow.id()).is_empty());
        assert_eq!(hub.subscriber_count("c1"), 1);

        tokio::time::timeout(Duration::from_secs(1), slow.kicked())
            .await
            .expect("slow connection should be kicked");

        // The frames queued before the overflow are still there
        assert_eq!(drain(&mut rx_slow).len(), 2);
        assert_eq!(drain(&mut rx_fast).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_give_one_order() {
        let hub = Arc::new(hub(1024));
        let (a, mut rx_a) = hub.register("u1");
        let (b, mut rx_b) = hub.register("u2");
        hub.subscribe(a.id(), "c1").await.unwrap();
        hub.subscribe(b.id(), "c1").await.unwrap();

        let mut tasks = Vec::new();
        for worker in 0..4 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    hub.publish("c1", &event(worker * 100 + i));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let seen_a = drain(&mut rx_a);
        let seen_b = drain(&mut rx_b);
        assert_eq!(seen_a.len(), 200);
        assert_eq!(seen_a, seen_b);
    }
}
