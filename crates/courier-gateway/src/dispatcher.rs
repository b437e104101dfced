use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use courier_types::events::ServerEvent;
use courier_types::models::UserId;

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this connection only. Returns false once the
    /// connection's writer has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Tracks every live connection per user and fans events out to them.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> connections in registration order
    connections: RwLock<HashMap<UserId, Vec<ConnectionHandle>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`. Returns its handle and the
    /// receiver the connection's writer drains.
    pub async fn register(
        &self,
        user_id: UserId,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            tx,
        };
        self.inner
            .connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(handle.clone());
        (handle, rx)
    }

    /// Remove one connection. Once this returns, `publish` can no longer
    /// reach it.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(handles) = connections.get_mut(&user_id) {
            handles.retain(|h| h.id != conn_id);
            if handles.is_empty() {
                connections.remove(&user_id);
            }
        }
    }

    /// Deliver `event` to every live connection of `user_id`. Returns how many
    /// connections accepted it; zero for an offline user.
    pub async fn publish(&self, user_id: UserId, event: ServerEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let Some(handles) = connections.get(&user_id) else {
            trace!("publish to offline user {}", user_id);
            return 0;
        };

        let delivered = handles.iter().filter(|h| h.send(event.clone())).count();
        trace!("published to {}/{} connections of user {}", delivered, handles.len(), user_id);
        delivered
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, Vec::len)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connection_count(user_id).await > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerEvent {
        ServerEvent::error("ping")
    }

    #[tokio::test]
    async fn publish_reaches_every_connection_of_the_user() {
        let dispatcher = Dispatcher::new();
        let (_a, mut rx_a) = dispatcher.register(1).await;
        let (_b, mut rx_b) = dispatcher.register(1).await;
        let (_other, mut rx_other) = dispatcher.register(2).await;

        assert_eq!(dispatcher.publish(1, ping()).await, 2);
        assert_eq!(rx_a.recv().await, Some(ping()));
        assert_eq!(rx_b.recv().await, Some(ping()));
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_user_is_a_no_op() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.publish(7, ping()).await, 0);
        assert!(!dispatcher.is_online(7).await);
    }

    #[tokio::test]
    async fn unregister_stops_delivery_and_prunes() {
        let dispatcher = Dispatcher::new();
        let (first, mut rx_first) = dispatcher.register(1).await;
        let (second, mut rx_second) = dispatcher.register(1).await;

        dispatcher.unregister(1, first.id()).await;
        assert_eq!(dispatcher.connection_count(1).await, 1);
        assert_eq!(dispatcher.publish(1, ping()).await, 1);
        assert!(rx_first.try_recv().is_err());
        assert_eq!(rx_second.recv().await, Some(ping()));

        dispatcher.unregister(1, second.id()).await;
        assert!(dispatcher.inner.connections.read().await.get(&1).is_none());
        assert_eq!(dispatcher.publish(1, ping()).await, 0);
    }

    #[tokio::test]
    async fn concurrent_register_and_unregister_lose_nothing() {
        let dispatcher = Dispatcher::new();
        let mut tasks = Vec::new();
        for user in 0..8 {
            let d = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                let mut keep = Vec::new();
                for i in 0..20 {
                    let (handle, rx) = d.register(user).await;
                    if i % 2 == 0 {
                        d.unregister(user, handle.id()).await;
                    } else {
                        keep.push(rx);
                    }
                }
                keep
            }));
        }

        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }
        for user in 0..8 {
            assert_eq!(dispatcher.connection_count(user).await, 10);
        }
        drop(receivers);
    }
}
