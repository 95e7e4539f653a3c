use actix::Recipient;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::websocket::messages::Outbound;

/// Which endpoint a socket is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Chat,
    Room,
}

struct Connection {
    user_id: Uuid,
    channel: Channel,
    recipient: Recipient<Outbound>,
}

/// Live WebSocket sessions, keyed by session id.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, user_id: Uuid, channel: Channel, recipient: Recipient<Outbound>) {
        let mut connections = self.connections.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        connections.insert(
            id,
            Connection {
                user_id,
                channel,
                recipient,
            },
        );
        info!("Registered {:?} connection {} for user {}", channel, id, user_id);
    }

    pub fn unregister(&self, id: &Uuid) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let removed = connections.remove(id).is_some();
        if removed {
            info!("Removed connection {}", id);
        }
        removed
    }

    /// Send `text` to every connection on `channel` except `exclude`. Returns how many were reached.
    pub fn broadcast(&self, channel: Channel, text: &str, exclude: Option<Uuid>) -> usize {
        let connections = self.connections.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut reached = 0;

        for (id, connection) in connections.iter() {
            if connection.channel != channel || exclude == Some(*id) {
                continue;
            }
            if connection.recipient.connected() {
                connection.recipient.do_send(Outbound(text.to_string()));
                reached += 1;
            } else {
                debug!("Skipping disconnected session {}", id);
            }
        }
        reached
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel_count(&self, channel: Channel) -> usize {
        self.connections
            .read()
            .map(|c| c.values().filter(|conn| conn.channel == channel).count())
            .unwrap_or(0)
    }

    pub fn sessions_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        self.connections
            .read()
            .map(|c| {
                c.iter()
                    .filter(|(_, conn)| conn.user_id == user_id)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::{Actor, Context, Handler};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Collector {
        received: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<Outbound> for Collector {
        type Result = ();

        fn handle(&mut self, msg: Outbound, _: &mut Self::Context) {
            self.received.lock().unwrap().push(msg.0);
        }
    }

    fn collector() -> (Recipient<Outbound>, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector { received: received.clone() }.start();
        (addr.recipient(), received)
    }

    #[actix_rt::test]
    async fn test_registry_broadcast_by_channel() {
        let registry = ConnectionRegistry::new();
        let (room_a, received_a) = collector();
        let (room_b, received_b) = collector();
        let (chat, received_chat) = collector();

        let id_a = Uuid::new_v4();
        let user = Uuid::new_v4();
        registry.register(id_a, user, Channel::Room, room_a);
        registry.register(Uuid::new_v4(), Uuid::new_v4(), Channel::Room, room_b);
        registry.register(Uuid::new_v4(), user, Channel::Chat, chat);

        assert_eq!(registry.connection_count(), 3);
        assert_eq!(registry.channel_count(Channel::Room), 2);
        assert_eq!(registry.sessions_for_user(user).len(), 2);

        assert_eq!(registry.broadcast(Channel::Room, "hello", None), 2);
        assert_eq!(registry.broadcast(Channel::Room, "not you", Some(id_a)), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*received_a.lock().unwrap(), vec!["hello".to_string()]);
        assert_eq!(*received_b.lock().unwrap(), vec!["hello".to_string(), "not you".to_string()]);
        assert!(received_chat.lock().unwrap().is_empty());

        assert!(registry.unregister(&id_a));
        assert!(!registry.unregister(&id_a));
        assert_eq!(registry.channel_count(Channel::Room), 1);
    }
}
