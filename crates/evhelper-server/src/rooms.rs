//! City-scoped event fanout.
//!
//! The [`CityRouter`] owns the table of live fanout connections and their
//! room membership.  The lifecycle engine never touches sockets; it only
//! calls [`CityRouter::broadcast`] and [`CityRouter::send_to_user`], and the
//! WebSocket layer drains each connection's receiver.
//!
//! Delivery is best effort: events for a connection whose channel is full
//! are dropped, and `send_to_user` for a user with no live connection is a
//! silent no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use evhelper_shared::events::ServerEvent;
use evhelper_shared::rooms::room_key;
use evhelper_shared::types::UserId;

/// Per-connection event buffer; slow consumers beyond this drop events.
const CHANNEL_CAPACITY: usize = 256;

/// Identifies one live fanout connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    user_id: UserId,
    tx: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct RouterInner {
    connections: HashMap<ConnectionId, Connection>,
    /// Room key -> members.
    rooms: HashMap<String, HashSet<ConnectionId>>,
    /// Connection -> the one room it belongs to, if any.
    membership: HashMap<ConnectionId, String>,
    /// User -> that user's live connections.
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Maps city names to rooms and fans events out to room members and to
/// individual users.
#[derive(Clone, Default)]
pub struct CityRouter {
    inner: Arc<RwLock<RouterInner>>,
}

impl CityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for an authenticated user.  Returns the
    /// connection id and the receiver the transport layer must drain.
    pub async fn register(&self, user_id: UserId) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let conn_id = ConnectionId::new();

        let mut inner = self.inner.write().await;
        inner.connections.insert(conn_id, Connection { user_id, tx });
        inner.by_user.entry(user_id).or_default().insert(conn_id);

        info!(conn = %conn_id, user = %user_id, "fanout connection registered");
        (conn_id, rx)
    }

    /// Drop a connection and its room membership.
    pub async fn unregister(&self, conn_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        remove_from_room(&mut inner, conn_id);

        if let Some(conn) = inner.connections.remove(&conn_id) {
            if let Some(conns) = inner.by_user.get_mut(&conn.user_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    inner.by_user.remove(&conn.user_id);
                }
            }
            info!(conn = %conn_id, user = %conn.user_id, "fanout connection closed");
        }
    }

    /// Join the room for `city`, implicitly leaving any previous room.
    /// Idempotent.  Returns the normalized room key, or `None` for an
    /// unknown connection.
    pub async fn join_city(&self, conn_id: ConnectionId, city: &str) -> Option<String> {
        let key = room_key(city);

        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(&conn_id) {
            return None;
        }

        if inner.membership.get(&conn_id) == Some(&key) {
            return Some(key);
        }

        remove_from_room(&mut inner, conn_id);
        inner.rooms.entry(key.clone()).or_default().insert(conn_id);
        inner.membership.insert(conn_id, key.clone());

        info!(conn = %conn_id, room = %key, "joined city room");
        Some(key)
    }

    /// Leave the current city room, if any.  Returns whether a room was
    /// actually left.
    pub async fn leave_city(&self, conn_id: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        remove_from_room(&mut inner, conn_id)
    }

    /// Deliver an event to every connection joined to `room`.
    pub async fn broadcast(&self, room: &str, event: &ServerEvent) {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            debug!(room = %room, "broadcast to empty room");
            return;
        };

        for conn_id in members {
            if let Some(conn) = inner.connections.get(conn_id) {
                if conn.tx.try_send(event.clone()).is_err() {
                    debug!(conn = %conn_id, room = %room, "dropping event for slow connection");
                }
            }
        }
    }

    /// Deliver an event to all of one user's live connections.  A no-op
    /// when the user is not connected.
    pub async fn send_to_user(&self, user_id: UserId, event: &ServerEvent) {
        let inner = self.inner.read().await;
        let Some(conns) = inner.by_user.get(&user_id) else {
            return;
        };

        for conn_id in conns {
            if let Some(conn) = inner.connections.get(conn_id) {
                if conn.tx.try_send(event.clone()).is_err() {
                    debug!(conn = %conn_id, user = %user_id, "dropping event for slow connection");
                }
            }
        }
    }

    /// Number of connections currently joined to a room.
    pub async fn room_size(&self, room: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Detach `conn_id` from its room; prunes the room when it empties.
fn remove_from_room(inner: &mut RouterInner, conn_id: ConnectionId) -> bool {
    let Some(room) = inner.membership.remove(&conn_id) else {
        return false;
    };

    if let Some(members) = inner.rooms.get_mut(&room) {
        members.remove(&conn_id);
        if members.is_empty() {
            inner.rooms.remove(&room);
        }
    }

    debug!(conn = %conn_id, room = %room, "left city room");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taken_event() -> ServerEvent {
        use chrono::Utc;
        use evhelper_shared::events::RequestTaken;
        use evhelper_shared::types::{RequestId, RequestStatus};

        ServerEvent::RequestTaken(RequestTaken {
            request_id: RequestId::new(),
            status: RequestStatus::Accepted,
            accepted_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_room_members_only() {
        let router = CityRouter::new();

        let (in_room, mut rx_in) = router.register(UserId::new()).await;
        let (elsewhere, mut rx_out) = router.register(UserId::new()).await;

        router.join_city(in_room, "Austin").await.unwrap();
        router.join_city(elsewhere, "Boston").await.unwrap();

        router.broadcast("city-austin", &taken_event()).await;

        assert!(rx_in.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_is_idempotent_and_exclusive() {
        let router = CityRouter::new();
        let (conn, _rx) = router.register(UserId::new()).await;

        assert_eq!(
            router.join_city(conn, "Austin").await.as_deref(),
            Some("city-austin")
        );
        router.join_city(conn, "Austin").await.unwrap();
        assert_eq!(router.room_size("city-austin").await, 1);

        // Joining a second city implicitly leaves the first.
        router.join_city(conn, "Boston").await.unwrap();
        assert_eq!(router.room_size("city-austin").await, 0);
        assert_eq!(router.room_size("city-boston").await, 1);
    }

    #[tokio::test]
    async fn city_spellings_share_a_room() {
        let router = CityRouter::new();
        let (a, mut rx_a) = router.register(UserId::new()).await;
        let (b, mut rx_b) = router.register(UserId::new()).await;

        router.join_city(a, "New York").await.unwrap();
        router.join_city(b, "  new  york ").await.unwrap();

        router.broadcast("city-new-york", &taken_event()).await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_user_hits_all_their_connections() {
        let router = CityRouter::new();
        let user = UserId::new();

        let (_c1, mut rx1) = router.register(user).await;
        let (_c2, mut rx2) = router.register(user).await;
        let (_c3, mut rx3) = router.register(UserId::new()).await;

        router.send_to_user(user, &taken_event()).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());

        // Unknown user: silent no-op.
        router.send_to_user(UserId::new(), &taken_event()).await;
    }

    #[tokio::test]
    async fn unregister_cleans_up_membership() {
        let router = CityRouter::new();
        let user = UserId::new();
        let (conn, mut rx) = router.register(user).await;
        router.join_city(conn, "Austin").await.unwrap();

        router.unregister(conn).await;

        assert_eq!(router.room_size("city-austin").await, 0);
        router.broadcast("city-austin", &taken_event()).await;
        router.send_to_user(user, &taken_event()).await;
        assert!(rx.try_recv().is_err());

        assert!(router.join_city(conn, "Austin").await.is_none());
    }
}
