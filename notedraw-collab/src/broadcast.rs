//! Per-drawing fan-out for the relay server.
//!
//! Uses tokio broadcast channels: one send reaches every member's
//! receiver. Each receiver buffers up to `capacity` frames; a member that
//! falls further behind skips frames (and is told how many it lost).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::error::CollabError;
use crate::protocol::{Collaborator, MemberNotice, ServerMessage};

/// A pre-encoded frame plus the member it must not be echoed to.
#[derive(Debug)]
pub struct Envelope {
    pub exclude: Option<String>,
    pub frame: Arc<str>,
}

impl Envelope {
    /// Whether `user_id` should receive this frame.
    pub fn is_for(&self, user_id: &str) -> bool {
        self.exclude.as_deref() != Some(user_id)
    }
}

/// Statistics for monitoring a room.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub frames_sent: u64,
    pub members: usize,
}

/// Members of one drawing and their shared broadcast channel.
pub struct Room {
    sender: broadcast::Sender<Arc<Envelope>>,
    /// Join order is preserved; it is the order clients see.
    members: RwLock<Vec<Collaborator>>,
    capacity: usize,
    frames_sent: AtomicU64,
}

impl Room {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: RwLock::new(Vec::new()),
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Add a member and return its receiver.
    pub async fn join(&self, member: Collaborator) -> broadcast::Receiver<Arc<Envelope>> {
        let mut members = self.members.write().await;
        members.retain(|m| m.user_id != member.user_id);
        members.push(member);
        self.sender.subscribe()
    }

    pub async fn leave(&self, user_id: &str) -> Option<Collaborator> {
        let mut members = self.members.write().await;
        let index = members.iter().position(|m| m.user_id == user_id)?;
        Some(members.remove(index))
    }

    /// Record a member's latest cursor position.
    pub async fn update_cursor(&self, user_id: &str, x: f64, y: f64) -> bool {
        let mut members = self.members.write().await;
        match members.iter_mut().find(|m| m.user_id == user_id) {
            Some(member) => {
                member.cursor_x = Some(x);
                member.cursor_y = Some(y);
                true
            }
            None => false,
        }
    }

    pub async fn members(&self) -> Vec<Collaborator> {
        self.members.read().await.clone()
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Encode once and fan out to every member except `exclude`.
    ///
    /// Returns the number of receivers the frame was queued for.
    pub fn broadcast(&self, msg: &ServerMessage, exclude: Option<&str>) -> Result<usize, CollabError> {
        let frame: Arc<str> = msg.encode()?.into();
        let envelope = Arc::new(Envelope {
            exclude: exclude.map(str::to_string),
            frame,
        });
        let count = self.sender.send(envelope).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            members: self.member_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A member's seat in a room, handed back by [`RoomManager::join`].
pub struct Joined {
    pub room: Arc<Room>,
    pub rx: broadcast::Receiver<Arc<Envelope>>,
    /// Member list right after the join, joiner included.
    pub members: Vec<Collaborator>,
}

/// Maps drawing ids to rooms, isolating drawings from each other.
///
/// Membership changes run under the map's write lock, so a room is never
/// dropped while someone is joining it and membership notices go out in
/// the order the changes happened.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Find or create the room for `drawing_id`, add `member` and announce
    /// it to the others with `user_joined`.
    ///
    /// Returns `None` if the room already holds `max_members`.
    pub async fn join(&self, drawing_id: &str, member: Collaborator, max_members: usize) -> Option<Joined> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(drawing_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(self.default_capacity)))
            .clone();

        if room.member_count().await >= max_members.max(1) {
            return None;
        }

        let joiner = member.user_id.clone();
        let notice = MemberNotice {
            user_id: joiner.clone(),
            user_name: member.user_name.clone(),
            user_color: Some(member.user_color.clone()),
        };
        let rx = room.join(member).await;
        let members = room.members().await;

        let joined = ServerMessage::UserJoined {
            data: notice,
            collaborators: members.clone(),
        };
        if let Err(e) = room.broadcast(&joined, Some(&joiner)) {
            log::error!("Failed to announce join in drawing {drawing_id}: {e}");
        }

        Some(Joined { room, rx, members })
    }

    /// Remove `user_id`, announce `user_left` with the residual list and
    /// drop the room once it is empty.
    ///
    /// Returns `true` if the room was dropped.
    pub async fn leave(&self, drawing_id: &str, user_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(drawing_id).cloned() else {
            return false;
        };

        if let Some(member) = room.leave(user_id).await {
            let left = ServerMessage::UserLeft {
                data: MemberNotice {
                    user_id: member.user_id,
                    user_name: member.user_name,
                    user_color: None,
                },
                collaborators: room.members().await,
            };
            if let Err(e) = room.broadcast(&left, Some(user_id)) {
                log::error!("Failed to announce departure of {user_id}: {e}");
            }
        }

        if room.member_count().await == 0 {
            rooms.remove(drawing_id);
            return true;
        }
        false
    }

    pub async fn get(&self, drawing_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(drawing_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_drawings(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Collaborator {
        Collaborator::new(id, id.to_uppercase(), "#FFEAA7")
    }

    fn joined(id: &str, collaborators: Vec<Collaborator>) -> ServerMessage {
        ServerMessage::UserJoined {
            data: MemberNotice {
                user_id: id.into(),
                user_name: id.into(),
                user_color: None,
            },
            collaborators,
        }
    }

    #[tokio::test]
    async fn test_room_join_leave_keeps_order() {
        let room = Room::new(16);
        let _a = room.join(member("a")).await;
        let _b = room.join(member("b")).await;
        let _c = room.join(member("c")).await;

        let ids: Vec<String> = room.members().await.into_iter().map(|m| m.user_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert_eq!(room.leave("b").await.unwrap().user_id, "b");
        assert!(room.leave("b").await.is_none());
        assert_eq!(room.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out_with_exclusion() {
        let room = Room::new(16);
        let mut rx_a = room.join(member("a")).await;
        let mut rx_b = room.join(member("b")).await;

        let count = room.broadcast(&joined("b", room.members().await), Some("b")).unwrap();
        // Every receiver gets the envelope; exclusion is applied by the reader.
        assert_eq!(count, 2);

        let for_a = rx_a.recv().await.unwrap();
        let for_b = rx_b.recv().await.unwrap();
        assert!(for_a.is_for("a"));
        assert!(!for_b.is_for("b"));
        assert!(for_a.frame.contains("\"user_joined\""));
    }

    #[tokio::test]
    async fn test_update_cursor() {
        let room = Room::new(4);
        let _rx = room.join(member("a")).await;

        assert!(room.update_cursor("a", 12.0, 7.5).await);
        assert!(!room.update_cursor("ghost", 0.0, 0.0).await);

        let members = room.members().await;
        assert_eq!(members[0].cursor_x, Some(12.0));
        assert_eq!(members[0].cursor_y, Some(7.5));
    }

    #[tokio::test]
    async fn test_rejoin_replaces_entry() {
        let room = Room::new(4);
        let _rx1 = room.join(member("a")).await;
        let _rx2 = room.join(member("a")).await;
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_room_stats() {
        let room = Room::new(8);
        let _rx = room.join(member("a")).await;
        room.broadcast(&ServerMessage::Pong {}, None).unwrap();
        room.broadcast(&ServerMessage::Pong {}, None).unwrap();

        let stats = room.stats().await;
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.members, 1);
        assert_eq!(room.capacity(), 8);
    }

    #[tokio::test]
    async fn test_room_manager_join_shares_room() {
        let manager = RoomManager::new(16);
        let a = manager.join("d1", member("a"), 10).await.unwrap();
        let b = manager.join("d1", member("b"), 10).await.unwrap();

        assert!(Arc::ptr_eq(&a.room, &b.room));
        assert_eq!(manager.room_count().await, 1);
        assert!(manager.get("d2").await.is_none());

        let ids: Vec<String> = b.members.into_iter().map(|m| m.user_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_room_manager_join_announces_to_others() {
        let manager = RoomManager::new(16);
        let mut a = manager.join("d1", member("a"), 10).await.unwrap();
        let mut b = manager.join("d1", member("b"), 10).await.unwrap();

        let envelope = a.rx.recv().await.unwrap();
        assert!(envelope.is_for("a"));
        match ServerMessage::decode(&envelope.frame).unwrap() {
            ServerMessage::UserJoined { data, collaborators } => {
                assert_eq!(data.user_id, "b");
                assert_eq!(collaborators.len(), 2);
            }
            other => panic!("Expected UserJoined, got {other:?}"),
        }
        // The joiner's own receiver sees the frame but it is excluded.
        assert!(!b.rx.recv().await.unwrap().is_for("b"));
    }

    #[tokio::test]
    async fn test_room_manager_rejects_when_full() {
        let manager = RoomManager::new(16);
        let _a = manager.join("d1", member("a"), 1).await.unwrap();
        assert!(manager.join("d1", member("b"), 1).await.is_none());

        let room = manager.get("d1").await.unwrap();
        assert_eq!(room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_room_manager_isolation() {
        let manager = RoomManager::new(16);
        let mut a = manager.join("d1", member("a"), 10).await.unwrap();
        let b = manager.join("d2", member("b"), 10).await.unwrap();

        b.room.broadcast(&ServerMessage::Pong {}, None).unwrap();
        assert!(a.rx.try_recv().is_err());

        let mut drawings = manager.active_drawings().await;
        drawings.sort();
        assert_eq!(drawings, vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_room_manager_leave_announces_and_cleans_up() {
        let manager = RoomManager::new(16);
        let mut a = manager.join("d1", member("a"), 10).await.unwrap();
        let _b = manager.join("d1", member("b"), 10).await.unwrap();
        let _ = a.rx.recv().await.unwrap();

        assert!(!manager.leave("d1", "b").await);
        match ServerMessage::decode(&a.rx.recv().await.unwrap().frame).unwrap() {
            ServerMessage::UserLeft { data, collaborators } => {
                assert_eq!(data.user_id, "b");
                let ids: Vec<String> = collaborators.into_iter().map(|m| m.user_id).collect();
                assert_eq!(ids, vec!["a"]);
            }
            other => panic!("Expected UserLeft, got {other:?}"),
        }

        assert!(manager.leave("d1", "a").await);
        assert_eq!(manager.room_count().await, 0);
        assert!(!manager.leave("d1", "a").await);
    }

    #[tokio::test]
    async fn test_rejoin_after_empty_room_is_shared() {
        let manager = RoomManager::new(16);
        let _a = manager.join("d1", member("a"), 10).await.unwrap();
        assert!(manager.leave("d1", "a").await);

        let mut b = manager.join("d1", member("b"), 10).await.unwrap();
        let c = manager.join("d1", member("c"), 10).await.unwrap();

        let registered = manager.get("d1").await.unwrap();
        assert!(Arc::ptr_eq(&b.room, &c.room));
        assert!(Arc::ptr_eq(&b.room, &registered));

        let envelope = b.rx.recv().await.unwrap();
        assert!(envelope.frame.contains("\"user_joined\""));
        assert!(envelope.frame.contains("\"c\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_churn_never_splits_a_drawing() {
        let manager = Arc::new(RoomManager::new(16));

        for round in 0..200 {
            let first = format!("a{round}");
            let _ = manager.join("d1", member(&first), 10).await.unwrap();

            let leaving = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.leave("d1", &first).await })
            };
            let joining_b = {
                let manager = manager.clone();
                let id = format!("b{round}");
                tokio::spawn(async move { manager.join("d1", member(&id), 10).await.map(|j| j.room) })
            };
            let joining_c = {
                let manager = manager.clone();
                let id = format!("c{round}");
                tokio::spawn(async move { manager.join("d1", member(&id), 10).await.map(|j| j.room) })
            };

            leaving.await.unwrap();
            let room_b = joining_b.await.unwrap().unwrap();
            let room_c = joining_c.await.unwrap().unwrap();
            let registered = manager.get("d1").await.unwrap();

            assert!(Arc::ptr_eq(&room_b, &room_c), "round {round}: joiners split");
            assert!(Arc::ptr_eq(&room_b, &registered), "round {round}: room orphaned");

            manager.leave("d1", &format!("b{round}")).await;
            manager.leave("d1", &format!("c{round}")).await;
            assert_eq!(manager.room_count().await, 0);
        }
    }
}
