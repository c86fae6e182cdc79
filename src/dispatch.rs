//! Dispatch policy
//!
//! Decides whether a broadcast message reaches a given connection.

use crate::connection::Connection;
use crate::message::{Message, MessageKind};

/// Room-based delivery decision for `broadcast`
///
/// Notices (join, leave, system) reach everyone. Ordinary messages reach
/// connections without a room and connections in the message's room.
/// Group sends do not go through this function; membership alone gates them.
pub fn deliver(connection: &Connection, message: &Message) -> bool {
    if message.kind != MessageKind::Message {
        return true;
    }
    connection.room.is_empty() || connection.room == message.room
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::StateCell;
    use crate::message::MessageDraft;
    use crate::types::ConnectionId;
    use tokio::sync::mpsc;

    fn conn_in(room: &str) -> Connection {
        let (tx, _rx) = mpsc::channel(1);
        Connection::new(ConnectionId::new(), tx, StateCell::new()).with_identity("peer", room)
    }

    fn msg(kind: MessageKind, room: &str) -> Message {
        Message::from_draft(MessageDraft::new("sys", "hi", room).with_kind(kind))
    }

    #[test]
    fn test_firehose_sees_every_room() {
        let conn = conn_in("");
        assert!(deliver(&conn, &msg(MessageKind::Message, "lobby")));
        assert!(deliver(&conn, &msg(MessageKind::Message, "game")));
        assert!(deliver(&conn, &msg(MessageKind::Message, "")));
    }

    #[test]
    fn test_room_scoped_sees_own_room_only() {
        let conn = conn_in("lobby");
        assert!(deliver(&conn, &msg(MessageKind::Message, "lobby")));
        assert!(!deliver(&conn, &msg(MessageKind::Message, "game")));
        assert!(!deliver(&conn, &msg(MessageKind::Message, "")));
    }

    #[test]
    fn test_notices_ignore_rooms() {
        let conn = conn_in("lobby");
        for kind in [MessageKind::Join, MessageKind::Leave, MessageKind::System] {
            assert!(deliver(&conn, &msg(kind, "game")));
            assert!(deliver(&conn, &msg(kind, "")));
        }
    }
}
