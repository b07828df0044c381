use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{Message, MessageId, UserId, UserProfile};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewMessage, PeerList, SeenUpdate};

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, text, image, created_at, seen";

impl Database {
    /// Persist a message, assigning its id and timestamp.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let id = MessageId::new();
        let now = Utc::now();
        let millis = now.timestamp_millis();
        // Stored at millisecond precision; return exactly what a later read yields.
        let created_at = DateTime::from_timestamp_millis(millis).unwrap_or(now);

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, text, image, created_at, seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                id.to_string(),
                new.sender_id.as_str(),
                new.recipient_id.as_str(),
                new.text,
                new.image,
                millis,
            ],
        )?;

        tracing::debug!(
            message_id = %id,
            sender = %new.sender_id,
            recipient = %new.recipient_id,
            "message stored"
        );

        Ok(Message {
            id,
            sender_id: new.sender_id.clone(),
            recipient_id: new.recipient_id.clone(),
            text: new.text.clone(),
            image: new.image.clone(),
            created_at,
            seen: false,
        })
    }

    /// Every message exchanged between `a` and `b`, oldest first.
    pub fn list_messages_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at ASC, seq ASC"
        ))?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Users who exchanged at least one message with `user`, plus the number
    /// of messages each of them sent that `user` has not seen yet.
    pub fn list_peers(&self, user: &UserId) -> Result<PeerList> {
        let mut stmt = self.conn().prepare(
            "SELECT p.peer_id, u.display_name, u.avatar
             FROM (
                 SELECT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END AS peer_id,
                        MAX(created_at) AS last_at
                 FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1
                 GROUP BY peer_id
             ) p
             LEFT JOIN users u ON u.id = p.peer_id
             ORDER BY p.last_at DESC, p.peer_id ASC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            let peer_str: String = row.get(0)?;
            let display_name: Option<String> = row.get(1)?;
            let avatar: Option<String> = row.get(2)?;

            let id = parse_user_id(0, &peer_str)?;
            Ok(UserProfile {
                display_name: display_name.unwrap_or_else(|| peer_str.clone()),
                id,
                avatar,
            })
        })?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }

        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*)
             FROM messages
             WHERE recipient_id = ?1 AND seen = 0
             GROUP BY sender_id",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            let sender_str: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((parse_user_id(0, &sender_str)?, count))
        })?;

        let mut unseen = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            unseen.insert(sender, count);
        }

        Ok(PeerList { peers, unseen })
    }

    /// Flag a message as seen. Fails with [`StoreError::NotFound`] for
    /// unknown ids; a second call on the same id is a no-op.
    pub fn mark_seen(&self, id: MessageId) -> Result<SeenUpdate> {
        let affected = self.conn().execute(
            "UPDATE messages SET seen = 1 WHERE id = ?1 AND seen = 0",
            params![id.to_string()],
        )?;

        if affected > 0 {
            return Ok(SeenUpdate::Marked);
        }

        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;

        if exists {
            Ok(SeenUpdate::AlreadySeen)
        } else {
            Err(StoreError::NotFound)
        }
    }

    /// Read the conversation between `reader` and `peer` and flag the
    /// returned messages `peer` sent as seen, in one transaction. Messages
    /// stored after the read stay unseen. Returned records keep the flags
    /// they had before the update.
    pub fn open_conversation(&self, reader: &UserId, peer: &UserId) -> Result<Vec<Message>> {
        let tx = self.conn().unchecked_transaction()?;
        let messages = self.list_messages_between(reader, peer)?;

        let mut marked = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET seen = 1
                 WHERE id = ?1 AND recipient_id = ?2 AND seen = 0",
            )?;
            for message in messages
                .iter()
                .filter(|m| !m.seen && &m.recipient_id == reader)
            {
                marked += stmt.execute(params![message.id.to_string(), reader.as_str()])?;
            }
        }
        tx.commit()?;

        if marked > 0 {
            tracing::debug!(reader = %reader, peer = %peer, marked, "Conversation marked seen");
        }
        Ok(messages)
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn parse_user_id(column: usize, raw: &str) -> rusqlite::Result<UserId> {
    UserId::parse(raw).map_err(|e| conversion_error(column, e))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let recipient_str: String = row.get(2)?;
    let text: Option<String> = row.get(3)?;
    let image: Option<String> = row.get(4)?;
    let millis: i64 = row.get(5)?;
    let seen: bool = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;

    let created_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })?;

    Ok(Message {
        id: MessageId(id),
        sender_id: parse_user_id(1, &sender_str)?,
        recipient_id: parse_user_id(2, &recipient_str)?,
        text,
        image,
        created_at,
        seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::MessagePayload;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn text(db: &Database, from: &str, to: &str, body: &str) -> Message {
        let new = NewMessage::new(uid(from), uid(to), MessagePayload::text(body)).unwrap();
        db.insert_message(&new).unwrap()
    }

    #[test]
    fn insert_assigns_id_and_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let before = Utc::now() - chrono::Duration::seconds(1);

        let a = text(&db, "alice", "bob", "hi");
        let b = text(&db, "alice", "bob", "again");

        assert_ne!(a.id, b.id);
        assert!(a.created_at >= before);
        assert!(!a.seen);
        let stored = db.list_messages_between(&uid("alice"), &uid("bob")).unwrap();
        assert_eq!(stored, vec![a, b]);
    }

    #[test]
    fn list_between_is_scoped_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        text(&db, "alice", "bob", "1");
        text(&db, "bob", "alice", "2");
        text(&db, "alice", "carol", "other");
        text(&db, "alice", "bob", "3");

        let conv = db.list_messages_between(&uid("bob"), &uid("alice")).unwrap();
        let bodies: Vec<_> = conv.iter().map(|m| m.text.clone().unwrap()).collect();
        assert_eq!(bodies, vec!["1", "2", "3"]);
    }

    #[test]
    fn list_peers_counts_unseen_from_each_peer() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&UserProfile {
            id: uid("bob"),
            display_name: "Bob".into(),
            avatar: None,
        })
        .unwrap();

        text(&db, "bob", "alice", "one");
        let seen = text(&db, "bob", "alice", "two");
        text(&db, "carol", "alice", "hey");
        text(&db, "alice", "dave", "outgoing only");
        db.mark_seen(seen.id).unwrap();

        let list = db.list_peers(&uid("alice")).unwrap();
        let ids: Vec<_> = list.peers.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"bob".to_string()));
        assert!(ids.contains(&"carol".to_string()));
        assert!(ids.contains(&"dave".to_string()));

        let bob = list.peers.iter().find(|p| p.id == uid("bob")).unwrap();
        assert_eq!(bob.display_name, "Bob");
        let carol = list.peers.iter().find(|p| p.id == uid("carol")).unwrap();
        assert_eq!(carol.display_name, "carol");

        assert_eq!(list.unseen.get(&uid("bob")), Some(&1));
        assert_eq!(list.unseen.get(&uid("carol")), Some(&1));
        assert_eq!(list.unseen.get(&uid("dave")), None);
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let msg = text(&db, "bob", "alice", "hi");

        assert_eq!(db.mark_seen(msg.id).unwrap(), SeenUpdate::Marked);
        assert_eq!(db.mark_seen(msg.id).unwrap(), SeenUpdate::AlreadySeen);
        let stored = db.list_messages_between(&uid("alice"), &uid("bob")).unwrap();
        assert!(stored[0].seen);
    }

    #[test]
    fn mark_seen_unknown_id_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.mark_seen(MessageId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn open_conversation_marks_only_what_it_returns() {
        let db = Database::open_in_memory().unwrap();
        text(&db, "bob", "alice", "one");
        text(&db, "bob", "alice", "two");
        text(&db, "alice", "bob", "reply");
        text(&db, "carol", "alice", "elsewhere");

        let opened = db.open_conversation(&uid("alice"), &uid("bob")).unwrap();
        assert_eq!(opened.len(), 3);
        assert!(opened.iter().all(|m| !m.seen));

        let later = text(&db, "bob", "alice", "after opening");

        let list = db.list_peers(&uid("alice")).unwrap();
        assert_eq!(list.unseen.get(&uid("bob")), Some(&1));
        assert_eq!(list.unseen.get(&uid("carol")), Some(&1));

        // The reader's own messages are left for the peer to see.
        let list = db.list_peers(&uid("bob")).unwrap();
        assert_eq!(list.unseen.get(&uid("alice")), Some(&1));

        let reopened = db.open_conversation(&uid("alice"), &uid("bob")).unwrap();
        let unseen: Vec<_> = reopened.iter().filter(|m| !m.seen).map(|m| m.id).collect();
        assert_eq!(unseen.len(), 2);
        assert!(unseen.contains(&later.id));
        assert!(db.list_peers(&uid("alice")).unwrap().unseen.is_empty());
    }

    #[test]
    fn schema_rejects_empty_rows() {
        let db = Database::open_in_memory().unwrap();
        let res = db.conn().execute(
            "INSERT INTO messages (id, sender_id, recipient_id, created_at) VALUES ('x', 'a', 'b', 0)",
            [],
        );
        assert!(res.is_err());
    }
}
