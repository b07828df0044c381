//! v001 -- Initial schema creation.
//!
//! Creates the `users` directory and the `messages` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profiles synced from the identity service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- opaque identity-service id
    display_name TEXT NOT NULL,
    avatar       TEXT,
    updated_at   TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT, -- insertion order tie-breaker
    id           TEXT NOT NULL UNIQUE,              -- UUID v4
    sender_id    TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    text         TEXT,
    image        TEXT,                              -- data URI
    created_at   INTEGER NOT NULL,                  -- unix millis
    seen         INTEGER NOT NULL DEFAULT 0,        -- boolean 0/1

    CHECK (text IS NOT NULL OR image IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, recipient_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_unseen
    ON messages(recipient_id, seen);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
