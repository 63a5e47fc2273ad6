//! v001 -- Initial schema.
//!
//! Conversations with their members and permission overrides, the message
//! log, per-recipient delivery records and mute settings. Everything hangs
//! off `conversations` with `ON DELETE CASCADE`, so deleting a conversation
//! purges its history in one statement.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    kind             TEXT NOT NULL,               -- direct | group | channel
    name             TEXT,
    privacy          TEXT NOT NULL,               -- public | private
    comments_enabled INTEGER NOT NULL,
    default_mute     TEXT NOT NULL,               -- notify | muted
    created_at       TEXT NOT NULL                -- RFC-3339
);

CREATE TABLE IF NOT EXISTS members (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    role            TEXT NOT NULL,                -- member | admin | owner
    position        INTEGER NOT NULL,             -- join order
    joined_at       TEXT NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user_id ON members(user_id);

CREATE TABLE IF NOT EXISTS member_permissions (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    overrides       TEXT NOT NULL,                -- JSON, absent keys inherit

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    sequence        INTEGER NOT NULL,
    author_id       TEXT NOT NULL,
    content         TEXT NOT NULL,                -- JSON
    replied_to      TEXT,
    mentions        TEXT NOT NULL,                -- JSON array of user ids
    is_forwarded    INTEGER NOT NULL DEFAULT 0,
    is_edited       INTEGER NOT NULL DEFAULT 0,
    is_deleted      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    edited_at       TEXT,
    deleted_at      TEXT,

    UNIQUE (conversation_id, sequence),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Delivery records
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS deliveries (
    message_id   TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    state        INTEGER NOT NULL,                -- 0 sent, 1 delivered, 2 seen
    sent_at      TEXT NOT NULL,
    delivered_at TEXT,
    seen_at      TEXT,

    PRIMARY KEY (message_id, recipient_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Mutes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS mutes (
    user_id         TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    muted           INTEGER NOT NULL,
    mute_expires_at TEXT,                         -- NULL = until unmuted

    PRIMARY KEY (user_id, conversation_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
