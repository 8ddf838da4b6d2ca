//! Table and index definitions for the session/memory/task store.
//!
//! The FTS5 table uses external-content syncing (`content=`/`content_rowid=`)
//! with insert/update/delete triggers, the same mechanism
//! `session_db.py::_create_tables` uses — kept rather than a simpler
//! contentless table because it lets `memory_fts` rows carry the same
//! rowid as `memory`, which makes the `JOIN ... ON m.id = fts.rowid`
//! pattern in `search_memory` a plain rowid join instead of a key lookup.

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_key TEXT UNIQUE NOT NULL,
    chat_id INTEGER NOT NULL,
    agent_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    model_message_history TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_key ON sessions(session_key);
CREATE INDEX IF NOT EXISTS idx_sessions_chat_id ON sessions(chat_id);
CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    tool_name TEXT,
    tool_params TEXT,
    tool_result TEXT,
    metadata TEXT,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);

CREATE TABLE IF NOT EXISTS memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE NOT NULL,
    category TEXT NOT NULL,
    l0_abstract TEXT NOT NULL,
    l1_overview TEXT,
    l2_details TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    access_count INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_memory_key ON memory(key);
CREATE INDEX IF NOT EXISTS idx_memory_category ON memory(category);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    key, category, l0_abstract, l1_overview, l2_details,
    content='memory',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS memory_ai AFTER INSERT ON memory BEGIN
    INSERT INTO memory_fts(rowid, key, category, l0_abstract, l1_overview, l2_details)
    VALUES (new.id, new.key, new.category, new.l0_abstract, new.l1_overview, new.l2_details);
END;

CREATE TRIGGER IF NOT EXISTS memory_ad AFTER DELETE ON memory BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, key, category, l0_abstract, l1_overview, l2_details)
    VALUES('delete', old.id, old.key, old.category, old.l0_abstract, old.l1_overview, old.l2_details);
END;

CREATE TRIGGER IF NOT EXISTS memory_au AFTER UPDATE ON memory BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, key, category, l0_abstract, l1_overview, l2_details)
    VALUES('delete', old.id, old.key, old.category, old.l0_abstract, old.l1_overview, old.l2_details);
    INSERT INTO memory_fts(rowid, key, category, l0_abstract, l1_overview, l2_details)
    VALUES (new.id, new.key, new.category, new.l0_abstract, new.l1_overview, new.l2_details);
END;

CREATE TABLE IF NOT EXISTS resumable_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    chat_id INTEGER NOT NULL,
    goal TEXT NOT NULL,
    status TEXT NOT NULL,
    resume_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    resumed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_resumable_session ON resumable_tasks(session_id);
CREATE INDEX IF NOT EXISTS idx_resumable_status ON resumable_tasks(status);
"#;
