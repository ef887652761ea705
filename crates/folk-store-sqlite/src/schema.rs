//! SQL schema for the Folk SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Users and groups share one id space so ACL entries can name either.
CREATE TABLE IF NOT EXISTS principals (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL CHECK (kind IN ('user', 'group')),
    created_at  TEXT NOT NULL
);

-- Nested-set bounds are rewritten only by the tree renumbering path.
CREATE TABLE IF NOT EXISTS departments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    parent_id   INTEGER REFERENCES departments(id),
    lft         INTEGER NOT NULL,
    rgt         INTEGER NOT NULL,
    CHECK (lft < rgt)
);

CREATE TABLE IF NOT EXISTS people (
    principal_id  INTEGER PRIMARY KEY REFERENCES principals(id) ON DELETE CASCADE,
    login         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    firstname     TEXT NOT NULL,
    lastname      TEXT NOT NULL,
    mail          TEXT,
    admin         INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL,
    department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
    information   TEXT NOT NULL DEFAULT '{}',  -- JSON PeopleInformation
    tags          TEXT NOT NULL DEFAULT '[]',  -- JSON array
    custom_fields TEXT NOT NULL DEFAULT '{}'   -- JSON object
);

CREATE TABLE IF NOT EXISTS groups (
    principal_id  INTEGER PRIMARY KEY REFERENCES principals(id) ON DELETE CASCADE,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id    INTEGER NOT NULL REFERENCES groups(principal_id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES people(principal_id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS people_acl (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    principal_id  INTEGER NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    permission    TEXT NOT NULL,
    UNIQUE (principal_id, permission)
);

CREATE TABLE IF NOT EXISTS people_queries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    owner_id    INTEGER NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    is_public   INTEGER NOT NULL DEFAULT 0,
    spec_json   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS departments_lft_idx     ON departments(lft);
CREATE INDEX IF NOT EXISTS people_department_idx   ON people(department_id);
CREATE INDEX IF NOT EXISTS group_members_user_idx  ON group_members(user_id);

PRAGMA user_version = 1;
";
