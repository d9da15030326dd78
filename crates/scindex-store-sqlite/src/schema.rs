//! SQL schema for the scindex SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Pragmas for file-backed connections. In-memory databases skip WAL.
pub const DISK_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
";

/// Full index schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contracts (
    scid        TEXT PRIMARY KEY,           -- 64 lowercase hex chars
    owner       TEXT NOT NULL,
    height      INTEGER NOT NULL,           -- height the contract entered the index
    class       TEXT NOT NULL DEFAULT '',
    tags        TEXT NOT NULL DEFAULT '',   -- sorted, comma-joined
    code        TEXT,                       -- NULL when a class-only rule matched
    class_only  INTEGER NOT NULL DEFAULT 0
);

-- One row per observed write. Rows are only ever inserted; a second write of
-- the same key in the same block replaces the first.
CREATE TABLE IF NOT EXISTS variables (
    scid        TEXT NOT NULL,
    key_kind    TEXT NOT NULL,              -- 's' | 'u'
    key         TEXT NOT NULL,
    value_kind  TEXT NOT NULL,              -- 's' | 'u'
    value       TEXT NOT NULL,
    topoheight  INTEGER NOT NULL,
    PRIMARY KEY (scid, key_kind, key, topoheight)
);

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS contracts_class_idx  ON contracts(class);
CREATE INDEX IF NOT EXISTS variables_value_idx  ON variables(scid, value_kind, value);
CREATE INDEX IF NOT EXISTS variables_height_idx ON variables(scid, topoheight);

PRAGMA user_version = 1;
";

/// Schema of the standalone settings sub-store.
pub const SETTINGS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";
