//! Schema migrations, tracked with `PRAGMA user_version` the way the
//! original lifelog/task/observability stores did it: each connection
//! opening against a stale `user_version` runs the missing `ALTER`/
//! `CREATE` statements and bumps the pragma, so opening an already
//! current database is a no-op.

use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        migrate_to_v1(conn)?;
    }
    conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    Ok(())
}

fn migrate_to_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS device_sessions (
            device_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            state TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            closed_at INTEGER,
            close_reason TEXT,
            last_inbound_seq INTEGER NOT NULL,
            last_outbound_seq INTEGER NOT NULL,
            metadata_json TEXT NOT NULL,
            telemetry_json TEXT NOT NULL,
            pending_audio_json TEXT NOT NULL,
            PRIMARY KEY (device_id, session_id)
        );

        CREATE TABLE IF NOT EXISTS device_bindings (
            device_id TEXT PRIMARY KEY,
            device_token TEXT NOT NULL,
            status TEXT NOT NULL,
            user_id TEXT,
            activated_at INTEGER,
            revoked_at INTEGER,
            revoke_reason TEXT,
            metadata_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS device_operations (
            operation_id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            op_type TEXT NOT NULL,
            command_type TEXT NOT NULL,
            status TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            result_json TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            acked_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS digital_tasks (
            task_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            device_id TEXT,
            goal TEXT NOT NULL,
            status TEXT NOT NULL,
            steps_json TEXT NOT NULL,
            result_json TEXT,
            error TEXT,
            timeout_seconds INTEGER NOT NULL,
            push_device_id TEXT,
            push_notify INTEGER NOT NULL,
            push_speak INTEGER NOT NULL,
            push_interrupt_previous INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lifelog_images (
            image_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            image_uri TEXT NOT NULL,
            dhash INTEGER NOT NULL,
            is_dedup INTEGER NOT NULL,
            ts_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lifelog_contexts (
            image_id TEXT PRIMARY KEY,
            semantic_title TEXT NOT NULL,
            semantic_summary TEXT NOT NULL,
            objects_json TEXT NOT NULL,
            ocr_json TEXT NOT NULL,
            risk_hints_json TEXT NOT NULL,
            actionable_summary TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            risk_score REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lifelog_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            ts_ms INTEGER NOT NULL,
            payload_json TEXT NOT NULL,
            risk_level TEXT,
            confidence REAL
        );

        CREATE TABLE IF NOT EXISTS telemetry_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            schema_version TEXT NOT NULL,
            ts_ms INTEGER NOT NULL,
            normalized_json TEXT NOT NULL,
            raw_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS push_queue (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            status TEXT NOT NULL,
            idempotent_key TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS observability_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            ts_ms INTEGER NOT NULL,
            tags_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS thought_traces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            source TEXT NOT NULL,
            stage TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            ts_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_lifelog_events_session ON lifelog_events(session_id, ts_ms);
        CREATE INDEX IF NOT EXISTS idx_telemetry_session ON telemetry_samples(session_id, ts_ms);
        CREATE INDEX IF NOT EXISTS idx_push_queue_device_status ON push_queue(device_id, status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_push_queue_idempotent ON push_queue(idempotent_key);
        CREATE INDEX IF NOT EXISTS idx_thought_traces_trace ON thought_traces(trace_id, ts_ms);
        CREATE INDEX IF NOT EXISTS idx_thought_traces_session ON thought_traces(session_id, ts_ms);
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_sets_user_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}
