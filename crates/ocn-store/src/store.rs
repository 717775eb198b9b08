use ocn_domain::interfaces::DurableStore;
use ocn_domain::model::*;
use ocn_domain::trace::ThoughtTraceRow;
use ocn_domain::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::schema;

type SqlitePool = Pool<SqliteConnectionManager>;

fn to_internal(e: impl std::fmt::Display) -> Error {
    Error::Internal(e.to_string())
}

/// rusqlite connections are `!Send`-friendly but not async; every
/// operation below hops to a blocking thread via `spawn_blocking` and the
/// pooled connection is checked out inside that closure.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::new(manager).map_err(to_internal)?;
        {
            let conn = pool.get().map_err(to_internal)?;
            schema::migrate(&conn).map_err(to_internal)?;
        }
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(to_internal)?;
        {
            let conn = pool.get().map_err(to_internal)?;
            schema::migrate(&conn).map_err(to_internal)?;
        }
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(to_internal)?;
            f(&conn).map_err(to_internal)
        })
        .await
        .map_err(to_internal)?
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<DeviceSessionRow> {
    let state_str: String = row.get("state")?;
    let metadata_json: String = row.get("metadata_json")?;
    let telemetry_json: String = row.get("telemetry_json")?;
    let pending_audio_json: String = row.get("pending_audio_json")?;
    Ok(DeviceSessionRow {
        device_id: row.get("device_id")?,
        session_id: row.get("session_id")?,
        state: parse_state(&state_str),
        created_at: row.get("created_at")?,
        last_seen: row.get("last_seen")?,
        closed_at: row.get("closed_at")?,
        close_reason: row.get("close_reason")?,
        last_inbound_seq: row.get("last_inbound_seq")?,
        last_outbound_seq: row.get("last_outbound_seq")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        telemetry_snapshot: serde_json::from_str(&telemetry_json).unwrap_or_default(),
        pending_audio_chunks: serde_json::from_str(&pending_audio_json).unwrap_or_default(),
    })
}

fn parse_state(s: &str) -> SessionState {
    match s {
        "connecting" => SessionState::Connecting,
        "ready" => SessionState::Ready,
        "listening" => SessionState::Listening,
        "thinking" => SessionState::Thinking,
        "speaking" => SessionState::Speaking,
        _ => SessionState::Closed,
    }
}

fn row_to_binding(row: &rusqlite::Row) -> rusqlite::Result<DeviceBindingRow> {
    let status_str: String = row.get("status")?;
    let metadata_json: String = row.get("metadata_json")?;
    Ok(DeviceBindingRow {
        device_id: row.get("device_id")?,
        device_token: row.get("device_token")?,
        status: parse_binding_status(&status_str),
        user_id: row.get("user_id")?,
        activated_at: row.get("activated_at")?,
        revoked_at: row.get("revoked_at")?,
        revoke_reason: row.get("revoke_reason")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    })
}

fn parse_binding_status(s: &str) -> BindingStatus {
    match s {
        "registered" => BindingStatus::Registered,
        "bound" => BindingStatus::Bound,
        "activated" => BindingStatus::Activated,
        _ => BindingStatus::Revoked,
    }
}

fn row_to_operation(row: &rusqlite::Row) -> rusqlite::Result<DeviceOperationRow> {
    let status_str: String = row.get("status")?;
    let payload_json: String = row.get("payload_json")?;
    let result_json: Option<String> = row.get("result_json")?;
    Ok(DeviceOperationRow {
        operation_id: row.get("operation_id")?,
        device_id: row.get("device_id")?,
        session_id: row.get("session_id")?,
        op_type: row.get("op_type")?,
        command_type: row.get("command_type")?,
        status: parse_operation_status(&status_str),
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        result: result_json.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        acked_at: row.get("acked_at")?,
    })
}

fn parse_operation_status(s: &str) -> OperationStatus {
    match s {
        "queued" => OperationStatus::Queued,
        "sent" => OperationStatus::Sent,
        "acked" => OperationStatus::Acked,
        "failed" => OperationStatus::Failed,
        _ => OperationStatus::Canceled,
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<DigitalTaskRow> {
    let status_str: String = row.get("status")?;
    let steps_json: String = row.get("steps_json")?;
    let result_json: Option<String> = row.get("result_json")?;
    Ok(DigitalTaskRow {
        task_id: row.get("task_id")?,
        session_id: row.get("session_id")?,
        device_id: row.get("device_id")?,
        goal: row.get("goal")?,
        status: parse_task_status(&status_str),
        steps: serde_json::from_str(&steps_json).unwrap_or_default(),
        result: result_json.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get("error")?,
        timeout_seconds: row.get("timeout_seconds")?,
        push_context: PushContext {
            device_id: row.get("push_device_id")?,
            notify: row.get::<_, i64>("push_notify")? != 0,
            speak: row.get::<_, i64>("push_speak")? != 0,
            interrupt_previous: row.get::<_, i64>("push_interrupt_previous")? != 0,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_task_status(s: &str) -> TaskStatus {
    match s {
        "pending" => TaskStatus::Pending,
        "running" => TaskStatus::Running,
        "success" => TaskStatus::Success,
        "failed" => TaskStatus::Failed,
        "timeout" => TaskStatus::Timeout,
        _ => TaskStatus::Canceled,
    }
}

fn row_to_push(row: &rusqlite::Row) -> rusqlite::Result<PushQueueRow> {
    let status_str: String = row.get("status")?;
    let payload_json: String = row.get("payload_json")?;
    Ok(PushQueueRow {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        session_id: row.get("session_id")?,
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        status: if status_str == "delivered" { PushQueueStatus::Delivered } else { PushQueueStatus::Pending },
        idempotent_key: row.get("idempotent_key")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_trace(row: &rusqlite::Row) -> rusqlite::Result<ThoughtTraceRow> {
    let payload_json: String = row.get("payload_json")?;
    Ok(ThoughtTraceRow {
        trace_id: row.get("trace_id")?,
        session_id: row.get("session_id")?,
        source: row.get("source")?,
        stage: row.get("stage")?,
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        ts_ms: row.get("ts_ms")?,
    })
}

fn status_str(status: SessionState) -> &'static str {
    status.as_str()
}

#[async_trait::async_trait]
impl DurableStore for SqliteStore {
    async fn upsert_session(&self, row: &DeviceSessionRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO device_sessions
                   (device_id, session_id, state, created_at, last_seen, closed_at, close_reason,
                    last_inbound_seq, last_outbound_seq, metadata_json, telemetry_json, pending_audio_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(device_id, session_id) DO UPDATE SET
                   state = excluded.state,
                   last_seen = excluded.last_seen,
                   closed_at = excluded.closed_at,
                   close_reason = excluded.close_reason,
                   last_inbound_seq = excluded.last_inbound_seq,
                   last_outbound_seq = excluded.last_outbound_seq,
                   metadata_json = excluded.metadata_json,
                   telemetry_json = excluded.telemetry_json,
                   pending_audio_json = excluded.pending_audio_json",
                params![
                    row.device_id,
                    row.session_id,
                    status_str(row.state),
                    row.created_at,
                    row.last_seen,
                    row.closed_at,
                    row.close_reason,
                    row.last_inbound_seq,
                    row.last_outbound_seq,
                    serde_json::to_string(&row.metadata).unwrap_or_default(),
                    serde_json::to_string(&row.telemetry_snapshot).unwrap_or_default(),
                    serde_json::to_string(&row.pending_audio_chunks).unwrap_or_default(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, device_id: &str, session_id: &str) -> Result<Option<DeviceSessionRow>> {
        let device_id = device_id.to_string();
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM device_sessions WHERE device_id = ?1 AND session_id = ?2",
                params![device_id, session_id],
                row_to_session,
            )
            .optional()
        })
        .await
    }

    async fn close_session(&self, device_id: &str, session_id: &str, reason: &str, now_ms: i64) -> Result<()> {
        let (device_id, session_id, reason) = (device_id.to_string(), session_id.to_string(), reason.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE device_sessions SET state = 'closed', closed_at = ?1, close_reason = ?2
                 WHERE device_id = ?3 AND session_id = ?4",
                params![now_ms, reason, device_id, session_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_binding(&self, row: &DeviceBindingRow) -> Result<()> {
        let row = row.clone();
        let status = match row.status {
            BindingStatus::Registered => "registered",
            BindingStatus::Bound => "bound",
            BindingStatus::Activated => "activated",
            BindingStatus::Revoked => "revoked",
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO device_bindings
                   (device_id, device_token, status, user_id, activated_at, revoked_at, revoke_reason, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(device_id) DO UPDATE SET
                   device_token = excluded.device_token,
                   status = excluded.status,
                   user_id = excluded.user_id,
                   activated_at = excluded.activated_at,
                   revoked_at = excluded.revoked_at,
                   revoke_reason = excluded.revoke_reason,
                   metadata_json = excluded.metadata_json",
                params![
                    row.device_id,
                    row.device_token,
                    status,
                    row.user_id,
                    row.activated_at,
                    row.revoked_at,
                    row.revoke_reason,
                    serde_json::to_string(&row.metadata).unwrap_or_default(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_binding(&self, device_id: &str) -> Result<Option<DeviceBindingRow>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM device_bindings WHERE device_id = ?1", params![device_id], row_to_binding)
                .optional()
        })
        .await
    }

    async fn record_operation(&self, row: &DeviceOperationRow) -> Result<()> {
        self.update_operation(row).await
    }

    async fn update_operation(&self, row: &DeviceOperationRow) -> Result<()> {
        let row = row.clone();
        let status = match row.status {
            OperationStatus::Queued => "queued",
            OperationStatus::Sent => "sent",
            OperationStatus::Acked => "acked",
            OperationStatus::Failed => "failed",
            OperationStatus::Canceled => "canceled",
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO device_operations
                   (operation_id, device_id, session_id, op_type, command_type, status, payload_json,
                    result_json, error, created_at, updated_at, acked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(operation_id) DO UPDATE SET
                   status = excluded.status,
                   result_json = excluded.result_json,
                   error = excluded.error,
                   updated_at = excluded.updated_at,
                   acked_at = excluded.acked_at",
                params![
                    row.operation_id,
                    row.device_id,
                    row.session_id,
                    row.op_type,
                    row.command_type,
                    status,
                    serde_json::to_string(&row.payload).unwrap_or_default(),
                    row.result.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()),
                    row.error,
                    row.created_at,
                    row.updated_at,
                    row.acked_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_operation(&self, operation_id: &str) -> Result<Option<DeviceOperationRow>> {
        let operation_id = operation_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM device_operations WHERE operation_id = ?1",
                params![operation_id],
                row_to_operation,
            )
            .optional()
        })
        .await
    }

    async fn upsert_task(&self, row: &DigitalTaskRow) -> Result<()> {
        let row = row.clone();
        let status = format!("{:?}", row.status).to_lowercase();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO digital_tasks
                   (task_id, session_id, device_id, goal, status, steps_json, result_json, error,
                    timeout_seconds, push_device_id, push_notify, push_speak, push_interrupt_previous,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(task_id) DO UPDATE SET
                   status = excluded.status,
                   steps_json = excluded.steps_json,
                   result_json = excluded.result_json,
                   error = excluded.error,
                   updated_at = excluded.updated_at",
                params![
                    row.task_id,
                    row.session_id,
                    row.device_id,
                    row.goal,
                    status,
                    serde_json::to_string(&row.steps).unwrap_or_default(),
                    row.result.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()),
                    row.error,
                    row.timeout_seconds,
                    row.push_context.device_id,
                    row.push_context.notify as i64,
                    row.push_context.speak as i64,
                    row.push_context.interrupt_previous as i64,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<DigitalTaskRow>> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM digital_tasks WHERE task_id = ?1", params![task_id], row_to_task).optional()
        })
        .await
    }

    async fn list_incomplete_tasks(&self) -> Result<Vec<DigitalTaskRow>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM digital_tasks WHERE status IN ('pending', 'running')")?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect()
        })
        .await
    }

    async fn record_lifelog_image(&self, row: &LifelogImageRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO lifelog_images (image_id, session_id, image_uri, dhash, is_dedup, ts_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(image_id) DO NOTHING",
                params![row.image_id, row.session_id, row.image_uri, row.dhash, row.is_dedup as i64, row.ts_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_lifelog_context(&self, row: &LifelogContextRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO lifelog_contexts
                   (image_id, semantic_title, semantic_summary, objects_json, ocr_json, risk_hints_json,
                    actionable_summary, risk_level, risk_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(image_id) DO UPDATE SET
                   semantic_title = excluded.semantic_title,
                   semantic_summary = excluded.semantic_summary,
                   objects_json = excluded.objects_json,
                   ocr_json = excluded.ocr_json,
                   risk_hints_json = excluded.risk_hints_json,
                   actionable_summary = excluded.actionable_summary,
                   risk_level = excluded.risk_level,
                   risk_score = excluded.risk_score",
                params![
                    row.image_id,
                    row.semantic_title,
                    row.semantic_summary,
                    serde_json::to_string(&row.objects).unwrap_or_default(),
                    serde_json::to_string(&row.ocr).unwrap_or_default(),
                    serde_json::to_string(&row.risk_hints).unwrap_or_default(),
                    row.actionable_summary,
                    row.risk_level.as_str(),
                    row.risk_score,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_lifelog_event(&self, row: &LifelogEventRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO lifelog_events (session_id, event_type, ts_ms, payload_json, risk_level, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.session_id,
                    row.event_type,
                    row.ts_ms,
                    serde_json::to_string(&row.payload).unwrap_or_default(),
                    row.risk_level.map(|r| r.as_str()),
                    row.confidence,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_telemetry(&self, row: &TelemetrySampleRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO telemetry_samples (session_id, schema_version, ts_ms, normalized_json, raw_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.session_id,
                    row.schema_version,
                    row.ts_ms,
                    serde_json::to_string(&row.normalized).unwrap_or_default(),
                    serde_json::to_string(&row.raw).unwrap_or_default(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_observability_sample(&self, row: &ObservabilitySampleRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO observability_samples (name, value, ts_ms, tags_json) VALUES (?1, ?2, ?3, ?4)",
                params![row.name, row.value, row.ts_ms, serde_json::to_string(&row.tags).unwrap_or_default()],
            )?;
            Ok(())
        })
        .await
    }

    async fn enqueue_push(&self, row: &PushQueueRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO push_queue (id, device_id, session_id, payload_json, status, idempotent_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)
                 ON CONFLICT(idempotent_key) DO NOTHING",
                params![
                    row.id,
                    row.device_id,
                    row.session_id,
                    serde_json::to_string(&row.payload).unwrap_or_default(),
                    row.idempotent_key,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_push_delivered(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("UPDATE push_queue SET status = 'delivered' WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn list_pending_pushes(&self, device_id: &str) -> Result<Vec<PushQueueRow>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM push_queue WHERE device_id = ?1 AND status = 'pending' ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![device_id], row_to_push)?;
            rows.collect()
        })
        .await
    }

    async fn insert_thought_trace(&self, row: &ThoughtTraceRow) -> Result<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO thought_traces (trace_id, session_id, source, stage, payload_json, ts_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.trace_id,
                    row.session_id,
                    row.source,
                    row.stage,
                    serde_json::to_string(&row.payload).unwrap_or_default(),
                    row.ts_ms,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_thought_traces(&self, session_id: &str, limit: usize) -> Result<Vec<ThoughtTraceRow>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT trace_id, session_id, source, stage, payload_json, ts_ms FROM thought_traces
                 WHERE session_id = ?1 ORDER BY ts_ms DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![session_id, limit as i64], row_to_trace)?;
            rows.collect()
        })
        .await
    }

    async fn backup_to(&self, dest_path: &str) -> Result<()> {
        let dest_path = dest_path.to_string();
        self.with_conn(move |conn| {
            let mut dest = Connection::open(&dest_path)?;
            let backup = rusqlite::backup::Backup::new(conn, &mut dest)?;
            backup.run_to_completion(5, std::time::Duration::from_millis(250), None)?;
            Ok(())
        })
        .await
    }
}
