//! Event store: durable tasks, comments, and the append-only event log.
//!
//! All columns are TEXT; UUIDs are hyphenated, timestamps are RFC-3339 with
//! microsecond precision and a trailing `Z` (fixed width, so the
//! `created_at` indexes sort chronologically). Writes used by the ingestor
//! take a `&mut SqliteConnection` so callers can group them into one
//! transaction; reads run straight off the pool.

use anyhow::{Context, anyhow};
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use mission_common::Result;
use mission_domain::{Comment, Event, EventLite, Task, TaskStatus};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Cards returned per board column.
const BOARD_COLUMN_LIMIT: i64 = 100;
/// Hard caps on the feed endpoints.
pub const FEED_LIMIT_MAX: i64 = 200;
pub const FEED_LITE_LIMIT_MAX: i64 = 500;

/// Current time truncated to the stored precision, so values round-trip
/// byte-identically through the TEXT columns.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow!("invalid stored timestamp {raw:?}: {e}"))?
        .with_timezone(&Utc))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(raw).map_err(|e| anyhow!("invalid stored uuid {raw:?}: {e}"))?)
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status_raw: String = row.try_get("status").context("tasks.status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("invalid stored task status {status_raw:?}"))?;
    let tags_raw: String = row.try_get("tags").context("tasks.tags")?;

    Ok(Task {
        id: parse_uuid(&row.try_get::<String, _>("id").context("tasks.id")?)?,
        title: row.try_get("title").context("tasks.title")?,
        status,
        assignee: row.try_get("assignee").context("tasks.assignee")?,
        tags: serde_json::from_str(&tags_raw)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").context("tasks.created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at").context("tasks.updated_at")?)?,
    })
}

fn row_to_event(row: &SqliteRow) -> Result<Event> {
    let payload_raw: String = row.try_get("payload").context("events.payload")?;
    let task_id: Option<String> = row.try_get("task_id").context("events.task_id")?;

    Ok(Event {
        id: parse_uuid(&row.try_get::<String, _>("id").context("events.id")?)?,
        event_type: row.try_get("type").context("events.type")?,
        agent: row.try_get("agent").context("events.agent")?,
        task_id: task_id.as_deref().map(parse_uuid).transpose()?,
        payload: serde_json::from_str(&payload_raw)?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").context("events.created_at")?)?,
    })
}

pub async fn insert_task(
    conn: &mut SqliteConnection,
    title: &str,
    status: TaskStatus,
    assignee: Option<&str>,
    tags: &[String],
) -> Result<Task> {
    let ts = now();
    let task = Task {
        id: Uuid::new_v4(),
        title: title.to_string(),
        status,
        assignee: assignee.map(str::to_string),
        tags: tags.to_vec(),
        created_at: ts,
        updated_at: ts,
    };

    sqlx::query(
        "INSERT INTO tasks (id, title, status, assignee, tags, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(task.id.to_string())
    .bind(&task.title)
    .bind(task.status.as_str())
    .bind(task.assignee.as_deref())
    .bind(serde_json::to_string(&task.tags)?)
    .bind(fmt_ts(task.created_at))
    .bind(fmt_ts(task.updated_at))
    .execute(conn)
    .await?;

    Ok(task)
}

pub async fn insert_comment(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    author: &str,
    body: &str,
) -> Result<Comment> {
    let comment = Comment {
        id: Uuid::new_v4(),
        task_id,
        author: author.to_string(),
        body: body.to_string(),
        created_at: now(),
    };

    sqlx::query(
        "INSERT INTO comments (id, task_id, author, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(comment.id.to_string())
    .bind(comment.task_id.to_string())
    .bind(&comment.author)
    .bind(&comment.body)
    .bind(fmt_ts(comment.created_at))
    .execute(conn)
    .await?;

    Ok(comment)
}

/// Append one event. `id` and `created_at` are assigned here, at insert
/// time.
pub async fn insert_event(
    conn: &mut SqliteConnection,
    event_type: &str,
    agent: Option<&str>,
    task_id: Option<Uuid>,
    payload: Value,
) -> Result<Event> {
    let event = Event {
        id: Uuid::new_v4(),
        event_type: event_type.to_string(),
        agent: agent.map(str::to_string),
        task_id,
        payload,
        created_at: now(),
    };

    sqlx::query(
        "INSERT INTO events (id, type, agent, task_id, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(event.id.to_string())
    .bind(&event.event_type)
    .bind(event.agent.as_deref())
    .bind(event.task_id.map(|id| id.to_string()))
    .bind(serde_json::to_string(&event.payload)?)
    .bind(fmt_ts(event.created_at))
    .execute(conn)
    .await?;

    Ok(event)
}

/// Current status of a task, read inside the caller's transaction.
pub async fn get_task_status(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> Result<Option<TaskStatus>> {
    let row = sqlx::query("SELECT status FROM tasks WHERE id = ?1")
        .bind(task_id.to_string())
        .fetch_optional(conn)
        .await?;

    match row {
        None => Ok(None),
        Some(row) => {
            let raw: String = row.try_get("status").context("tasks.status")?;
            Ok(Some(TaskStatus::parse(&raw).ok_or_else(|| {
                anyhow!("invalid stored task status {raw:?}")
            })?))
        }
    }
}

/// Write the new status. Returns false when the task vanished between the
/// caller's read and this write (same transaction makes that impossible in
/// practice, but the row count keeps the contract honest).
pub async fn update_task_status(
    conn: &mut SqliteConnection,
    task_id: Uuid,
    new_status: TaskStatus,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(new_status.as_str())
        .bind(fmt_ts(updated_at))
        .bind(task_id.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// The five board columns in canonical order, up to 100 cards each, most
/// recently updated first.
pub async fn list_board(pool: &SqlitePool) -> Result<Vec<(TaskStatus, Vec<Task>)>> {
    let mut columns = Vec::with_capacity(TaskStatus::ALL.len());
    for status in TaskStatus::ALL {
        let rows = sqlx::query(
            "SELECT id, title, status, assignee, tags, created_at, updated_at
             FROM tasks WHERE status = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )
        .bind(status.as_str())
        .bind(BOARD_COLUMN_LIMIT)
        .fetch_all(pool)
        .await?;

        let cards = rows
            .iter()
            .map(row_to_task)
            .collect::<Result<Vec<Task>>>()?;
        columns.push((status, cards));
    }
    Ok(columns)
}

/// Most-recent-first event feed. `rowid` breaks `created_at` ties in
/// insert order.
pub async fn list_feed(pool: &SqlitePool, limit: i64) -> Result<Vec<Event>> {
    let limit = limit.clamp(0, FEED_LIMIT_MAX);
    let rows = sqlx::query(
        "SELECT id, type, agent, task_id, payload, created_at
         FROM events
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_event).collect()
}

/// Feed projection with the hot payload fields extracted in SQL, so the
/// dashboard can poll without shipping whole payloads.
pub async fn list_feed_lite(pool: &SqlitePool, limit: i64) -> Result<Vec<EventLite>> {
    let limit = limit.clamp(0, FEED_LITE_LIMIT_MAX);
    let rows = sqlx::query(
        "SELECT id, type, agent, task_id, created_at,
                CAST(json_extract(payload, '$.method') AS TEXT) AS method,
                CAST(json_extract(payload, '$.path') AS TEXT) AS path,
                CAST(NULLIF(json_extract(payload, '$.status_code'), '') AS INTEGER) AS status_code,
                CAST(json_extract(payload, '$.error_type') AS TEXT) AS error_type,
                CAST(json_extract(payload, '$.test_id') AS TEXT) AS test_id,
                CAST(NULLIF(json_extract(payload, '$.round'), '') AS INTEGER) AS round
         FROM events
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let task_id: Option<String> = row.try_get("task_id").context("events.task_id")?;
            Ok(EventLite {
                id: parse_uuid(&row.try_get::<String, _>("id").context("events.id")?)?,
                event_type: row.try_get("type").context("events.type")?,
                agent: row.try_get("agent").context("events.agent")?,
                task_id: task_id.as_deref().map(parse_uuid).transpose()?,
                created_at: parse_ts(
                    &row.try_get::<String, _>("created_at").context("events.created_at")?,
                )?,
                method: row.try_get("method").context("method")?,
                path: row.try_get("path").context("path")?,
                status_code: row.try_get("status_code").context("status_code")?,
                error_type: row.try_get("error_type").context("error_type")?,
                test_id: row.try_get("test_id").context("test_id")?,
                round: row.try_get("round").context("round")?,
            })
        })
        .collect()
}
