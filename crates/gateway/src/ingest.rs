//! Event ingestion: per-type validation, the task-status state machine, and
//! the durability boundary.
//!
//! Every accepted event is committed before anything is published, so no
//! stream entry exists without a durable row behind it. A crash between
//! commit and publish loses only the live notification; pollers pick the
//! row up on their next refresh. Rejections never insert the submitted
//! event, but the `event.validation` receipt is durable either way so
//! observers see both the intent and the outcome.

use std::collections::HashSet;

use mission_domain::event::types;
use mission_domain::{Comment, Event, EventIn, TaskStatus};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::store;

/// Render a sorted option list the way validation messages spell it:
/// `['ASSIGNED', 'DONE']`.
fn fmt_allowed(options: &[&str]) -> String {
    let mut options: Vec<&str> = options.to_vec();
    options.sort_unstable();
    let quoted: Vec<String> = options.iter().map(|o| format!("'{o}'")).collect();
    format!("[{}]", quoted.join(", "))
}

pub fn all_statuses_list() -> String {
    let all: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
    fmt_allowed(&all)
}

fn payload_str(payload: &Map<String, Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Structured contract for `task.handoff` payloads. All problems are
/// collected, not short-circuited.
fn validate_handoff_payload(
    payload: &Map<String, Value>,
    known_agents: &HashSet<String>,
) -> Vec<String> {
    let mut errors = Vec::new();

    let target_agent = payload_str(payload, "to");
    if target_agent.is_empty() {
        errors.push("payload.to is required".to_string());
    } else if !known_agents.is_empty() && !known_agents.contains(&target_agent) {
        errors.push(format!("payload.to agent not found: {target_agent}"));
    }

    for field in ["problem", "context", "expected_output"] {
        if payload_str(payload, field).is_empty() {
            errors.push(format!("payload.{field} is required"));
        }
    }

    match payload.get("artifact_refs").and_then(Value::as_array) {
        None => errors.push("payload.artifact_refs must be a non-empty list".to_string()),
        Some(refs) if refs.is_empty() => {
            errors.push("payload.artifact_refs must be a non-empty list".to_string());
        }
        Some(refs) => {
            let all_strings = refs
                .iter()
                .all(|r| r.as_str().is_some_and(|s| !s.trim().is_empty()));
            if !all_strings {
                errors.push("payload.artifact_refs must contain non-empty strings".to_string());
            }
        }
    }

    if !payload.get("review_gate").is_some_and(Value::is_boolean) {
        errors.push("payload.review_gate must be boolean".to_string());
    }

    errors
}

/// Serialize and publish one event to the live stream. Best-effort: the
/// durable row already exists, so a broker hiccup only costs the
/// notification.
async fn publish_event(state: &AppState, event: &Event) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize event for stream");
            return;
        }
    };
    if let Err(e) = state.broker.publish(&state.config.stream_key, &json).await {
        warn!(error = %e, event_id = %event.id, "stream publish failed; feed pollers will catch up");
    }
}

fn validation_payload(
    body: &EventIn,
    accepted: bool,
    errors: &[String],
    details: &Map<String, Value>,
) -> Value {
    json!({
        "event_type": body.event_type,
        "accepted": accepted,
        "errors": errors,
        "details": details,
    })
}

/// Single entry point for event ingestion.
///
/// Collects all applicable validation errors, applies the task-status state
/// machine inside one transaction, commits, then publishes the event and
/// its `event.validation` receipt to the stream in that order.
pub async fn ingest(state: &AppState, body: EventIn) -> Result<Event, ApiError> {
    let mut validation_errors: Vec<String> = Vec::new();
    let mut validation_details: Map<String, Value> = Map::new();
    let mut event_payload = body.payload.clone();

    let mut tx = state.pool.begin().await?;

    if body.event_type == types::TASK_HANDOFF {
        if body.task_id.is_none() {
            validation_errors.push("task.handoff requires task_id".to_string());
        }
        let known_agents = state.config.known_agents();
        validation_errors.extend(validate_handoff_payload(&body.payload, &known_agents));
        validation_details.insert("known_agents_count".to_string(), json!(known_agents.len()));
    }

    if body.event_type == types::TASK_STATUS {
        if body.task_id.is_none() {
            validation_errors.push("task.status requires task_id".to_string());
        }

        let next_raw = payload_str(&body.payload, "new_status").to_uppercase();
        let next_status = if next_raw.is_empty() {
            validation_errors.push("payload.new_status is required".to_string());
            None
        } else {
            match TaskStatus::parse(&next_raw) {
                Some(status) => Some(status),
                None => {
                    validation_errors.push(format!(
                        "payload.new_status invalid: {next_raw}; allowed={}",
                        all_statuses_list()
                    ));
                    None
                }
            }
        };

        let mut current_status = None;
        if let Some(task_id) = body.task_id {
            match store::get_task_status(&mut tx, task_id).await? {
                Some(status) => current_status = Some(status),
                None => validation_errors.push(format!("task not found: {task_id}")),
            }
        }

        if let (true, Some(current), Some(next)) =
            (validation_errors.is_empty(), current_status, next_status)
        {
            if next != current && !current.can_transition_to(next) {
                let allowed: Vec<&str> =
                    current.transitions().iter().map(|s| s.as_str()).collect();
                validation_errors.push(format!(
                    "invalid status transition: {current} -> {next}; allowed={}",
                    fmt_allowed(&allowed)
                ));
            } else {
                // task_id is present whenever current_status resolved.
                let task_id = body.task_id.unwrap_or_default();
                store::update_task_status(&mut tx, task_id, next, store::now()).await?;
                event_payload
                    .insert("previous_status".to_string(), json!(current.as_str()));
                event_payload.insert("new_status".to_string(), json!(next.as_str()));
                event_payload.insert("transition_applied".to_string(), json!(true));
                validation_details.insert(
                    "transition".to_string(),
                    json!({"from": current.as_str(), "to": next.as_str()}),
                );
            }
        }
    }

    if !validation_errors.is_empty() {
        // The rejected event is never inserted; the receipt is, so the
        // rejection itself is durable and streamed.
        let receipt = store::insert_event(
            &mut tx,
            types::EVENT_VALIDATION,
            body.agent.as_deref(),
            body.task_id,
            validation_payload(&body, false, &validation_errors, &validation_details),
        )
        .await?;
        tx.commit().await?;
        publish_event(state, &receipt).await;

        info!(event_type = %body.event_type, errors = validation_errors.len(), "event rejected");
        return Err(ApiError::Validation(validation_errors));
    }

    let event = store::insert_event(
        &mut tx,
        &body.event_type,
        body.agent.as_deref(),
        body.task_id,
        Value::Object(event_payload),
    )
    .await?;
    let receipt = store::insert_event(
        &mut tx,
        types::EVENT_VALIDATION,
        body.agent.as_deref(),
        body.task_id,
        validation_payload(&body, true, &[], &validation_details),
    )
    .await?;
    tx.commit().await?;

    publish_event(state, &event).await;
    publish_event(state, &receipt).await;

    Ok(event)
}

/// Comment ingress: insert the comment and its `comment.created` event in
/// one transaction, then publish.
pub async fn add_comment(
    state: &AppState,
    task_id: Uuid,
    author: &str,
    body: &str,
) -> Result<Comment, ApiError> {
    let mut tx = state.pool.begin().await?;

    if store::get_task_status(&mut tx, task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task not found: {task_id}")));
    }

    let comment = store::insert_comment(&mut tx, task_id, author, body).await?;
    let event = store::insert_event(
        &mut tx,
        types::COMMENT_CREATED,
        Some(author),
        Some(task_id),
        json!({"comment_id": comment.id}),
    )
    .await?;
    tx.commit().await?;

    publish_event(state, &event).await;

    Ok(comment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn allowed_lists_render_sorted_and_quoted() {
        assert_eq!(fmt_allowed(&["ASSIGNED"]), "['ASSIGNED']");
        assert_eq!(
            fmt_allowed(&["REVIEW", "DONE", "IN PROGRESS"]),
            "['DONE', 'IN PROGRESS', 'REVIEW']"
        );
        // Byte order puts the space in "IN PROGRESS" before "INBOX".
        assert_eq!(
            all_statuses_list(),
            "['ASSIGNED', 'DONE', 'IN PROGRESS', 'INBOX', 'REVIEW']"
        );
    }

    #[test]
    fn handoff_collects_every_problem() {
        let known: HashSet<String> = ["metrics".to_string(), "growth".to_string()].into();
        let payload = map(json!({
            "to": "unknown-agent",
            "problem": "p",
            "context": "c",
            "expected_output": "o",
            "artifact_refs": [],
            "review_gate": "yes",
        }));

        let errors = validate_handoff_payload(&payload, &known);
        assert_eq!(errors, vec![
            "payload.to agent not found: unknown-agent",
            "payload.artifact_refs must be a non-empty list",
            "payload.review_gate must be boolean",
        ]);
    }

    #[test]
    fn handoff_requires_non_empty_strings() {
        let payload = map(json!({
            "to": "  ",
            "problem": "",
            "context": "c",
            "expected_output": "o",
            "artifact_refs": ["a", "  "],
            "review_gate": true,
        }));

        let errors = validate_handoff_payload(&payload, &HashSet::new());
        assert_eq!(errors, vec![
            "payload.to is required",
            "payload.problem is required",
            "payload.artifact_refs must contain non-empty strings",
        ]);
    }

    #[test]
    fn handoff_accepts_complete_payload() {
        let known: HashSet<String> = ["metrics".to_string()].into();
        let payload = map(json!({
            "to": "metrics",
            "problem": "checkout latency regression",
            "context": "p95 doubled since the last deploy",
            "expected_output": "a bisected commit",
            "artifact_refs": ["s3://traces/run-42"],
            "review_gate": false,
        }));

        assert!(validate_handoff_payload(&payload, &known).is_empty());
        // Empty known-agents set skips the membership check only.
        assert!(validate_handoff_payload(&payload, &HashSet::new()).is_empty());
    }
}
