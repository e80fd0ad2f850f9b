//! Operator-facing endpoints: command enqueue and push-info lookup.
//!
//! Both sit behind the API-key middleware. The push dispatch itself is an
//! external concern; `/v1/pushinfo` hands the pusher what it needs.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use domain::models::Command;
use domain::Request;

use crate::app::AppState;
use crate::error::ApiError;

fn split_ids(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Response payload for command enqueue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub command_uuid: String,
    pub request_type: String,
    pub enrollment_ids: Vec<String>,
}

/// Queue a raw command plist for one or more enrollments.
///
/// PUT /v1/enqueue/{ids} (comma-separated enrollment ids)
pub async fn enqueue(
    State(state): State<AppState>,
    Path(ids): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let ids = split_ids(&ids);
    if ids.is_empty() {
        return Err(domain::Error::InvalidEnrollment("no enrollment ids given".into()).into());
    }

    let command = Command::parse(&body)?;
    let req = Request::new().with_params(params);
    state.store.enqueue_command(&req, &ids, &command).await?;

    info!(
        command_uuid = %command.command_uuid,
        request_type = %command.request_type,
        enrollments = ids.len(),
        "command enqueued"
    );

    Ok(Json(EnqueueResponse {
        command_uuid: command.command_uuid,
        request_type: command.request_type,
        enrollment_ids: ids,
    }))
}

/// One enrollment's push info, or the reason it is unavailable.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushInfoEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_magic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bulk push-info lookup for an external APNs pusher.
///
/// GET /v1/pushinfo/{ids} (comma-separated enrollment ids)
pub async fn push_info(
    State(state): State<AppState>,
    Path(ids): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<HashMap<String, PushInfoEntry>>, ApiError> {
    let ids = split_ids(&ids);
    if ids.is_empty() {
        return Err(domain::Error::InvalidEnrollment("no enrollment ids given".into()).into());
    }

    let req = Request::new().with_params(params);
    let infos = state.store.retrieve_push_info(&req, &ids).await?;

    let out = infos
        .into_iter()
        .map(|(id, entry)| {
            let entry = match entry {
                Ok(info) => PushInfoEntry {
                    push_token: Some(info.token_hex()),
                    push_magic: Some(info.push_magic),
                    topic: Some(info.topic),
                    error: None,
                },
                Err(err) => PushInfoEntry {
                    push_token: None,
                    push_magic: None,
                    topic: None,
                    error: Some(err.to_string()),
                },
            };
            (id, entry)
        })
        .collect();

    Ok(Json(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ids() {
        assert_eq!(split_ids("AAA"), vec!["AAA"]);
        assert_eq!(split_ids("AAA,AAA:BBB"), vec!["AAA", "AAA:BBB"]);
        assert_eq!(split_ids(" AAA , BBB "), vec!["AAA", "BBB"]);
        assert!(split_ids("").is_empty());
        assert!(split_ids(",,").is_empty());
    }
}
