//! Endpoints hit by recipients' mail clients and by the frontend reporting
//! engagement on their behalf.

use axum::{
    extract::Query,
    response::{Html, IntoResponse},
    routing::{get, post},
    Extension, Json,
};
use http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA, USER_AGENT};
use http::HeaderMap;
use uuid::Uuid;

use crate::tracking::{self, EventType, PIXEL_GIF};
use crate::{routes, ErrorKind, Result};

use super::{DbExt, JsonBody, Owner, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::TRACK_OPEN, post(open))
        .route(routes::TRACK_UNSUBSCRIBE, post(unsubscribe))
        .route(routes::TRACK_PIXEL, get(pixel))
        .route(routes::UNSUBSCRIBE, get(unsubscribe_link))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventForm {
    pub campaign_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
}

/// Identifiers carried by links embedded in outgoing messages. Kept as
/// plain strings, these requests never fail on malformed input.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkQuery {
    pub councillor_id: Option<String>,
    pub campaign_id: Option<String>,
    pub contact_id: Option<String>,
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
}

async fn record(
    owner: Owner,
    db: DbExt,
    headers: HeaderMap,
    form: EventForm,
    event_type: EventType,
) -> Result<impl IntoResponse> {
    let (campaign_id, contact_id) = match (form.campaign_id, form.contact_id) {
        (Some(campaign), Some(contact)) => (campaign, contact),
        _ => return Err(ErrorKind::BadInput("campaignId and contactId required".to_string()).into()),
    };
    tracking::record_event(
        &db,
        owner.id(),
        campaign_id,
        contact_id,
        event_type,
        user_agent(&headers),
    )?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn open(
    owner: Owner,
    db: DbExt,
    headers: HeaderMap,
    JsonBody(form): JsonBody<EventForm>,
) -> Result<impl IntoResponse> {
    record(owner, db, headers, form, EventType::Open).await
}

pub async fn unsubscribe(
    owner: Owner,
    db: DbExt,
    headers: HeaderMap,
    JsonBody(form): JsonBody<EventForm>,
) -> Result<impl IntoResponse> {
    record(owner, db, headers, form, EventType::Unsubscribe).await
}

/// Serves the tracking pixel, recording an open if the link identifies one.
///
/// Always answers with the image, whatever happens to the event.
pub async fn pixel(
    Extension(db): DbExt,
    headers: HeaderMap,
    query: Option<Query<LinkQuery>>,
) -> impl IntoResponse {
    let Query(query) = query.unwrap_or_default();
    tracking::record_best_effort(
        &db,
        query.councillor_id.as_deref(),
        query.campaign_id.as_deref(),
        query.contact_id.as_deref(),
        EventType::Open,
        user_agent(&headers),
    );

    let headers = [
        (CONTENT_TYPE, mime::IMAGE_GIF.to_string()),
        (CACHE_CONTROL, "no-cache, no-store, must-revalidate".to_string()),
        (PRAGMA, "no-cache".to_string()),
        (EXPIRES, "0".to_string()),
    ];
    (headers, PIXEL_GIF)
}

/// Target of the unsubscribe link in outgoing messages.
pub async fn unsubscribe_link(
    Extension(db): DbExt,
    headers: HeaderMap,
    query: Option<Query<LinkQuery>>,
) -> impl IntoResponse {
    let Query(query) = query.unwrap_or_default();
    let recorded = tracking::record_best_effort(
        &db,
        query.councillor_id.as_deref(),
        query.campaign_id.as_deref(),
        query.contact_id.as_deref(),
        EventType::Unsubscribe,
        user_agent(&headers),
    );

    let message = if recorded {
        "You have been unsubscribed and will no longer receive these emails."
    } else {
        "We couldn't process this unsubscribe link. Please contact the sender directly."
    };
    Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Unsubscribe</title></head>\
         <body style=\"font-family:sans-serif;max-width:480px;margin:48px auto\">\
         <h1>Unsubscribe</h1><p>{}</p></body></html>",
        message
    ))
}
