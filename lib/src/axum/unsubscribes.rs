use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{delete, get},
    Extension, Json,
};
use http::StatusCode;
use uuid::Uuid;

use crate::optout::{self, Source};
use crate::{routes, ErrorKind, Result};

use super::{DbExt, Items, JsonBody, Owner, Router};

pub fn router() -> Router {
    Router::new()
        .route(
            routes::UNSUBSCRIBES,
            get(all).post(add).delete(remove_by_email),
        )
        .route(routes::UNSUBSCRIBE_ENTRY, delete(remove))
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptOutForm {
    pub email: Option<String>,
    pub contact_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

pub async fn all(owner: Owner, Extension(db): DbExt) -> Result<impl IntoResponse> {
    Ok(Json(Items::from(optout::all(&db, owner.id())?)))
}

pub async fn add(
    owner: Owner,
    Extension(db): DbExt,
    JsonBody(form): JsonBody<OptOutForm>,
) -> Result<impl IntoResponse> {
    let email = form.email.as_deref().filter(|e| !e.trim().is_empty());
    if email.is_none() && form.contact_id.is_none() {
        return Err(ErrorKind::BadInput("email required".to_string()).into());
    }
    let entry = optout::add(
        &db,
        owner.id(),
        email,
        form.contact_id,
        form.campaign_id,
        Source::Manual,
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Removes every ledger entry for `?email=` and reactivates the contact.
pub async fn remove_by_email(
    owner: Owner,
    Extension(db): DbExt,
    Query(query): Query<EmailQuery>,
) -> Result<impl IntoResponse> {
    let email = match query.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => email.to_string(),
        _ => return Err(ErrorKind::BadInput("email required".to_string()).into()),
    };
    let removed = optout::remove_by_email(&db, owner.id(), &email)?;
    if removed == 0 {
        return Err(ErrorKind::NotFound(format!("opt-out for {}", email)).into());
    }
    Ok(Json(serde_json::json!({ "status": "deleted", "removed": removed })))
}

pub async fn remove(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !optout::remove(&db, owner.id(), id)? {
        return Err(ErrorKind::NotFound(format!("opt-out {}", id)).into());
    }
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
