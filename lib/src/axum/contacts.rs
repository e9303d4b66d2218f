use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{delete, get},
    Extension, Json,
};
use uuid::Uuid;

use crate::{contact, routes, ErrorKind, Result};

use super::{DbExt, Items, Owner, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::CONTACTS, get(all))
        .route(routes::CONTACT, delete(remove))
}

pub async fn all(owner: Owner, Extension(db): DbExt) -> Result<impl IntoResponse> {
    Ok(Json(Items::from(contact::all(&db, owner.id())?)))
}

/// Deletes the contact along with its memberships and recipient rows.
pub async fn remove(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !contact::delete(&db, owner.id(), id)? {
        return Err(ErrorKind::NotFound(format!("contact {}", id)).into());
    }
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
