use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{delete, get},
    Extension, Json,
};
use http::StatusCode;
use uuid::Uuid;

use crate::list::ReadRetry;
use crate::{contact, list, routes, ErrorKind, Result};

use super::{ConfigExt, DbExt, Items, JsonBody, Owner, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::DISTRIBUTION_LISTS, get(all).post(create))
        .route(routes::DISTRIBUTION_LIST, delete(remove))
        .route(
            routes::DISTRIBUTION_LIST_CONTACTS,
            get(contacts).post(add_contact),
        )
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListForm {
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactForm {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

pub async fn all(owner: Owner, Extension(db): DbExt) -> Result<impl IntoResponse> {
    Ok(Json(Items::from(list::all(&db, owner.id())?)))
}

pub async fn create(
    owner: Owner,
    Extension(db): DbExt,
    JsonBody(form): JsonBody<ListForm>,
) -> Result<impl IntoResponse> {
    let list = list::create(&db, owner.id(), &form.name, &form.description)?;
    Ok((StatusCode::CREATED, Json(list)))
}

pub async fn remove(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !list::delete(&db, owner.id(), id)? {
        return Err(ErrorKind::NotFound(format!("distribution list {}", id)).into());
    }
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

pub async fn contacts(
    owner: Owner,
    Extension(db): DbExt,
    Extension(config): ConfigExt,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let retry = ReadRetry::from(&config.storage);
    let contacts = list::contacts(&db, owner.id(), id, retry).await?;
    Ok(Json(Items::from(contacts)))
}

pub async fn add_contact(
    owner: Owner,
    Extension(db): DbExt,
    Path(id): Path<Uuid>,
    JsonBody(form): JsonBody<ContactForm>,
) -> Result<impl IntoResponse> {
    if form.email.trim().is_empty()
        || form.first_name.trim().is_empty()
        || form.last_name.trim().is_empty()
    {
        return Err(ErrorKind::BadInput("email, firstName, lastName required".to_string()).into());
    }

    let contact = contact::add_to_list(
        &db,
        owner.id(),
        id,
        &form.email,
        form.first_name.trim(),
        form.last_name.trim(),
    )?;

    Ok((StatusCode::CREATED, Json(contact)))
}
