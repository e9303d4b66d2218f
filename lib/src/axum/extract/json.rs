use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::{Error, ErrorKind};

/// Json request body. Malformed bodies are rejected with a json error
/// instead of axum's plain text rejection.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(body)) => Ok(JsonBody(body)),
            Err(rejection) => {
                tracing::debug!("rejected request body: {}", rejection.body_text());
                Err(ErrorKind::BadInput("Invalid JSON".to_string()).into())
            }
        }
    }
}
