use std::ops::Deref;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum_auth::AuthBearer;

use crate::auth::{self, Credentials, Identity, JwtValidator, OWNER_HEADER};
use crate::error::{Error, ErrorKind};
use crate::Config;

/// Resolved owner of the request, the partition every handler operates on.
///
/// Rejects the request with `401` if no owner can be established.
#[derive(Clone, Debug)]
pub struct Owner(pub Identity);

impl Owner {
    pub fn id(&self) -> &str {
        &self.0.owner
    }
}

impl Deref for Owner {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0.owner
    }
}

#[derive(Deserialize)]
struct OwnerQuery {
    #[serde(rename = "councillorId")]
    owner: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<Arc<Config>>()
            .cloned()
            .ok_or_else(|| ErrorKind::Misconfigured("config extension unavailable".to_string()))?;
        let validator = parts
            .extensions
            .get::<Arc<JwtValidator>>()
            .cloned()
            .ok_or_else(|| {
                ErrorKind::Misconfigured("token validator extension unavailable".to_string())
            })?;

        let bearer = AuthBearer::from_request_parts(parts, state)
            .await
            .ok()
            .map(|AuthBearer(token)| token);
        let header = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query = Query::<OwnerQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.owner);

        let identity = auth::authenticate(
            &validator,
            &config.auth,
            Credentials {
                path: parts.uri.path(),
                bearer: bearer.as_deref(),
                owner_header: header.as_deref(),
                owner_query: query.as_deref(),
            },
        )
        .await?;
        if identity.bypassed {
            tracing::debug!(owner = %identity.owner, path = %parts.uri.path(), "owner taken from request");
        }

        Ok(Owner(identity))
    }
}
