//! Caller identity.
//!
//! Every request is resolved to the owner whose partition it operates on.
//! Normally the owner comes from a bearer token issued by the identity
//! provider. With bypass enabled, or on paths opened straight from an email
//! client, the legacy `x-councillor-id` header or `councillorId` query
//! parameter is trusted instead.

pub mod jwt;

pub use jwt::JwtValidator;

use serde_json::{Map, Value};

use crate::{config, ErrorKind, Result};

/// Legacy header naming the owner directly.
pub const OWNER_HEADER: &str = "x-councillor-id";
/// Legacy query parameter naming the owner directly.
pub const OWNER_QUERY: &str = "councillorId";

#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub owner: String,
    /// Owner was taken from the request without token validation.
    pub bypassed: bool,
}

/// Everything identity resolution needs from the incoming request.
#[derive(Clone, Debug, Default)]
pub struct Credentials<'a> {
    pub path: &'a str,
    pub bearer: Option<&'a str>,
    pub owner_header: Option<&'a str>,
    pub owner_query: Option<&'a str>,
}

pub fn should_bypass(config: &config::Auth, path: &str) -> bool {
    if config.bypass {
        return true;
    }
    let path = path.to_lowercase();
    config
        .bypass_paths
        .iter()
        .map(|p| p.trim_end_matches('/').to_lowercase())
        .filter(|p| !p.is_empty())
        .any(|p| path.ends_with(&p) || path.contains(&format!("{}/", p)))
}

/// Picks the owner out of validated token claims.
///
/// Tries the configured claim, then `oid`, then falls back to the
/// configured default owner.
pub fn owner_from_claims(config: &config::Auth, claims: &Map<String, Value>) -> String {
    [config.owner_claim.as_str(), "oid"]
        .iter()
        .find_map(|name| match claims.get(*name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| config.fallback_owner.clone())
}

pub async fn authenticate(
    validator: &JwtValidator,
    config: &config::Auth,
    credentials: Credentials<'_>,
) -> Result<Identity> {
    if should_bypass(config, credentials.path) {
        let owner = credentials
            .owner_header
            .or(credentials.owner_query)
            .filter(|o| !o.trim().is_empty())
            .map(|o| o.trim().to_string())
            .unwrap_or_else(|| config.fallback_owner.clone());
        return Ok(Identity {
            owner,
            bypassed: true,
        });
    }

    let token = credentials
        .bearer
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ErrorKind::AuthFailed("missing authorization token".to_string()))?;
    let claims = validator.validate(token).await?;
    let owner = owner_from_claims(config, &claims);
    tracing::debug!(%owner, "authenticated");

    Ok(Identity {
        owner,
        bypassed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bypass: bool) -> config::Auth {
        config::Auth {
            bypass,
            ..Default::default()
        }
    }

    #[test]
    fn email_client_paths_are_bypassed() {
        let config = config(false);
        assert!(should_bypass(&config, "/track/pixel"));
        assert!(should_bypass(&config, "/api/Unsubscribe"));
        assert!(!should_bypass(&config, "/campaigns"));
        // matches whole path segments only
        assert!(!should_bypass(&config, "/unsubscribes"));
        assert!(!should_bypass(&config, "/unsubscribes/3f1c"));
        assert!(should_bypass(&config::Auth { bypass: true, ..config }, "/campaigns"));
    }

    #[test]
    fn owner_claim_precedence() {
        let config = config::Auth {
            owner_claim: "councillor".to_string(),
            ..Default::default()
        };
        let mut claims = Map::new();
        assert_eq!(owner_from_claims(&config, &claims), "default-councillor");
        claims.insert("oid".to_string(), Value::String("oid-1".to_string()));
        assert_eq!(owner_from_claims(&config, &claims), "oid-1");
        claims.insert("councillor".to_string(), Value::String("c-1".to_string()));
        assert_eq!(owner_from_claims(&config, &claims), "c-1");
        claims.insert("councillor".to_string(), Value::Bool(true));
        assert_eq!(owner_from_claims(&config, &claims), "oid-1");
    }

    #[tokio::test]
    async fn bypass_prefers_header_then_query() {
        let config = config(true);
        let validator = JwtValidator::new(&config);

        let identity = authenticate(
            &validator,
            &config,
            Credentials {
                path: "/contacts",
                owner_header: Some("cid1"),
                owner_query: Some("cid2"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(identity.owner, "cid1");
        assert!(identity.bypassed);

        let identity = authenticate(
            &validator,
            &config,
            Credentials {
                path: "/contacts",
                owner_query: Some("cid2"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(identity.owner, "cid2");

        let identity = authenticate(&validator, &config, Credentials::default())
            .await
            .unwrap();
        assert_eq!(identity.owner, "default-councillor");
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let config = config(false);
        let validator = JwtValidator::new(&config);
        let err = authenticate(
            &validator,
            &config,
            Credentials {
                path: "/contacts",
                owner_header: Some("cid1"),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AuthFailed(_)));
    }
}
