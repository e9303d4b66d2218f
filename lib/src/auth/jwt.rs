use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::{config, Error, ErrorKind, Result};

const PROVIDER: &str = "https://login.microsoftonline.com";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Validates bearer tokens against the identity provider's published
/// signing keys.
///
/// The key set is fetched on first use and kept. An unknown key id triggers
/// a single refetch to pick up rotated keys.
pub struct JwtValidator {
    jwks_uri: String,
    audiences: Vec<String>,
    issuer: Option<String>,

    client: reqwest::Client,
    keys: RwLock<Option<JwkSet>>,
}

impl JwtValidator {
    pub fn new(config: &config::Auth) -> Self {
        let tenant = config.tenant_id.trim();
        let jwks_uri = match &config.jwks_uri {
            Some(uri) if !uri.is_empty() => uri.clone(),
            _ if !tenant.is_empty() => format!("{}/{}/discovery/v2.0/keys", PROVIDER, tenant),
            _ => format!("{}/common/discovery/v2.0/keys", PROVIDER),
        };
        let issuer = (!tenant.is_empty()).then(|| format!("{}/{}/v2.0", PROVIDER, tenant));

        Self {
            jwks_uri,
            audiences: audiences(config),
            issuer,
            client: reqwest::Client::new(),
            keys: RwLock::new(None),
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Seeds the key cache, skipping the network fetch.
    pub async fn with_keys(self, keys: JwkSet) -> Self {
        *self.keys.write().await = Some(keys);
        self
    }

    async fn fetch(&self) -> Result<JwkSet> {
        tracing::debug!(uri = %self.jwks_uri, "fetching signing keys");
        let keys = self
            .client
            .get(&self.jwks_uri)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                tracing::error!("failed to fetch signing keys: {e}");
                ErrorKind::AuthFailed("unable to fetch signing keys".to_string())
            })?
            .json::<JwkSet>()
            .await?;
        *self.keys.write().await = Some(keys.clone());
        Ok(keys)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(keys) = self.keys.read().await.as_ref() {
            if let Some(jwk) = keys.find(kid) {
                return Ok(DecodingKey::from_jwk(jwk).map_err(rejected)?);
            }
        }
        let keys = self.fetch().await?;
        match keys.find(kid) {
            Some(jwk) => Ok(DecodingKey::from_jwk(jwk).map_err(rejected)?),
            None => Err(ErrorKind::AuthFailed(format!("signing key not found: {}", kid)).into()),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "aud"]);
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }

    /// Verifies signature, audience, issuer and expiry, returning the
    /// token's claims.
    pub async fn validate(&self, token: &str) -> Result<Map<String, Value>> {
        let header = jsonwebtoken::decode_header(token).map_err(rejected)?;
        let kid = header
            .kid
            .ok_or_else(|| ErrorKind::AuthFailed("token missing key id".to_string()))?;

        let key = self.decoding_key(&kid).await?;
        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &self.validation())
            .map_err(rejected)?;

        Ok(data.claims)
    }
}

fn rejected(e: jsonwebtoken::errors::Error) -> Error {
    tracing::warn!("token validation failed: {e}");
    ErrorKind::AuthFailed(format!("invalid token: {}", e)).into()
}

/// Accepted audiences: the client id in its plain and `api://` forms plus
/// any configured extras.
fn audiences(config: &config::Auth) -> Vec<String> {
    let mut audiences = Vec::new();
    let client_id = config.client_id.trim();
    if !client_id.is_empty() {
        audiences.push(client_id.to_string());
        audiences.push(format!("api://{}", client_id));
        audiences.push(format!("api://{}-api", client_id.to_lowercase()));
    }
    audiences.extend(
        config
            .allowed_audiences
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty()),
    );
    audiences
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn auth(tenant: &str, client: &str) -> config::Auth {
        config::Auth {
            tenant_id: tenant.to_string(),
            client_id: client.to_string(),
            allowed_audiences: vec!["extra".to_string(), " ".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn endpoints_follow_tenant() {
        let validator = JwtValidator::new(&auth("tenant-1", "Client"));
        assert_eq!(
            validator.jwks_uri(),
            "https://login.microsoftonline.com/tenant-1/discovery/v2.0/keys"
        );
        assert_eq!(
            validator.issuer.as_deref(),
            Some("https://login.microsoftonline.com/tenant-1/v2.0")
        );
        assert_eq!(
            validator.audiences,
            vec!["Client", "api://Client", "api://client-api", "extra"]
        );

        let common = JwtValidator::new(&auth("", ""));
        assert!(common.jwks_uri().contains("/common/"));
        assert!(common.issuer.is_none());
        assert_eq!(common.audiences, vec!["extra"]);
    }

    #[tokio::test]
    async fn token_without_key_id_is_rejected() {
        let validator = JwtValidator::new(&auth("tenant-1", "client"));
        let claims = serde_json::json!({ "oid": "cid1", "aud": "client", "exp": 4_000_000_000u64 });
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AuthFailed(_)));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let validator = JwtValidator::new(&auth("", "client"));
        let err = validator.validate("not.a.token").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AuthFailed(_)));
    }

    #[tokio::test]
    async fn unknown_key_id_is_rejected() {
        let validator = JwtValidator::new(&auth("", "client"))
            .with_keys(JwkSet { keys: vec![] })
            .await;
        let mut header = Header::default();
        header.kid = Some("kid-1".to_string());
        let claims = serde_json::json!({ "aud": "client", "exp": 4_000_000_000u64 });
        let token =
            jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        // the cache misses and the refetch goes to an unreachable provider
        // or finds no key; both end in an auth failure
        let validator = JwtValidator {
            jwks_uri: "http://127.0.0.1:9/keys".to_string(),
            ..validator
        };
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AuthFailed(_)));
    }
}
