use std::net::SocketAddr;

use serde::de::DeserializeOwned;

use crate::Result;

pub static CONFIG_FILE: &'static str = "civicmail.toml";

/// Application configuration.
///
/// # Sensible defaults
///
/// `Config::default()` describes a local service that stores data under
/// `./db`, trusts the `x-councillor-id` header only when `auth.bypass` is
/// switched on, and simulates dispatch instead of talking to a real email
/// provider.
///
/// Using the *struct update syntax* one can initialize a new `Config`, making
/// a few changes right in the definition.
///
/// ```ignore
/// let cfg = Config {
///     dispatch: Dispatch {
///         enable_send: true,
///         ..Default::default()
///     },
///     ..Default::default()
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub version: String,

    /// Domain name pointing to the machine running the application.
    pub domain: String,
    /// Address on which to serve the application. Defaults to
    /// `127.0.0.1:8080`.
    pub address: SocketAddr,

    pub storage: Storage,
    pub tracing: Tracing,

    pub auth: Auth,

    pub email: Email,
    pub dispatch: Dispatch,
    pub tracking: Tracking,

    /// Development mode configuration.
    pub dev: DevMode,

    /// Selectively enable/disable route groups.
    pub routes: Routes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            domain: "localhost".to_string(),
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            storage: Storage::default(),
            tracing: Tracing::default(),
            auth: Auth::default(),
            email: Email::default(),
            dispatch: Dispatch::default(),
            tracking: Tracking::default(),
            dev: DevMode::default(),
            routes: Routes::default(),
        }
    }
}

/// Loads application config from toml file at default location.
pub fn load<T: DeserializeOwned>() -> Result<T> {
    load_from(CONFIG_FILE)
}

/// Loads application config from toml file at standard path using provided
/// name.
///
/// For example for `name` == `civicmail.toml` we will load both
/// `civicmail.toml` and `secret.civicmail.toml` from the working directory.
/// Environment variables override both, with `__` separating sections, e.g.
/// `DISPATCH__ENABLE_SEND=true`.
pub fn load_from<T: DeserializeOwned>(name: impl AsRef<str>) -> Result<T> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name.as_ref()))
        .add_source(config::File::with_name(&format!("secret.{}", name.as_ref())).required(false))
        .add_source(environment())
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

/// Loads application config from multiple toml files at given paths.
pub fn load_from_many<T: DeserializeOwned>(paths: &[impl AsRef<str>]) -> Result<T> {
    let mut builder = config::Config::builder();
    for path in paths {
        builder = builder.add_source(config::File::with_name(path.as_ref()));
    }
    let config = builder.add_source(environment()).build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

fn environment() -> config::Environment {
    config::Environment::default()
        .separator("__")
        .prefix_separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("auth.allowed_audiences")
        .with_list_parse_key("auth.bypass_paths")
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Storage {
    /// Directory holding the document store. Relative to the current working
    /// directory.
    pub path: String,
    /// Keeps everything in memory and drops it with the process. Used by
    /// tests and throwaway dev runs.
    pub temporary: bool,

    /// Reads of freshly written memberships are retried this many times
    /// before an empty result is accepted.
    pub read_attempts: u32,
    /// Initial delay between membership read attempts, doubled after each
    /// attempt.
    pub read_backoff_ms: u64,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            path: "./db".to_string(),
            temporary: false,
            read_attempts: 3,
            read_backoff_ms: 150,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracing {
    pub enabled: bool,

    pub mode: crate::tracing::Mode,
    pub level: crate::tracing::Level,

    pub loki_address: String,
    pub loki_token: String,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: crate::tracing::Mode::default(),
            level: crate::tracing::Level::default(),
            loki_address: "".to_string(),
            loki_token: "".to_string(),
        }
    }
}

/// Identity configuration.
///
/// Tokens are issued by an external identity provider and validated against
/// its published signing keys. With `bypass` the tenant is taken from the
/// `x-councillor-id` header or the `councillorId` query parameter instead.
/// NOTE: make sure bypass is disabled on production.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Auth {
    pub bypass: bool,
    /// Path fragments that never require a token, e.g. links opened from
    /// inside an email client.
    pub bypass_paths: Vec<String>,

    /// Directory tenant of the identity provider. When empty the common
    /// endpoint is used and the issuer is not checked.
    pub tenant_id: String,
    /// Client id of this API as registered with the identity provider.
    pub client_id: String,
    /// Additional accepted token audiences.
    pub allowed_audiences: Vec<String>,
    /// Overrides the key set location derived from `tenant_id`.
    pub jwks_uri: Option<String>,

    /// Claim holding the councillor identifier.
    pub owner_claim: String,
    /// Owner used when neither the token nor the request identifies one.
    pub fallback_owner: String,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            bypass: false,
            bypass_paths: vec!["/unsubscribe".to_string(), "/track/pixel".to_string()],
            tenant_id: String::new(),
            client_id: String::new(),
            allowed_audiences: vec![],
            jwks_uri: None,
            owner_claim: "oid".to_string(),
            fallback_owner: "default-councillor".to_string(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// SMTP relay with STARTTLS.
    Smtp,
    /// Transactional email provider reached over its JSON HTTP API.
    #[default]
    Api,
    /// In-process transport recording messages instead of sending them.
    Memory,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Email {
    /// Address that campaign messages are sent from.
    pub sender: String,

    pub transport: TransportKind,

    // Smtp server and credentials.
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,

    // Email provider api location and access key.
    pub api_endpoint: String,
    pub api_key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Dispatch {
    /// Dispatch right after the campaign is created, within the same request.
    /// Otherwise the campaign is left queued.
    pub inline: bool,
    /// Global switch for outbound sending. When off, dispatch is simulated.
    pub enable_send: bool,
    /// Send with bounded concurrency instead of one message at a time.
    pub concurrent: bool,
    /// Number of recipients per dispatch wave.
    pub batch_size: usize,
    /// Maximum number of sends in flight at once, across all batches.
    pub max_concurrent: usize,
    /// Records provider error text on failed recipients and logs every
    /// successful send. Error text is withheld by default.
    pub diagnostics: bool,
    /// Seconds after which a campaign left `dispatching` by a run that never
    /// settled may be claimed again.
    pub lease_secs: u32,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            inline: true,
            enable_send: false,
            concurrent: true,
            batch_size: 50,
            max_concurrent: 10,
            diagnostics: false,
            lease_secs: 900,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracking {
    /// Public address of this service as seen from recipients' mail clients,
    /// e.g. `https://mail.example.org/api`. Links are relative if unset.
    pub public_base_url: Option<String>,
    pub pixel_path: String,
    pub unsubscribe_path: String,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            public_base_url: None,
            pixel_path: crate::routes::TRACK_PIXEL.to_string(),
            unsubscribe_path: crate::routes::UNSUBSCRIBE.to_string(),
        }
    }
}

/// NOTE: make sure to disable on production.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DevMode {
    /// Global switch for all dev mode items.
    pub enabled: bool,
    /// Seeds a demo list with a couple of contacts for `owner`.
    pub mock: bool,
    pub owner: String,
}

impl Default for DevMode {
    fn default() -> Self {
        Self {
            enabled: false,
            mock: false,
            owner: "default-councillor".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Routes {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
}
