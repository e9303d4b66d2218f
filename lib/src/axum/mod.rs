pub mod campaigns;
pub mod contacts;
pub mod docs;
pub mod error;
pub mod extract;
pub mod lists;
pub mod tracking;
pub mod unsubscribes;

pub use extract::{JsonBody, Owner};

use std::sync::Arc;

use axum::Extension;
use tower_http::trace::TraceLayer;

use crate::auth::JwtValidator;
use crate::email::render::Renderer;
use crate::{Config, Database, Dispatcher, Result};

pub type Router = axum::Router;

pub type ConfigExt<C = Config> = Extension<Arc<C>>;
pub type DbExt = Extension<Arc<Database>>;
pub type DispatcherExt = Extension<Dispatcher>;
pub type RendererExt = Extension<Arc<Renderer>>;
pub type ValidatorExt = Extension<Arc<JwtValidator>>;

/// Collection response body.
#[derive(Clone, Debug, Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for Items<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

/// Registers civicmail routes on the provided router.
///
/// # Configurable routes
///
/// Route groups (`lists`, `contacts`, `campaigns`, `tracking`,
/// `unsubscribes`, `docs`) can be switched off through `routes.disable` in
/// config. A group listed in `routes.enable` is always registered.
pub fn router(mut router: Router, config: &Config) -> Router {
    router = conditional_merge("lists", router, lists::router(), config);
    router = conditional_merge("contacts", router, contacts::router(), config);
    router = conditional_merge("campaigns", router, campaigns::router(), config);
    router = conditional_merge("tracking", router, tracking::router(), config);
    router = conditional_merge("unsubscribes", router, unsubscribes::router(), config);
    conditional_merge("docs", router, docs::router(), config)
}

fn conditional_merge(route: &str, routera: Router, routerb: Router, config: &Config) -> Router {
    if config.routes.enable.contains(&route.to_string())
        || !config.routes.disable.contains(&route.to_string())
    {
        routera.merge(routerb)
    } else {
        routera
    }
}

/// Registers civicmail routes and wraps them with the shared application
/// state.
pub fn app(
    router: Router,
    config: Config,
    db: Arc<Database>,
    dispatcher: Dispatcher,
) -> Result<Router> {
    let renderer = Renderer::new(&config.tracking)?;
    let validator = JwtValidator::new(&config.auth);

    Ok(self::router(router, &config)
        .layer(Extension(Arc::new(validator)))
        .layer(Extension(Arc::new(renderer)))
        .layer(Extension(dispatcher))
        .layer(Extension(db))
        .layer(Extension(Arc::new(config)))
        .layer(TraceLayer::new_for_http()))
}

/// Opens the store described by config, registers civicmail routes and
/// starts the web server.
pub async fn start(router: Router, config: Config) -> Result<()> {
    start_with(Database::new(&config.storage)?, router, config).await
}

pub async fn start_with(db: Database, router: Router, config: Config) -> Result<()> {
    crate::tracing::init(&config).unwrap_or_else(|e| {
        log::warn!("failed to initialize tracing (perhaps it was already initialized?): {e}")
    });

    // Seed demo data so that a fresh dev instance has something to send to
    if config.dev.enabled && config.dev.mock {
        crate::mock::generate(&config, &db)?;
    }

    if config.auth.bypass {
        tracing::warn!("auth bypass enabled, owner is taken from the request");
    }

    let db = Arc::new(db);
    let dispatcher = Dispatcher::from_config(db.clone(), &config);
    let addr = config.address;
    let router = app(router, config, db, dispatcher)?;

    // Serve the application
    tracing::info!("starting server at {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
