//! Corner-cutting example to show off the shortest path to a usable artifact.
//!
//! Runs the service in dev mode on a throwaway store. A demo list is seeded
//! for the `demo` owner and campaigns are simulated, nothing leaves the
//! machine. Try:
//!
//! ```text
//! curl -H 'x-councillor-id: demo' localhost:8001/distribution-lists
//! ```

use std::net::SocketAddr;

use axum::{response::Html, routing::get};

use civicmail::{config, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config {
        address: SocketAddr::from(([127, 0, 0, 1], 8001)),
        storage: config::Storage {
            temporary: true,
            ..Default::default()
        },
        auth: config::Auth {
            bypass: true,
            fallback_owner: "demo".to_string(),
            ..Default::default()
        },
        dev: config::DevMode {
            enabled: true,
            mock: true,
            owner: "demo".to_string(),
        },
        ..Default::default()
    };

    // main application router
    let router = civicmail::axum::Router::new().route("/", get(home));

    // start the application
    civicmail::axum::start(router, config).await?;

    Ok(())
}

async fn home() -> Html<&'static str> {
    Html("civicmail demo | <a href=\"/docs\">api docs</a>")
}
