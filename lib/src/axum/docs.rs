use axum::{
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json,
};
use serde_json::{json, Map, Value};

use crate::routes;

use super::{ConfigExt, Router};

pub fn router() -> Router {
    Router::new()
        .route(routes::OPENAPI, get(openapi))
        .route(routes::DOCS, get(docs))
}

pub async fn openapi(Extension(config): ConfigExt) -> impl IntoResponse {
    Json(description(&config.name, &config.version))
}

pub async fn docs() -> impl IntoResponse {
    Html(VIEWER)
}

const VIEWER: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>API documentation</title>
  <style>
    body { font-family: sans-serif; margin: 24px; }
    pre { background: #f5f5f5; padding: 16px; overflow: auto; }
  </style>
</head>
<body>
  <h1>API documentation</h1>
  <p>Machine readable description: <a href="/openapi.json">/openapi.json</a></p>
  <pre id="document">loading...</pre>
  <script>
    fetch('/openapi.json')
      .then(function (r) { return r.json(); })
      .then(function (doc) {
        document.getElementById('document').textContent = JSON.stringify(doc, null, 2);
      })
      .catch(function (e) {
        document.getElementById('document').textContent = 'failed to load: ' + e;
      });
  </script>
</body>
</html>
"#;

fn op(summary: &str) -> Value {
    json!({ "summary": summary, "responses": { "200": { "description": "OK" } } })
}

fn created(summary: &str) -> Value {
    json!({ "summary": summary, "responses": { "201": { "description": "Created" } } })
}

fn bypassed(summary: &str, content_type: &str) -> Value {
    json!({
        "summary": summary,
        "security": [],
        "responses": { "200": { "description": "OK", "content": { content_type: {} } } }
    })
}

/// OpenAPI 3 description of the HTTP surface.
pub fn description(name: &str, version: &str) -> Value {
    let paths = [
        (
            routes::DISTRIBUTION_LISTS,
            json!({
                "get": op("List distribution lists"),
                "post": created("Create a distribution list")
            }),
        ),
        (
            routes::DISTRIBUTION_LIST,
            json!({ "delete": op("Delete a distribution list and its memberships") }),
        ),
        (
            routes::DISTRIBUTION_LIST_CONTACTS,
            json!({
                "get": op("List contacts of a distribution list"),
                "post": created("Add a contact to a distribution list")
            }),
        ),
        (routes::CONTACTS, json!({ "get": op("List contacts") })),
        (
            routes::CONTACT,
            json!({ "delete": op("Delete a contact and its memberships") }),
        ),
        (
            routes::CAMPAIGNS,
            json!({
                "get": op("List campaigns"),
                "post": created("Create and dispatch a campaign")
            }),
        ),
        (
            routes::CAMPAIGN,
            json!({
                "get": op("Get a campaign"),
                "delete": op("Delete a campaign with its recipients and events")
            }),
        ),
        (
            routes::CAMPAIGN_METRICS,
            json!({ "get": op("Campaign engagement metrics") }),
        ),
        (
            routes::CAMPAIGN_RECIPIENTS,
            json!({ "get": op("Campaign recipients with summary") }),
        ),
        (
            routes::CAMPAIGN_DISPATCH,
            json!({ "post": op("Dispatch a queued or failed campaign") }),
        ),
        (routes::TRACK_OPEN, json!({ "post": op("Record an open") })),
        (
            routes::TRACK_UNSUBSCRIBE,
            json!({ "post": op("Record an unsubscribe") }),
        ),
        (
            routes::TRACK_PIXEL,
            json!({ "get": bypassed("Tracking pixel", "image/gif") }),
        ),
        (
            routes::UNSUBSCRIBE,
            json!({ "get": bypassed("Unsubscribe link target", "text/html") }),
        ),
        (
            routes::UNSUBSCRIBES,
            json!({
                "get": op("List opt-outs"),
                "post": created("Add an opt-out"),
                "delete": op("Remove opt-outs by ?email=")
            }),
        ),
        (
            routes::UNSUBSCRIBE_ENTRY,
            json!({ "delete": op("Remove an opt-out") }),
        ),
    ]
    .into_iter()
    .map(|(route, item)| (route.replace(":id", "{id}"), item))
    .collect::<Map<String, Value>>();

    json!({
        "openapi": "3.0.3",
        "info": { "title": name, "version": version },
        "components": {
            "securitySchemes": {
                "bearer": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            }
        },
        "security": [{ "bearer": [] }],
        "paths": paths
    })
}
