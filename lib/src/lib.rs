//! Email campaigns for councillors.
//!
//! Councillors (owners) keep distribution lists of contacts, compose
//! campaigns addressed to some of those lists and dispatch them through an
//! email transport. Opens and unsubscribes coming back from recipients'
//! mail clients are recorded and rolled up into per-campaign metrics.
//!
//! All data is partitioned by owner. Nothing crosses partition boundaries.

#[macro_use]
extern crate serde_derive;

pub mod auth;
pub mod campaign;
pub mod config;
pub mod contact;
pub mod db;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod list;
pub mod mock;
pub mod optout;
pub mod recipient;
pub mod routes;
pub mod tracing;
pub mod tracking;

#[cfg(feature = "axum")]
pub mod axum;

pub use config::Config;
pub use db::Database;
pub use error::{Error, ErrorKind, Result};

pub use campaign::{Campaign, Recipient};
pub use contact::Contact;
pub use dispatch::Dispatcher;
pub use list::DistributionList;
pub use optout::Unsubscribe;
pub use tracking::TrackingEvent;
