use std::str::FromStr;

use tracing_subscriber::field::MakeExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use yansi::Paint;

use crate::error::{ErrorKind, Result};
use crate::Config;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Json output plus log shipping to loki.
    Production,
    #[default]
    Formatted,
    Json,
}

impl FromStr for Mode {
    type Err = crate::Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "prod" | "production" => Ok(Self::Production),
            "formatted" => Ok(Self::Formatted),
            "json" => Ok(Self::Json),
            _ => Err(ErrorKind::ParsingError(format!("unknown log mode: {}", input)).into()),
        }
    }
}

#[derive(PartialEq, Eq, Default, Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Only shows errors and warnings
    Critical,
    /// Shows errors, warnings, and some informational messages that are likely
    /// to be relevant when troubleshooting such as configuration
    Support,
    /// Shows everything except debug and trace information
    #[default]
    Normal,
    /// Shows debug information
    Debug,
    /// Shows everything
    Trace,
    /// Shows nothing
    Off,
}

impl FromStr for Level {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match &*s.to_ascii_lowercase() {
            "critical" | "error" => Ok(Level::Critical),
            "support" | "warn" => Ok(Level::Support),
            "normal" | "info" => Ok(Level::Normal),
            "debug" | "dbg" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            "off" | "none" => Ok(Level::Off),
            _ => Err(ErrorKind::ParsingError(format!(
                "expected a log level (off, trace, debug, normal, support, critical), got: {}",
                s
            ))
            .into()),
        }
    }
}

pub fn filter_layer(level: Level) -> EnvFilter {
    let filter_str = match level {
        Level::Critical => "warn,rustls=off,hyper=off",
        Level::Support => "warn,rustls=off,hyper=off",
        Level::Normal => "info,rustls=off,hyper=off",
        Level::Debug => "debug,sled=info,hyper=info,reqwest=info",
        Level::Trace => "trace,sled=info,hyper=info,mio=debug,want=off",
        Level::Off => "off",
    };

    EnvFilter::try_new(filter_str).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn default_logging_layer<S>() -> impl Layer<S>
where
    S: tracing::Subscriber,
    S: for<'span> LookupSpan<'span>,
{
    let field_format = tracing_subscriber::fmt::format::debug_fn(|writer, field, value| {
        // We'll format the field name and value separated with a colon.
        if field.name() == "message" {
            write!(writer, "{:?}", Paint::new(value).bold())
        } else {
            write!(writer, "{}: {:?}", field, Paint::default(value).bold())
        }
    })
    .delimited(", ")
    .display_messages();

    tracing_subscriber::fmt::layer()
        .fmt_fields(field_format)
        // Configure the formatter to use `print!` rather than
        // `stdout().write_str(...)`, so that logs are captured by libtest's test
        // capturing.
        .with_test_writer()
}

pub fn json_logging_layer<
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a> + tracing::Subscriber,
>() -> impl tracing_subscriber::Layer<S> {
    Paint::disable();

    tracing_subscriber::fmt::layer()
        .json()
        // Configure the formatter to use `print!` rather than
        // `stdout().write_str(...)`, so that logs are captured by libtest's test
        // capturing.
        .with_test_writer()
}

/// Initializes the global subscriber according to the tracing config.
///
/// Records emitted through the `log` facade are forwarded as well.
pub fn init(config: &Config) -> Result<()> {
    use tracing_log::LogTracer;
    use tracing_subscriber::prelude::*;

    if !config.tracing.enabled {
        return Ok(());
    }

    LogTracer::init().map_err(|e| ErrorKind::Other(e.to_string()))?;

    match config.tracing.mode {
        Mode::Production => {
            use tracing_loki::url::Url;
            let (loki_layer, task) = tracing_loki::layer(
                Url::parse(&config.tracing.loki_address)?,
                vec![
                    ("host".into(), config.address.to_string()),
                    ("app".into(), config.name.clone()),
                ]
                .into_iter()
                .collect(),
                vec![("token".into(), config.tracing.loki_token.clone())]
                    .into_iter()
                    .collect(),
            )
            .map_err(|e| ErrorKind::Other(format!("failed making loki layer: {e}")))?;
            // The background task needs to be spawned so the logs actually get
            // delivered to loki.
            tokio::spawn(task);

            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(loki_layer)
                    .with(json_logging_layer())
                    .with(filter_layer(config.tracing.level)),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
        }
        Mode::Formatted => {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(default_logging_layer())
                    .with(filter_layer(config.tracing.level)),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
        }
        Mode::Json => {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(json_logging_layer())
                    .with(filter_layer(config.tracing.level)),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
        }
    };

    Ok(())
}
