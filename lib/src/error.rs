use std::backtrace::Backtrace;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub backtrace: Backtrace,
    /// Partition the failing operation was scoped to, if known.
    pub owner: Option<String>,
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
            owner: None,
        }
    }

    pub fn new_with(kind: ErrorKind, owner: impl Into<String>) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
            owner: Some(owner.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(owner) = &self.owner {
            write!(f, ", owner: {}", owner)?;
        }
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, ", {}", self.backtrace)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("unexpected error")]
    StdIoError(#[from] std::io::Error),

    #[error("unexpected error")]
    Unexpected,

    #[error("config error: {0}")]
    ConfigError(#[from] config::ConfigError),
    /// Required setting for outbound sending is absent. Fatal for dispatch.
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("failed parsing value from string: {0}")]
    ParsingError(String),

    #[error("http error: {0}")]
    HttpError(#[from] http::Error),
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("lettre email error: {0}")]
    LettreEmailError(#[from] lettre::error::Error),
    #[error("lettre smtp  error: {0}")]
    LettreSmtpError(#[from] lettre::transport::smtp::Error),
    #[error("failed parsing email address: {0}")]
    EmailParseError(String),
    #[error("failed sending email through smtp: {0}")]
    EmailBadResponse(String),
    #[error("email transport error: {0}")]
    Transport(String),

    #[error("other error: {0}")]
    Other(String),

    #[error("bad input: {0}")]
    BadInput(String),
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("jwt error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("dispatch conflict: {0}")]
    DispatchConflict(String),

    #[error("db error: {0}")]
    DbError(String),
    #[error("sled db error: {0}")]
    SledError(#[from] sled::Error),

    #[error("json decode error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("pot decode error: {0}")]
    PotError(#[from] pot::Error),
    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("uuid error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("url parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("infallible?")]
    Infallible(#[from] Infallible),
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Self::new(ErrorKind::Other(e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::new(ErrorKind::ReqwestError(e))
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Self::new(ErrorKind::HttpError(e))
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Self::new(ErrorKind::UuidError(e))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Self::new(ErrorKind::SledError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::JsonError(e))
    }
}

impl From<pot::Error> for Error {
    fn from(e: pot::Error) -> Self {
        Self::new(ErrorKind::PotError(e))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::new(ErrorKind::Base64Error(e))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::new(ErrorKind::JwtError(e))
    }
}

impl From<lettre::error::Error> for Error {
    fn from(e: lettre::error::Error) -> Self {
        Self::new(ErrorKind::LettreEmailError(e))
    }
}

impl From<lettre::transport::smtp::Error> for Error {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        Self::new(ErrorKind::LettreSmtpError(e))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::new(ErrorKind::UrlParseError(e))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::new(ErrorKind::ConfigError(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::StdIoError(e))
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        Self::new(ErrorKind::Infallible(e))
    }
}

impl From<ErrorKind> for Error {
    fn from(k: ErrorKind) -> Self {
        Self::new(k)
    }
}
