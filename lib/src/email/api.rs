//! Transactional email provider reached over its JSON HTTP API.
//!
//! Submitting a message starts a long running operation on the provider
//! side. The operation id doubles as the message id and is polled until the
//! provider settles on an outcome.

use std::time::Duration;

use reqwest::StatusCode;

use crate::{config, ErrorKind, Result};

use super::{require, OutgoingEmail, Transport};

/// Upper bound on operation polls per message.
const MAX_POLLS: u32 = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ApiTransport {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    sender_address: &'a str,
    content: Content<'a>,
    recipients: Recipients<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentPayload<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Content<'a> {
    subject: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    html: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    plain_text: &'a str,
}

#[derive(Serialize)]
struct Recipients<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Serialize)]
struct Address<'a> {
    address: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentPayload<'a> {
    name: &'a str,
    content_type: &'a str,
    content_in_base64: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Operation {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl Operation {
    fn is_running(&self) -> bool {
        matches!(self.status.as_str(), "NotStarted" | "Running")
    }

    fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "Failed" | "Canceled")
    }
}

impl ApiTransport {
    pub fn new(config: &config::Email) -> Result<Self> {
        let endpoint = require(&config.api_endpoint, "email api endpoint")?;
        let key = require(&config.api_key, "email api key")?;
        url::Url::parse(endpoint)?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    async fn poll(&self, id: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}/emails/operations/{}", self.endpoint, id))
            .header("api-key", &self.key)
            .send()
            .await?)
    }

    async fn parse(response: reqwest::Response) -> Result<Operation> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<Operation>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ErrorKind::Transport(format!("provider answered {}: {}", status, body)).into())
    }
}

#[async_trait::async_trait]
impl Transport for ApiTransport {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let request = SendRequest {
            sender_address: &email.sender,
            content: Content {
                subject: &email.subject,
                html: &email.html,
                plain_text: &email.plain_text,
            },
            recipients: Recipients {
                to: vec![Address { address: &email.to }],
            },
            attachments: email
                .attachments
                .iter()
                .filter(|a| a.is_complete())
                .map(|a| AttachmentPayload {
                    name: &a.name,
                    content_type: &a.content_type,
                    content_in_base64: &a.base64,
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/emails:send", self.endpoint))
            .header("api-key", &self.key)
            .json(&request)
            .send()
            .await?;
        let mut operation = Self::parse(response).await?;

        let mut polls = 0;
        while operation.is_running() && polls < MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;
            operation = Self::parse(self.poll(&operation.id).await?).await?;
            polls += 1;
        }

        if operation.is_failed() {
            let detail = operation
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| operation.status.clone());
            return Err(ErrorKind::Transport(detail).into());
        }

        Ok(operation.id)
    }

    async fn status(&self, message_id: &str) -> Result<Option<String>> {
        let response = self.poll(message_id).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::parse(response).await?.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let request = SendRequest {
            sender_address: "news@council.example",
            content: Content {
                subject: "Hello",
                html: "<p>Hi</p>",
                plain_text: "",
            },
            recipients: Recipients {
                to: vec![Address { address: "a@x.com" }],
            },
            attachments: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["senderAddress"], "news@council.example");
        assert_eq!(json["recipients"]["to"][0]["address"], "a@x.com");
        assert_eq!(json["content"]["html"], "<p>Hi</p>");
        assert!(json["content"].get("plainText").is_none());
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn operation_states() {
        let running: Operation =
            serde_json::from_str(r#"{"id":"op-1","status":"Running"}"#).unwrap();
        assert!(running.is_running());
        let failed: Operation = serde_json::from_str(
            r#"{"id":"op-1","status":"Failed","error":{"code":"Denied","message":"blocked"}}"#,
        )
        .unwrap();
        assert!(failed.is_failed());
        assert_eq!(failed.error.unwrap().code, "Denied");
    }

    #[test]
    fn endpoint_must_be_a_url() {
        let err = ApiTransport::new(&config::Email {
            api_endpoint: "not a url".to_string(),
            api_key: "secret".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err.kind, ErrorKind::UrlParseError(_)));
    }
}
