//! Campaign content rendering and per-recipient personalization.
//!
//! Rendering happens once per campaign and produces the canonical document
//! stored with it. The canonical document carries [`Placeholder`] tokens in
//! its tracking and unsubscribe links. These are only replaced right before
//! a message is handed to the transport, see [`Personalization`].

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::{config, Result};

/// Named tokens in the canonical document.
///
/// Substituted in declaration order: owner, campaign, contact.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Placeholder {
    OwnerId,
    CampaignId,
    ContactId,
}

impl Placeholder {
    pub const ORDER: [Placeholder; 3] = [
        Placeholder::OwnerId,
        Placeholder::CampaignId,
        Placeholder::ContactId,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Placeholder::OwnerId => "{{owner_id}}",
            Placeholder::CampaignId => "{{campaign_id}}",
            Placeholder::ContactId => "{{contact_id}}",
        }
    }
}

/// Values substituted into the canonical document for a single recipient.
#[derive(Copy, Clone, Debug)]
pub struct Personalization<'a> {
    pub owner: &'a str,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
}

impl<'a> Personalization<'a> {
    pub fn new(owner: &'a str, campaign_id: Uuid, contact_id: Uuid) -> Self {
        Self {
            owner,
            campaign_id,
            contact_id,
        }
    }

    fn value(&self, placeholder: Placeholder) -> String {
        match placeholder {
            // owner ids are free-form, they end up in query strings
            Placeholder::OwnerId => {
                url::form_urlencoded::byte_serialize(self.owner.as_bytes()).collect()
            }
            Placeholder::CampaignId => self.campaign_id.to_string(),
            Placeholder::ContactId => self.contact_id.to_string(),
        }
    }

    pub fn apply(&self, template: &str) -> String {
        Placeholder::ORDER
            .iter()
            .fold(template.to_string(), |out, placeholder| {
                out.replace(placeholder.token(), &self.value(*placeholder))
            })
    }
}

/// Builds canonical campaign documents.
#[derive(Clone, Debug)]
pub struct Renderer {
    pixel_url: String,
    unsubscribe_url: String,
}

impl Renderer {
    pub fn new(config: &config::Tracking) -> Result<Self> {
        let base = match &config.public_base_url {
            Some(base) if !base.trim().is_empty() => {
                url::Url::parse(base.trim())?;
                base.trim().trim_end_matches('/').to_string()
            }
            _ => String::new(),
        };
        Ok(Self {
            pixel_url: link(&base, &config.pixel_path),
            unsubscribe_url: link(&base, &config.unsubscribe_path),
        })
    }

    pub fn pixel_url(&self) -> &str {
        &self.pixel_url
    }

    pub fn unsubscribe_url(&self) -> &str {
        &self.unsubscribe_url
    }

    /// Produces the canonical document for the raw content.
    ///
    /// Fragments are wrapped in a minimal document. The tracking pixel and
    /// the unsubscribe link go right before the closing body tag, or at the
    /// very end if there is none.
    pub fn render(&self, raw: &str) -> String {
        let head = raw.trim_start().to_ascii_lowercase();
        let document = if head.starts_with("<html") || head.starts_with("<!doctype") {
            raw.to_string()
        } else {
            format!("<html><body>{}</body></html>", raw)
        };

        let instrumentation = format!(
            "<img src=\"{}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\" />\
             <p style=\"font-size:12px;color:#666666\">Don't want these emails? \
             <a href=\"{}\">Unsubscribe</a></p>",
            self.pixel_url, self.unsubscribe_url
        );

        // ascii lowercasing keeps byte offsets intact
        match document.to_ascii_lowercase().rfind("</body>") {
            Some(idx) => {
                let mut out = String::with_capacity(document.len() + instrumentation.len());
                out.push_str(&document[..idx]);
                out.push_str(&instrumentation);
                out.push_str(&document[idx..]);
                out
            }
            None => document + &instrumentation,
        }
    }
}

fn link(base: &str, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!(
        "{}{}?councillorId={}&campaignId={}&contactId={}",
        base,
        path,
        Placeholder::OwnerId.token(),
        Placeholder::CampaignId.token(),
        Placeholder::ContactId.token()
    )
}

fn pattern(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

fn markup() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"<[^>]+>")
}

/// Derives the plain-text alternative of a message.
///
/// Raw content without markup is used as is. Otherwise markup is stripped
/// from the html, keeping line and paragraph breaks.
pub fn plain_text(raw: &str, html: &str) -> String {
    let raw = raw.trim();
    if !raw.is_empty() && !markup().is_match(raw) {
        return raw.to_string();
    }

    static BREAK: OnceLock<Regex> = OnceLock::new();
    static PARAGRAPH: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINES: OnceLock<Regex> = OnceLock::new();

    let text = pattern(&BREAK, r"(?i)<br\s*/?>").replace_all(html, "\n");
    let text = pattern(&PARAGRAPH, r"(?i)</p>").replace_all(&text, "\n\n");
    let text = markup().replace_all(&text, "");
    let text = pattern(&BLANK_LINES, r"\n{3,}").replace_all(&text, "\n\n");
    text.trim().to_string()
}
