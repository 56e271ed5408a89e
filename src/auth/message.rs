//! EIP-4361 (Sign-In with Ethereum) message input.
//!
//! A message reaches the server either as the exact text the wallet signed or
//! as a JSON object of its fields. Both forms are reduced to [`SiweMessage`],
//! a `siwe::Message` whose canonical serialization is the submitted text.

use crate::auth::address::EvmAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message is empty")]
    Empty,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("{0}")]
    Syntax(String),

    #[error("invalid message JSON: {0}")]
    Json(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> MessageError {
    MessageError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// A parsed EIP-4361 message that serializes back to exactly the text it
/// was read from.
#[derive(Debug, Clone)]
pub struct SiweMessage {
    inner: siwe::Message,
    address: EvmAddress,
}

/// Field-object form of a message, as posted by browser SIWE libraries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFields {
    pub domain: String,
    pub address: String,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: Option<String>,
    pub not_before: Option<String>,
    pub request_id: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl MessageFields {
    /// Every field is a single line of the message text.
    fn reject_line_breaks(&self) -> Result<(), MessageError> {
        let mut values: Vec<(&'static str, &str)> = vec![
            ("domain", &self.domain),
            ("address", &self.address),
            ("uri", &self.uri),
            ("version", &self.version),
            ("nonce", &self.nonce),
            ("issued-at", &self.issued_at),
        ];
        values.extend(self.statement.as_deref().map(|v| ("statement", v)));
        values.extend(self.expiration_time.as_deref().map(|v| ("expiration-time", v)));
        values.extend(self.not_before.as_deref().map(|v| ("not-before", v)));
        values.extend(self.request_id.as_deref().map(|v| ("request-id", v)));
        values.extend(self.resources.iter().map(|v| ("resources", v.as_str())));

        match values
            .into_iter()
            .find(|(_, v)| v.contains(|c: char| c == '\n' || c == '\r'))
        {
            Some((field, _)) => Err(invalid(field, "must not contain line breaks")),
            None => Ok(()),
        }
    }

    /// Lay the fields out in EIP-4361 text form.
    fn to_text(&self, statement: &str) -> String {
        let mut text = format!(
            "{} wants you to sign in with your Ethereum account:\n{}\n\n{}\n\n\
             URI: {}\nVersion: {}\nChain ID: {}\nNonce: {}\nIssued At: {}",
            self.domain,
            self.address,
            statement,
            self.uri,
            self.version,
            self.chain_id,
            self.nonce,
            self.issued_at,
        );
        // Writing to a String cannot fail
        if let Some(t) = &self.expiration_time {
            let _ = write!(text, "\nExpiration Time: {t}");
        }
        if let Some(t) = &self.not_before {
            let _ = write!(text, "\nNot Before: {t}");
        }
        if let Some(id) = &self.request_id {
            let _ = write!(text, "\nRequest ID: {id}");
        }
        if !self.resources.is_empty() {
            text.push_str("\nResources:");
            for resource in &self.resources {
                let _ = write!(text, "\n- {resource}");
            }
        }
        text
    }
}

/// A message as received over the wire, before validation.
#[derive(Debug, Clone)]
pub enum RawMessage {
    Text(String),
    Fields(MessageFields),
    /// Undecoded JSON: either canonical text or a field object.
    Json(serde_json::Value),
}

impl RawMessage {
    pub fn parse(self) -> Result<SiweMessage, MessageError> {
        match self {
            RawMessage::Text(text) => text.parse(),
            RawMessage::Fields(fields) => SiweMessage::from_fields(fields),
            RawMessage::Json(serde_json::Value::String(text)) => text.parse(),
            RawMessage::Json(value @ serde_json::Value::Object(_)) => {
                let fields: MessageFields =
                    serde_json::from_value(value).map_err(|e| MessageError::Json(e.to_string()))?;
                SiweMessage::from_fields(fields)
            }
            RawMessage::Json(_) => Err(MessageError::Json(
                "expected a string or an object".to_string(),
            )),
        }
    }
}

impl From<serde_json::Value> for RawMessage {
    fn from(value: serde_json::Value) -> Self {
        RawMessage::Json(value)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        RawMessage::Text(text.to_string())
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        RawMessage::Text(text)
    }
}

impl From<MessageFields> for RawMessage {
    fn from(fields: MessageFields) -> Self {
        RawMessage::Fields(fields)
    }
}

impl SiweMessage {
    /// Build a message from its fields through the same parser as the text
    /// form.
    pub fn from_fields(fields: MessageFields) -> Result<Self, MessageError> {
        fields.reject_line_breaks()?;
        let statement = fields
            .statement
            .as_deref()
            .ok_or(MessageError::MissingField("statement"))?;

        fields.to_text(statement).parse()
    }

    pub fn address(&self) -> EvmAddress {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    pub fn nonce(&self) -> &str {
        &self.inner.nonce
    }

    pub fn domain(&self) -> String {
        self.inner.domain.to_string()
    }

    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.inner
            .expiration_time
            .as_ref()
            .and_then(|t| to_utc(&t.to_string()))
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.inner
            .not_before
            .as_ref()
            .and_then(|t| to_utc(&t.to_string()))
    }

    pub fn as_siwe(&self) -> &siwe::Message {
        &self.inner
    }

    /// The exact text a wallet is asked to sign.
    pub fn to_canonical(&self) -> String {
        self.inner.to_string()
    }
}

fn to_utc(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl FromStr for SiweMessage {
    type Err = MessageError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.trim().is_empty() {
            return Err(MessageError::Empty);
        }

        let inner = text
            .parse::<siwe::Message>()
            .map_err(|e| MessageError::Syntax(e.to_string()))?;

        if inner.statement.as_deref().map_or(true, str::is_empty) {
            return Err(MessageError::MissingField("statement"));
        }

        // The signature is checked over the re-serialized message
        if inner.to_string() != text {
            return Err(invalid("message", "not in canonical EIP-4361 form"));
        }

        Ok(Self {
            address: EvmAddress::from_bytes(inner.address),
            inner,
        })
    }
}
