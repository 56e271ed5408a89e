//! Sign-in verification: message, nonce, signature, then consumption.

use crate::auth::address::EvmAddress;
use crate::auth::clock::Clock;
use crate::auth::message::{MessageError, RawMessage, SiweMessage};
use crate::auth::nonce::{NonceAuthority, Subject};
use crate::auth::signature::decode_signature;
use crate::storage::StoreError;
use chrono::{DateTime, Utc};

/// Which subject a verification looks up the outstanding nonce under.
#[derive(Debug, Clone)]
pub enum Binding {
    /// The address claimed inside the signed message.
    ClaimedAddress,
    /// An opaque session identifier carried by the transport.
    Session(String),
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] MessageError),

    #[error("no outstanding nonce")]
    NoOutstandingNonce,

    #[error("nonce mismatch")]
    NonceMismatch,

    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("message expired")]
    MessageExpired,

    #[error("message not yet valid")]
    MessageNotYetValid,

    #[error("domain mismatch: got {got}")]
    DomainMismatch { got: String },

    #[error("nonce store error: {0}")]
    Store(#[from] StoreError),
}

impl VerifyError {
    /// Short machine-readable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::MalformedMessage(_) => "malformed_message",
            VerifyError::NoOutstandingNonce => "no_outstanding_nonce",
            VerifyError::NonceMismatch => "nonce_mismatch",
            VerifyError::SignatureInvalid(_) => "signature_invalid",
            VerifyError::MessageExpired => "message_expired",
            VerifyError::MessageNotYetValid => "message_not_yet_valid",
            VerifyError::DomainMismatch { .. } => "domain_mismatch",
            VerifyError::Store(_) => "store_error",
        }
    }
}

/// A successful sign-in.
#[derive(Debug, Clone)]
pub struct VerifiedLogin {
    pub address: EvmAddress,
    pub chain_id: u64,
    pub message: SiweMessage,
}

#[derive(Debug, Clone, Default)]
pub struct VerifierOptions {
    /// When set, the message domain must equal this value.
    pub expected_domain: Option<String>,
}

/// Authenticates signed messages against outstanding nonces.
#[derive(Clone)]
pub struct SignatureVerifier {
    nonces: NonceAuthority,
    options: VerifierOptions,
}

impl SignatureVerifier {
    pub fn new(nonces: NonceAuthority, options: VerifierOptions) -> Self {
        Self { nonces, options }
    }

    pub fn nonces(&self) -> &NonceAuthority {
        &self.nonces
    }

    /// Verify one sign-in attempt.
    ///
    /// A malformed message fails before any nonce lookup. Every later outcome,
    /// success or failure, leaves the subject without a nonce.
    pub async fn verify(
        &self,
        raw: RawMessage,
        signature: &str,
        binding: Binding,
    ) -> Result<VerifiedLogin, VerifyError> {
        let message = match raw.parse() {
            Ok(message) => message,
            Err(e) => {
                // The session subject is known without the message, so it is
                // still cleared. A claimed address is not.
                if let Binding::Session(id) = &binding {
                    if let Ok(subject) = Subject::session(id.as_str()) {
                        self.nonces.consume(&subject).await?;
                    }
                }
                return Err(e.into());
            }
        };

        let subject = match binding {
            Binding::ClaimedAddress => Subject::Address(message.address()),
            Binding::Session(id) => {
                Subject::session(id).map_err(|_| VerifyError::NoOutstandingNonce)?
            }
        };

        match self.check(&subject, &message, signature).await {
            Ok(()) => {
                // Compare-and-delete: a concurrent attempt with the same nonce
                // can only win once
                if !self.nonces.consume_if(&subject, message.nonce()).await? {
                    return Err(VerifyError::NoOutstandingNonce);
                }
                Ok(VerifiedLogin {
                    address: message.address(),
                    chain_id: message.chain_id(),
                    message,
                })
            }
            Err(e) => {
                if let Err(store_err) = self.nonces.consume(&subject).await {
                    tracing::error!(error = %store_err, "Failed to clear nonce after rejected sign-in");
                }
                Err(e)
            }
        }
    }

    /// Steps 2-4: nonce lookup, comparison, signature and validity checks.
    async fn check(
        &self,
        subject: &Subject,
        message: &SiweMessage,
        signature: &str,
    ) -> Result<(), VerifyError> {
        let outstanding = self
            .nonces
            .get(subject)
            .await?
            .ok_or(VerifyError::NoOutstandingNonce)?;

        if outstanding != message.nonce() {
            return Err(VerifyError::NonceMismatch);
        }

        let signature =
            decode_signature(signature).map_err(|e| VerifyError::SignatureInvalid(e.to_string()))?;
        message
            .as_siwe()
            .verify_eip191(&signature)
            .map_err(|e| VerifyError::SignatureInvalid(e.to_string()))?;

        check_validity_window(message, self.nonces.clock().now())?;

        if let Some(expected) = &self.options.expected_domain {
            let domain = message.domain();
            if &domain != expected {
                return Err(VerifyError::DomainMismatch { got: domain });
            }
        }

        Ok(())
    }
}

fn check_validity_window(message: &SiweMessage, now: DateTime<Utc>) -> Result<(), VerifyError> {
    let valid = match to_offset_datetime(now) {
        Some(at) => message.as_siwe().valid_at(&at),
        // Later than any timestamp a message can carry
        None => message.expiration_time().is_none(),
    };
    if valid {
        return Ok(());
    }

    match message.expiration_time() {
        Some(expiration) if now >= expiration => Err(VerifyError::MessageExpired),
        _ => Err(VerifyError::MessageNotYetValid),
    }
}

fn to_offset_datetime(t: DateTime<Utc>) -> Option<time::OffsetDateTime> {
    let nanos = i128::from(t.timestamp()) * 1_000_000_000 + i128::from(t.timestamp_subsec_nanos());
    time::OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}
