//! Sign-In-With-Ethereum: nonce issuance, message parsing, signature
//! verification and the cookie session built on top of them.

pub mod address;
pub mod clock;
pub mod message;
pub mod middleware;
pub mod nonce;
pub mod session;
pub mod signature;
pub mod verifier;

pub use address::EvmAddress;
pub use clock::{Clock, FakeClock, SystemClock};
pub use message::{RawMessage, SiweMessage};
pub use middleware::{AppState, AuthSession};
pub use nonce::{NonceAuthority, Subject};
pub use session::Session;
pub use verifier::{Binding, SignatureVerifier, VerifiedLogin, VerifierOptions, VerifyError};
