//! Login: credential derivation, LOGIN request, token extraction from the response.

use crate::integrity::{hex_digest, DigestAlgorithm};
use crate::protocol::{Direction, Message, Operation, StatusCode};

/// Opaque session token issued by the peer. Never parsed locally, only forwarded.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Token(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(..)")
    }
}

/// Credential sent as `password`: hex digest of the identity string.
/// Deterministic; the algorithm must be the one the peer checks against.
pub fn derive_credential(identity: &str, algorithm: DigestAlgorithm) -> String {
    hex_digest(algorithm, identity.as_bytes())
}

/// LOGIN/AUTH request for `identity`.
pub fn login_request(identity: &str, algorithm: DigestAlgorithm) -> Message {
    Message::login(identity, &derive_credential(identity, algorithm))
}

/// Interpret the peer's LOGIN response.
pub fn on_login_response(response: &Message) -> Result<Token, AuthError> {
    if !response.answers(Operation::Login) {
        return Err(AuthError::Unexpected {
            operation: response.operation,
            direction: response.direction,
        });
    }
    let status = response.status_or_error();
    if !status.is_ok() {
        return Err(AuthError::Rejected {
            status,
            message: response.status_message().to_string(),
        });
    }
    match &response.token {
        Some(t) => Ok(Token::new(t.clone())),
        None => Err(AuthError::MissingToken),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("login rejected: status {status}: {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("login accepted but no token returned")]
    MissingToken,
    #[error("expected a LOGIN response, got {operation:?} {direction:?}")]
    Unexpected {
        operation: Operation,
        direction: Direction,
    },
}
