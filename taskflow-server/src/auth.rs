//! Credential gate consumed by the sync server.
//!
//! Token issuance (registration, login, signing) lives outside this
//! system; the server only needs `verify`: bearer token in, owner
//! identity out. Every connection handshake passes through the gate
//! before any store access; there is no unauthenticated surface.

use std::collections::HashMap;

use taskflow_proto::task::OwnerId;

/// Errors produced by credential verification.
///
/// Both variants are terminal for the triggering connection: the client
/// must re-authenticate, never retry with the same credential. An
/// expired token is indistinguishable from an invalid one on purpose.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,
    /// The credential did not verify.
    #[error("invalid credential")]
    InvalidCredential,
}

/// Verifies a bearer credential into an owner identity.
pub trait AuthGate: Send + Sync {
    /// Returns the verified owner for `token`, or why it was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for an empty or unrecognized token.
    fn verify(&self, token: &str) -> Result<OwnerId, AuthError>;
}

/// Static bearer-token table, loaded from the `[auth]` config section.
///
/// Stands in for the external identity provider at the boundary the
/// server consumes it: a map from opaque token to the identity it was
/// minted for.
#[derive(Debug, Default)]
pub struct TokenTable {
    tokens: HashMap<String, OwnerId>,
}

impl TokenTable {
    /// Creates an empty table (every verification fails).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `token -> owner` pairs.
    #[must_use]
    pub fn from_tokens(tokens: &HashMap<String, String>) -> Self {
        let mut table = Self::new();
        for (token, owner) in tokens {
            table.insert(token, owner);
        }
        table
    }

    /// Registers a token for an owner.
    pub fn insert(&mut self, token: impl Into<String>, owner: impl Into<String>) {
        self.tokens.insert(token.into(), OwnerId::new(owner));
    }

    /// Returns the number of registered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no tokens are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl AuthGate for TokenTable {
    fn verify(&self, token: &str) -> Result<OwnerId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}
