//! Operation token generation.
//!
//! Tokens are bearer credentials: whoever holds one can poll, fetch, or cancel
//! the operation it names. The default generator therefore draws from the OS
//! entropy source directly rather than a userspace PRNG.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::TryRngCore;

/// Number of random bytes behind a default token (43 chars once encoded).
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// Errors produced while minting a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The OS entropy source could not be read.
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
    /// A custom generator returned an empty string.
    #[error("token generator returned an empty token")]
    Empty,
    /// A custom generator failed for its own reasons.
    #[error("token generation failed: {0}")]
    Custom(String),
}

/// Strategy for minting operation tokens.
///
/// `session_id` is the owning session, if any, so a session-aware scheme can
/// embed or derive from it. Implementations must return values that are
/// unpredictable to third parties and unique for the lifetime of the process.
pub trait TokenGenerator: Send + Sync {
    /// Mints a new token.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if no token could be produced. Callers must
    /// treat this as fatal for the operation being created.
    fn generate(&self, session_id: Option<&str>) -> Result<String, TokenError>;
}

impl<F> TokenGenerator for F
where
    F: Fn(Option<&str>) -> Result<String, TokenError> + Send + Sync,
{
    fn generate(&self, session_id: Option<&str>) -> Result<String, TokenError> {
        self(session_id)
    }
}

/// Default generator: 32 bytes from the OS, URL-safe base64 without padding.
///
/// The session id is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self, _session_id: Option<&str>) -> Result<String, TokenError> {
        random_token(TOKEN_ENTROPY_BYTES)
    }
}

/// Returns `len` bytes of OS entropy encoded as URL-safe base64.
///
/// # Errors
///
/// Returns [`TokenError::Entropy`] if the OS entropy source fails.
pub fn random_token(len: usize) -> Result<String, TokenError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| TokenError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_token_shape() {
        let token = RandomTokenGenerator.generate(Some("session")).unwrap();
        assert_eq!(token.len(), 43);
        assert!(!token.starts_with("session"));
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn ten_thousand_tokens_are_distinct() {
        let tokens: HashSet<String> = (0..10_000)
            .map(|_| RandomTokenGenerator.generate(None).unwrap())
            .collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn closures_are_generators() {
        let custom = |sid: Option<&str>| -> Result<String, TokenError> {
            Ok(format!("custom_{}_token", sid.unwrap_or("none")))
        };
        assert_eq!(custom.generate(Some("test")).unwrap(), "custom_test_token");
        assert_eq!(custom.generate(None).unwrap(), "custom_none_token");
    }

    #[test]
    fn session_scoped_generator() {
        let scoped = |sid: Option<&str>| -> Result<String, TokenError> {
            Ok(format!("{}_{}", sid.unwrap_or("anon"), random_token(16)?))
        };
        let a = scoped.generate(Some("s1")).unwrap();
        let b = scoped.generate(Some("s2")).unwrap();
        assert!(a.starts_with("s1_"));
        assert!(b.starts_with("s2_"));
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn batches_never_collide(count in 1usize..2_000) {
            let tokens: HashSet<String> = (0..count)
                .map(|_| RandomTokenGenerator.generate(None).unwrap())
                .collect();
            prop_assert_eq!(tokens.len(), count);
        }
    }
}
