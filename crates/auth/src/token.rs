use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AuthError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User id.
    sub: String,
    exp: i64,
    iat: i64,
}

/// HS256 bearer tokens whose subject is a user id.
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_owned(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(AuthError::Signing)
    }

    /// Returns the user id carried by a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            AuthError::InvalidToken
        })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_to_their_subject() {
        let signer = TokenSigner::new(b"test-secret", Duration::minutes(30));
        let token = signer.issue("user-1").expect("issue");
        assert_eq!(signer.verify(&token).expect("verify"), "user-1");
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let ours = TokenSigner::new(b"ours", Duration::minutes(30));
        let theirs = TokenSigner::new(b"theirs", Duration::minutes(30));
        let token = theirs.issue("user-1").expect("issue");
        assert!(matches!(ours.verify(&token), Err(AuthError::InvalidToken)));
        assert!(matches!(ours.verify("garbage"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let signer = TokenSigner::new(b"test-secret", Duration::minutes(-10));
        let token = signer.issue("user-1").expect("issue");
        assert!(matches!(signer.verify(&token), Err(AuthError::InvalidToken)));
    }
}
