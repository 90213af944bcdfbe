//! Signed session tokens.
//!
//! A token is `base64url(payload) "." base64url(hmac_sha256(payload))` where
//! the payload is the JSON encoded [`Session`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,
    #[error("invalid session signature")]
    BadSignature,
    #[error("session expired")]
    Expired,
    #[error("failed to generate session secret")]
    Secret,
}

pub struct SessionSigner {
    key: hmac::Key,
}

impl SessionSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Signer with a random per-process secret. Sessions do not survive a
    /// restart.
    pub fn random() -> Result<Self, SessionError> {
        let mut secret = [0u8; 32];
        SystemRandom::new()
            .fill(&mut secret)
            .map_err(|_| SessionError::Secret)?;
        Ok(Self::new(&secret))
    }

    pub fn issue(&self, user_id: &str, expires_at: DateTime<Utc>) -> String {
        let session = Session {
            user_id: user_id.to_string(),
            expires_at: expires_at.timestamp(),
        };
        // A struct of a string and an integer always serializes.
        let payload = serde_json::to_vec(&session).unwrap_or_default();
        let tag = hmac::sign(&self.key, &payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        )
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let (payload, signature) = token.split_once('.').ok_or(SessionError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SessionError::Malformed)?;
        hmac::verify(&self.key, &payload, &signature).map_err(|_| SessionError::BadSignature)?;

        let session: Session =
            serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)?;
        if session.expires_at <= now.timestamp() {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn issued_tokens_verify_until_expiry() {
        let signer = SessionSigner::new(b"secret");
        let now = Utc::now();
        let token = signer.issue("jane@example.com", now + Duration::seconds(60));

        let session = signer.verify(&token, now).unwrap();
        assert_eq!(session.user_id, "jane@example.com");
        assert_eq!(
            signer.verify(&token, now + Duration::seconds(61)),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let now = Utc::now();
        let token = SessionSigner::new(b"one").issue("jane", now + Duration::hours(1));
        assert_eq!(
            SessionSigner::new(b"two").verify(&token, now),
            Err(SessionError::BadSignature)
        );
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = SessionSigner::new(b"secret");
        let now = Utc::now();
        let token = signer.issue("jane", now + Duration::hours(1));
        let (_, signature) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"userId":"admin","expiresAt":99999999999}"#);

        assert_eq!(
            signer.verify(&format!("{forged}.{signature}"), now),
            Err(SessionError::BadSignature)
        );
        assert_eq!(signer.verify("garbage", now), Err(SessionError::Malformed));
    }
}
