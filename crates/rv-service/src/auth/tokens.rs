//! Participant tokens and round leases.
//!
//! ```text
//! session_key       = HKDF-SHA256(master_secret, salt=session_id, info=purpose)
//! participant_token = "{session_id}.{participant_id}.{hex(HMAC(session_key, session_id|participant_id))}"
//! lease_token       = "{expires_ms}.{hex(HMAC(session_key, round_id|owner_id|expires_ms))}"
//! ```
//!
//! Verification uses `ring::hmac::verify`, which compares in constant time.

use crate::auth::ParticipantClaims;
use crate::errors::RvError;
use chrono::{DateTime, TimeZone, Utc};
use common::secret::{ExposeSecret, SecretBox};
use common::types::{ParticipantId, RoundId, SessionId};
use ring::{hkdf, hmac};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Minimum master secret length.
pub const MIN_SECRET_BYTES: usize = 32;

const PARTICIPANT_INFO: &[u8] = b"participant-token";
const LEASE_INFO: &[u8] = b"round-lease";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is malformed")]
    Malformed,

    #[error("Token signature is invalid")]
    BadSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Master secret must be at least {MIN_SECRET_BYTES} bytes")]
    WeakSecret,

    #[error("Key derivation failed")]
    KeyDerivation,
}

impl From<TokenError> for RvError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::KeyDerivation | TokenError::WeakSecret => RvError::Internal,
            other => RvError::InvalidToken(other.to_string()),
        }
    }
}

/// Proof of round ownership returned by `start_round`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLease {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies participant tokens and round leases.
pub struct TokenSigner {
    master_secret: SecretBox<Vec<u8>>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("master_secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenSigner {
    pub fn new(master_secret: Vec<u8>) -> Result<Self, TokenError> {
        if master_secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::WeakSecret);
        }
        Ok(Self {
            master_secret: SecretBox::new(Box::new(master_secret)),
        })
    }

    pub fn issue_participant_token(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<String, TokenError> {
        let key = self.session_key(session_id, PARTICIPANT_INFO)?;
        let message = format!("{session_id}|{participant_id}");
        let tag = hmac::sign(&key, message.as_bytes());
        Ok(format!(
            "{session_id}.{participant_id}.{}",
            hex::encode(tag.as_ref())
        ))
    }

    pub fn verify_participant_token(&self, token: &str) -> Result<ParticipantClaims, TokenError> {
        let mut parts = token.split('.');
        let (Some(session), Some(participant), Some(mac), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let session_id: SessionId = session.parse().map_err(|_| TokenError::Malformed)?;
        let participant_id: ParticipantId =
            participant.parse().map_err(|_| TokenError::Malformed)?;
        let provided = hex::decode(mac).map_err(|_| TokenError::Malformed)?;

        let key = self.session_key(session_id, PARTICIPANT_INFO)?;
        let message = format!("{session_id}|{participant_id}");
        hmac::verify(&key, message.as_bytes(), &provided).map_err(|_| TokenError::BadSignature)?;

        Ok(ParticipantClaims {
            session_id,
            participant_id,
        })
    }

    /// Issue a lease valid for `ttl` from now.
    pub fn issue_lease(
        &self,
        session_id: SessionId,
        round_id: RoundId,
        owner: ParticipantId,
        ttl: Duration,
    ) -> Result<RoundLease, TokenError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| TokenError::Malformed)?;
        let expires_at = Utc::now() + ttl;
        let expires_ms = expires_at.timestamp_millis();

        let key = self.session_key(session_id, LEASE_INFO)?;
        let tag = hmac::sign(&key, lease_message(round_id, owner, expires_ms).as_bytes());

        Ok(RoundLease {
            token: format!("{expires_ms}.{}", hex::encode(tag.as_ref())),
            expires_at,
        })
    }

    /// Verify a lease for `round_id` held by `owner`.
    pub fn verify_lease(
        &self,
        session_id: SessionId,
        round_id: RoundId,
        owner: ParticipantId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TokenError> {
        let (expires, mac) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let expires_ms: i64 = expires.parse().map_err(|_| TokenError::Malformed)?;
        let provided = hex::decode(mac).map_err(|_| TokenError::Malformed)?;

        let key = self.session_key(session_id, LEASE_INFO)?;
        hmac::verify(
            &key,
            lease_message(round_id, owner, expires_ms).as_bytes(),
            &provided,
        )
        .map_err(|_| TokenError::BadSignature)?;

        let expires_at = Utc
            .timestamp_millis_opt(expires_ms)
            .single()
            .ok_or(TokenError::Malformed)?;
        if now >= expires_at {
            return Err(TokenError::Expired);
        }
        Ok(expires_at)
    }

    fn session_key(&self, session_id: SessionId, info: &[u8]) -> Result<hmac::Key, TokenError> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, session_id.as_uuid().as_bytes());
        let prk = salt.extract(self.master_secret.expose_secret());
        let info = [info];
        let okm = prk
            .expand(&info, hmac::HMAC_SHA256)
            .map_err(|_| TokenError::KeyDerivation)?;
        Ok(hmac::Key::from(okm))
    }
}

fn lease_message(round_id: RoundId, owner: ParticipantId, expires_ms: i64) -> String {
    format!("{round_id}|{owner}|{expires_ms}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(vec![0x42; 32]).unwrap()
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            TokenSigner::new(vec![1; 16]).unwrap_err(),
            TokenError::WeakSecret
        );
    }

    #[test]
    fn test_participant_token_roundtrip() {
        let signer = signer();
        let (session_id, participant_id) = (SessionId::new(), ParticipantId::new());

        let token = signer
            .issue_participant_token(session_id, participant_id)
            .unwrap();
        let claims = signer.verify_participant_token(&token).unwrap();

        assert_eq!(claims.session_id, session_id);
        assert_eq!(claims.participant_id, participant_id);
    }

    #[test]
    fn test_tampered_participant_token() {
        let signer = signer();
        let session_id = SessionId::new();
        let token = signer
            .issue_participant_token(session_id, ParticipantId::new())
            .unwrap();

        // Swap in another participant id, keep the MAC.
        let mac = token.rsplit('.').next().unwrap();
        let forged = format!("{session_id}.{}.{mac}", ParticipantId::new());
        assert_eq!(
            signer.verify_participant_token(&forged).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_token_from_other_secret() {
        let token = signer()
            .issue_participant_token(SessionId::new(), ParticipantId::new())
            .unwrap();
        let other = TokenSigner::new(vec![0x24; 32]).unwrap();
        assert_eq!(
            other.verify_participant_token(&token).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_malformed_participant_tokens() {
        let signer = signer();
        for token in ["", "abc", "a.b.c", "a.b.c.d"] {
            assert_eq!(
                signer.verify_participant_token(token).unwrap_err(),
                TokenError::Malformed
            );
        }
    }

    #[test]
    fn test_lease_roundtrip_and_expiry() {
        let signer = signer();
        let (session_id, round_id, owner) = (SessionId::new(), RoundId::new(), ParticipantId::new());

        let lease = signer
            .issue_lease(session_id, round_id, owner, Duration::from_secs(60))
            .unwrap();
        let expires_at = signer
            .verify_lease(session_id, round_id, owner, &lease.token, Utc::now())
            .unwrap();
        assert_eq!(expires_at.timestamp_millis(), lease.expires_at.timestamp_millis());

        let later = lease.expires_at + chrono::Duration::seconds(1);
        assert_eq!(
            signer
                .verify_lease(session_id, round_id, owner, &lease.token, later)
                .unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_lease_is_bound_to_owner_and_round() {
        let signer = signer();
        let (session_id, round_id, owner) = (SessionId::new(), RoundId::new(), ParticipantId::new());
        let lease = signer
            .issue_lease(session_id, round_id, owner, Duration::from_secs(60))
            .unwrap();

        assert_eq!(
            signer
                .verify_lease(session_id, round_id, ParticipantId::new(), &lease.token, Utc::now())
                .unwrap_err(),
            TokenError::BadSignature
        );
        assert_eq!(
            signer
                .verify_lease(session_id, RoundId::new(), owner, &lease.token, Utc::now())
                .unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(format!("{:?}", signer()).contains("[REDACTED]"));
    }
}
