//! Session tokens.
//!
//! Every write to the remote store carries the session user and a token
//! binding that user to an issue time with HMAC-SHA256.
//!
//! ## Token Format
//!
//! - 1 byte: user id length `n`
//! - `n` bytes: user id (UTF-8)
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over everything before it
//!
//! Tokens are hex-encoded for display and storage.

use crate::error::AuthError;
use evlot_model::{Timestamp, UserId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// How long a token stays valid.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a configuration with a 24 hour expiry.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiry.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// A signed session token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(Vec<u8>);

impl AuthToken {
    /// Wraps raw token bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({} bytes)", self.0.len())
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.iter().fold(String::with_capacity(self.0.len() * 2), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        });
        f.write_str(&hex)
    }
}

impl FromStr for AuthToken {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, AuthError> {
        let s = s.trim();
        if s.len() % 2 != 0 || !s.is_ascii() {
            return Err(AuthError::Malformed("token is not hex".into()));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
            .collect::<Result<Vec<_>, _>>()
            .map(AuthToken)
            .map_err(|_| AuthError::Malformed("token is not hex".into()))
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Signed-in user.
    pub user_id: UserId,
    /// Token presented with every write.
    pub token: AuthToken,
    /// When the token was issued.
    pub issued_at: Timestamp,
    /// When the token stops being accepted.
    pub expires_at: Timestamp,
}

impl Session {
    /// Returns true if the token is past its expiry at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

/// Issues session tokens.
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    config: AuthConfig,
}

impl TokenIssuer {
    /// Creates an issuer.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a session for `user_id` starting at `now`.
    pub fn issue(&self, user_id: &UserId, now: Timestamp) -> Result<Session, AuthError> {
        let uid = user_id.as_str().as_bytes();
        if uid.is_empty() || uid.len() > usize::from(u8::MAX) {
            return Err(AuthError::InvalidUser(user_id.to_string()));
        }

        let mut data = Vec::with_capacity(1 + uid.len() + 8 + SIGNATURE_LEN);
        data.push(uid.len() as u8);
        data.extend_from_slice(uid);
        data.extend_from_slice(&now.as_millis().to_be_bytes());

        let signature = sign(&self.config.secret, &data)?;
        data.extend_from_slice(&signature);

        Ok(Session {
            user_id: user_id.clone(),
            token: AuthToken(data),
            issued_at: now,
            expires_at: now.saturating_add(self.config.token_expiry),
        })
    }
}

/// Validates session tokens.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Validates `token` at `now` and returns the user it was issued to.
    pub fn validate(&self, token: &AuthToken, now: Timestamp) -> Result<UserId, AuthError> {
        let bytes = token.as_bytes();
        let uid_len = usize::from(*bytes.first().ok_or_else(|| malformed("empty token"))?);
        let expected_len = 1 + uid_len + 8 + SIGNATURE_LEN;
        if bytes.len() != expected_len {
            return Err(malformed("invalid token length"));
        }

        let (data, signature) = bytes.split_at(expected_len - SIGNATURE_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|_| malformed("unusable secret"))?;
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| AuthError::BadSignature)?;

        let uid = std::str::from_utf8(&data[1..1 + uid_len])
            .map_err(|_| malformed("user id is not UTF-8"))?;
        let mut issued = [0u8; 8];
        issued.copy_from_slice(&data[1 + uid_len..]);
        let issued_at = Timestamp::from_millis(u64::from_be_bytes(issued));

        if now > issued_at.saturating_add(self.config.token_expiry) {
            return Err(AuthError::Expired);
        }

        Ok(UserId::new(uid))
    }

    /// Validates `token` and checks it belongs to `claimed`.
    pub fn validate_for(
        &self,
        token: &AuthToken,
        claimed: &UserId,
        now: Timestamp,
    ) -> Result<(), AuthError> {
        let user = self.validate(token, now)?;
        if &user != claimed {
            return Err(AuthError::UserMismatch {
                token_user: user.to_string(),
                claimed: claimed.to_string(),
            });
        }
        Ok(())
    }
}

fn malformed(message: &str) -> AuthError {
    AuthError::Malformed(message.to_string())
}

fn sign(secret: &[u8], data: &[u8]) -> Result<[u8; SIGNATURE_LEN], AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| malformed("unusable secret"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-32-bytes-long!!";

    fn pair(expiry: Duration) -> (TokenIssuer, TokenValidator) {
        let config = AuthConfig::new(SECRET).with_expiry(expiry);
        (TokenIssuer::new(config.clone()), TokenValidator::new(config))
    }

    #[test]
    fn issue_and_validate() {
        let (issuer, validator) = pair(Duration::from_secs(60));
        let user = UserId::new("organizer-7");
        let session = issuer.issue(&user, Timestamp::from_millis(1_000)).unwrap();

        assert_eq!(session.token.as_bytes().len(), 1 + 11 + 8 + 32);
        assert_eq!(session.expires_at, Timestamp::from_millis(61_000));
        assert_eq!(
            validator
                .validate(&session.token, Timestamp::from_millis(2_000))
                .unwrap(),
            user
        );
    }

    #[test]
    fn reject_tampered_token() {
        let (issuer, validator) = pair(Duration::from_secs(60));
        let session = issuer
            .issue(&UserId::new("alice"), Timestamp::from_millis(0))
            .unwrap();

        let mut bytes = session.token.as_bytes().to_vec();
        bytes[1] = b'm';
        let forged = AuthToken::from_bytes(bytes);
        assert_eq!(
            validator.validate(&forged, Timestamp::from_millis(1)),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn reject_expired_token() {
        let (issuer, validator) = pair(Duration::from_secs(1));
        let session = issuer
            .issue(&UserId::new("alice"), Timestamp::from_millis(0))
            .unwrap();

        assert!(validator
            .validate(&session.token, Timestamp::from_millis(1_000))
            .is_ok());
        assert_eq!(
            validator.validate(&session.token, Timestamp::from_millis(1_001)),
            Err(AuthError::Expired)
        );
        assert!(session.is_expired(Timestamp::from_millis(1_001)));
    }

    #[test]
    fn reject_other_users_token() {
        let (issuer, validator) = pair(Duration::from_secs(60));
        let session = issuer
            .issue(&UserId::new("alice"), Timestamp::from_millis(0))
            .unwrap();
        let mallory = UserId::new("mallory");
        assert!(matches!(
            validator.validate_for(&session.token, &mallory, Timestamp::from_millis(1)),
            Err(AuthError::UserMismatch { .. })
        ));
    }

    #[test]
    fn reject_wrong_secret() {
        let (issuer, _) = pair(Duration::from_secs(60));
        let other = TokenValidator::new(AuthConfig::new(b"another-secret".to_vec()));
        let session = issuer
            .issue(&UserId::new("alice"), Timestamp::from_millis(0))
            .unwrap();
        assert_eq!(
            other.validate(&session.token, Timestamp::from_millis(1)),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn hex_form_parses_back() {
        let (issuer, _) = pair(Duration::from_secs(60));
        let session = issuer
            .issue(&UserId::new("bob"), Timestamp::from_millis(5))
            .unwrap();
        let text = session.token.to_string();
        assert_eq!(text.parse::<AuthToken>().unwrap(), session.token);
        assert!("abc".parse::<AuthToken>().is_err());
        assert!("zz".parse::<AuthToken>().is_err());
    }

    #[test]
    fn empty_user_rejected() {
        let (issuer, _) = pair(Duration::from_secs(60));
        assert!(matches!(
            issuer.issue(&UserId::new(""), Timestamp::EPOCH),
            Err(AuthError::InvalidUser(_))
        ));
    }
}
