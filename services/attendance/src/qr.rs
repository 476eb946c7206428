//! Sealed QR token codec
//!
//! Attendance tokens are encrypted, not merely signed, so the session and
//! course identifiers stay opaque to anyone photographing the code. Every
//! token carries a fresh random IV, and the GCM tag rejects any tampered
//! ciphertext or IV.

use aes_gcm::{
    AesGcm,
    aead::{Aead, AeadCore, KeyInit, OsRng, consts::U16},
    aes::Aes256,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// AES-256-GCM with a 16-byte IV
type QrCipher = AesGcm<Aes256, U16>;

/// Required IV length in bytes
pub const IV_LEN: usize = 16;

/// QR codec configuration
#[derive(Debug, Clone)]
pub struct QrConfig {
    /// Secret the encryption key is derived from
    pub secret: String,
}

impl QrConfig {
    /// Create a new QrConfig from environment variables
    ///
    /// # Environment Variables
    /// - `QR_SECRET_KEY`: Secret used to derive the token key. Rotating it
    ///   invalidates every QR code currently on display.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("QR_SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("QR_SECRET_KEY environment variable not set"))?;

        if secret.trim().is_empty() {
            anyhow::bail!("QR_SECRET_KEY must not be empty");
        }

        Ok(QrConfig { secret })
    }
}

/// Decrypted token contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub session_id: Uuid,
    pub course_id: Uuid,
    pub issued_at_millis: i64,
    pub validity_millis: i64,
}

/// Hex-encoded IV and ciphertext, as rendered into the QR image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedToken {
    pub iv: String,
    pub content: String,
}

impl EncodedToken {
    /// Compact `iv:content` form
    pub fn to_compact(&self) -> String {
        format!("{}:{}", self.iv, self.content)
    }
}

/// Token as submitted by a scanner: either structured or as text
///
/// Text may hold the JSON form of [`EncodedToken`] or the compact
/// `iv:content` form. Any other JSON value lands in `Other` so a bad
/// token is reported as malformed rather than failing body extraction.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawToken {
    Parts(EncodedToken),
    Text(String),
    Other(serde_json::Value),
}

impl From<EncodedToken> for RawToken {
    fn from(token: EncodedToken) -> Self {
        RawToken::Parts(token)
    }
}

impl From<&str> for RawToken {
    fn from(text: &str) -> Self {
        RawToken::Text(text.to_string())
    }
}

impl RawToken {
    /// Normalize every accepted representation into IV and ciphertext
    pub fn normalize(self) -> Result<EncodedToken, TokenError> {
        let token = match self {
            RawToken::Parts(token) => token,
            RawToken::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(TokenError::Empty);
                }

                match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(value) => serde_json::from_value::<EncodedToken>(value)
                        .map_err(|_| TokenError::Malformed)?,
                    Err(_) => {
                        let (iv, content) = text.split_once(':').ok_or(TokenError::Malformed)?;
                        EncodedToken {
                            iv: iv.to_string(),
                            content: content.to_string(),
                        }
                    }
                }
            }
            RawToken::Other(_) => return Err(TokenError::Malformed),
        };

        if token.iv.is_empty() || token.content.is_empty() {
            return Err(TokenError::Empty);
        }

        Ok(token)
    }
}

/// Reasons a submitted token is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,
    #[error("token is not in a recognized format")]
    Malformed,
    #[error("token IV must be 16 hex-encoded bytes")]
    InvalidIv,
    #[error("token failed decryption or authentication")]
    Decryption,
    #[error("token payload is not valid")]
    Payload,
}

/// Encrypts and decrypts attendance tokens under a key derived from the
/// configured secret
#[derive(Clone)]
pub struct QrCodec {
    cipher: QrCipher,
}

impl QrCodec {
    /// Initialize a codec; the key is SHA-256 of the secret, so any secret
    /// length yields a 32-byte key
    pub fn new(config: &QrConfig) -> Result<Self> {
        let key = Sha256::digest(config.secret.as_bytes());
        let cipher = QrCipher::new_from_slice(&key)
            .map_err(|e| anyhow::anyhow!("Failed to initialize QR cipher: {}", e))?;
        Ok(QrCodec { cipher })
    }

    /// Seal a token carrying an explicit server-side issuance time
    pub fn encode_at(
        &self,
        session_id: Uuid,
        course_id: Uuid,
        issued_at: DateTime<Utc>,
        validity_millis: i64,
    ) -> Result<EncodedToken> {
        let payload = QrPayload {
            session_id,
            course_id,
            issued_at_millis: issued_at.timestamp_millis(),
            validity_millis,
        };
        let plaintext = serde_json::to_vec(&payload)?;

        let iv = QrCipher::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&iv, plaintext.as_slice())
            .map_err(|e| anyhow::anyhow!("QR token encryption failed: {}", e))?;

        Ok(EncodedToken {
            iv: hex::encode(iv),
            content: hex::encode(ciphertext),
        })
    }

    /// Open a submitted token
    ///
    /// Never panics on hostile input; every failure is a [`TokenError`].
    /// Expiry is not checked here.
    pub fn decode(&self, input: impl Into<RawToken>) -> Result<QrPayload, TokenError> {
        let token = input.into().normalize()?;

        let iv = hex::decode(token.iv.trim()).map_err(|_| TokenError::InvalidIv)?;
        if iv.len() != IV_LEN {
            return Err(TokenError::InvalidIv);
        }
        let ciphertext = hex::decode(token.content.trim()).map_err(|_| TokenError::Malformed)?;

        let plaintext = self
            .cipher
            .decrypt(aes_gcm::Nonce::<U16>::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| TokenError::Decryption)?;

        serde_json::from_slice(&plaintext).map_err(|_| TokenError::Payload)
    }
}
