//! Access credentials issued at the end of registration.

use crate::accounts::Account;
use crate::error::FlowError;
use crate::types::Role;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issues a bearer credential for an account.
pub trait CredentialIssuer: Send + Sync {
    fn issue(&self, account: &Account) -> Result<String, FlowError>;
}

/// JWT claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub email: String,
    pub role: Option<Role>,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    /// Unique token id
    pub jti: String,
}

/// HS256 JWT issuer.
#[derive(Clone)]
pub struct JwtIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl JwtIssuer {
    pub fn new(secret: &SecretString, issuer: impl Into<String>, ttl: Duration) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Issuer keyed by a random secret. Tokens do not survive a restart.
    pub fn ephemeral(issuer: impl Into<String>, ttl: Duration) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(&SecretString::new(hex::encode(bytes)), issuer, ttl)
    }

    /// Decode and validate a token issued here.
    pub fn verify(&self, token: &str) -> Result<Claims, FlowError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }
}

impl CredentialIssuer for JwtIssuer {
    fn issue(&self, account: &Account) -> Result<String, FlowError> {
        let now = Utc::now();
        let claims = Claims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            role: account.primary_role(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }
}
