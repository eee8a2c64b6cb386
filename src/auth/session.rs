use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

/// Signs and verifies the session tokens handed out at login.
#[derive(Clone)]
pub struct SessionService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

/// Identity and access scope captured when the session was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSubject<'a> {
    pub user_id: i32,
    pub username: &'a str,
    pub role: &'a str,
    pub plant_ids: &'a [i32],
    pub department_ids: &'a [i32],
}

impl SessionService {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.session_secret,
            &config.session_issuer,
            &config.session_audience,
            config.session_expiry_minutes,
        )
    }

    pub fn new(secret: &str, issuer: &str, audience: &str, expiry_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            audience: audience.to_owned(),
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    pub fn expiry_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn issue(&self, subject: SessionSubject<'_>) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = SessionClaims {
            sub: subject.user_id,
            username: subject.username.to_owned(),
            role: subject.role.to_owned(),
            plant_ids: subject.plant_ids.to_vec(),
            department_ids: subject.department_ids.to_vec(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: i32,
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub plant_ids: Vec<i32>,
    #[serde(default)]
    pub department_ids: Vec<i32>,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}
