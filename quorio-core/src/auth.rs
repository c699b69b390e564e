//! Credentials and signed-request authentication.
//!
//! Every admin and peer request is signed with the cluster credential:
//!
//! `Authorization: QUORIO-HMAC-SHA256 Credential=<accessKey>, Signature=<hex>`
//!
//! The signature is HMAC-SHA256 keyed by the secret key over
//! `method\npath\ncanonical-query\noperation\ndate\ncontent-sha256`, where
//! `operation` is the `x-quorio-operation` header (empty when absent), `date`
//! comes from `x-quorio-date` (RFC 3339) and `content-sha256` from
//! `x-quorio-content-sha256`.

use crate::{QuorioError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{PoisonError, RwLock};

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_SCHEME: &str = "QUORIO-HMAC-SHA256";
pub const DATE_HEADER: &str = "x-quorio-date";
pub const CONTENT_SHA256_HEADER: &str = "x-quorio-content-sha256";
/// Selects the admin operation within a resource; covered by the signature.
pub const OPERATION_HEADER: &str = "x-quorio-operation";

/// Maximum accepted distance between the signed date and the local clock.
pub const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;

const ACCESS_KEY_MIN_LEN: usize = 5;
const ACCESS_KEY_MAX_LEN: usize = 20;
const SECRET_KEY_MIN_LEN: usize = 8;
const SECRET_KEY_MAX_LEN: usize = 40;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let access_len = self.access_key.chars().count();
        if !(ACCESS_KEY_MIN_LEN..=ACCESS_KEY_MAX_LEN).contains(&access_len) {
            return Err(QuorioError::InvalidCredentials(format!(
                "access key must be {} to {} characters",
                ACCESS_KEY_MIN_LEN, ACCESS_KEY_MAX_LEN
            )));
        }

        let secret_len = self.secret_key.chars().count();
        if !(SECRET_KEY_MIN_LEN..=SECRET_KEY_MAX_LEN).contains(&secret_len) {
            return Err(QuorioError::InvalidCredentials(format!(
                "secret key must be {} to {} characters",
                SECRET_KEY_MIN_LEN, SECRET_KEY_MAX_LEN
            )));
        }

        Ok(())
    }
}

/// In-memory view of the credential this node signs and verifies with.
#[derive(Debug)]
pub struct CredentialStore {
    current: RwLock<Credentials>,
    pinned: bool,
}

impl CredentialStore {
    pub fn new(credentials: Credentials, pinned: bool) -> Self {
        Self {
            current: RwLock::new(credentials),
            pinned,
        }
    }

    /// Credentials supplied through the environment cannot be rotated.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn get(&self) -> Credentials {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, credentials: Credentials) -> Result<()> {
        if self.pinned {
            return Err(QuorioError::CredentialsPinned);
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credentials;
        Ok(())
    }
}

/// Compute SHA256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub date: String,
    pub content_sha256: String,
}

/// Auth-relevant header values of an incoming request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestAuth<'a> {
    pub authorization: Option<&'a str>,
    pub date: Option<&'a str>,
    pub content_sha256: Option<&'a str>,
    pub operation: Option<&'a str>,
}

pub fn sign_request(
    credentials: &Credentials,
    method: &str,
    path: &str,
    query: Option<&str>,
    operation: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
) -> SignedHeaders {
    let date = now.to_rfc3339();
    let content_sha256 = compute_hash(body);
    let signature = signature_hex(
        &credentials.secret_key,
        &string_to_sign(method, path, query, operation, &date, &content_sha256),
    );

    SignedHeaders {
        authorization: format!(
            "{} Credential={}, Signature={}",
            AUTH_SCHEME, credentials.access_key, signature
        ),
        date,
        content_sha256,
    }
}

pub fn verify_request(
    credentials: &Credentials,
    method: &str,
    path: &str,
    query: Option<&str>,
    auth: RequestAuth<'_>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    let authorization = auth
        .authorization
        .ok_or_else(|| QuorioError::AccessDenied("anonymous requests are not allowed".to_string()))?;
    let (access_key, signature) = parse_authorization(authorization)?;

    if access_key != credentials.access_key {
        return Err(QuorioError::AccessDenied(format!(
            "unknown access key {}",
            access_key
        )));
    }

    let date = auth
        .date
        .ok_or_else(|| QuorioError::AccessDenied(format!("missing {} header", DATE_HEADER)))?;
    let signed_at = DateTime::parse_from_rfc3339(date)
        .map_err(|_| QuorioError::AccessDenied(format!("malformed {} header", DATE_HEADER)))?
        .with_timezone(&Utc);
    if (now - signed_at).num_seconds().abs() > MAX_CLOCK_SKEW_SECS {
        return Err(QuorioError::RequestTimeTooSkewed);
    }

    let content_sha256 = auth.content_sha256.ok_or_else(|| {
        QuorioError::AccessDenied(format!("missing {} header", CONTENT_SHA256_HEADER))
    })?;
    if compute_hash(body) != content_sha256 {
        return Err(QuorioError::SignatureMismatch);
    }

    let expected = hex::decode(signature).map_err(|_| QuorioError::SignatureMismatch)?;
    let mut mac = HmacSha256::new_from_slice(credentials.secret_key.as_bytes())
        .map_err(|e| QuorioError::Internal(e.to_string()))?;
    mac.update(string_to_sign(method, path, query, auth.operation, date, content_sha256).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| QuorioError::SignatureMismatch)
}

fn parse_authorization(header: &str) -> Result<(&str, &str)> {
    let (scheme, rest) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| QuorioError::AccessDenied("malformed authorization header".to_string()))?;
    if scheme != AUTH_SCHEME {
        return Err(QuorioError::AccessDenied(format!(
            "unsupported authentication scheme {}",
            scheme
        )));
    }

    let mut credential = None;
    let mut signature = None;
    for part in rest.split(',') {
        match part.trim().split_once('=') {
            Some(("Credential", value)) => credential = Some(value),
            Some(("Signature", value)) => signature = Some(value),
            _ => {}
        }
    }

    match (credential, signature) {
        (Some(credential), Some(signature)) => Ok((credential, signature)),
        _ => Err(QuorioError::AccessDenied(
            "authorization header requires Credential and Signature".to_string(),
        )),
    }
}

fn string_to_sign(
    method: &str,
    path: &str,
    query: Option<&str>,
    operation: Option<&str>,
    date: &str,
    content_sha256: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        canonical_query(query),
        operation.unwrap_or_default().trim(),
        date,
        content_sha256
    )
}

fn canonical_query(query: Option<&str>) -> String {
    let mut pairs: Vec<&str> = query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .collect();
    pairs.sort_unstable();
    pairs.join("&")
}

fn signature_hex(secret_key: &str, payload: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
