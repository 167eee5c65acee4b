//! NATS JWT codec (`ed25519-nkey` algorithm).
//!
//! A token is `b64url(header) . b64url(claims) . b64url(signature)` without
//! padding, where the signature covers the first two segments.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use nkeys::KeyPair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::signing::{SigningError, SigningIdentity};

pub const ALGORITHM: &str = "ed25519-nkey";
const LEGACY_ALGORITHM: &str = "ed25519";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("expected header.claims.signature segments")]
    Segments,

    #[error("invalid base64 in {0} segment")]
    Base64(&'static str),

    #[error("invalid json in {segment} segment: {reason}")]
    Json { segment: &'static str, reason: String },

    #[error("unsupported algorithm '{0}'")]
    Algorithm(String),

    #[error("issuer '{0}' is not a usable public nkey")]
    Issuer(String),

    #[error("signature does not match issuer")]
    Signature,

    #[error("token expired")]
    Expired,

    #[error(transparent)]
    Signing(#[from] SigningError),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    typ: String,
    alg: String,
}

/// Encode and sign claims with the account identity.
pub fn encode<T: Serialize>(claims: &T, signer: &SigningIdentity) -> Result<String, JwtError> {
    let header = Header {
        typ: "JWT".to_string(),
        alg: ALGORITHM.to_string(),
    };
    let header = serde_json::to_vec(&header).map_err(|e| json_error("header", e))?;
    let claims = serde_json::to_vec(claims).map_err(|e| json_error("claims", e))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(claims)
    );
    let signature = signer.sign(signing_input.as_bytes())?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Decode the claims segment without checking the signature.
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<T, JwtError> {
    let parts = split(token)?;
    let claims = decode_segment(parts.claims, "claims")?;
    serde_json::from_slice(&claims).map_err(|e| json_error("claims", e))
}

/// Decode the claims segment after verifying the signature and expiry.
///
/// The signing key is the `iss` claim; when `expected_issuer` is given the
/// claim must match it exactly.
pub fn decode_verified<T: DeserializeOwned>(
    token: &str,
    expected_issuer: Option<&str>,
    now: i64,
) -> Result<T, JwtError> {
    let parts = split(token)?;

    let header: Header = serde_json::from_slice(&decode_segment(parts.header, "header")?)
        .map_err(|e| json_error("header", e))?;
    if header.alg != ALGORITHM && header.alg != LEGACY_ALGORITHM {
        return Err(JwtError::Algorithm(header.alg));
    }

    let claims: Value = serde_json::from_slice(&decode_segment(parts.claims, "claims")?)
        .map_err(|e| json_error("claims", e))?;
    let issuer = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
    if let Some(expected) = expected_issuer {
        if issuer != expected {
            return Err(JwtError::Issuer(issuer.to_string()));
        }
    }

    let key = KeyPair::from_public_key(issuer).map_err(|_| JwtError::Issuer(issuer.to_string()))?;
    let signature = decode_segment(parts.signature, "signature")?;
    key.verify(parts.signing_input.as_bytes(), &signature)
        .map_err(|_| JwtError::Signature)?;

    if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
        if exp > 0 && now >= exp {
            return Err(JwtError::Expired);
        }
    }

    serde_json::from_value(claims).map_err(|e| json_error("claims", e))
}

struct Parts<'a> {
    header: &'a str,
    claims: &'a str,
    signature: &'a str,
    signing_input: &'a str,
}

fn split(token: &str) -> Result<Parts<'_>, JwtError> {
    let token = token.trim();
    let (signing_input, signature) = token.rsplit_once('.').ok_or(JwtError::Segments)?;
    let (header, claims) = signing_input.split_once('.').ok_or(JwtError::Segments)?;
    if claims.is_empty() || claims.contains('.') {
        return Err(JwtError::Segments);
    }
    Ok(Parts {
        header,
        claims,
        signature,
        signing_input,
    })
}

/// Accepts url-safe or standard alphabet, padded or not.
fn decode_segment(segment: &str, name: &'static str) -> Result<Vec<u8>, JwtError> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_NO_PAD
        .decode(normalized)
        .map_err(|_| JwtError::Base64(name))
}

fn json_error(segment: &'static str, err: serde_json::Error) -> JwtError {
    JwtError::Json {
        segment,
        reason: err.to_string(),
    }
}
