//! Verification of processor callback signatures.
//!
//! The canonical string is rebuilt from the request exactly as received:
//! method, path, query, the `host` and `x-api-*` headers, and the raw body bytes.

use axum::http::{HeaderMap, Method, Uri};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::{
    RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    signature::Verifier,
};
use sha2::Sha256;

use super::signer::{CanonicalRequest, SIGNED_HEADER_PREFIX, SigningError};

/// Header carrying the processor's base64 signature.
pub const SIGNATURE_HEADER: &str = "signature";

/// Alternate header name some processor deployments use.
pub const ALT_SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,

    #[error("signature is not valid base64")]
    Encoding,

    #[error("signature does not match the request")]
    Mismatch,
}

/// Verifies inbound requests against the processor's public key.
#[derive(Clone)]
pub struct WebhookValidator {
    key: VerifyingKey<Sha256>,
}

impl WebhookValidator {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self {
            key: VerifyingKey::<Sha256>::new(public_key),
        }
    }

    /// Parse an SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, SigningError> {
        let pem = pem.trim();
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| SigningError::MalformedKey(e.to_string()))?;

        Ok(Self::new(key))
    }

    /// Verify a whole inbound request.
    ///
    /// `body` must be the raw bytes received on the wire, before any parsing.
    pub fn verify_request(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        let signature = signature_header(headers).ok_or(SignatureError::Missing)?;
        let canonical = canonical_request(method, uri, headers, body);
        self.verify(&canonical, signature)
    }

    /// Verify a base64 signature over an already built canonical string.
    pub fn verify(&self, canonical: &str, signature_b64: &str) -> Result<(), SignatureError> {
        let bytes = STANDARD
            .decode(signature_b64.trim())
            .map_err(|_| SignatureError::Encoding)?;
        let signature =
            Signature::try_from(bytes.as_slice()).map_err(|_| SignatureError::Mismatch)?;

        self.key
            .verify(canonical.as_bytes(), &signature)
            .map_err(|_| SignatureError::Mismatch)
    }
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(ALT_SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
}

/// Rebuild the canonical string of an inbound request.
pub fn canonical_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> String {
    let mut request = CanonicalRequest::new(method.as_str(), uri.path(), body);

    for (name, value) in headers {
        let name = name.as_str();
        if name != "host" && !name.starts_with(SIGNED_HEADER_PREFIX) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.header(name, value);
        }
    }

    if let Some(query) = uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            request = request.query_param(&key, &value);
        }
    }

    request.to_canonical_string()
}
