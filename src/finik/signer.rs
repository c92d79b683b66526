//! Canonical request strings and RSA-SHA256 request signatures.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    signature::{SignatureEncoding, Signer},
};
use serde_json::{Map, Value};
use sha2::Sha256;

/// Headers with this prefix take part in the signature, alongside `host`.
pub const SIGNED_HEADER_PREFIX: &str = "x-api-";

/// Characters `encodeURIComponent` leaves unescaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors raised while producing a request signature.
///
/// Any of these aborts the outbound call: a request is never sent unsigned.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Private signing key is not configured (set FINIK_PRIVATE_KEY_PEM or provide finik_private.pem)")]
    MissingKey,

    #[error("Private signing key is malformed: {0}")]
    MalformedKey(String),

    #[error("Failed to generate signature: {0}")]
    Signature(String),
}

/// The parts of an HTTP request covered by a signature.
///
/// # Canonical Form
///
/// 1. method, lower-cased, then newline
/// 2. absolute path, then newline
/// 3. `host` and `x-api-*` headers as `name:value`, sorted by name, joined by `&`, then newline
/// 4. query pairs, percent-encoded and sorted by key, joined by `&`, then newline
///    (the whole line is omitted when there is no query)
/// 5. the JSON body with its top-level keys sorted, compact
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    method: &'a str,
    path: &'a str,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: &'a [u8],
}

impl<'a> CanonicalRequest<'a> {
    pub fn new(method: &'a str, path: &'a str, body: &'a [u8]) -> Self {
        Self {
            method,
            path,
            headers: Vec::new(),
            query: Vec::new(),
            body,
        }
    }

    /// Add a header. Headers other than `host` and `x-api-*` are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name == "host" {
            self.headers.push((name, value.to_ascii_lowercase()));
        } else if name.starts_with(SIGNED_HEADER_PREFIX) {
            self.headers.push((name, value.to_string()));
        }
        self
    }

    /// Add a decoded query parameter.
    pub fn query_param(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn to_canonical_string(&self) -> String {
        let mut data = String::new();

        data.push_str(&self.method.to_lowercase());
        data.push('\n');

        data.push_str(self.path);
        data.push('\n');

        data.push_str(&self.headers_segment());
        data.push('\n');

        let query = self.query_segment();
        if !query.is_empty() {
            data.push_str(&query);
            data.push('\n');
        }

        data.push_str(&canonical_body(self.body));
        data
    }

    fn headers_segment(&self) -> String {
        let mut headers: Vec<&(String, String)> = self.headers.iter().collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        headers
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn query_segment(&self) -> String {
        let mut params: Vec<&(String, String)> = self.query.iter().collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
            .iter()
            .map(|(key, value)| format!("{}={}", uri_encode(key), uri_encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// `encodeURIComponent` with spaces rendered as `+`.
fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_COMPONENT)
        .to_string()
        .replace("%20", "+")
}

/// Re-serialize a JSON object body with sorted top-level keys.
///
/// Nested objects keep their received order. Bodies that are not a JSON
/// object are used verbatim, so a tampered body still yields a (mismatching)
/// canonical string instead of an error.
pub fn canonical_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries.into_iter().collect();
            Value::Object(sorted).to_string()
        }
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Signs canonical request strings with the merchant's private key.
pub struct RequestSigner {
    key: SigningKey<Sha256>,
}

impl RequestSigner {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self {
            key: SigningKey::<Sha256>::new(private_key),
        }
    }

    /// Parse a PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: Option<&str>) -> Result<Self, SigningError> {
        let pem = pem
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(SigningError::MissingKey)?;

        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SigningError::MalformedKey(e.to_string()))?;

        Ok(Self::new(key))
    }

    /// Base64 RSA PKCS#1 v1.5 / SHA-256 signature over the canonical string.
    pub fn sign(&self, canonical: &str) -> Result<String, SigningError> {
        let signature = self
            .key
            .try_sign(canonical.as_bytes())
            .map_err(|e| SigningError::Signature(e.to_string()))?;

        Ok(STANDARD.encode(signature.to_bytes()))
    }
}
