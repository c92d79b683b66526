//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::path::Path;

use serde::Deserialize;

/// Processor environment: the sandbox ("beta") or the live acquiring API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FinikEnv {
    #[default]
    Beta,
    Prod,
}

impl FinikEnv {
    /// Hostname used both for the request URL and the signed `Host` header.
    pub fn host(self) -> &'static str {
        match self {
            FinikEnv::Beta => "beta.api.acquiring.averspay.kg",
            FinikEnv::Prod => "api.acquiring.averspay.kg",
        }
    }

    pub fn base_url(self) -> String {
        format!("https://{}", self.host())
    }

    /// Public key the processor signs its callbacks with.
    pub fn builtin_public_key(self) -> &'static str {
        match self {
            FinikEnv::Beta => FINIK_BETA_PUBLIC_KEY,
            FinikEnv::Prod => FINIK_PROD_PUBLIC_KEY,
        }
    }
}

/// Deployment environment of this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
}

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `JWT_SECRET` (required): HS256 secret used to verify bearer tokens
/// - `APP_ENV` (optional): `development` or `production`
/// - `SKIP_SIGNATURE_VALIDATION` (optional): accept unsigned webhooks outside production
/// - `FINIK_*`: processor credentials and merchant identity
///
/// Processor credentials are optional here on purpose: a missing API key or
/// account id only fails the payment-creation request that needs it.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub jwt_secret: String,

    #[serde(default)]
    pub app_env: AppEnv,

    #[serde(default)]
    pub skip_signature_validation: bool,

    #[serde(default)]
    pub finik_env: FinikEnv,

    pub finik_base_url: Option<String>,
    pub finik_api_key: Option<String>,
    pub finik_account_id: Option<String>,

    #[serde(default = "default_merchant_category_code")]
    pub finik_merchant_category_code: String,

    #[serde(default = "default_name_en")]
    pub finik_name_en: String,

    pub finik_webhook_url: Option<String>,
    pub finik_redirect_url: Option<String>,

    #[serde(default = "default_private_key_path")]
    pub finik_private_key_path: String,
    pub finik_private_key_pem: Option<String>,

    #[serde(default = "default_public_key_path")]
    pub finik_public_key_path: String,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_merchant_category_code() -> String {
    "0742".to_string()
}

fn default_name_en() -> String {
    "stud.kg Payment".to_string()
}

fn default_private_key_path() -> String {
    "finik_private.pem".to_string()
}

fn default_public_key_path() -> String {
    "finik_public.pem".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Whether an invalid webhook signature must be rejected.
    ///
    /// Production always enforces. Elsewhere enforcement can be switched off
    /// with `SKIP_SIGNATURE_VALIDATION=true`, in which case failures are only logged.
    pub fn enforce_webhook_signatures(&self) -> bool {
        self.app_env == AppEnv::Production || !self.skip_signature_validation
    }

    pub fn finik_base_url(&self) -> String {
        self.finik_base_url
            .clone()
            .unwrap_or_else(|| self.finik_env.base_url())
    }

    /// Private signing key PEM: the key file wins over the environment variable.
    pub fn private_key_pem(&self) -> Option<String> {
        if let Some(pem) = read_pem_file(&self.finik_private_key_path) {
            tracing::info!("Private key loaded from {}", self.finik_private_key_path);
            return Some(pem);
        }

        self.finik_private_key_pem
            .as_deref()
            .map(expand_escaped_newlines)
            .filter(|pem| !pem.is_empty())
    }

    /// Processor public key PEM: a local override file, else the published key.
    pub fn public_key_pem(&self) -> String {
        read_pem_file(&self.finik_public_key_path)
            .unwrap_or_else(|| self.finik_env.builtin_public_key().to_string())
    }
}

fn read_pem_file(path: &str) -> Option<String> {
    if !Path::new(path).exists() {
        return None;
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents.trim().to_string()),
        Err(e) => {
            tracing::error!("Failed to read key file {}: {}", path, e);
            None
        }
    }
}

/// Keys pasted into a single-line env var usually carry literal `\n`.
fn expand_escaped_newlines(pem: &str) -> String {
    pem.replace("\\n", "\n").trim().to_string()
}

const FINIK_PROD_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAuF/PUmhMPPidcMxhZBPb
BSGJoSphmCI+h6ru8fG8guAlcPMVlhs+ThTjw2LHABvciwtpj51ebJ4EqhlySPyT
hqSfXI6Jp5dPGJNDguxfocohaz98wvT+WAF86DEglZ8dEsfoumojFUy5sTOBdHEu
g94B4BbrJvjmBa1YIx9Azse4HFlWhzZoYPgyQpArhokeHOHIN2QFzJqeriANO+wV
aUMta2AhRVZHbfyJ36XPhGO6A5FYQWgjzkI65cxZs5LaNFmRx6pjnhjIeVKKgF99
4OoYCzhuR9QmWkPl7tL4Kd68qa/xHLz0Psnuhm0CStWOYUu3J7ZpzRK8GoEXRcr8
tQIDAQAB
-----END PUBLIC KEY-----";

const FINIK_BETA_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwlrlKz/8gLWd1ARWGA/8
o3a3Qy8G+hPifyqiPosiTY6nCHovANMIJXk6DH4qAqqZeLu8pLGxudkPbv8dSyG7
F9PZEAryMPzjoB/9P/F6g0W46K/FHDtwTM3YIVvstbEbL19m8yddv/xCT9JPPJTb
LsSTVZq5zCqvKzpupwlGS3Q3oPyLAYe+ZUn4Bx2J1WQrBu3b08fNaR3E8pAkCK27
JqFnP0eFfa817VCtyVKcFHb5ij/D0eUP519Qr/pgn+gsoG63W4pPHN/pKwQUUiAy
uLSHqL5S2yu1dffyMcMVi9E/Q2HCTcez5OvOllgOtkNYHSv9pnrMRuws3u87+hNT
ZwIDAQAB
-----END PUBLIC KEY-----";
