//! Per-user namespace derivation.
//!
//! Many users share one remote store. Each gets a storage key nobody
//! else can guess: SHA-256 over `server::user::secret`, where the
//! secret is generated once per install. The key travels as a URL
//! path segment; the secret travels as a proof header, so holding
//! the key alone is not enough to touch the namespace.

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const TOKEN_FILE_NAME: &str = "token.json";
const TOKEN_BYTES: usize = 32;

/// Header carrying the proof-of-possession token on every request.
pub const PROOF_HEADER: &str = "x-proof-token";

/// Locally-held proof-of-possession secret. Generated once,
/// persisted, reused across logins on the same install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretToken {
    pub token: String,
}

impl SecretToken {
    /// Load the persisted token, or generate and persist a fresh one.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read token file {}", path.display()))?;
            let token: SecretToken =
                serde_json::from_str(&contents).context("Failed to parse token file")?;
            if !token.token.is_empty() {
                return Ok(token);
            }
            tracing::warn!("Token file empty, regenerating");
        }

        let token = Self::generate();
        let contents = serde_json::to_string_pretty(&token)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write token file {}", path.display()))?;
        Ok(token)
    }

    /// 256 bits from the OS RNG, hex-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self {
            token: hex::encode(bytes),
        }
    }

    /// Default path: `<config_dir>/encore/token.json`.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("encore");
        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        Ok(config_dir.join(TOKEN_FILE_NAME))
    }
}

/// Derived namespace key plus the proof token that authorizes
/// requests against it. Re-derived on every identity change; the key
/// is never persisted.
#[derive(Debug, Clone)]
pub struct NamespaceCredentials {
    pub key: String,
    pub token: String,
}

impl NamespaceCredentials {
    pub fn derive(server_id: &str, user_id: &str, secret: &SecretToken) -> Self {
        Self {
            key: derive_key(server_id, user_id, &secret.token),
            token: secret.token.clone(),
        }
    }
}

/// `hex(SHA256(server :: user :: token))`. Folding in the local
/// secret keeps the key unpredictable to anyone who only knows the
/// public identity.
pub fn derive_key(server_id: &str, user_id: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server_id.as_bytes());
    hasher.update(b"::");
    hasher.update(user_id.as_bytes());
    hasher.update(b"::");
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
