//! Wallet management module

use crate::config::KeySource;
use anyhow::{bail, Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::sync::Arc;
use zeroize::Zeroize;

const KEYPAIR_LENGTH: usize = 64;

/// Holder of one party's signing keypair
///
/// Secret bytes read from disk or the environment are wiped once the keypair
/// has been constructed.
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Create a new wallet manager from a keypair file
    ///
    /// Accepts the CLI's JSON byte-array format or the raw 64 bytes.
    pub fn from_file(path: &str) -> Result<Self> {
        let path = expand_home(path);
        let mut contents = std::fs::read(&path)
            .with_context(|| format!("Failed to read keypair file: {}", path))?;

        let keypair = if contents.len() == KEYPAIR_LENGTH {
            keypair_from_bytes(&contents)
        } else {
            keypair_from_json(&contents)
        };
        contents.zeroize();

        Ok(Self::from_keypair(keypair.with_context(|| {
            format!("Invalid keypair file: {}", path)
        })?))
    }

    /// Load a JSON byte-array secret from an environment variable
    pub fn from_json_env(var: &str) -> Result<Self> {
        let mut value = std::env::var(var)
            .with_context(|| format!("Environment variable {} is not set", var))?;
        let keypair = keypair_from_json(value.as_bytes());
        value.zeroize();
        Ok(Self::from_keypair(keypair.with_context(|| {
            format!("Invalid keypair in {}", var)
        })?))
    }

    /// Load a base58-encoded 64-byte secret
    pub fn from_base58(encoded: &str) -> Result<Self> {
        let mut bytes = bs58::decode(encoded.trim())
            .into_vec()
            .context("Keypair is not valid base58")?;
        let keypair = keypair_from_bytes(&bytes);
        bytes.zeroize();
        Ok(Self::from_keypair(keypair?))
    }

    /// Load from whichever source is configured, preferring the file
    pub fn from_key_source(source: &KeySource) -> Result<Self> {
        match (&source.keypair_path, &source.secret_env) {
            (Some(path), _) => Self::from_file(path),
            (None, Some(var)) => Self::from_json_env(var),
            (None, None) => bail!("No keypair path or secret variable configured"),
        }
    }

    /// Create a new wallet manager from a keypair
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Fresh random keypair
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::new())
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn signer(&self) -> &dyn Signer {
        self.keypair.as_ref()
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != KEYPAIR_LENGTH {
        bail!(
            "Invalid keypair length: expected {} bytes, got {}",
            KEYPAIR_LENGTH,
            bytes.len()
        );
    }
    if bytes.iter().all(|&b| b == 0) {
        bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

fn keypair_from_json(text: &[u8]) -> Result<Keypair> {
    let mut bytes: Vec<u8> =
        serde_json::from_slice(text).context("Failed to parse keypair JSON")?;
    let keypair = keypair_from_bytes(&bytes);
    bytes.zeroize();
    keypair
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_json_file() {
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_raw_file() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_zero_key() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        assert!(WalletManager::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_rejects_short_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[1,2,3]").unwrap();
        assert!(WalletManager::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(WalletManager::from_file("/nonexistent/keypair.json").is_err());
    }

    #[test]
    fn test_from_base58() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let wallet = WalletManager::from_base58(&encoded).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
        assert!(WalletManager::from_base58("not-base58-0OIl").is_err());
    }

    #[test]
    fn test_from_key_source_prefers_file() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let source = KeySource {
            keypair_path: Some(file.path().to_str().unwrap().to_string()),
            secret_env: Some("DELEGATED_TRANSFER_TEST_UNSET_SECRET".to_string()),
        };
        let wallet = WalletManager::from_key_source(&source).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());

        assert!(WalletManager::from_key_source(&KeySource::default()).is_err());
    }

    #[test]
    fn test_signer_matches_pubkey() {
        let wallet = WalletManager::generate();
        let clone = wallet.clone();
        assert_eq!(wallet.signer().pubkey(), clone.pubkey());
        assert!(format!("{:?}", wallet).contains(&wallet.pubkey().to_string()));
    }
}
