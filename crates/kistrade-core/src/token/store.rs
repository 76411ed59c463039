use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::{AppKey, Domain};
use crate::materialize::{materialize, DecodeError};

use super::AccessToken;

const FILE_TAG: &str = "kistrade";

/// Why a token file could not be read or written.
#[derive(Debug, thiserror::Error)]
enum TokenFileError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp: {0}")]
    Time(#[from] time::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Deterministic cache file name for one credential triple and domain.
pub fn token_file_name(app_key: &AppKey, domain: Domain) -> String {
    let digest = Sha256::digest(
        format!(
            "{FILE_TAG}:{}:{}:{}:{}",
            app_key.id(),
            app_key.app_key(),
            app_key.secret_key(),
            domain
        )
        .as_bytes(),
    );
    format!("{}.json", hex::encode(digest))
}

/// Best-effort on-disk token cache, one JSON file per credential and domain.
///
/// Unreadable or corrupt files are a miss; write failures are logged and
/// swallowed.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, app_key: &AppKey, domain: Domain) -> PathBuf {
        self.dir.join(token_file_name(app_key, domain))
    }

    pub fn load(&self, app_key: &AppKey, domain: Domain) -> Option<AccessToken> {
        let path = self.path(app_key, domain);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                debug!(domain = %domain, path = %path.display(), %error, "no persisted token");
                return None;
            }
        };

        match Self::decode(&content) {
            Ok(token) => Some(token),
            Err(error) => {
                warn!(domain = %domain, path = %path.display(), %error, "ignoring corrupt token file");
                None
            }
        }
    }

    pub fn save(&self, app_key: &AppKey, domain: Domain, token: &AccessToken) {
        let path = self.path(app_key, domain);
        if let Err(error) = self.write(&path, token) {
            warn!(domain = %domain, path = %path.display(), %error, "failed to persist token");
        }
    }

    pub fn remove(&self, app_key: &AppKey, domain: Domain) {
        let path = self.path(app_key, domain);
        match fs::remove_file(&path) {
            Ok(()) => debug!(domain = %domain, path = %path.display(), "removed persisted token"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(domain = %domain, path = %path.display(), %error, "failed to remove token file");
            }
        }
    }

    fn decode(content: &str) -> Result<AccessToken, TokenFileError> {
        let json = serde_json::from_str::<serde_json::Value>(content)?;
        Ok(materialize::<AccessToken>(&json, &[])?)
    }

    fn write(&self, path: &Path, token: &AccessToken) -> Result<(), TokenFileError> {
        let json = token.to_json()?;
        let content = serde_json::to_string_pretty(&json)?;

        fs::create_dir_all(&self.dir)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::VENDOR_DATETIME;

    fn key() -> AppKey {
        AppKey::new("user", "PSkey", "secret")
    }

    fn token() -> AccessToken {
        AccessToken::new(
            "persisted",
            "Bearer",
            VENDOR_DATETIME.parse("2099-01-01 00:00:00").expect("parses"),
            86_400,
        )
    }

    #[test]
    fn file_name_is_stable_and_domain_specific() {
        let real = token_file_name(&key(), Domain::Real);
        assert_eq!(real, token_file_name(&key(), Domain::Real));
        assert_ne!(real, token_file_name(&key(), Domain::Virtual));
        assert_ne!(
            real,
            token_file_name(&AppKey::new("user", "PSkey", "other"), Domain::Real)
        );
        assert!(real.ends_with(".json"));
        assert_eq!(real.len(), 64 + ".json".len());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("tokens"));

        store.save(&key(), Domain::Real, &token());

        assert_eq!(store.load(&key(), Domain::Real), Some(token()));
        assert_eq!(store.load(&key(), Domain::Virtual), None);
    }

    #[test]
    fn corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path());
        fs::write(store.path(&key(), Domain::Real), "{not json").expect("write");

        assert_eq!(store.load(&key(), Domain::Real), None);
    }

    #[test]
    fn decode_separates_syntax_from_schema_failures() {
        assert!(matches!(
            TokenStore::decode("{not json"),
            Err(TokenFileError::Json(_))
        ));
        assert!(matches!(
            TokenStore::decode(r#"{"token_type":"Bearer","expires_in":60}"#),
            Err(TokenFileError::Decode(_))
        ));
    }

    #[test]
    fn remove_deletes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path());
        store.save(&key(), Domain::Real, &token());

        store.remove(&key(), Domain::Real);
        store.remove(&key(), Domain::Real);

        assert!(!store.path(&key(), Domain::Real).exists());
    }
}
