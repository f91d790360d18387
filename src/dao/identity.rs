//! Persisted machine identity (`{"uuid": .., "token": ..}`).

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::IdentityError;

/// Machine UUID and bearer token used to authenticate with the scoreboard.
///
/// Never mutated in place; rotation replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineIdentity {
    /// Machine UUID issued at registration.
    pub uuid: Uuid,
    /// Bearer token sent on every connection.
    pub token: String,
}

impl MachineIdentity {
    /// Validate raw identity fields.
    pub fn from_parts(uuid: &str, token: impl Into<String>) -> Result<Self, IdentityError> {
        let uuid = Uuid::parse_str(uuid).map_err(|_| IdentityError::InvalidUuid(uuid.into()))?;
        let token = token.into();
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }
        Ok(Self { uuid, token })
    }
}

#[derive(Debug, Deserialize)]
/// On-disk layout; fields are validated before becoming a [`MachineIdentity`].
struct RawIdentity {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    token: String,
}

/// Loads and saves the identity file.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the identity file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the identity file.
    pub fn load(&self) -> Result<MachineIdentity, IdentityError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| IdentityError::Io {
            path: self.path.clone(),
            source,
        })?;
        let raw: RawIdentity =
            serde_json::from_str(&contents).map_err(|source| IdentityError::Json {
                path: self.path.clone(),
                source,
            })?;
        MachineIdentity::from_parts(&raw.uuid, raw.token)
    }

    /// Persist `identity`, replacing the previous file atomically.
    pub fn save(&self, identity: &MachineIdentity) -> Result<(), IdentityError> {
        let io_err = |source| IdentityError::Io {
            path: self.path.clone(),
            source,
        };
        let encoded = serde_json::to_vec(identity).map_err(|source| IdentityError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        info!(path = %self.path.display(), uuid = %identity.uuid, "machine identity saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ssbd-identity-{name}-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn save_then_load_returns_same_identity() {
        let dir = scratch_dir("roundtrip");
        let store = IdentityStore::new(dir.join("ssbd.json"));
        let identity = MachineIdentity {
            uuid: Uuid::new_v4(),
            token: "secret".into(),
        };

        store.save(&identity).unwrap();
        assert_eq!(store.load().unwrap(), identity);
        assert!(!dir.join("ssbd.tmp").exists());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn invalid_uuid_is_rejected() {
        let dir = scratch_dir("bad-uuid");
        let path = dir.join("ssbd.json");
        fs::write(&path, r#"{"uuid":"not-a-uuid","token":"t"}"#).unwrap();

        let err = IdentityStore::new(&path).load().unwrap_err();
        assert!(matches!(err, IdentityError::InvalidUuid(ref raw) if raw == "not-a-uuid"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = MachineIdentity::from_parts("11111111-1111-1111-1111-111111111111", "")
            .unwrap_err();
        assert!(matches!(err, IdentityError::MissingToken));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let store = IdentityStore::new(std::env::temp_dir().join(format!(
            "ssbd-missing-{}.json",
            Uuid::new_v4()
        )));
        assert!(matches!(store.load(), Err(IdentityError::Io { .. })));
    }
}
