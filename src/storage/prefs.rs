//! Sled-backed [`KeyValueStore`] on its own tree.

use sled::{Db, Tree};

use crate::error::StorageError;
use crate::storage::records::SessionEntity;
use crate::storage::KeyValueStore;

const TREE_PREFS: &str = "prefs";
const KEY_RECENT_SESSION: &str = "recent_session";
const KEY_INSTALLATION_ID: &str = "installation_id";

#[derive(Clone)]
pub struct SledPrefs {
    tree: Tree,
}

impl SledPrefs {
    pub fn new(db: &Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(TREE_PREFS)?,
        })
    }
}

impl KeyValueStore for SledPrefs {
    fn get_recent_session(&self) -> Result<Option<SessionEntity>, StorageError> {
        let Some(raw) = self.tree.get(KEY_RECENT_SESSION)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn set_recent_session(&self, session: &SessionEntity) -> Result<(), StorageError> {
        self.tree
            .insert(KEY_RECENT_SESSION, serde_json::to_vec(session)?)?;
        Ok(())
    }

    fn get_installation_id(&self) -> Result<Option<String>, StorageError> {
        let Some(raw) = self.tree.get(KEY_INSTALLATION_ID)? else {
            return Ok(None);
        };
        let id = String::from_utf8(raw.to_vec()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        Ok(Some(id))
    }

    fn set_installation_id(&self, installation_id: &str) -> Result<(), StorageError> {
        self.tree
            .insert(KEY_INSTALLATION_ID, installation_id.as_bytes())?;
        Ok(())
    }
}
