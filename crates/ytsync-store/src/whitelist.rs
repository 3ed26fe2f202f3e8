//! Whitelist repository.

use std::sync::Arc;

use tokio::sync::Mutex;

use ytsync_models::WhitelistEntry;

use crate::backend::{ItemKey, TableBackend, WHITELIST_TABLE};
use crate::error::StoreResult;

/// Repository for whitelisted channel handles.
pub struct WhitelistRepository {
    backend: Arc<dyn TableBackend>,
    table_lock: Mutex<()>,
}

impl WhitelistRepository {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            table_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, channel_handle: &str) -> StoreResult<Option<WhitelistEntry>> {
        let _guard = self.table_lock.lock().await;
        let item = self
            .backend
            .get(WHITELIST_TABLE, &ItemKey::simple(channel_handle))
            .await?;
        item.map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    pub async fn put(&self, entry: &WhitelistEntry) -> StoreResult<()> {
        let _guard = self.table_lock.lock().await;
        self.backend
            .put(
                WHITELIST_TABLE,
                &ItemKey::simple(&entry.channel_handle),
                serde_json::to_value(entry)?,
            )
            .await
    }

    pub async fn delete(&self, channel_handle: &str) -> StoreResult<()> {
        let _guard = self.table_lock.lock().await;
        self.backend
            .delete(WHITELIST_TABLE, &ItemKey::simple(channel_handle))
            .await
    }

    pub async fn list(&self) -> StoreResult<Vec<WhitelistEntry>> {
        let _guard = self.table_lock.lock().await;
        let items = self.backend.scan(WHITELIST_TABLE).await?;
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }
}
