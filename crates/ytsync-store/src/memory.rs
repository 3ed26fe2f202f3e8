//! In-memory table backend for tests and local runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{ItemKey, QueryOptions, Schema, TableBackend};
use crate::error::StoreResult;

// Separator for composed primary keys; never appears in upstream ids.
const KEY_SEP: char = '\u{0}';

fn composed(key: &ItemKey) -> String {
    match &key.sort {
        Some(sort) => format!("{}{}{}", key.partition, KEY_SEP, sort),
        None => key.partition.clone(),
    }
}

/// Ordering used for index range attributes: numbers numerically, everything
/// else by string representation (ISO timestamps sort correctly as strings).
fn range_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
    }
    let left = a.as_str().map(str::to_string).unwrap_or_else(|| a.to_string());
    let right = b.as_str().map(str::to_string).unwrap_or_else(|| b.to_string());
    left.cmp(&right)
}

/// Hermetic [`TableBackend`] holding all tables in process memory.
pub struct MemoryBackend {
    schema: Schema,
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            schema: Schema::default(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Number of items currently stored in a table.
    pub async fn len(&self, table: &str) -> usize {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableBackend for MemoryBackend {
    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>> {
        self.schema.table(table)?;
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table)
            .and_then(|t| t.get(&composed(key)))
            .cloned())
    }

    async fn put(&self, table: &str, key: &ItemKey, item: Value) -> StoreResult<()> {
        self.schema.table(table)?;
        let mut tables = self.tables.lock().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(composed(key), item);
        Ok(())
    }

    async fn batch_put(&self, table: &str, items: Vec<(ItemKey, Value)>) -> StoreResult<()> {
        self.schema.table(table)?;
        let mut tables = self.tables.lock().await;
        let t = tables.entry(table.to_string()).or_default();
        for (key, item) in items {
            t.insert(composed(&key), item);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()> {
        self.schema.table(table)?;
        let mut tables = self.tables.lock().await;
        if let Some(t) = tables.get_mut(table) {
            t.remove(&composed(key));
        }
        Ok(())
    }

    async fn query_index(
        &self,
        table: &str,
        index: &str,
        key: &Value,
        opts: QueryOptions,
    ) -> StoreResult<Vec<Value>> {
        let index_def = self.schema.index(table, index)?.clone();
        let tables = self.tables.lock().await;
        let mut matched: Vec<Value> = tables
            .get(table)
            .map(|t| {
                t.values()
                    .filter(|item| item.get(index_def.hash_attr) == Some(key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(range_attr) = index_def.range_attr {
            matched.sort_by(|a, b| {
                range_cmp(
                    a.get(range_attr).unwrap_or(&Value::Null),
                    b.get(range_attr).unwrap_or(&Value::Null),
                )
            });
        }
        if !opts.ascending {
            matched.reverse();
        }
        if let Some(limit) = opts.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn scan(&self, table: &str) -> StoreResult<Vec<Value>> {
        self.schema.table(table)?;
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{VIDEOS_BY_STATE, VIDEOS_TABLE};
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let backend = MemoryBackend::new();
        let key = ItemKey::composite("UCabc", "vid-1");
        let item = json!({"channelId": "UCabc", "id": "vid-1", "state": "New"});

        backend.put(VIDEOS_TABLE, &key, item.clone()).await.unwrap();
        assert_eq!(backend.get(VIDEOS_TABLE, &key).await.unwrap(), Some(item));

        let missing = ItemKey::composite("UCabc", "vid-2");
        assert_eq!(backend.get(VIDEOS_TABLE, &missing).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_index_orders_by_range_attr() {
        let backend = MemoryBackend::new();
        for (id, updated) in [
            ("vid-b", "2024-01-02T00:00:00Z"),
            ("vid-a", "2024-01-01T00:00:00Z"),
            ("vid-c", "2024-01-03T00:00:00Z"),
        ] {
            backend
                .put(
                    VIDEOS_TABLE,
                    &ItemKey::composite("UCabc", id),
                    json!({"channelId": "UCabc", "id": id, "state": "New", "updatedAt": updated}),
                )
                .await
                .unwrap();
        }

        let asc = backend
            .query_index(
                VIDEOS_TABLE,
                VIDEOS_BY_STATE,
                &json!("New"),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        let ids: Vec<_> = asc.iter().map(|v| v["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["vid-a", "vid-b", "vid-c"]);

        let desc = backend
            .query_index(
                VIDEOS_TABLE,
                VIDEOS_BY_STATE,
                &json!("New"),
                QueryOptions {
                    ascending: false,
                    limit: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(desc.len(), 1);
        assert_eq!(desc[0]["id"], "vid-c");
    }

    #[tokio::test]
    async fn test_unknown_table_rejected() {
        let backend = MemoryBackend::new();
        let err = backend
            .get("nope", &ItemKey::simple("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::StoreError::UnknownTable(_)));
    }
}
