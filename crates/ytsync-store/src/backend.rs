//! Table backend abstraction.
//!
//! The repositories talk to a [`TableBackend`] trait object so the engine can
//! run against DynamoDB in production and an in-memory table set in tests.
//! Items cross the boundary as `serde_json::Value` objects; typed mapping
//! happens in the repositories.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Primary key of an item: partition component plus optional sort component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: Option<String>,
}

impl ItemKey {
    pub fn simple(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    pub fn composite(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "{}/{}", self.partition, sort),
            None => write!(f, "{}", self.partition),
        }
    }
}

/// Options for an index query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Sort direction along the index range attribute.
    pub ascending: bool,
    /// Maximum number of items to return.
    pub limit: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            ascending: true,
            limit: None,
        }
    }
}

/// A secondary index definition.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: &'static str,
    pub hash_attr: &'static str,
    pub range_attr: Option<&'static str>,
}

/// A table definition.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: &'static str,
    pub hash_attr: &'static str,
    pub range_attr: Option<&'static str>,
    pub indexes: Vec<IndexDef>,
}

/// Table names.
pub const CHANNELS_TABLE: &str = "channels";
pub const VIDEOS_TABLE: &str = "videos";
pub const WHITELIST_TABLE: &str = "whitelistChannels";

/// Index names.
pub const CHANNELS_BY_JOYSTREAM_ID: &str = "joystreamChannelId-createdAt";
pub const CHANNELS_BY_REFERRER: &str = "referrerChannelId";
pub const CHANNELS_BY_PHANTOM_KEY: &str = "phantomKey-createdAt";
pub const VIDEOS_BY_STATE: &str = "state-updatedAt";

/// The table layout used by this service.
#[derive(Debug, Clone)]
pub struct Schema {
    pub tables: Vec<TableDef>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            tables: vec![
                TableDef {
                    name: CHANNELS_TABLE,
                    hash_attr: "userId",
                    range_attr: Some("id"),
                    indexes: vec![
                        IndexDef {
                            name: CHANNELS_BY_JOYSTREAM_ID,
                            hash_attr: "joystreamChannelId",
                            range_attr: Some("createdAt"),
                        },
                        IndexDef {
                            name: CHANNELS_BY_REFERRER,
                            hash_attr: "referrerChannelId",
                            range_attr: None,
                        },
                        IndexDef {
                            name: CHANNELS_BY_PHANTOM_KEY,
                            hash_attr: "phantomKey",
                            range_attr: Some("createdAt"),
                        },
                    ],
                },
                TableDef {
                    name: VIDEOS_TABLE,
                    hash_attr: "channelId",
                    range_attr: Some("id"),
                    indexes: vec![IndexDef {
                        name: VIDEOS_BY_STATE,
                        hash_attr: "state",
                        range_attr: Some("updatedAt"),
                    }],
                },
                TableDef {
                    name: WHITELIST_TABLE,
                    hash_attr: "channelHandle",
                    range_attr: None,
                    indexes: vec![],
                },
            ],
        }
    }
}

impl Schema {
    pub fn table(&self, name: &str) -> StoreResult<&TableDef> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    pub fn index(&self, table: &str, index: &str) -> StoreResult<&IndexDef> {
        self.table(table)?
            .indexes
            .iter()
            .find(|i| i.name == index)
            .ok_or_else(|| StoreError::UnknownIndex {
                table: table.to_string(),
                index: index.to_string(),
            })
    }
}

/// Low-level table operations.
///
/// All operations are whole-item: `put` upserts the full serialized entity
/// (key attributes included), and a failed `put` leaves the prior item
/// intact.
#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Point lookup. Returns `None` when the item does not exist.
    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>>;

    /// Upsert a single item.
    async fn put(&self, table: &str, key: &ItemKey, item: Value) -> StoreResult<()>;

    /// Bulk upsert. Implementations must retry unprocessed items until the
    /// set is empty.
    async fn batch_put(&self, table: &str, items: Vec<(ItemKey, Value)>) -> StoreResult<()>;

    /// Delete an item. Deleting a missing item is not an error.
    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()>;

    /// Ordered scan of a secondary index partition.
    async fn query_index(
        &self,
        table: &str,
        index: &str,
        key: &Value,
        opts: QueryOptions,
    ) -> StoreResult<Vec<Value>>;

    /// Full table scan.
    async fn scan(&self, table: &str) -> StoreResult<Vec<Value>>;
}
