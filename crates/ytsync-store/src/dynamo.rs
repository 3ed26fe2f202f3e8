//! DynamoDB table backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{ItemKey, QueryOptions, Schema, TableBackend};
use crate::error::{StoreError, StoreResult};

/// DynamoDB caps batch writes at 25 items per request.
const BATCH_WRITE_CHUNK: usize = 25;

/// Base delay before retrying unprocessed batch items.
const UNPROCESSED_RETRY_DELAY: Duration = Duration::from_millis(200);

fn map_sdk_err<E: std::fmt::Debug>(err: SdkError<E>) -> StoreError {
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            StoreError::not_connected(format!("{err:?}"))
        }
        _ => StoreError::backend(format!("{err:?}")),
    }
}

/// Convert a JSON value into a DynamoDB attribute value.
fn json_to_attr(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_attr).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_attr(v)))
                .collect(),
        ),
    }
}

/// Convert a DynamoDB attribute value back into JSON.
fn attr_to_json(attr: &AttributeValue) -> StoreResult<Value> {
    let value = match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::from(i)
            } else if let Ok(u) = n.parse::<u64>() {
                Value::from(u)
            } else {
                let f: f64 = n
                    .parse()
                    .map_err(|_| StoreError::backend(format!("Unparsable number: {n}")))?;
                Value::from(f)
            }
        }
        AttributeValue::L(items) => {
            Value::Array(items.iter().map(attr_to_json).collect::<StoreResult<_>>()?)
        }
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), attr_to_json(v)?)))
                .collect::<StoreResult<_>>()?,
        ),
        other => {
            return Err(StoreError::backend(format!(
                "Unsupported attribute type: {other:?}"
            )))
        }
    };
    Ok(value)
}

fn attr_map_to_json(map: HashMap<String, AttributeValue>) -> StoreResult<Value> {
    let mut object = serde_json::Map::with_capacity(map.len());
    for (k, v) in &map {
        object.insert(k.clone(), attr_to_json(v)?);
    }
    Ok(Value::Object(object))
}

fn item_to_attr_map(item: &Value) -> StoreResult<HashMap<String, AttributeValue>> {
    let object = item
        .as_object()
        .ok_or_else(|| StoreError::backend("Item must be a JSON object"))?;
    Ok(object
        .iter()
        .map(|(k, v)| (k.clone(), json_to_attr(v)))
        .collect())
}

/// DynamoDB-backed [`TableBackend`].
#[derive(Clone)]
pub struct DynamoBackend {
    client: Client,
    schema: Schema,
}

impl DynamoBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            schema: Schema::default(),
        }
    }

    /// Build from the ambient AWS environment (credentials chain, region,
    /// endpoint overrides for a local DynamoDB).
    pub async fn from_env() -> Self {
        let cfg = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&cfg))
    }

    fn key_attrs(
        &self,
        table: &str,
        key: &ItemKey,
    ) -> StoreResult<Vec<(&'static str, AttributeValue)>> {
        let def = self.schema.table(table)?;
        let mut attrs = vec![(def.hash_attr, AttributeValue::S(key.partition.clone()))];
        if let Some(range_attr) = def.range_attr {
            let sort = key.sort.as_ref().ok_or_else(|| {
                StoreError::backend(format!("Table {table} requires a sort key component"))
            })?;
            attrs.push((range_attr, AttributeValue::S(sort.clone())));
        }
        Ok(attrs)
    }
}

#[async_trait]
impl TableBackend for DynamoBackend {
    async fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<Value>> {
        let mut req = self.client.get_item().table_name(table);
        for (name, attr) in self.key_attrs(table, key)? {
            req = req.key(name, attr);
        }
        let out = req.send().await.map_err(map_sdk_err)?;
        match out.item {
            Some(item) => Ok(Some(attr_map_to_json(item)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, table: &str, _key: &ItemKey, item: Value) -> StoreResult<()> {
        let attrs = item_to_attr_map(&item)?;
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(attrs))
            .send()
            .await
            .map_err(map_sdk_err)?;
        Ok(())
    }

    async fn batch_put(&self, table: &str, items: Vec<(ItemKey, Value)>) -> StoreResult<()> {
        for chunk in items.chunks(BATCH_WRITE_CHUNK) {
            let mut pending: Vec<WriteRequest> = chunk
                .iter()
                .map(|(_, item)| {
                    let put = PutRequest::builder()
                        .set_item(Some(item_to_attr_map(item)?))
                        .build()
                        .map_err(|e| StoreError::backend(e.to_string()))?;
                    Ok(WriteRequest::builder().put_request(put).build())
                })
                .collect::<StoreResult<_>>()?;

            let mut attempt = 0u32;
            while !pending.is_empty() {
                let out = self
                    .client
                    .batch_write_item()
                    .request_items(table, pending)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;

                pending = out
                    .unprocessed_items
                    .unwrap_or_default()
                    .remove(table)
                    .unwrap_or_default();

                if !pending.is_empty() {
                    attempt += 1;
                    let delay = UNPROCESSED_RETRY_DELAY.saturating_mul(2u32.pow(attempt.min(5)));
                    warn!(
                        table,
                        unprocessed = pending.len(),
                        "Batch write left unprocessed items, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, key: &ItemKey) -> StoreResult<()> {
        let mut req = self.client.delete_item().table_name(table);
        for (name, attr) in self.key_attrs(table, key)? {
            req = req.key(name, attr);
        }
        req.send().await.map_err(map_sdk_err)?;
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
        let mut items = Vec::new();
        let mut last_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut req = self
                .client
                .query()
                .table_name(table)
                .index_name(index)
                .key_condition_expression("#hk = :hk")
                .expression_attribute_names("#hk", index_def.hash_attr)
                .expression_attribute_values(":hk", json_to_attr(key))
                .scan_index_forward(opts.ascending);
            if let Some(limit) = opts.limit {
                req = req.limit((limit - items.len()).min(i32::MAX as usize) as i32);
            }
            if let Some(lk) = last_key.take() {
                req = req.set_exclusive_start_key(Some(lk));
            }

            let out = req.send().await.map_err(map_sdk_err)?;
            for item in out.items.unwrap_or_default() {
                items.push(attr_map_to_json(item)?);
            }

            if let Some(limit) = opts.limit {
                if items.len() >= limit {
                    items.truncate(limit);
                    break;
                }
            }
            match out.last_evaluated_key {
                Some(lk) if !lk.is_empty() => last_key = Some(lk),
                _ => break,
            }
        }

        debug!(table, index, count = items.len(), "Index query complete");
        Ok(items)
    }

    async fn scan(&self, table: &str) -> StoreResult<Vec<Value>> {
        self.schema.table(table)?;
        let mut items = Vec::new();
        let mut last_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut req = self.client.scan().table_name(table);
            if let Some(lk) = last_key.take() {
                req = req.set_exclusive_start_key(Some(lk));
            }
            let out = req.send().await.map_err(map_sdk_err)?;
            for item in out.items.unwrap_or_default() {
                items.push(attr_map_to_json(item)?);
            }
            match out.last_evaluated_key {
                Some(lk) if !lk.is_empty() => last_key = Some(lk),
                _ => break,
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_attr_round_trip() {
        let value = json!({
            "id": "vid-1",
            "viewCount": 1234,
            "historical": true,
            "assetIds": [10, 11],
            "nested": {"language": "en", "score": 0.5},
            "missing": null,
        });
        let attrs = item_to_attr_map(&value).unwrap();
        let back = attr_map_to_json(attrs).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_number_precision_preserved() {
        let value = json!({"big": u64::MAX});
        let attrs = item_to_attr_map(&value).unwrap();
        let back = attr_map_to_json(attrs).unwrap();
        assert_eq!(back["big"].as_u64(), Some(u64::MAX));
    }
}
