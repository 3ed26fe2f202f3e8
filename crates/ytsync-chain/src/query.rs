//! Read-model client against the indexer's GraphQL endpoint.
//!
//! Every consumed query gets an explicit record type; `null` and absent are
//! distinguished only at this edge. List queries paginate with
//! offset/limit at 1000 items per page.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{QueryNodeError, QueryNodeResult};

/// Page size for list queries.
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// A storage bucket eligible to receive uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBucketInfo {
    pub id: String,
    /// Root endpoint of the operator node.
    pub endpoint: String,
    /// Free byte capacity advertised by the bucket.
    pub free_capacity: u64,
    /// Free object slots advertised by the bucket.
    pub free_objects: u64,
}

/// The read-model operations the engine consumes.
#[async_trait]
pub trait QueryNodeApi: Send + Sync {
    /// Buckets assigned to a storage bag, upload-eligible only.
    async fn buckets_for_bag(&self, bag_id: &str) -> QueryNodeResult<Vec<StorageBucketInfo>>;

    /// Every active bucket with an operator endpoint, for the latency probe.
    async fn active_storage_buckets(&self) -> QueryNodeResult<Vec<StorageBucketInfo>>;
}

// --- raw records ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlChannel {
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub total_videos_created: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlVideo {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlMembership {
    pub id: String,
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlDataObject {
    pub id: String,
    pub is_accepted: bool,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlDistributionBucketFamily {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlStorageBucket {
    id: String,
    operator_metadata: Option<GqlOperatorMetadata>,
    data_objects_size_limit: String,
    data_objects_size: String,
    data_object_count_limit: String,
    data_objects_count: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlOperatorMetadata {
    node_endpoint: Option<String>,
}

impl GqlStorageBucket {
    /// Buckets without a reachable endpoint are not upload candidates.
    fn into_info(self) -> Option<StorageBucketInfo> {
        let endpoint = self
            .operator_metadata
            .and_then(|m| m.node_endpoint)
            .filter(|e| !e.is_empty())?;
        let parse = |s: &str| s.parse::<u64>().unwrap_or(0);
        let size_limit = parse(&self.data_objects_size_limit);
        let size_used = parse(&self.data_objects_size);
        let count_limit = parse(&self.data_object_count_limit);
        let count_used = parse(&self.data_objects_count);
        Some(StorageBucketInfo {
            id: self.id,
            endpoint,
            free_capacity: size_limit.saturating_sub(size_used),
            free_objects: count_limit.saturating_sub(count_used),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SquidStatus {
    height: u64,
}

/// GraphQL-over-POST client.
pub struct QueryNodeClient {
    http: Client,
    endpoint: String,
}

impl QueryNodeClient {
    pub fn new(endpoint: impl Into<String>) -> QueryNodeResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> QueryNodeResult<T> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(QueryNodeError::NotConnected(format!(
                "query node returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryNodeError::bad_response(format!(
                "query node returned {status}: {body}"
            )));
        }

        let envelope: GraphQlResponse<T> = response.json().await?;
        if let Some(errors) = envelope.errors {
            if !errors.is_empty() {
                let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
                return Err(QueryNodeError::bad_response(messages.join("; ")));
            }
        }
        envelope
            .data
            .ok_or_else(|| QueryNodeError::bad_response("response without data"))
    }

    /// Offset-paginated bucket listing shared by the two trait methods.
    async fn storage_buckets(&self, where_clause: &str, variables: Value) -> QueryNodeResult<Vec<StorageBucketInfo>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            storage_buckets: Vec<GqlStorageBucket>,
        }

        let query = format!(
            "query StorageBuckets($limit: Int!, $offset: Int!{}) {{\n\
               storageBuckets(limit: $limit, offset: $offset, where: {}) {{\n\
                 id\n\
                 operatorMetadata {{ nodeEndpoint }}\n\
                 dataObjectsSizeLimit\n\
                 dataObjectsSize\n\
                 dataObjectCountLimit\n\
                 dataObjectsCount\n\
               }}\n\
             }}",
            if variables.as_object().map(|o| o.is_empty()).unwrap_or(true) {
                ""
            } else {
                ", $bagId: ID!"
            },
            where_clause,
        );

        let mut buckets = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut vars = variables.as_object().cloned().unwrap_or_default();
            vars.insert("limit".to_string(), json!(PAGE_SIZE));
            vars.insert("offset".to_string(), json!(offset));

            let page: Data = self.execute(&query, Value::Object(vars)).await?;
            let count = page.storage_buckets.len();
            buckets.extend(page.storage_buckets.into_iter().filter_map(GqlStorageBucket::into_info));
            if count < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        debug!(count = buckets.len(), "Resolved storage buckets");
        Ok(buckets)
    }

    /// Channel lookup by on-chain id.
    pub async fn channel_by_id(&self, channel_id: u64) -> QueryNodeResult<Option<GqlChannel>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            channel_by_unique_input: Option<GqlChannel>,
        }
        let data: Data = self
            .execute(
                "query Channel($id: ID!) { channelByUniqueInput(where: {id: $id}) { id title totalVideosCreated } }",
                json!({"id": channel_id.to_string()}),
            )
            .await?;
        Ok(data.channel_by_unique_input)
    }

    /// Video lookup by on-chain id.
    pub async fn video_by_id(&self, video_id: u64) -> QueryNodeResult<Option<GqlVideo>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            video_by_unique_input: Option<GqlVideo>,
        }
        let data: Data = self
            .execute(
                "query Video($id: ID!) { videoByUniqueInput(where: {id: $id}) { id title } }",
                json!({"id": video_id.to_string()}),
            )
            .await?;
        Ok(data.video_by_unique_input)
    }

    /// Membership lookup by member id.
    pub async fn member_by_id(&self, member_id: &str) -> QueryNodeResult<Option<GqlMembership>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            membership_by_unique_input: Option<GqlMembership>,
        }
        let data: Data = self
            .execute(
                "query Member($id: ID!) { membershipByUniqueInput(where: {id: $id}) { id handle } }",
                json!({"id": member_id}),
            )
            .await?;
        Ok(data.membership_by_unique_input)
    }

    /// Data object lookup by id.
    pub async fn data_object_by_id(&self, object_id: u64) -> QueryNodeResult<Option<GqlDataObject>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            storage_data_object_by_unique_input: Option<GqlDataObject>,
        }
        let data: Data = self
            .execute(
                "query DataObject($id: ID!) { storageDataObjectByUniqueInput(where: {id: $id}) { id isAccepted size } }",
                json!({"id": object_id.to_string()}),
            )
            .await?;
        Ok(data.storage_data_object_by_unique_input)
    }

    /// Distribution bucket families.
    pub async fn distribution_bucket_families(
        &self,
    ) -> QueryNodeResult<Vec<GqlDistributionBucketFamily>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            distribution_bucket_families: Vec<GqlDistributionBucketFamily>,
        }
        let data: Data = self
            .execute(
                "query Families { distributionBucketFamilies { id } }",
                json!({}),
            )
            .await?;
        Ok(data.distribution_bucket_families)
    }

    /// Height the indexer has processed up to.
    pub async fn processed_height(&self) -> QueryNodeResult<u64> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            squid_status: SquidStatus,
        }
        let data: Data = self
            .execute("query Status { squidStatus { height } }", json!({}))
            .await?;
        Ok(data.squid_status.height)
    }
}

#[async_trait]
impl QueryNodeApi for QueryNodeClient {
    async fn buckets_for_bag(&self, bag_id: &str) -> QueryNodeResult<Vec<StorageBucketInfo>> {
        self.storage_buckets(
            "{bags_some: {id_eq: $bagId}, acceptingNewBags_eq: true}",
            json!({"bagId": bag_id}),
        )
        .await
    }

    async fn active_storage_buckets(&self) -> QueryNodeResult<Vec<StorageBucketInfo>> {
        self.storage_buckets("{acceptingNewBags_eq: true}", json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bucket_json(id: &str, endpoint: &str, size_used: u64) -> Value {
        json!({
            "id": id,
            "operatorMetadata": {"nodeEndpoint": endpoint},
            "dataObjectsSizeLimit": "1000000",
            "dataObjectsSize": size_used.to_string(),
            "dataObjectCountLimit": "100",
            "dataObjectsCount": "10"
        })
    }

    #[tokio::test]
    async fn test_buckets_for_bag_skips_endpointless() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "storageBuckets": [
                        bucket_json("1", "https://node-a.example/", 400_000),
                        {
                            "id": "2",
                            "operatorMetadata": null,
                            "dataObjectsSizeLimit": "1000000",
                            "dataObjectsSize": "0",
                            "dataObjectCountLimit": "100",
                            "dataObjectsCount": "0"
                        }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = QueryNodeClient::new(format!("{}/graphql", server.uri())).unwrap();
        let buckets = client.buckets_for_bag("dynamic:channel:7").await.unwrap();

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].id, "1");
        assert_eq!(buckets[0].free_capacity, 600_000);
        assert_eq!(buckets[0].free_objects, 90);
    }

    #[tokio::test]
    async fn test_graphql_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("channelByUniqueInput"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "no such field"}]
            })))
            .mount(&server)
            .await;

        let client = QueryNodeClient::new(format!("{}/graphql", server.uri())).unwrap();
        let err = client.channel_by_id(7).await.unwrap_err();
        assert!(matches!(err, QueryNodeError::BadResponse(_)));
    }

    #[tokio::test]
    async fn test_data_object_lookup_distinguishes_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"storageDataObjectByUniqueInput": null}
            })))
            .mount(&server)
            .await;

        let client = QueryNodeClient::new(format!("{}/graphql", server.uri())).unwrap();
        assert!(client.data_object_by_id(100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_not_connected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = QueryNodeClient::new(server.uri()).unwrap();
        let err = client.processed_height().await.unwrap_err();
        assert!(matches!(err, QueryNodeError::NotConnected(_)));
        assert!(err.is_retryable());
    }
}
