//! HTTP client for storage operator nodes.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::{StorageNodeError, StorageNodeResult};

/// Join an operator root with the node API prefix.
fn api_url(endpoint_root: &str, path: &str) -> String {
    format!("{}/api/v1/{}", endpoint_root.trim_end_matches('/'), path)
}

/// Upload and probe operations against individual storage nodes.
#[async_trait]
pub trait StorageNodeOps: Send + Sync {
    /// Upload one staged file as the given data object.
    async fn upload_file(
        &self,
        endpoint_root: &str,
        bag_id: &str,
        data_object_id: u64,
        path: &Path,
    ) -> StorageNodeResult<()>;

    /// Measure the node's response time.
    async fn response_time(&self, endpoint_root: &str) -> StorageNodeResult<Duration>;
}

/// Production client over plain HTTP.
pub struct StorageNodeClient {
    http: Client,
}

impl StorageNodeClient {
    pub fn new(upload_timeout: Duration) -> StorageNodeResult<Self> {
        let http = Client::builder().timeout(upload_timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl StorageNodeOps for StorageNodeClient {
    async fn upload_file(
        &self,
        endpoint_root: &str,
        bag_id: &str,
        data_object_id: u64,
        path: &Path,
    ) -> StorageNodeResult<()> {
        let url = api_url(endpoint_root, "files");
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let part = Part::stream(Body::wrap_stream(ReaderStream::new(file)))
            .file_name(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| data_object_id.to_string()),
            )
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        debug!(url, data_object_id, size, "Uploading data object");
        let response = self
            .http
            .post(&url)
            .query(&[
                ("dataObjectId", data_object_id.to_string().as_str()),
                ("bagId", bag_id),
            ])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageNodeError::UploadRejected {
                status: status.as_u16(),
                message,
            });
        }

        info!(data_object_id, size, "Data object accepted");
        Ok(())
    }

    async fn response_time(&self, endpoint_root: &str) -> StorageNodeResult<Duration> {
        let url = api_url(endpoint_root, "version");
        let started = Instant::now();
        let response = self.http.get(&url).send().await?;
        let elapsed = started.elapsed();

        let status = response.status();
        if !status.is_success() {
            return Err(StorageNodeError::UploadRejected {
                status: status.as_u16(),
                message: "probe rejected".to_string(),
            });
        }
        Ok(elapsed)
    }
}
