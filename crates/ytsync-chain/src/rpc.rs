//! JSON-RPC submit-and-watch driver.
//!
//! The SCALE encoding and key management live behind [`TxFactory`]; this
//! module owns the WebSocket transport, the status subscription, and the
//! mapping of terminal statuses into [`TxOutcome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use jsonrpsee::core::client::{Subscription, SubscriptionClientT};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ChainOps, CreateVideoRequest};
use crate::error::{ChainError, ChainResult};
use crate::outcome::{ChainEvent, TxOutcome};
use crate::signer::SignerLock;

/// A signed extrinsic ready for submission.
#[derive(Debug, Clone)]
pub struct SignedExtrinsic {
    pub bytes: Vec<u8>,
    /// Hex hash of the extrinsic, used to locate its events.
    pub hash: String,
}

/// Builds and signs extrinsics and decodes their events.
///
/// This is the boundary to the SCALE/signing collaborator. Event `data`
/// fields follow the decoded runtime shape: `content.VideoCreated` carries
/// `videoId` and `assetIds`, `system.ExtrinsicFailed` carries the resolved
/// error under `name`.
#[async_trait]
pub trait TxFactory: Send + Sync {
    /// Account that signs for this request's channel.
    fn signer_account(&self, request: &CreateVideoRequest) -> ChainResult<String>;

    /// Build and sign the `createVideo` extrinsic.
    async fn signed_create_video(&self, request: &CreateVideoRequest)
        -> ChainResult<SignedExtrinsic>;

    /// Decode the events the extrinsic emitted in the finalized block.
    async fn extrinsic_events(
        &self,
        block_hash: &str,
        extrinsic_hash: &str,
    ) -> ChainResult<Vec<ChainEvent>>;
}

/// Terminal-vs-pending classification of a transaction status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TxStatus {
    Pending,
    Finalized(String),
    Dropped,
}

/// Classify one `author_submitAndWatchExtrinsic` status notification.
pub(crate) fn classify_status(status: &Value) -> TxStatus {
    if let Some(s) = status.as_str() {
        return match s {
            "invalid" | "dropped" | "usurped" => TxStatus::Dropped,
            _ => TxStatus::Pending,
        };
    }
    if let Some(obj) = status.as_object() {
        if let Some(hash) = obj.get("finalized").and_then(Value::as_str) {
            return TxStatus::Finalized(hash.to_string());
        }
        if ["invalid", "dropped", "usurped", "finalityTimeout"]
            .iter()
            .any(|k| obj.contains_key(*k))
        {
            return TxStatus::Dropped;
        }
    }
    TxStatus::Pending
}

/// Production [`ChainOps`] over a WebSocket node connection.
pub struct RpcChainClient {
    ws: WsClient,
    factory: Arc<dyn TxFactory>,
    signers: SignerLock,
    /// Overall deadline for one submit-and-watch.
    submit_timeout: Duration,
}

impl RpcChainClient {
    pub async fn connect(endpoint: &str, factory: Arc<dyn TxFactory>) -> ChainResult<Self> {
        let ws = WsClientBuilder::default()
            .build(endpoint)
            .await
            .map_err(|e| ChainError::ApiNotConnected(e.to_string()))?;
        info!(endpoint, "Connected to chain node");
        Ok(Self {
            ws,
            factory,
            signers: SignerLock::new(),
            submit_timeout: Duration::from_secs(300),
        })
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    async fn watch_to_terminal(&self, extrinsic: &SignedExtrinsic) -> ChainResult<TxOutcome> {
        let payload = format!("0x{}", hex::encode(&extrinsic.bytes));
        let mut subscription: Subscription<Value> = self
            .ws
            .subscribe(
                "author_submitAndWatchExtrinsic",
                rpc_params![payload],
                "author_unwatchExtrinsic",
            )
            .await
            .map_err(|e| ChainError::ApiNotConnected(e.to_string()))?;

        while let Some(status) = subscription.next().await {
            let status = status.map_err(|e| ChainError::ApiNotConnected(e.to_string()))?;
            match classify_status(&status) {
                TxStatus::Pending => {
                    debug!(extrinsic = %extrinsic.hash, ?status, "Awaiting finalization");
                }
                TxStatus::Dropped => {
                    warn!(extrinsic = %extrinsic.hash, ?status, "Submission rejected by the pool");
                    return Ok(TxOutcome::Rejected);
                }
                TxStatus::Finalized(block_hash) => {
                    let events = self
                        .factory
                        .extrinsic_events(&block_hash, &extrinsic.hash)
                        .await?;
                    if let Some(failed) = events
                        .iter()
                        .find(|e| e.is("system", "ExtrinsicFailed"))
                    {
                        let module_error = failed
                            .data
                            .get("name")
                            .and_then(Value::as_str)
                            .map(String::from);
                        return Ok(TxOutcome::Failed {
                            message: failed.data.to_string(),
                            module_error,
                        });
                    }
                    return Ok(TxOutcome::Finalized { events });
                }
            }
        }

        Err(ChainError::ApiNotConnected(
            "status subscription ended before a terminal state".to_string(),
        ))
    }
}

#[async_trait]
impl ChainOps for RpcChainClient {
    async fn create_video(&self, request: &CreateVideoRequest) -> ChainResult<TxOutcome> {
        let account = self.factory.signer_account(request)?;
        // Hold the signer section across sign-and-watch so nonces stay
        // sequential per collaborator.
        let _signer = self.signers.acquire(&account).await;

        let extrinsic = self.factory.signed_create_video(request).await?;
        debug!(
            channel_id = request.channel_id,
            extrinsic = %extrinsic.hash,
            "Submitting createVideo"
        );

        tokio::time::timeout(self.submit_timeout, self.watch_to_terminal(&extrinsic))
            .await
            .map_err(|_| {
                ChainError::ApiNotConnected(format!(
                    "submit-and-watch exceeded {:?}",
                    self.submit_timeout
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_pending_statuses() {
        for status in [
            json!("future"),
            json!("ready"),
            json!({"broadcast": ["peer-1"]}),
            json!({"inBlock": "0xaa"}),
            json!({"retracted": "0xaa"}),
        ] {
            assert_eq!(classify_status(&status), TxStatus::Pending);
        }
    }

    #[test]
    fn test_classify_terminal_statuses() {
        assert_eq!(
            classify_status(&json!({"finalized": "0xbb"})),
            TxStatus::Finalized("0xbb".to_string())
        );
        for status in [
            json!("invalid"),
            json!("dropped"),
            json!({"usurped": "0xcc"}),
            json!({"finalityTimeout": "0xdd"}),
        ] {
            assert_eq!(classify_status(&status), TxStatus::Dropped);
        }
    }
}
