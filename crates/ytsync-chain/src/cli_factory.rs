//! [`TxFactory`] implementation over the platform's signing helper CLI.
//!
//! SCALE encoding and key management stay out of this process: the helper
//! builds and signs the extrinsic from a JSON request on stdin and decodes
//! block events on demand, talking JSON on stdout both ways.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::api::CreateVideoRequest;
use crate::error::{ChainError, ChainResult};
use crate::outcome::ChainEvent;
use crate::rpc::{SignedExtrinsic, TxFactory};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignOutput {
    extrinsic_hex: String,
    extrinsic_hash: String,
}

/// Signing helper driven as a subprocess.
pub struct CliTxFactory {
    /// Helper command, e.g. `joystream-tx`.
    command: String,
    /// Node WebSocket endpoint handed to the helper.
    api_uri: String,
    /// Signing account passed as the helper's key identifier.
    account: String,
}

impl CliTxFactory {
    pub fn new(
        command: impl Into<String>,
        api_uri: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            api_uri: api_uri.into(),
            account: account.into(),
        }
    }

    fn classify_failure(stderr: &str) -> ChainError {
        let msg = stderr.to_lowercase();
        if msg.contains("cancel") {
            ChainError::SignCancelled
        } else if msg.contains("connect") || msg.contains("connection") {
            ChainError::ApiNotConnected(stderr.lines().last().unwrap_or("").to_string())
        } else if msg.contains("collaborator") {
            ChainError::CollaboratorNotFound(stderr.lines().last().unwrap_or("").to_string())
        } else if msg.contains("app not found") {
            ChainError::AppNotFound(stderr.lines().last().unwrap_or("").to_string())
        } else {
            ChainError::Unknown(stderr.lines().last().unwrap_or("").to_string())
        }
    }

    async fn run(&self, args: &[&str], stdin_payload: Option<Vec<u8>>) -> ChainResult<Vec<u8>> {
        debug!(command = %self.command, ?args, "Invoking signing helper");
        let mut child = Command::new(&self.command)
            .args(["--api-uri", &self.api_uri])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ChainError::Unknown(format!("failed to spawn {}: {e}", self.command)))?;

        if let Some(payload) = stdin_payload {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| ChainError::Unknown("helper stdin unavailable".to_string()))?;
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| ChainError::Unknown(e.to_string()))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ChainError::Unknown(e.to_string()))?;
        if !output.status.success() {
            return Err(Self::classify_failure(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl TxFactory for CliTxFactory {
    fn signer_account(&self, _request: &CreateVideoRequest) -> ChainResult<String> {
        Ok(self.account.clone())
    }

    async fn signed_create_video(
        &self,
        request: &CreateVideoRequest,
    ) -> ChainResult<SignedExtrinsic> {
        let payload =
            serde_json::to_vec(request).map_err(|e| ChainError::Unknown(e.to_string()))?;
        let stdout = self
            .run(
                &["sign-create-video", "--key", &self.account],
                Some(payload),
            )
            .await?;

        let signed: SignOutput = serde_json::from_slice(&stdout)
            .map_err(|e| ChainError::Unknown(format!("unparsable helper output: {e}")))?;
        let bytes = hex::decode(signed.extrinsic_hex.trim_start_matches("0x"))
            .map_err(|e| ChainError::Unknown(format!("bad extrinsic hex: {e}")))?;
        Ok(SignedExtrinsic {
            bytes,
            hash: signed.extrinsic_hash,
        })
    }

    async fn extrinsic_events(
        &self,
        block_hash: &str,
        extrinsic_hash: &str,
    ) -> ChainResult<Vec<ChainEvent>> {
        let stdout = self
            .run(
                &[
                    "extrinsic-events",
                    "--block",
                    block_hash,
                    "--extrinsic",
                    extrinsic_hash,
                ],
                None,
            )
            .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| ChainError::Unknown(format!("unparsable event output: {e}")))
    }
}
