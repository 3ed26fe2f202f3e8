//! Blockchain runtime client and read-model client.
//!
//! ## Modules
//! - `api` - the [`ChainOps`] interface the engine consumes, plus request types
//! - `outcome` - sum-typed extrinsic outcomes and event extraction
//! - `rpc` - WebSocket submit-and-watch driver over a [`TxFactory`]
//! - `cli_factory` - signing helper driven as a subprocess
//! - `query` - typed GraphQL client against the indexer
//! - `signer` - per-collaborator submission serialization

pub mod api;
pub mod cli_factory;
pub mod error;
pub mod outcome;
pub mod query;
pub mod rpc;
pub mod signer;

pub use api::{AssetSpec, ChainOps, CreateVideoRequest, VideoMeta};
pub use cli_factory::CliTxFactory;
pub use error::{ChainError, ChainResult, QueryNodeError, QueryNodeResult};
pub use outcome::{find_created_video, ChainEvent, TxOutcome};
pub use query::{QueryNodeApi, QueryNodeClient, StorageBucketInfo};
pub use rpc::{RpcChainClient, SignedExtrinsic, TxFactory};
pub use signer::SignerLock;
