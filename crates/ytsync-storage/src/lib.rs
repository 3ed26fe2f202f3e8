//! Storage-fleet upload client and bucket selection.
//!
//! ## Modules
//! - `client` - multipart uploads and response-time probes against operator
//!   nodes, behind the [`StorageNodeOps`] trait
//! - `buckets` - candidate ranking (capacity, object slots, latency) and the
//!   shared latency book
//! - `error` - error kinds with failover classification

pub mod buckets;
pub mod client;
pub mod error;

pub use buckets::{rank, BucketCandidate, LatencyBook};
pub use client::{StorageNodeClient, StorageNodeOps};
pub use error::{StorageNodeError, StorageNodeResult};
