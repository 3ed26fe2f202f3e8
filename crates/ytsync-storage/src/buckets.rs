//! Candidate bucket ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

/// Smoothing factor for the latency EWMA.
const EWMA_ALPHA: f64 = 0.3;

/// Latency added to a bucket after a failed upload, so one bad response
/// demotes it without excluding it forever.
const FAILURE_PENALTY_MS: f64 = 2_000.0;

/// An upload candidate derived from the read model plus probe data.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCandidate {
    pub id: String,
    /// Operator node root endpoint.
    pub endpoint: String,
    pub free_capacity: u64,
    pub free_objects: u64,
    /// Smoothed response time, when the probe has seen this bucket.
    pub latency_ms: Option<f64>,
}

/// Order candidates best-first: free capacity descending, free object slots
/// descending, then measured latency ascending (unprobed buckets last).
pub fn rank(candidates: &mut [BucketCandidate]) {
    candidates.sort_by(|a, b| {
        b.free_capacity
            .cmp(&a.free_capacity)
            .then(b.free_objects.cmp(&a.free_objects))
            .then_with(|| match (a.latency_ms, b.latency_ms) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    });
}

/// Smoothed per-bucket response times, shared between the probe and the
/// uploader.
#[derive(Default)]
pub struct LatencyBook {
    inner: Mutex<HashMap<String, f64>>,
}

impl LatencyBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe measurement.
    pub fn observe(&self, bucket_id: &str, latency_ms: f64) {
        let mut inner = self.inner.lock().expect("latency book poisoned");
        let entry = inner.entry(bucket_id.to_string()).or_insert(latency_ms);
        *entry = EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * *entry;
    }

    /// Penalize a bucket after a failed upload or probe.
    pub fn penalize(&self, bucket_id: &str) {
        let mut inner = self.inner.lock().expect("latency book poisoned");
        let entry = inner.entry(bucket_id.to_string()).or_insert(0.0);
        *entry += FAILURE_PENALTY_MS;
    }

    pub fn get(&self, bucket_id: &str) -> Option<f64> {
        self.inner
            .lock()
            .expect("latency book poisoned")
            .get(bucket_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, capacity: u64, objects: u64, latency: Option<f64>) -> BucketCandidate {
        BucketCandidate {
            id: id.to_string(),
            endpoint: format!("https://{id}.example"),
            free_capacity: capacity,
            free_objects: objects,
            latency_ms: latency,
        }
    }

    #[test]
    fn test_rank_capacity_then_objects_then_latency() {
        let mut candidates = vec![
            candidate("low-cap", 10, 100, Some(5.0)),
            candidate("slow", 100, 50, Some(900.0)),
            candidate("fast", 100, 50, Some(10.0)),
            candidate("more-objects", 100, 80, None),
        ];
        rank(&mut candidates);
        let ids: Vec<_> = candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["more-objects", "fast", "slow", "low-cap"]);
    }

    #[test]
    fn test_unprobed_sorts_after_probed() {
        let mut candidates = vec![
            candidate("unprobed", 100, 50, None),
            candidate("probed", 100, 50, Some(800.0)),
        ];
        rank(&mut candidates);
        assert_eq!(candidates[0].id, "probed");
    }

    #[test]
    fn test_latency_book_smoothing_and_penalty() {
        let book = LatencyBook::new();
        book.observe("1", 100.0);
        assert_eq!(book.get("1"), Some(100.0));

        book.observe("1", 200.0);
        let smoothed = book.get("1").unwrap();
        assert!(smoothed > 100.0 && smoothed < 200.0);

        book.penalize("1");
        assert!(book.get("1").unwrap() > 2_000.0);

        // Penalizing an unseen bucket records the raw penalty.
        book.penalize("2");
        assert_eq!(book.get("2"), Some(2_000.0));
    }
}
