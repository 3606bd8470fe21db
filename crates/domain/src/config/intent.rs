use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IntentAnalyzer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Four-layer cache configuration: exact hash → semantic similarity →
/// model call → deterministic fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    #[serde(default = "d_exact_cache_capacity")]
    pub exact_cache_capacity: usize,
    #[serde(default = "d_exact_cache_ttl_secs")]
    pub exact_cache_ttl_secs: u64,
    #[serde(default = "d_semantic_cache_capacity")]
    pub semantic_cache_capacity: usize,
    #[serde(default = "d_semantic_cache_ttl_secs")]
    pub semantic_cache_ttl_secs: u64,
    /// Minimum cosine similarity against a cached centroid to reuse its result.
    #[serde(default = "d_semantic_similarity_threshold")]
    pub semantic_similarity_threshold: f64,
    /// Target end-to-end latency; informational only, not enforced as a hard cutoff.
    #[serde(default = "d_target_latency_ms")]
    pub target_latency_ms: u64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            exact_cache_capacity: d_exact_cache_capacity(),
            exact_cache_ttl_secs: d_exact_cache_ttl_secs(),
            semantic_cache_capacity: d_semantic_cache_capacity(),
            semantic_cache_ttl_secs: d_semantic_cache_ttl_secs(),
            semantic_similarity_threshold: d_semantic_similarity_threshold(),
            target_latency_ms: d_target_latency_ms(),
        }
    }
}

fn d_exact_cache_capacity() -> usize {
    2_000
}
fn d_exact_cache_ttl_secs() -> u64 {
    3_600
}
fn d_semantic_cache_capacity() -> usize {
    500
}
fn d_semantic_cache_ttl_secs() -> u64 {
    3_600
}
fn d_semantic_similarity_threshold() -> f64 {
    0.92
}
fn d_target_latency_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_latency_is_200ms() {
        assert_eq!(IntentConfig::default().target_latency_ms, 200);
    }
}
