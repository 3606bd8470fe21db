//! Four-layer classification of an incoming user message before a session
//! starts: exact-hash cache → semantic (embedding) similarity cache → a
//! model call asked for structured output → a deterministic skill-name
//! match. Each layer is a strictly cheaper fallback for the one before it;
//! any layer erroring just falls through to the next, and the whole
//! analyzer is non-fatal on failure (see [`IntentResult::fallback`]).
//!
//! The semantic layer reuses the cosine-similarity/centroid arithmetic from
//! `sa_providers::classifier` — same shape (embed, compare, cache with a
//! TTL), different cache contents and a boolean-threshold hit instead of a
//! tier vote — but goes through [`LlmProvider::embeddings`] rather than a
//! raw HTTP client, so it never depends on that module's vendor transport.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use sa_domain::config::IntentConfig;
use sa_domain::model::{Complexity, IntentResult};
use sa_domain::tool::{Message, Role};
use sa_providers::classifier::cosine_similarity;
use sa_providers::traits::{ChatRequest, EmbeddingsRequest, LlmProvider};

const MAX_ASSISTANT_CHARS: usize = 100;
const MAX_USER_MESSAGES: usize = 5;
const MAX_ASSISTANT_MESSAGES: usize = 1;

/// Build the text the analyzer reasons over: the last [`MAX_USER_MESSAGES`]
/// user messages plus the last assistant message truncated to
/// [`MAX_ASSISTANT_CHARS`] characters, tool/image content stripped.
pub fn filter_messages(messages: &[Message]) -> String {
    let mut user_texts: Vec<&str> = Vec::new();
    for m in messages.iter().rev() {
        if m.role == Role::User {
            if let Some(text) = m.content.text() {
                user_texts.push(text);
            }
            if user_texts.len() >= MAX_USER_MESSAGES {
                break;
            }
        }
    }
    user_texts.reverse();

    let assistant_text = messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .take(MAX_ASSISTANT_MESSAGES)
        .filter_map(|m| m.content.text().map(|t| truncate_chars(t, MAX_ASSISTANT_CHARS)))
        .next();

    let mut parts: Vec<String> = user_texts.into_iter().map(String::from).collect();
    if let Some(a) = assistant_text {
        parts.push(a);
    }
    parts.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn exact_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(buf)
}

struct ExactEntry {
    result: IntentResult,
    expires_at: Instant,
}

struct SemanticEntry {
    embedding: Vec<f32>,
    result: IntentResult,
    expires_at: Instant,
}

/// Schema the model layer is asked to fill in; deserialized from the
/// provider's JSON-mode response.
#[derive(Debug, serde::Deserialize)]
struct ModelIntent {
    complexity: Complexity,
    #[serde(default)]
    skip_memory: bool,
    #[serde(default)]
    is_follow_up: bool,
    #[serde(default)]
    wants_to_stop: bool,
    #[serde(default)]
    wants_rollback: bool,
    #[serde(default)]
    relevant_skill_groups: Vec<String>,
}

impl From<ModelIntent> for IntentResult {
    fn from(m: ModelIntent) -> Self {
        Self {
            complexity: m.complexity,
            skip_memory: m.skip_memory,
            is_follow_up: m.is_follow_up,
            wants_to_stop: m.wants_to_stop,
            wants_rollback: m.wants_rollback,
            relevant_skill_groups: m.relevant_skill_groups.into_iter().collect(),
        }
    }
}

pub struct IntentAnalyzer {
    config: IntentConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    known_skill_names: Vec<String>,
    exact_cache: RwLock<lru_like::Cache<u64, ExactEntry>>,
    semantic_cache: RwLock<lru_like::Cache<u64, SemanticEntry>>,
}

impl IntentAnalyzer {
    pub fn new(config: IntentConfig, provider: Option<Arc<dyn LlmProvider>>, known_skill_names: Vec<String>) -> Self {
        let exact_cap = config.exact_cache_capacity;
        let semantic_cap = config.semantic_cache_capacity;
        Self {
            config,
            provider,
            known_skill_names,
            exact_cache: RwLock::new(lru_like::Cache::new(exact_cap)),
            semantic_cache: RwLock::new(lru_like::Cache::new(semantic_cap)),
        }
    }

    /// Run the four layers against `messages`. Always returns a usable
    /// result — errors at any layer fall through to the next, and total
    /// failure returns [`IntentResult::fallback`].
    pub async fn analyze(&self, messages: &[Message]) -> IntentResult {
        let filtered = filter_messages(messages);
        if filtered.is_empty() {
            return IntentResult::fallback();
        }

        let hash = exact_hash(&filtered);
        if let Some(hit) = self.exact_cache.write().get_fresh(&hash) {
            return hit;
        }

        if let Some(provider) = &self.provider {
            if let Some(result) = self.semantic_lookup(provider.as_ref(), &filtered).await {
                self.exact_cache.write().insert(
                    hash,
                    ExactEntry {
                        result: result.clone(),
                        expires_at: Instant::now() + Duration::from_secs(self.config.exact_cache_ttl_secs),
                    },
                );
                return result;
            }

            if let Some(result) = self.call_model(provider.as_ref(), &filtered).await {
                self.remember(hash, &filtered, provider.as_ref(), result.clone()).await;
                return result;
            }
        }

        let fallback = self.deterministic_fallback(&filtered);
        self.exact_cache.write().insert(
            hash,
            ExactEntry {
                result: fallback.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.config.exact_cache_ttl_secs),
            },
        );
        fallback
    }

    async fn semantic_lookup(&self, provider: &dyn LlmProvider, text: &str) -> Option<IntentResult> {
        let embedding = self.embed(provider, text).await?;
        let threshold = self.config.semantic_similarity_threshold as f32;
        let cache = self.semantic_cache.read();
        cache
            .iter_fresh()
            .map(|(_, entry)| (cosine_similarity(&embedding, &entry.embedding), entry))
            .filter(|(score, _)| *score >= threshold)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, entry)| entry.result.clone())
    }

    async fn embed(&self, provider: &dyn LlmProvider, text: &str) -> Option<Vec<f32>> {
        let resp = provider
            .embeddings(EmbeddingsRequest {
                input: vec![text.to_string()],
                model: None,
            })
            .await
            .ok()?;
        resp.embeddings.into_iter().next()
    }

    async fn call_model(&self, provider: &dyn LlmProvider, text: &str) -> Option<IntentResult> {
        let prompt = format!(
            "Classify this user request. Respond with only JSON matching \
             {{\"complexity\": \"simple\"|\"medium\"|\"complex\", \"skip_memory\": bool, \
             \"is_follow_up\": bool, \"wants_to_stop\": bool, \"wants_rollback\": bool, \
             \"relevant_skill_groups\": [string]}}.\n\nRequest:\n{text}"
        );
        let req = ChatRequest {
            messages: vec![Message::user("intent-classify", prompt)],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(200),
            json_mode: true,
            model: None,
        };
        let resp = provider.chat(req).await.ok()?;
        serde_json::from_str::<ModelIntent>(&resp.content).ok().map(Into::into)
    }

    async fn remember(&self, hash: u64, text: &str, provider: &dyn LlmProvider, result: IntentResult) {
        self.exact_cache.write().insert(
            hash,
            ExactEntry {
                result: result.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.config.exact_cache_ttl_secs),
            },
        );
        if let Some(embedding) = self.embed(provider, text).await {
            self.semantic_cache.write().insert(
                hash,
                SemanticEntry {
                    embedding,
                    result,
                    expires_at: Instant::now() + Duration::from_secs(self.config.semantic_cache_ttl_secs),
                },
            );
        }
    }

    /// Last-resort layer: no model call succeeded, so classify purely from
    /// skill-name substring matches against the filtered text and otherwise
    /// defer to [`IntentResult::fallback`].
    fn deterministic_fallback(&self, text: &str) -> IntentResult {
        let lower = text.to_lowercase();
        let matched: HashSet<String> = self
            .known_skill_names
            .iter()
            .filter(|name| lower.contains(name.to_lowercase().as_str()))
            .cloned()
            .collect();

        let mut result = IntentResult::fallback();
        result.relevant_skill_groups = matched;
        let stop_words = ["stop", "cancel", "abort", "never mind"];
        let rollback_words = ["undo", "rollback", "revert"];
        result.wants_to_stop = stop_words.iter().any(|w| lower.contains(w));
        result.wants_rollback = rollback_words.iter().any(|w| lower.contains(w));
        result
    }
}

/// Minimal capacity-bounded, TTL-aware cache. A full LRU crate is overkill
/// for the small capacities these two caches run at; insertion order plus
/// lazy expiry-on-read is the same trade-off `EmbeddingClassifier`'s
/// `CachedEmbedding` map makes, just with an explicit eviction instead of
/// leaving stale entries to accumulate unbounded.
mod lru_like {
    use std::collections::HashMap;
    use std::hash::Hash;
    use std::time::Instant;

    pub trait Expiring {
        fn expires_at(&self) -> Instant;
    }

    impl Expiring for super::ExactEntry {
        fn expires_at(&self) -> Instant {
            self.expires_at
        }
    }

    impl Expiring for super::SemanticEntry {
        fn expires_at(&self) -> Instant {
            self.expires_at
        }
    }

    pub struct Cache<K, V> {
        capacity: usize,
        order: Vec<K>,
        entries: HashMap<K, V>,
    }

    impl<K: Eq + Hash + Clone, V: Expiring> Cache<K, V> {
        pub fn new(capacity: usize) -> Self {
            Self {
                capacity: capacity.max(1),
                order: Vec::new(),
                entries: HashMap::new(),
            }
        }

        pub fn insert(&mut self, key: K, value: V) {
            if !self.entries.contains_key(&key) {
                self.order.push(key.clone());
            }
            self.entries.insert(key, value);
            while self.order.len() > self.capacity {
                let oldest = self.order.remove(0);
                self.entries.remove(&oldest);
            }
        }

        pub fn iter_fresh(&self) -> impl Iterator<Item = (&K, &V)> {
            let now = Instant::now();
            self.entries.iter().filter(move |(_, v)| v.expires_at() > now)
        }
    }

    impl<K: Eq + Hash + Clone> Cache<K, super::ExactEntry> {
        pub fn get_fresh(&mut self, key: &K) -> Option<sa_domain::model::IntentResult> {
            let now = Instant::now();
            match self.entries.get(key) {
                Some(entry) if entry.expires_at > now => Some(entry.result.clone()),
                Some(_) => {
                    self.entries.remove(key);
                    self.order.retain(|k| k != key);
                    None
                }
                None => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::tool::Message;

    fn msgs() -> Vec<Message> {
        vec![
            Message::user("u1", "hello there"),
            Message::assistant("a1", "hi, how can I help?"),
            Message::user("u2", "write a python script to scrape a site"),
        ]
    }

    #[test]
    fn filter_messages_keeps_recent_user_and_truncated_assistant() {
        let text = filter_messages(&msgs());
        assert!(text.contains("write a python script"));
        assert!(text.contains("hi, how can I help?"));
    }

    #[test]
    fn filter_messages_truncates_long_assistant_text() {
        let long = "x".repeat(500);
        let messages = vec![Message::user("u1", "hi"), Message::assistant("a1", long)];
        let text = filter_messages(&messages);
        let assistant_line = text.lines().last().unwrap();
        assert!(assistant_line.chars().count() <= MAX_ASSISTANT_CHARS);
    }

    #[tokio::test]
    async fn empty_history_falls_back_immediately() {
        let analyzer = IntentAnalyzer::new(IntentConfig::default(), None, vec![]);
        let result = analyzer.analyze(&[]).await;
        assert_eq!(result.complexity, Complexity::Medium);
    }

    #[tokio::test]
    async fn no_provider_uses_deterministic_skill_fallback() {
        let analyzer = IntentAnalyzer::new(
            IntentConfig::default(),
            None,
            vec!["web_search".to_string()],
        );
        let messages = vec![Message::user("u1", "please use web_search to find this")];
        let result = analyzer.analyze(&messages).await;
        assert!(result.relevant_skill_groups.contains("web_search"));
    }

    #[tokio::test]
    async fn stop_word_sets_wants_to_stop_in_fallback() {
        let analyzer = IntentAnalyzer::new(IntentConfig::default(), None, vec![]);
        let messages = vec![Message::user("u1", "please cancel what you are doing")];
        let result = analyzer.analyze(&messages).await;
        assert!(result.wants_to_stop);
    }

    #[tokio::test]
    async fn repeated_query_hits_exact_cache() {
        let analyzer = IntentAnalyzer::new(IntentConfig::default(), None, vec![]);
        let messages = vec![Message::user("u1", "do the thing")];
        let first = analyzer.analyze(&messages).await;
        let second = analyzer.analyze(&messages).await;
        assert_eq!(first.complexity, second.complexity);
    }
}
