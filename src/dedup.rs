//! In-memory duplicate suppression.
//!
//! Two caches share one lock so check-then-insert is atomic per call:
//!
//! - the exact-id cache, keyed by message id + chat + participant, catches webhook redeliveries;
//! - the content cache, keyed by sender + normalized text, catches the same post relayed into
//!   several chats within a short window.
//!
//! State is process-local and lost on restart.

use crate::config::DedupConfig;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone)]
pub struct Deduplicator {
    config: Arc<DedupConfig>,
    state: Arc<Mutex<DedupState>>,
}

#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub seen_at: Instant,
    pub message_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DedupQuery<'a> {
    pub id: &'a str,
    pub chat_id: &'a str,
    pub participant_id: Option<&'a str>,
    pub text: Option<&'a str>,
    pub sender: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupVerdict {
    Fresh,
    ExactId,
    Content,
}

impl DedupVerdict {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, DedupVerdict::Fresh)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSizes {
    pub by_id: usize,
    pub by_content: usize,
}

#[derive(Default)]
struct DedupState {
    by_id: HashMap<String, DedupEntry>,
    by_content: HashMap<String, DedupEntry>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(DedupState::default())),
        }
    }

    /// Records the sighting unless it is a duplicate; the verdict says which cache matched.
    pub async fn check(&self, query: DedupQuery<'_>) -> DedupVerdict {
        self.check_at(Instant::now(), query).await
    }

    pub(crate) async fn check_at(&self, now: Instant, query: DedupQuery<'_>) -> DedupVerdict {
        let cfg = &*self.config;
        let mut state = self.state.lock().await;

        let id_key = exact_key(query.id, query.chat_id, query.participant_id);
        if let Some(entry) = state.by_id.get(&id_key) {
            if is_live(entry, now, cfg.id_ttl) {
                debug!(target = "watchfeed.dedup", message_id = %query.id, chat_id = %query.chat_id, "exact_duplicate");
                return DedupVerdict::ExactId;
            }
            state.by_id.remove(&id_key);
        }

        let normalized = query.text.map(normalize_text);
        let content = match (normalized, query.sender) {
            (Some(text), Some(sender)) if text.chars().count() > cfg.min_content_chars => {
                Some(content_key(sender, &text))
            }
            _ => None,
        };

        if let Some(key) = content {
            if let Some(entry) = state.by_content.get(&key) {
                if is_live(entry, now, cfg.content_ttl) {
                    debug!(
                        target = "watchfeed.dedup",
                        message_id = %query.id,
                        chat_id = %query.chat_id,
                        first_message_id = %entry.message_id,
                        "content_duplicate"
                    );
                    return DedupVerdict::Content;
                }
                state.by_content.remove(&key);
            }
            state.by_content.insert(
                key,
                DedupEntry {
                    seen_at: now,
                    message_id: query.id.to_string(),
                },
            );
        }

        state.by_id.insert(
            id_key,
            DedupEntry {
                seen_at: now,
                message_id: query.id.to_string(),
            },
        );

        if state.needs_sweep(cfg) {
            let report = state.sweep(now, cfg);
            crate::metrics::dedup_swept(report);
            debug!(
                target = "watchfeed.dedup",
                expired = report.expired,
                evicted = report.evicted,
                "cache_sweep"
            );
        }

        DedupVerdict::Fresh
    }

    /// TTL pass followed by the oldest-first capacity pass, regardless of the load trigger.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: Instant) -> SweepReport {
        self.state.lock().await.sweep(now, &self.config)
    }

    pub async fn needs_sweep(&self) -> bool {
        self.state.lock().await.needs_sweep(&self.config)
    }

    pub async fn sizes(&self) -> CacheSizes {
        let state = self.state.lock().await;
        CacheSizes {
            by_id: state.by_id.len(),
            by_content: state.by_content.len(),
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.by_id.clear();
        state.by_content.clear();
    }
}

impl DedupState {
    fn needs_sweep(&self, cfg: &DedupConfig) -> bool {
        self.total() as f64 > cfg.sweep_trigger()
    }

    fn total(&self) -> usize {
        self.by_id.len() + self.by_content.len()
    }

    fn sweep(&mut self, now: Instant, cfg: &DedupConfig) -> SweepReport {
        let before = self.total();
        self.by_id.retain(|_, entry| is_live(entry, now, cfg.id_ttl));
        self.by_content
            .retain(|_, entry| is_live(entry, now, cfg.content_ttl));
        let expired = before - self.total();

        // Still over the trigger after expiry: shrink to the low-water mark so the next
        // sweep is another `trigger - low_water` insertions away.
        let (id_cap, content_cap) = if self.needs_sweep(cfg) {
            let low_water = cfg.low_water_mark();
            let id_cap = cfg.max_entries.min(low_water);
            let kept_ids = self.by_id.len().min(id_cap);
            (id_cap, (cfg.max_entries / 2).min(low_water - kept_ids))
        } else {
            (cfg.max_entries, cfg.max_entries / 2)
        };
        let evicted =
            evict_oldest(&mut self.by_id, id_cap) + evict_oldest(&mut self.by_content, content_cap);

        SweepReport { expired, evicted }
    }
}

fn evict_oldest(entries: &mut HashMap<String, DedupEntry>, capacity: usize) -> usize {
    if entries.len() <= capacity {
        return 0;
    }
    let excess = entries.len() - capacity;
    let mut by_age: Vec<(Instant, String)> = entries
        .iter()
        .map(|(key, entry)| (entry.seen_at, key.clone()))
        .collect();
    by_age.sort_unstable_by_key(|(seen_at, _)| *seen_at);
    for (_, key) in by_age.into_iter().take(excess) {
        entries.remove(&key);
    }
    excess
}

fn is_live(entry: &DedupEntry, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(entry.seen_at) < ttl
}

fn exact_key(id: &str, chat_id: &str, participant_id: Option<&str>) -> String {
    format!("{id}|{chat_id}|{}", participant_id.unwrap_or_default())
}

fn content_key(sender: &str, normalized_text: &str) -> String {
    format!("{sender}|{normalized_text}")
}

/// Lower-cases and collapses whitespace runs into single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAYED: &str = "5712/1R blue dial 7/2025 full set HKD 908k";

    fn small_config(max_entries: usize) -> DedupConfig {
        DedupConfig {
            max_entries,
            sweep_ratio: 100.0,
            ..DedupConfig::default()
        }
    }

    fn query<'a>(id: &'a str, chat: &'a str, text: Option<&'a str>) -> DedupQuery<'a> {
        DedupQuery {
            id,
            chat_id: chat,
            participant_id: Some("85291234567@s.whatsapp.net"),
            text,
            sender: Some("85291234567@s.whatsapp.net"),
        }
    }

    #[tokio::test]
    async fn repeated_delivery_is_duplicate() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let delivery = |chat| DedupQuery {
            id: "M1",
            chat_id: chat,
            participant_id: Some("p@lid"),
            text: None,
            sender: None,
        };
        assert_eq!(dedup.check(delivery("chat@g.us")).await, DedupVerdict::Fresh);
        assert_eq!(dedup.check(delivery("chat@g.us")).await, DedupVerdict::ExactId);
        assert!(!dedup.check(delivery("other@g.us")).await.is_duplicate());
    }

    #[tokio::test]
    async fn expired_exact_entry_is_not_reused() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let t0 = Instant::now();
        let q = query("M1", "a@g.us", None);
        assert_eq!(dedup.check_at(t0, q).await, DedupVerdict::Fresh);
        let later = t0 + Duration::from_secs(24 * 60 * 60 + 1);
        assert_eq!(dedup.check_at(later, q).await, DedupVerdict::Fresh);
        assert_eq!(dedup.check_at(later, q).await, DedupVerdict::ExactId);
    }

    #[tokio::test]
    async fn relayed_text_across_chats_is_content_duplicate_within_window() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let t0 = Instant::now();
        let first = query("M1", "a@g.us", Some(RELAYED));
        let relay = query("M2", "b@g.us", Some("  5712/1R   BLUE dial 7/2025 full set HKD 908k"));

        assert_eq!(dedup.check_at(t0, first).await, DedupVerdict::Fresh);
        assert_eq!(
            dedup.check_at(t0 + Duration::from_secs(30), relay).await,
            DedupVerdict::Content
        );
        // a content duplicate leaves no exact-id trace behind
        assert_eq!(dedup.sizes().await.by_id, 1);

        let after_window = t0 + Duration::from_secs(11 * 60);
        assert_eq!(dedup.check_at(after_window, relay).await, DedupVerdict::Fresh);
    }

    #[tokio::test]
    async fn short_text_or_missing_sender_skips_content_path() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let t0 = Instant::now();
        assert!(!dedup.check_at(t0, query("M1", "a@g.us", Some("ok thanks"))).await.is_duplicate());
        assert!(!dedup.check_at(t0, query("M2", "b@g.us", Some("ok thanks"))).await.is_duplicate());

        let anonymous = DedupQuery {
            sender: None,
            ..query("M3", "a@g.us", Some(RELAYED))
        };
        assert!(!dedup.check_at(t0, anonymous).await.is_duplicate());
        let anonymous_relay = DedupQuery {
            sender: None,
            ..query("M4", "b@g.us", Some(RELAYED))
        };
        assert!(!dedup.check_at(t0, anonymous_relay).await.is_duplicate());
        assert_eq!(dedup.sizes().await.by_content, 0);
    }

    #[tokio::test]
    async fn different_senders_do_not_collide_on_content() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let t0 = Instant::now();
        assert!(!dedup.check_at(t0, query("M1", "a@g.us", Some(RELAYED))).await.is_duplicate());
        let other_sender = DedupQuery {
            sender: Some("85299999999@s.whatsapp.net"),
            ..query("M2", "b@g.us", Some(RELAYED))
        };
        assert!(!dedup.check_at(t0, other_sender).await.is_duplicate());
    }

    #[tokio::test]
    async fn capacity_eviction_keeps_most_recent() {
        let dedup = Deduplicator::new(small_config(10));
        let t0 = Instant::now();
        let ids: Vec<String> = (0..15).map(|i| format!("M{i}")).collect();
        for (i, id) in ids.iter().enumerate() {
            let at = t0 + Duration::from_secs(i as u64);
            dedup.check_at(at, query(id, "a@g.us", None)).await;
        }
        assert_eq!(dedup.sizes().await.by_id, 15);

        let report = dedup.sweep_at(t0 + Duration::from_secs(20)).await;
        assert_eq!(report, SweepReport { expired: 0, evicted: 5 });
        assert_eq!(dedup.sizes().await.by_id, 10);

        let now = t0 + Duration::from_secs(21);
        for id in &ids[5..] {
            assert!(dedup.check_at(now, query(id, "a@g.us", None)).await.is_duplicate());
        }
        assert!(!dedup.check_at(now, query("M0", "a@g.us", None)).await.is_duplicate());
    }

    #[tokio::test]
    async fn content_cache_is_capped_at_half_capacity() {
        let dedup = Deduplicator::new(small_config(4));
        let t0 = Instant::now();
        for i in 0..4 {
            let text = format!("{RELAYED} lot number {i}");
            let id = format!("M{i}");
            dedup
                .check_at(t0 + Duration::from_secs(i), query(&id, "a@g.us", Some(&text)))
                .await;
        }
        dedup.sweep_at(t0 + Duration::from_secs(5)).await;
        let sizes = dedup.sizes().await;
        assert_eq!(sizes.by_id, 4);
        assert_eq!(sizes.by_content, 2);
    }

    #[tokio::test]
    async fn ttl_pass_runs_before_capacity_pass() {
        let dedup = Deduplicator::new(small_config(3));
        let t0 = Instant::now();
        dedup.check_at(t0, query("old", "a@g.us", None)).await;
        let fresh = t0 + Duration::from_secs(24 * 60 * 60 + 5);
        for id in ["a", "b", "c"] {
            dedup.check_at(fresh, query(id, "a@g.us", None)).await;
        }
        let report = dedup.sweep_at(fresh).await;
        assert_eq!(report, SweepReport { expired: 1, evicted: 0 });
        assert_eq!(dedup.sizes().await.by_id, 3);
    }

    #[tokio::test]
    async fn sweep_triggers_past_load_ratio() {
        let dedup = Deduplicator::new(DedupConfig {
            max_entries: 10,
            sweep_ratio: 0.5,
            ..DedupConfig::default()
        });
        let t0 = Instant::now();
        for i in 0..5 {
            let id = format!("M{i}");
            dedup.check_at(t0, query(&id, "a@g.us", None)).await;
        }
        assert!(!dedup.needs_sweep().await);
        // entries older than the TTL are swept inline once the ratio is crossed
        let later = t0 + Duration::from_secs(24 * 60 * 60 + 1);
        dedup.check_at(later, query("M5", "a@g.us", None)).await;
        assert_eq!(dedup.sizes().await.by_id, 1);
    }

    #[tokio::test]
    async fn inline_sweep_drains_to_low_water_mark() {
        let dedup = Deduplicator::new(DedupConfig {
            max_entries: 10,
            sweep_ratio: 0.8,
            ..DedupConfig::default()
        });
        let t0 = Instant::now();
        let mut sweeps = 0;
        let mut previous = 0;
        for i in 0..40u64 {
            let id = format!("M{i}");
            let now = t0 + Duration::from_millis(i);
            assert!(!dedup.check_at(now, query(&id, "a@g.us", None)).await.is_duplicate());
            assert!(!dedup.needs_sweep().await);
            let by_id = dedup.sizes().await.by_id;
            assert!(by_id <= 8);
            if by_id < previous {
                sweeps += 1;
            }
            previous = by_id;
        }
        // trigger 8, low-water 4: one sweep per five insertions after the first
        assert_eq!(sweeps, 7);
        let last = t0 + Duration::from_millis(40);
        assert!(dedup.check_at(last, query("M39", "a@g.us", None)).await.is_duplicate());
        assert!(!dedup.check_at(last, query("M0", "a@g.us", None)).await.is_duplicate());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redeliveries_admit_exactly_one() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let dedup = dedup.clone();
                tokio::spawn(async move {
                    dedup.check(query("M1", "a@g.us", None)).await.is_duplicate()
                })
            })
            .collect();
        let mut fresh = 0;
        for task in tasks {
            if !task.await.expect("task") {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(dedup.sizes().await.by_id, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_relays_admit_exactly_one() {
        let dedup = Deduplicator::new(DedupConfig::default());
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let dedup = dedup.clone();
                tokio::spawn(async move {
                    let id = format!("M{i}");
                    let chat = format!("chat-{i}@g.us");
                    dedup.check(query(&id, &chat, Some(RELAYED))).await.is_duplicate()
                })
            })
            .collect();
        let mut fresh = 0;
        for task in tasks {
            if !task.await.expect("task") {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(
            dedup.sizes().await,
            CacheSizes {
                by_id: 1,
                by_content: 1
            }
        );
    }

    #[tokio::test]
    async fn clear_resets_both_caches() {
        let dedup = Deduplicator::new(DedupConfig::default());
        dedup.check(query("M1", "a@g.us", Some(RELAYED))).await;
        assert_eq!(dedup.sizes().await, CacheSizes { by_id: 1, by_content: 1 });
        dedup.clear().await;
        assert_eq!(dedup.sizes().await, CacheSizes::default());
        assert!(!dedup.check(query("M1", "a@g.us", Some(RELAYED))).await.is_duplicate());
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_text("  Hello \n  WORLD\t x "), "hello world x");
    }
}
