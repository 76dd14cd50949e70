use std::{env, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub body_limit: usize,
    pub dedup: DedupConfig,
    pub parser: ParserConfig,
    pub contacts: Option<ContactLookupConfig>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT").unwrap_or(8000),
            body_limit: env_parse::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(256 * 1024),
            dedup: DedupConfig::from_env(),
            parser: ParserConfig::from_env(),
            contacts: ContactLookupConfig::from_env(),
        }
    }
}

/// Limits for the two duplicate caches.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Capacity of the exact-id cache; the content cache holds half of this.
    pub max_entries: usize,
    pub id_ttl: Duration,
    pub content_ttl: Duration,
    /// Text must be strictly longer than this (in chars) to take the content path.
    pub min_content_chars: usize,
    /// Sweep once both caches together hold more than `max_entries * sweep_ratio`.
    ///
    /// A sweep first drops expired entries. If the caches are still over the trigger, the
    /// oldest entries are evicted until both together hold at most half the trigger. Otherwise
    /// only the hard capacities apply (`max_entries` ids, `max_entries / 2` contents).
    pub sweep_ratio: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            id_ttl: Duration::from_secs(24 * 60 * 60),
            content_ttl: Duration::from_secs(10 * 60),
            min_content_chars: 20,
            sweep_ratio: 0.8,
        }
    }
}

impl DedupConfig {
    pub fn sweep_trigger(&self) -> f64 {
        self.max_entries as f64 * self.sweep_ratio
    }

    pub fn low_water_mark(&self) -> usize {
        (self.sweep_trigger() / 2.0).floor() as usize
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_parse::<usize>("DEDUP_MAX_ENTRIES")
                .filter(|v| *v >= 1)
                .unwrap_or(defaults.max_entries),
            id_ttl: env_parse::<u64>("DEDUP_ID_TTL_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.id_ttl),
            content_ttl: env_parse::<u64>("DEDUP_CONTENT_TTL_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.content_ttl),
            min_content_chars: env_parse("DEDUP_MIN_CONTENT_CHARS")
                .unwrap_or(defaults.min_content_chars),
            sweep_ratio: env_parse::<f64>("DEDUP_SWEEP_RATIO")
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.sweep_ratio),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// Blocks with fewer non-empty lines are treated as conversation, not a price list.
    pub min_dealer_lines: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_dealer_lines: 3,
        }
    }
}

impl ParserConfig {
    pub fn from_env() -> Self {
        Self {
            min_dealer_lines: env_parse::<usize>("MIN_DEALER_LIST_LINES")
                .filter(|v| *v >= 1)
                .unwrap_or(Self::default().min_dealer_lines),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContactLookupConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ContactLookupConfig {
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("CONTACT_LOOKUP_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())?;
        Some(Self {
            base_url,
            api_key: env::var("CONTACT_LOOKUP_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timeout: lookup_timeout_from_env(),
        })
    }
}

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(2500);

pub fn lookup_timeout_from_env() -> Duration {
    env_parse::<u64>("CONTACT_LOOKUP_TIMEOUT_MS")
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_LOOKUP_TIMEOUT)
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_defaults_match_documented_values() {
        let cfg = DedupConfig::default();
        assert_eq!(cfg.max_entries, 10_000);
        assert_eq!(cfg.id_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.content_ttl, Duration::from_secs(600));
        assert_eq!(cfg.min_content_chars, 20);
    }

    #[test]
    fn parser_default_min_lines() {
        assert_eq!(ParserConfig::default().min_dealer_lines, 3);
    }

    #[test]
    fn env_parse_rejects_garbage() {
        assert_eq!(env_parse::<u64>("WATCHFEED_TEST_UNSET_VARIABLE"), None);
    }
}
