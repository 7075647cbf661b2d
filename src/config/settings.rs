//! Pipeline settings.
//!
//! All knobs the runners recognise, with their defaults. Settings are
//! loaded from the environment at startup; tests construct them directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Sync-phase knobs.
    pub sync: SyncSettings,
    /// Process-phase knobs.
    pub processing: ProcessingSettings,
    /// Language-model call shape.
    pub lm: LmSettings,
    /// Token broker knobs.
    pub token: TokenSettings,
}

impl Settings {
    /// Loads settings from the environment.
    ///
    /// Only the language-model API key (`ANTHROPIC_API_KEY`) and the
    /// initial lookback window (`SUBSCAN_MONTHS_BACK`) are commonly
    /// overridden; everything else keeps its default.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        settings.lm.api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());

        if let Some(months) = std::env::var("SUBSCAN_MONTHS_BACK")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            settings.sync.months_back = months;
        }

        settings
    }
}

/// Knobs for the sync runner and query builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Initial-sync lookback window in months.
    pub months_back: u32,
    /// Page size used while counting messages under the filter.
    pub count_page_size: u32,
    /// Page size used while fetching full messages.
    pub fetch_page_size: u32,
    /// Sleep between pages.
    #[serde(with = "duration_millis")]
    pub page_delay: Duration,
    /// Runs older than this are logged as stale on resume.
    #[serde(with = "duration_millis")]
    pub stale_after: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            months_back: 12,
            count_page_size: 500,
            fetch_page_size: 100,
            page_delay: Duration::from_millis(100),
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

/// Knobs for the process runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Keyword confidence below which the language model is not invoked.
    pub keyword_confidence_threshold: f64,
    /// Rows per batch.
    pub batch_size: u32,
    /// Sleep between batches.
    #[serde(with = "duration_millis")]
    pub batch_delay: Duration,
    /// Attempts before a failing row is burned.
    pub max_analysis_attempts: i64,
    /// Runs older than this are logged as stale on resume.
    #[serde(with = "duration_millis")]
    pub stale_after: Duration,
    /// Minimum classifier confidence required to create a subscription.
    ///
    /// Zero: a positive verdict always materialises.
    pub subscription_min_confidence: f64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            keyword_confidence_threshold: 0.3,
            batch_size: 50,
            batch_delay: Duration::from_millis(100),
            max_analysis_attempts: 3,
            stale_after: Duration::from_secs(30 * 60),
            subscription_min_confidence: 0.0,
        }
    }
}

/// Call shape for the language-model classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmSettings {
    /// API key. When absent the language-model stage is disabled and
    /// every escalation falls back to the keyword result.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Hard timeout on the call.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Backoff schedule for retriable failures.
    pub retry_delays: Vec<Duration>,
    /// Hard cap on the body text sent to the model.
    pub content_truncate_chars: usize,
}

impl LmSettings {
    /// Whether the language-model stage may be invoked.
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 500,
            temperature: 0.0,
            timeout: Duration::from_secs(15),
            retry_delays: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(90),
            ],
            content_truncate_chars: 4000,
        }
    }
}

/// Knobs for the token broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    /// Refresh the bearer when expiry is within this window.
    #[serde(with = "duration_millis")]
    pub refresh_buffer: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(300),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
