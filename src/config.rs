//! Application-level configuration loading: match policy, credit grants and the seed catalog.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::models::MatchPolicy;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LYRIC_DUEL_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    policy: MatchPolicy,
    credits: CreditsConfig,
    seed_prompts: Vec<SeedPrompt>,
}

/// Credit amounts granted outside of matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditsConfig {
    /// Balance of a freshly opened account.
    pub starting_balance: u64,
    /// Amount granted by a free credits claim.
    pub free_amount: u64,
    /// Minimum delay between two free credits claims.
    pub free_interval: Duration,
}

/// Catalog entry inserted at startup when the catalog is empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedPrompt {
    /// Song title.
    pub title: String,
    /// Song artist.
    pub artist: String,
    /// Lyrics excerpt with the missing part blanked out.
    pub lyrics_snippet: String,
    /// Accepted answer.
    pub answer: String,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        prompts = app_config.seed_prompts.len(),
                        rake_percent = app_config.policy.rake_percent,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent sections keep their defaults.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        raw.try_into()
    }

    /// Policy snapshot frozen onto every new match.
    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Credit grant settings.
    pub fn credits(&self) -> CreditsConfig {
        self.credits
    }

    /// Catalog used to seed an empty prompt store.
    pub fn seed_prompts(&self) -> &[SeedPrompt] {
        &self.seed_prompts
    }

    /// Build a configuration from explicit values.
    pub fn new(policy: MatchPolicy, credits: CreditsConfig, seed_prompts: Vec<SeedPrompt>) -> Self {
        Self {
            policy,
            credits,
            seed_prompts,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::default(),
            credits: CreditsConfig::default(),
            seed_prompts: default_prompts(),
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            duration_ms: 30_000,
            rake_percent: 10,
            min_stake: 50,
            max_stake: 10_000,
            waiting_expiry_ms: 10 * 60 * 1_000,
            refund_on_no_winner: false,
        }
    }
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            starting_balance: 250,
            free_amount: 250,
            free_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Error raised when the configuration file is well-formed JSON but describes an unusable policy.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file is not valid JSON for the expected layout.
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is outside its accepted range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    policy: RawPolicy,
    credits: RawCredits,
    prompts: Option<Vec<SeedPrompt>>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the match policy section.
struct RawPolicy {
    duration_seconds: u64,
    rake_percent: u8,
    min_stake: u64,
    max_stake: u64,
    waiting_expiry_seconds: u64,
    refund_on_no_winner: bool,
}

impl Default for RawPolicy {
    fn default() -> Self {
        let policy = MatchPolicy::default();
        Self {
            duration_seconds: policy.duration_ms / 1_000,
            rake_percent: policy.rake_percent,
            min_stake: policy.min_stake,
            max_stake: policy.max_stake,
            waiting_expiry_seconds: policy.waiting_expiry_ms / 1_000,
            refund_on_no_winner: policy.refund_on_no_winner,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the credits section.
struct RawCredits {
    starting_balance: u64,
    free_amount: u64,
    free_interval_hours: u64,
}

impl Default for RawCredits {
    fn default() -> Self {
        let credits = CreditsConfig::default();
        Self {
            starting_balance: credits.starting_balance,
            free_amount: credits.free_amount,
            free_interval_hours: credits.free_interval.as_secs() / 3_600,
        }
    }
}

/// Largest stake whose pot still fits a signed 64-bit balance.
const MAX_STAKE_LIMIT: u64 = i64::MAX as u64 / 2;

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        let policy = value.policy;
        if policy.rake_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "rake_percent must be at most 100, got {}",
                policy.rake_percent
            )));
        }
        if policy.min_stake == 0 || policy.min_stake > policy.max_stake {
            return Err(ConfigError::Invalid(format!(
                "stake bounds [{}, {}] are empty",
                policy.min_stake, policy.max_stake
            )));
        }
        if policy.max_stake > MAX_STAKE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_stake must be at most {MAX_STAKE_LIMIT}, got {}",
                policy.max_stake
            )));
        }
        if policy.duration_seconds == 0 {
            return Err(ConfigError::Invalid("duration_seconds must be positive".into()));
        }

        Ok(Self {
            policy: MatchPolicy {
                duration_ms: policy.duration_seconds.saturating_mul(1_000),
                rake_percent: policy.rake_percent,
                min_stake: policy.min_stake,
                max_stake: policy.max_stake,
                waiting_expiry_ms: policy.waiting_expiry_seconds.saturating_mul(1_000),
                refund_on_no_winner: policy.refund_on_no_winner,
            },
            credits: CreditsConfig {
                starting_balance: value.credits.starting_balance,
                free_amount: value.credits.free_amount,
                free_interval: Duration::from_secs(
                    value.credits.free_interval_hours.saturating_mul(3_600),
                ),
            },
            seed_prompts: value.prompts.unwrap_or_else(default_prompts),
        })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in catalog shipped with the binary (traditional songs).
fn default_prompts() -> Vec<SeedPrompt> {
    [
        (
            "You Are My Sunshine",
            "Jimmie Davis",
            "You are my ____, my only ____",
            "sunshine",
        ),
        (
            "Twinkle, Twinkle, Little Star",
            "Traditional",
            "Twinkle, twinkle, little star, how I wonder what you ____",
            "are",
        ),
        (
            "Amazing Grace",
            "John Newton",
            "Amazing grace, how sweet the ____",
            "sound",
        ),
        (
            "Row, Row, Row Your Boat",
            "Traditional",
            "Merrily, merrily, merrily, merrily, life is but a ____",
            "dream",
        ),
        (
            "Home on the Range",
            "Brewster M. Higley",
            "Oh, give me a home where the buffalo ____",
            "roam",
        ),
        (
            "Auld Lang Syne",
            "Robert Burns",
            "Should auld acquaintance be forgot, and never brought to ____",
            "mind",
        ),
    ]
    .into_iter()
    .map(|(title, artist, lyrics_snippet, answer)| SeedPrompt {
        title: title.into(),
        artist: artist.into(),
        lyrics_snippet: lyrics_snippet.into(),
        answer: answer.into(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_keeps_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.policy(), MatchPolicy::default());
        assert_eq!(config.credits(), CreditsConfig::default());
        assert!(!config.seed_prompts().is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::parse(
            r#"{
                "policy": { "duration_seconds": 20, "rake_percent": 5, "refund_on_no_winner": true },
                "credits": { "free_interval_hours": 12 },
                "prompts": [
                    { "title": "T", "artist": "A", "lyrics_snippet": "S ____", "answer": "x" }
                ]
            }"#,
        )
        .unwrap();

        let policy = config.policy();
        assert_eq!(policy.duration_ms, 20_000);
        assert_eq!(policy.rake_percent, 5);
        assert!(policy.refund_on_no_winner);
        assert_eq!(policy.min_stake, 50);
        assert_eq!(config.credits().free_interval, Duration::from_secs(12 * 3_600));
        assert_eq!(config.seed_prompts().len(), 1);
    }

    #[test]
    fn rake_above_hundred_is_rejected() {
        let err = AppConfig::parse(r#"{ "policy": { "rake_percent": 101 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn stakes_whose_pot_overflows_a_balance_are_rejected() {
        let err = AppConfig::parse(&format!(
            r#"{{ "policy": {{ "max_stake": {} }} }}"#,
            MAX_STAKE_LIMIT + 1
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config =
            AppConfig::parse(&format!(r#"{{ "policy": {{ "max_stake": {MAX_STAKE_LIMIT} }} }}"#))
                .unwrap();
        assert_eq!(config.policy().max_stake, MAX_STAKE_LIMIT);
    }

    #[test]
    fn inverted_stake_bounds_are_rejected() {
        let err =
            AppConfig::parse(r#"{ "policy": { "min_stake": 500, "max_stake": 100 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
