use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Carry weight of the shared exponential-moving-average rule. Every
/// aggregator in the system blends `0.7 * old + 0.3 * new`; the constant is
/// hand-tuned and deliberately identical everywhere.
pub const EMA_CARRY: f64 = 0.7;

/// Engine tier requested by the caller. `Fast` is the free tier and strips
/// the deeper fields from the emotion-state prompt block; `Deep` unlocks the
/// premium toolkit instruction for premium users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineTier {
    Fast,
    Balanced,
    Deep,
}

impl EngineTier {
    /// Whether this tier carries the extended emotion-state fields
    /// (recent events, loop tag, anchors, reason label).
    pub fn includes_deep_fields(self) -> bool {
        !matches!(self, EngineTier::Fast)
    }
}

/// Conversation language. Dialect refinement (e.g. Gulf vs. Levantine
/// Arabic) travels separately as a free-form hint string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    Arabic,
}

impl Language {
    pub fn from_tag(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ar" | "arabic" => Language::Arabic,
            _ => Language::English,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    // Classifier tuning
    #[serde(default = "default_heuristic_max_chars")]
    pub heuristic_max_chars: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_history_turn_max_chars")]
    pub history_turn_max_chars: usize,
    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,
    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,

    // Trigger mining / profile window. Hand-tuned in the source product;
    // kept as-is rather than re-derived.
    #[serde(default = "default_trigger_window_days")]
    pub trigger_window_days: i64,
    #[serde(default = "default_trigger_window_messages")]
    pub trigger_window_messages: usize,

    // Optional persona overlay file (TOML table of persona definitions)
    #[serde(default)]
    pub persona_overlay_path: Option<PathBuf>,
}

fn default_llm_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("rafiq_emotion.db")
}

fn default_heuristic_max_chars() -> usize {
    80
}

fn default_history_turns() -> usize {
    6
}

fn default_history_turn_max_chars() -> usize {
    200
}

fn default_classify_timeout_secs() -> u64 {
    12
}

fn default_generate_timeout_secs() -> u64 {
    60
}

fn default_trigger_window_days() -> i64 {
    30
}

fn default_trigger_window_messages() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            database_path: default_database_path(),
            heuristic_max_chars: default_heuristic_max_chars(),
            history_turns: default_history_turns(),
            history_turn_max_chars: default_history_turn_max_chars(),
            classify_timeout_secs: default_classify_timeout_secs(),
            generate_timeout_secs: default_generate_timeout_secs(),
            trigger_window_days: default_trigger_window_days(),
            trigger_window_messages: default_trigger_window_messages(),
            persona_overlay_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `RAFIQ_CONFIG` (or `rafiq.toml` in the working
    /// directory), falling back to defaults when no file is present.
    pub fn load() -> Self {
        let path = env::var("RAFIQ_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("rafiq.toml"));

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Config load failed ({}), using defaults: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_hand_tuned_window_sizes() {
        let config = EngineConfig::default();
        assert_eq!(config.trigger_window_days, 30);
        assert_eq!(config.trigger_window_messages, 200);
        assert_eq!(config.heuristic_max_chars, 80);
        assert!((EMA_CARRY - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_fills_missing_fields_with_defaults() {
        let config: EngineConfig =
            toml::from_str("llm_model = \"test-model\"\ntrigger_window_days = 14\n").unwrap();
        assert_eq!(config.llm_model, "test-model");
        assert_eq!(config.trigger_window_days, 14);
        assert_eq!(config.history_turns, 6);
    }

    #[test]
    fn fast_tier_strips_deep_fields() {
        assert!(!EngineTier::Fast.includes_deep_fields());
        assert!(EngineTier::Balanced.includes_deep_fields());
        assert!(EngineTier::Deep.includes_deep_fields());
    }

    #[test]
    fn language_tag_parsing() {
        assert_eq!(Language::from_tag("ar"), Language::Arabic);
        assert_eq!(Language::from_tag("Arabic"), Language::Arabic);
        assert_eq!(Language::from_tag("en"), Language::English);
        assert_eq!(Language::from_tag(""), Language::English);
    }
}
