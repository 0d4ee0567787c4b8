//! Configuration surface (spec §6).
//!
//! Loaded from an optional TOML file (parsed with `toml_span` via
//! `toml_utils`, the same bridge-through-`JsonValue` idiom the teacher uses
//! for its own TOML inputs) and overlaid with environment variables loaded
//! from `.env` by `dotenvy`, exactly as the teacher's `main.rs` does before
//! parsing CLI options.

use std::collections::BTreeSet;

use crate::{
    prelude::*,
    toml_utils::{JsonValue, from_toml_str},
};

/// Wizard activation mode (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WizardMode {
    Off,
    Auto,
    #[default]
    Always,
}

/// The injected configuration value object. Every field here corresponds to
/// a row in spec §6's configuration table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub model: String,
    pub fallback_model: Option<String>,
    pub timeout_ms: u64,
    pub temperature: f32,
    pub health_check_timeout_ms: u64,
    pub max_questions: usize,
    pub max_assumptions: usize,
    pub enable_auto_repair: bool,
    pub min_confidence: f64,
    pub banned_snippets: Vec<String>,
    pub meta_line_starters: Vec<String>,
    pub preset: crate::model::Preset,
    pub wizard_mode: WizardMode,
    pub wizard_max_turns: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".to_owned(),
            fallback_model: None,
            timeout_ms: 30_000,
            temperature: 0.0,
            health_check_timeout_ms: 5_000,
            max_questions: 3,
            max_assumptions: 5,
            enable_auto_repair: true,
            min_confidence: 0.5,
            banned_snippets: Vec::new(),
            meta_line_starters: Vec::new(),
            preset: crate::model::Preset::Default,
            wizard_mode: WizardMode::Auto,
            wizard_max_turns: 3,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// environment variable overrides. Missing file is not an error — we
    /// fall back to defaults, the same way the teacher treats a missing
    /// `.env` file as a no-op (`dotenvy::dotenv().ok()`).
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) if path.exists() => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read config file {:?}", path))?;
                let raw: JsonValue = from_toml_str(&text).map_err(|err| {
                    anyhow!("failed to parse config file {:?}: {}", path, err)
                })?;
                serde_json::from_value(raw.into_json())
                    .with_context(|| format!("invalid config file {:?}", path))?
            }
            _ => Config::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay environment variables onto an already-loaded config. Only
    /// variables that are actually set are applied; everything else keeps
    /// its file/default value.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROMPT_IMPROVE_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("PROMPT_IMPROVE_MODEL") {
            self.model = v;
        }
        if let Ok(v) = std::env::var("PROMPT_IMPROVE_FALLBACK_MODEL") {
            self.fallback_model = Some(v);
        }
        if let Ok(v) = std::env::var("PROMPT_IMPROVE_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                self.timeout_ms = parsed;
            }
        }
    }

    /// The full set of banned phrases: the closed set from spec §6, unioned
    /// with configured extensions. The closed set is always checked first
    /// (Open Question resolution, see `DESIGN.md`): extensions can only add
    /// entries, never remove or override the built-in set.
    pub fn all_banned_phrases(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = crate::quality::BANNED_PHRASES
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        set.extend(self.banned_snippets.iter().map(|s| s.to_lowercase()));
        set
    }

    /// The full set of meta-line starters: closed set unioned with
    /// configured extensions, same policy as `all_banned_phrases`.
    pub fn all_meta_line_starters(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = crate::quality::META_LINE_STARTERS
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        set.extend(self.meta_line_starters.iter().map(|s| s.to_lowercase()));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.max_questions, 3);
        assert_eq!(config.max_assumptions, 5);
        assert_eq!(config.temperature, 0.0);
        assert!(config.enable_auto_repair);
    }

    #[test]
    fn test_banned_phrases_union_is_a_superset() {
        let mut config = Config::default();
        config.banned_snippets = vec!["extra phrase".to_owned()];
        let all = config.all_banned_phrases();
        assert!(all.contains("extra phrase"));
        assert!(all.contains("as an ai"));
    }
}
