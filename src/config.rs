use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{TapwrightError, TapwrightResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Which LLM adapter to bind ("openai" or "anthropic").
    #[serde(default = "default_provider")]
    pub llm_provider: String,
    /// Vendor model id. Falls back to the provider default when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    /// Legacy coarse toggle; `vision.enabled` takes precedence when set.
    #[serde(default = "default_true")]
    pub enable_vision_fallback: bool,
    #[serde(default)]
    pub vision: VisionConfig,
    /// Per-step before/after screenshot persistence lands here when set.
    /// The TAPWRIGHT_ARTIFACTS_DIR environment variable overrides it.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm_provider: default_provider(),
            model: None,
            verbose: false,
            enable_vision_fallback: true,
            vision: VisionConfig::default(),
            artifacts_dir: None,
            temperature: default_temperature(),
            llm_timeout_secs: default_llm_timeout(),
        }
    }
}

impl AgentConfig {
    /// Master vision-fallback toggle: `vision.enabled` wins over the legacy
    /// `enable_vision_fallback` flag when explicitly set.
    pub fn vision_enabled(&self) -> bool {
        self.vision.enabled.unwrap_or(self.enable_vision_fallback)
    }

    pub fn artifacts_dir(&self) -> Option<PathBuf> {
        std::env::var("TAPWRIGHT_ARTIFACTS_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.artifacts_dir.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// None inherits `enable_vision_fallback`.
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default = "default_true")]
    pub fallback_on_element_not_found: bool,
    #[serde(default = "default_true")]
    pub fallback_on_low_confidence: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// NxN grid overlay resolution, clamped to 5..=20.
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    #[serde(default)]
    pub always_use_vision: bool,
    /// Skip tiers 1-3 entirely.
    #[serde(default)]
    pub pure_vision_only: bool,
    #[serde(default)]
    pub pure_vision: PureVisionConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            fallback_on_element_not_found: true,
            fallback_on_low_confidence: true,
            confidence_threshold: default_confidence_threshold(),
            grid_size: default_grid_size(),
            always_use_vision: false,
            pure_vision_only: false,
            pure_vision: PureVisionConfig::default(),
        }
    }
}

impl VisionConfig {
    pub fn effective_grid_size(&self) -> u32 {
        self.grid_size.clamp(5, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PureVisionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_minimum_confidence")]
    pub minimum_confidence: f64,
}

impl Default for PureVisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_confidence: default_minimum_confidence(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_grid_size() -> u32 {
    10
}

fn default_minimum_confidence() -> f64 {
    0.5
}

fn default_temperature() -> f64 {
    0.7
}

fn default_llm_timeout() -> u64 {
    120
}

/// Returns the path to an *existing* config.toml for reading.
fn find_config_path() -> TapwrightResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }
    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }
    Err(TapwrightError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

/// Load config.toml, falling back to defaults when the file is absent.
pub fn load_config() -> TapwrightResult<AgentConfig> {
    let path = match find_config_path() {
        Ok(p) => p,
        Err(_) => {
            tracing::info!("no config.toml found, using defaults");
            return Ok(AgentConfig::default());
        }
    };
    let content = std::fs::read_to_string(&path)?;
    let config: AgentConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm_provider, "config loaded");
    Ok(config)
}

/// API key lookup: environment variable `TAPWRIGHT_<PROVIDER>_API_KEY`,
/// falling back to the vendor-conventional variable.
pub fn api_key_for(provider: &str) -> TapwrightResult<String> {
    let scoped = format!("TAPWRIGHT_{}_API_KEY", provider.to_uppercase());
    if let Ok(key) = std::env::var(&scoped) {
        return Ok(key);
    }
    let conventional = match provider {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        _ => {
            return Err(TapwrightError::Config(format!(
                "unknown LLM provider '{provider}'"
            )))
        }
    };
    std::env::var(conventional).map_err(|_| {
        TapwrightError::Config(format!("{scoped} or {conventional} must be set"))
    })
}
