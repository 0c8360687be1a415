use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapwrightError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),

    #[error("Target resolution error: {0}")]
    Resolution(String),

    #[error("Confidence below minimum: {0}")]
    Confidence(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Gesture error: {0}")]
    Gesture(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Device transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl serde::Serialize for TapwrightError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type TapwrightResult<T> = Result<T, TapwrightError>;
