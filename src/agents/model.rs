//! The closed set of selectable models.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Provider family a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
    /// OpenAI-compatible local runtime (Ollama).
    Local,
    /// In-process echo agent, no network.
    Dummy,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::DeepSeek => "deepseek",
            Self::Local => "local",
            Self::Dummy => "dummy",
        }
    }

    /// Whether the provider accepts image content parts.
    pub fn accepts_images(&self) -> bool {
        !matches!(self, Self::DeepSeek | Self::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every model the application can talk to.
///
/// The discriminant doubles as the index into `AgentRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Model {
    Gpt4oMini,
    Gpt4o,
    O1,
    O3,
    O4Mini,
    Gpt41,
    Gpt41Mini,
    Gpt41Nano,
    Claude35Haiku,
    Claude37Sonnet,
    Gemini15Pro,
    Gemini20Flash,
    Gemini20FlashLite,
    Gemini20ProExp,
    DeepSeekChat,
    DeepSeekReasoner,
    Phi4Mini,
    Dummy,
}

impl Model {
    pub const COUNT: usize = 18;

    pub const ALL: [Model; Self::COUNT] = [
        Model::Gpt4oMini,
        Model::Gpt4o,
        Model::O1,
        Model::O3,
        Model::O4Mini,
        Model::Gpt41,
        Model::Gpt41Mini,
        Model::Gpt41Nano,
        Model::Claude35Haiku,
        Model::Claude37Sonnet,
        Model::Gemini15Pro,
        Model::Gemini20Flash,
        Model::Gemini20FlashLite,
        Model::Gemini20ProExp,
        Model::DeepSeekChat,
        Model::DeepSeekReasoner,
        Model::Phi4Mini,
        Model::Dummy,
    ];

    /// Wire identifier sent to the provider.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Gpt4oMini => "gpt-4o-mini",
            Self::Gpt4o => "gpt-4o",
            Self::O1 => "o1",
            Self::O3 => "o3",
            Self::O4Mini => "o4-mini",
            Self::Gpt41 => "gpt-4.1",
            Self::Gpt41Mini => "gpt-4.1-mini",
            Self::Gpt41Nano => "gpt-4.1-nano",
            Self::Claude35Haiku => "claude-3-5-haiku-latest",
            Self::Claude37Sonnet => "claude-3-7-sonnet-latest",
            Self::Gemini15Pro => "gemini-1.5-pro",
            Self::Gemini20Flash => "gemini-2.0-flash",
            Self::Gemini20FlashLite => "gemini-2.0-flash-lite",
            Self::Gemini20ProExp => "gemini-2.0-pro-exp-02-05",
            Self::DeepSeekChat => "deepseek-chat",
            Self::DeepSeekReasoner => "deepseek-reasoner",
            Self::Phi4Mini => "phi4-mini",
            Self::Dummy => "Dummy",
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Self::Gpt4oMini
            | Self::Gpt4o
            | Self::O1
            | Self::O3
            | Self::O4Mini
            | Self::Gpt41
            | Self::Gpt41Mini
            | Self::Gpt41Nano => Provider::OpenAi,
            Self::Claude35Haiku | Self::Claude37Sonnet => Provider::Anthropic,
            Self::Gemini15Pro | Self::Gemini20Flash | Self::Gemini20FlashLite | Self::Gemini20ProExp => {
                Provider::Gemini
            }
            Self::DeepSeekChat | Self::DeepSeekReasoner => Provider::DeepSeek,
            Self::Phi4Mini => Provider::Local,
            Self::Dummy => Provider::Dummy,
        }
    }

    /// Position in `Model::ALL`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Reasoning models reject sampling parameters such as `temperature`.
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::O1 | Self::O3 | Self::O4Mini | Self::DeepSeekReasoner)
    }

    /// Whether the model accepts a `tools` list.
    pub fn supports_tools(&self) -> bool {
        !matches!(self, Self::DeepSeekReasoner | Self::Dummy)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error)]
#[error("unknown model '{0}'")]
pub struct UnknownModel(pub String);

impl FromStr for Model {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(model) = Self::ALL.iter().find(|m| m.id() == trimmed) {
            return Ok(*model);
        }
        match trimmed {
            // Hugging Face name of the local model
            "microsoft/Phi-4-mini-instruct" => Ok(Self::Phi4Mini),
            "dummy" => Ok(Self::Dummy),
            _ => Err(UnknownModel(trimmed.to_string())),
        }
    }
}

impl TryFrom<String> for Model {
    type Error = UnknownModel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_position_in_all() {
        for (i, model) in Model::ALL.iter().enumerate() {
            assert_eq!(model.index(), i, "{model} out of place");
        }
    }

    #[test]
    fn test_from_str_roundtrip() {
        for model in Model::ALL {
            assert_eq!(model.id().parse::<Model>().unwrap(), model);
        }
        assert_eq!("microsoft/Phi-4-mini-instruct".parse::<Model>().unwrap(), Model::Phi4Mini);
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "gpt-9-ultra".parse::<Model>().unwrap_err();
        assert_eq!(err.to_string(), "unknown model 'gpt-9-ultra'");
    }

    #[test]
    fn test_providers() {
        assert_eq!(Model::Gpt41Nano.provider(), Provider::OpenAi);
        assert_eq!(Model::Claude37Sonnet.provider(), Provider::Anthropic);
        assert_eq!(Model::Gemini20ProExp.provider(), Provider::Gemini);
        assert_eq!(Model::DeepSeekReasoner.provider(), Provider::DeepSeek);
        assert_eq!(Model::Phi4Mini.provider(), Provider::Local);
        assert!(!Provider::DeepSeek.accepts_images());
        assert!(Provider::Anthropic.accepts_images());
    }

    #[test]
    fn test_deserialize_from_yaml_string() {
        let model: Model = serde_yaml::from_str("gemini-2.0-flash").unwrap();
        assert_eq!(model, Model::Gemini20Flash);
        assert!(serde_yaml::from_str::<Model>("bard").is_err());
    }
}
