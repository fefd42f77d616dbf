use serde::Serialize;

/// Upstream model selectable in settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub recommended: bool,
}

const fn model(id: &'static str, name: &'static str, provider: &'static str) -> ModelInfo {
    ModelInfo {
        id,
        name,
        provider,
        recommended: false,
    }
}

pub const AVAILABLE_MODELS: &[ModelInfo] = &[
    ModelInfo {
        recommended: true,
        ..model("anthropic.claude-4.5-sonnet", "Claude 4.5 Sonnet", "Anthropic")
    },
    model("anthropic.claude-4-sonnet", "Claude 4 Sonnet", "Anthropic"),
    model("anthropic.claude-4-opus", "Claude 4 Opus", "Anthropic"),
    model(
        "anthropic.claude-3-5-sonnet-20241022-v2:0",
        "Claude 3.5 Sonnet V2",
        "Anthropic",
    ),
    model("anthropic.claude-3.5-sonnet", "Claude 3.5 Sonnet", "Anthropic"),
    model(
        "anthropic.claude-3-5-haiku-20241022-v1:0",
        "Claude 3.5 Haiku",
        "Anthropic",
    ),
    model("anthropic.claude-3-haiku", "Claude 3 Haiku", "Anthropic"),
    model("openai.gpt-4o", "GPT-4o", "OpenAI"),
    model("openai.gpt-4o-mini", "GPT-4o Mini", "OpenAI"),
    model("google.gemini-2.5-pro", "Gemini 2.5 Pro", "Google"),
    model("google.gemini-2.5-flash", "Gemini 2.5 Flash", "Google"),
    model("amazon.nova-pro-v1:0", "Amazon Nova Pro", "Amazon"),
    model("amazon.nova-lite-v1:0", "Amazon Nova Lite", "Amazon"),
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    AVAILABLE_MODELS.iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DEFAULT_MODEL;

    #[test]
    fn default_model_is_listed() {
        assert!(find_model(DEFAULT_MODEL).is_some());
    }

    #[test]
    fn exactly_one_recommended() {
        let recommended: Vec<_> = AVAILABLE_MODELS.iter().filter(|m| m.recommended).collect();
        assert_eq!(recommended.len(), 1);
        assert_eq!(recommended[0].id, "anthropic.claude-4.5-sonnet");
    }
}
