//! Provider-family routing.
//!
//! The resolved model ID decides which proxy endpoint handles the
//! request. Gemini model IDs route to the Gemini-style function (single
//! JSON reply, system entry extracted server-side); everything else goes
//! to the OpenAI-style function, which streams.

use serde::{Deserialize, Serialize};

/// Model applied when neither the test configuration nor the assistant
/// profile names one.
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";

/// The provider families the proxy fronts for text completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// OpenAI-style chat completions; supports SSE streaming.
    OpenAi,
    /// Gemini-style generation; single-shot JSON.
    Gemini,
}

impl ProviderFamily {
    /// Classifies a model ID.
    pub fn from_model(model: &str) -> Self {
        if model.trim().to_ascii_lowercase().starts_with("gemini") {
            ProviderFamily::Gemini
        } else {
            ProviderFamily::OpenAi
        }
    }

    /// The proxy route serving this family's text completions.
    pub fn completion_route(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "/api/openai",
            ProviderFamily::Gemini => "/api/gemini",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_models_route_to_gemini() {
        assert_eq!(
            ProviderFamily::from_model("gemini-2.5-flash"),
            ProviderFamily::Gemini
        );
        assert_eq!(
            ProviderFamily::from_model("  Gemini-Pro "),
            ProviderFamily::Gemini
        );
    }

    #[test]
    fn everything_else_routes_to_openai() {
        assert_eq!(
            ProviderFamily::from_model("gpt-4o-mini"),
            ProviderFamily::OpenAi
        );
        assert_eq!(ProviderFamily::from_model("o3"), ProviderFamily::OpenAi);
    }
}
