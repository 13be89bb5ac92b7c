//! Title and name generation.
//!
//! Two small utility endpoints: one names a persisted conversation record
//! from its message list, the other suggests a display name for an
//! assistant from its draft instructions. Both are background concerns;
//! callers treat failures as non-fatal.

use crate::gateway::GatewayError;
use crate::http_gateway::HttpCompletionGateway;
use murmur_core::conversation::ApiMessage;
use serde::{Deserialize, Serialize};

const TITLE_ROUTE: &str = "/api/title";
const NAME_ROUTE: &str = "/api/name";

/// The seam for background naming calls.
#[async_trait::async_trait]
pub trait NamingGateway: Send + Sync {
    /// Generates a display title for a conversation snapshot.
    async fn generate_title(
        &self,
        messages: &[ApiMessage],
        memory_id: &str,
    ) -> Result<String, GatewayError>;

    /// Suggests a display name for an assistant from its instructions.
    async fn generate_name(&self, instructions: &str) -> Result<String, GatewayError>;
}

#[derive(Serialize)]
struct TitleRequest<'a> {
    messages: &'a [ApiMessage],
    #[serde(rename = "memoryId")]
    memory_id: &'a str,
}

#[derive(Deserialize)]
struct TitleResponse {
    title: String,
}

#[derive(Serialize)]
struct NameRequest<'a> {
    instructions: &'a str,
}

#[derive(Deserialize)]
struct NameResponse {
    name: String,
}

#[async_trait::async_trait]
impl NamingGateway for HttpCompletionGateway {
    async fn generate_title(
        &self,
        messages: &[ApiMessage],
        memory_id: &str,
    ) -> Result<String, GatewayError> {
        let response = self
            .post_json(
                TITLE_ROUTE,
                &TitleRequest {
                    messages,
                    memory_id,
                },
            )
            .await?;
        let parsed: TitleResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Parse(err.to_string()))?;
        Ok(parsed.title)
    }

    async fn generate_name(&self, instructions: &str) -> Result<String, GatewayError> {
        let response = self
            .post_json(NAME_ROUTE, &NameRequest { instructions })
            .await?;
        let parsed: NameResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Parse(err.to_string()))?;
        Ok(parsed.name)
    }
}
