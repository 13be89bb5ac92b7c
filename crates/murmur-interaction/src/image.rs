//! Image-generation requests.
//!
//! Two proxy routes exist: a DALL-E-style endpoint with per-model
//! size/quality/style allow-lists, and a Stability-style endpoint taking a
//! multipart form. Every parameter is validated strictly before the
//! request leaves the client; nothing is silently defaulted.

use crate::gateway::GatewayError;
use crate::http_gateway::{HttpCompletionGateway, ensure_success};
use serde::{Deserialize, Serialize};

const DALLE_ROUTE: &str = "/api/image/dalle";
const STABILITY_ROUTE: &str = "/api/image/stability";

const DALLE2_SIZES: [&str; 3] = ["256x256", "512x512", "1024x1024"];
const DALLE3_SIZES: [&str; 3] = ["1024x1024", "1792x1024", "1024x1792"];
const DALLE3_QUALITIES: [&str; 2] = ["standard", "hd"];
const DALLE3_STYLES: [&str; 2] = ["vivid", "natural"];

/// The DALL-E model generations the proxy accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DalleModel {
    #[serde(rename = "dall-e-2")]
    Dalle2,
    #[serde(rename = "dall-e-3")]
    Dalle3,
}

/// A DALL-E-style generation request.
#[derive(Debug, Clone, Serialize)]
pub struct DalleImageRequest {
    pub prompt: String,
    pub model: DalleModel,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl DalleImageRequest {
    /// Validates every parameter against the per-model allow-lists.
    ///
    /// Quality and style only exist for `dall-e-3`; supplying them for
    /// `dall-e-2` is rejected like any other invalid value.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.prompt.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }

        let sizes: &[&str] = match self.model {
            DalleModel::Dalle2 => &DALLE2_SIZES,
            DalleModel::Dalle3 => &DALLE3_SIZES,
        };
        if !sizes.contains(&self.size.as_str()) {
            return Err(GatewayError::InvalidRequest(format!(
                "size '{}' is not supported by this model",
                self.size
            )));
        }

        if let Some(quality) = &self.quality {
            if self.model != DalleModel::Dalle3
                || !DALLE3_QUALITIES.contains(&quality.as_str())
            {
                return Err(GatewayError::InvalidRequest(format!(
                    "quality '{quality}' is not supported by this model"
                )));
            }
        }
        if let Some(style) = &self.style {
            if self.model != DalleModel::Dalle3 || !DALLE3_STYLES.contains(&style.as_str()) {
                return Err(GatewayError::InvalidRequest(format!(
                    "style '{style}' is not supported by this model"
                )));
            }
        }

        Ok(())
    }
}

/// A generated image as returned by either route.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    /// Base64-encoded image bytes.
    pub image_base64: String,
    /// The prompt as rewritten by the provider, when reported.
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

impl HttpCompletionGateway {
    /// Generates an image through the DALL-E-style route.
    pub async fn generate_image_dalle(
        &self,
        request: &DalleImageRequest,
    ) -> Result<GeneratedImage, GatewayError> {
        request.validate()?;
        let response = self.post_json(DALLE_ROUTE, request).await?;
        response
            .json()
            .await
            .map_err(|err| GatewayError::Parse(err.to_string()))
    }

    /// Generates an image through the Stability-style route.
    ///
    /// The endpoint takes a multipart form with a fixed output format and
    /// aspect ratio.
    pub async fn generate_image_stability(
        &self,
        prompt: &str,
    ) -> Result<GeneratedImage, GatewayError> {
        if prompt.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }

        let form = reqwest::multipart::Form::new()
            .text("prompt", prompt.to_string())
            .text("output_format", "jpeg")
            .text("aspect_ratio", "1:1");

        let response = self
            .client()
            .post(self.route_url(STABILITY_ROUTE))
            .multipart(form)
            .send()
            .await
            .map_err(|err| GatewayError::Request {
                message: format!("request to {STABILITY_ROUTE} failed: {err}"),
                is_retryable: err.is_connect() || err.is_timeout(),
            })?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|err| GatewayError::Parse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: DalleModel, size: &str) -> DalleImageRequest {
        DalleImageRequest {
            prompt: "a lighthouse at dusk".to_string(),
            model,
            size: size.to_string(),
            quality: None,
            style: None,
        }
    }

    #[test]
    fn valid_sizes_pass_per_model() {
        assert!(request(DalleModel::Dalle2, "512x512").validate().is_ok());
        assert!(request(DalleModel::Dalle3, "1792x1024").validate().is_ok());
    }

    #[test]
    fn invalid_size_is_rejected_not_defaulted() {
        assert!(request(DalleModel::Dalle2, "1792x1024").validate().is_err());
        assert!(request(DalleModel::Dalle3, "640x480").validate().is_err());
    }

    #[test]
    fn quality_and_style_are_dalle3_only() {
        let mut req = request(DalleModel::Dalle3, "1024x1024");
        req.quality = Some("hd".to_string());
        req.style = Some("natural".to_string());
        assert!(req.validate().is_ok());

        let mut req = request(DalleModel::Dalle2, "1024x1024");
        req.quality = Some("hd".to_string());
        assert!(req.validate().is_err());

        let mut req = request(DalleModel::Dalle3, "1024x1024");
        req.style = Some("dramatic".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_prompt_is_rejected() {
        assert!(request(DalleModel::Dalle3, "1024x1024")
            .validate()
            .is_ok());
        let mut req = request(DalleModel::Dalle3, "1024x1024");
        req.prompt = "   ".to_string();
        assert!(req.validate().is_err());
    }
}
