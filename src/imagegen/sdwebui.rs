use super::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Provider for a local Stable Diffusion WebUI instance (txt2img API)
pub struct SdWebUiProvider {
    base_url: String,
    client: reqwest::Client,
}

impl SdWebUiProvider {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self { base_url, client }
    }
}

#[derive(Debug, Serialize)]
struct Txt2ImgRequest {
    prompt: String,
    steps: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    /// Base64-encoded PNGs
    images: Vec<String>,
}

#[async_trait]
impl ImageProvider for SdWebUiProvider {
    async fn generate(&self, request: GenerateRequest) -> ImageGenResult<GeneratedImage> {
        let start = Instant::now();
        let (width, height) = request.size.dimensions();

        let body = Txt2ImgRequest {
            prompt: request.prompt,
            steps: 20,
            width,
            height,
        };

        let url = format!("{}/sdapi/v1/txt2img", self.base_url.trim_end_matches('/'));

        let response = tokio::time::timeout(
            request.timeout,
            self.client.post(&url).json(&body).send(),
        )
        .await
        .map_err(|_| ImageGenError::Timeout(request.timeout))?
        .map_err(|e| ImageGenError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ImageGenError::ApiError(format!(
                "txt2img returned status {}",
                response.status()
            )));
        }

        let parsed: Txt2ImgResponse = response
            .json()
            .await
            .map_err(|e| ImageGenError::ParseError(e.to_string()))?;

        let b64 = parsed
            .images
            .into_iter()
            .next()
            .ok_or_else(|| ImageGenError::ParseError("No image in response".to_string()))?;

        // Validate the payload actually decodes before handing it out
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        STANDARD
            .decode(&b64)
            .map_err(|e| ImageGenError::ParseError(format!("Invalid base64 payload: {}", e)))?;

        Ok(GeneratedImage {
            url: format!("data:image/png;base64,{}", b64),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        "sdwebui"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run against a local SD WebUI instance
    async fn test_sdwebui_generate() {
        let base_url =
            std::env::var("SDWEBUI_BASE_URL").unwrap_or_else(|_| "http://localhost:7860".into());
        let provider = SdWebUiProvider::new(base_url);

        let request = GenerateRequest {
            prompt: "a lighthouse on a cliff at sunset, watercolor".to_string(),
            size: SizeHint::Preview,
            timeout: Duration::from_secs(60),
        };

        let image = provider.generate(request).await.unwrap();
        assert!(image.url.starts_with("data:image/png;base64,"));
    }
}
