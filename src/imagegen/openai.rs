use super::*;
use async_openai::{
    config::OpenAIConfig,
    types::{CreateImageRequestArgs, ImageResponseFormat, ImageSize},
    Client,
};
use std::time::Instant;

/// OpenAI images provider
pub struct OpenAiImageProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiImageProvider {
    pub fn new(api_key: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self { client }
    }

    fn map_size(size: SizeHint) -> ImageSize {
        match size {
            SizeHint::Preview => ImageSize::S256x256,
            SizeHint::Full => ImageSize::S512x512,
        }
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    async fn generate(&self, request: GenerateRequest) -> ImageGenResult<GeneratedImage> {
        let start = Instant::now();

        let image_request = CreateImageRequestArgs::default()
            .prompt(request.prompt.clone())
            .n(1)
            .size(Self::map_size(request.size))
            .response_format(ImageResponseFormat::Url)
            .build()
            .map_err(|e| ImageGenError::ApiError(e.to_string()))?;

        // Execute with the caller-imposed timeout
        let response = tokio::time::timeout(
            request.timeout,
            self.client.images().create(image_request),
        )
        .await
        .map_err(|_| ImageGenError::Timeout(request.timeout))?
        .map_err(|e| ImageGenError::ApiError(e.to_string()))?;

        let image = response
            .data
            .first()
            .ok_or_else(|| ImageGenError::ParseError("No image in response".to_string()))?;

        let url = match image.as_ref() {
            async_openai::types::Image::Url { url, .. } => url.clone(),
            async_openai::types::Image::B64Json { b64_json, .. } => {
                format!("data:image/png;base64,{}", b64_json)
            }
        };

        Ok(GeneratedImage {
            url,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    #[ignore] // Only run with actual API key
    async fn test_openai_generate() {
        let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let provider = OpenAiImageProvider::new(api_key);

        let request = GenerateRequest {
            prompt: "a lighthouse on a cliff at sunset, watercolor".to_string(),
            size: SizeHint::Preview,
            timeout: Duration::from_secs(30),
        };

        let image = provider.generate(request).await.unwrap();

        assert!(!image.url.is_empty());
        println!("Generated image: {}", image.url);
    }
}
