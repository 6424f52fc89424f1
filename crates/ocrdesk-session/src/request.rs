//! Generation request construction

use base64::{engine::general_purpose::STANDARD, Engine};
use ocrdesk_stream::RepetitionConfig;
use serde::{Deserialize, Serialize};

use crate::error::OcrError;
use crate::Result;

pub const DEFAULT_MODEL: &str = "deepseek-ocr:3b";

const DEFAULT_SYSTEM_PROMPT: &str = "画像内のテキストを読み取り、読み順どおりに抽出してください。
見出し・太字・箇条書きなどは可能な限りMarkdownで再現してください。
ページ番号やフッターは無視してください。";

const DEFAULT_PROMPT: &str = "画像の内容を書き起こしてください。";

/// Generation settings applied to every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Used when a request does not name a model
    pub default_model: String,
    pub system_prompt: String,
    pub prompt: String,
    pub temperature: f32,
    pub repeat_penalty: f32,
    pub repetition: RepetitionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            temperature: 0.0,
            repeat_penalty: 1.2,
            repetition: RepetitionConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn build_request(&self, request: &OcrRequest) -> GenerateRequest {
        let model = request
            .model()
            .unwrap_or(self.default_model.as_str())
            .to_string();

        GenerateRequest {
            model,
            system: self.system_prompt.clone(),
            prompt: self.prompt.clone(),
            images: vec![request.image_base64.clone()],
            stream: true,
            options: GenerateOptions {
                temperature: self.temperature,
                repeat_penalty: self.repeat_penalty,
            },
        }
    }
}

/// One image to transcribe
#[derive(Debug, Clone)]
pub struct OcrRequest {
    image_base64: String,
    model: String,
}

impl OcrRequest {
    /// Accepts plain base64 or a `data:<mime>;base64,` URL
    pub fn new(image: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let image = image.into();
        let encoded = match image.strip_prefix("data:") {
            Some(data_url) => data_url
                .split_once(',')
                .map(|(_, payload)| payload)
                .ok_or_else(|| OcrError::InvalidRequest("malformed data URL".to_string()))?,
            None => image.as_str(),
        }
        .trim();

        if encoded.is_empty() {
            return Err(OcrError::InvalidRequest("image is empty".to_string()));
        }

        if STANDARD.decode(encoded).is_err() {
            return Err(OcrError::InvalidRequest(
                "image is not valid base64".to_string(),
            ));
        }

        Ok(Self {
            image_base64: encoded.to_string(),
            model: model.into().trim().to_string(),
        })
    }

    /// Requested model, `None` when the default should be used
    pub fn model(&self) -> Option<&str> {
        Some(self.model.as_str()).filter(|m| !m.is_empty())
    }
}

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub images: Vec<String>,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub repeat_penalty: f32,
}
