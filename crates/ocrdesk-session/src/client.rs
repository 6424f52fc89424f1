//! Ollama HTTP client

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::OcrError;
use crate::request::GenerateRequest;
use crate::transport::{ByteStream, Transport};
use crate::Result;

/// A model installed on the server, as listed by `/api/tags`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    /// Always ends with `/` so endpoint joins append instead of replacing
    base_url: Url,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| OcrError::InvalidServerUrl(format!("{base_url}: {e}")))?;

        if base.cannot_be_a_base() {
            return Err(OcrError::InvalidServerUrl(base_url.to_string()));
        }

        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| OcrError::InvalidServerUrl(e.to_string()))
    }

    /// Whether the server answers on `/api/tags`
    pub async fn is_reachable(&self) -> bool {
        let Ok(url) = self.endpoint("api/tags") else {
            return false;
        };

        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Ollama server not reachable");
                false
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.http.get(self.endpoint("api/tags")?).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models)
    }
}

impl Transport for OllamaClient {
    async fn open(&self, request: &GenerateRequest) -> Result<ByteStream> {
        let response = self
            .http
            .post(self.endpoint("api/generate")?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = %status, model = %request.model, "Ollama responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Ollama returned an error status");
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Err(OcrError::MissingBody);
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(OcrError::from))
            .boxed())
    }
}
