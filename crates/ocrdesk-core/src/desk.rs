//! Main application state container

use parking_lot::RwLock;
use std::sync::Arc;

use ocrdesk_session::{
    ModelInfo, OcrRequest, OcrSession, OllamaClient, RunOutcome, SessionEvent,
};
use ocrdesk_storage::Database;

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

const MODEL_SETTING: &str = "model";

/// Everything the UI bridge needs, behind one cheaply cloneable handle
pub struct OcrDesk {
    config: Config,
    db: Database,
    client: OllamaClient,
    session: OcrSession<OllamaClient>,
    /// Model used when a run does not name one
    selected_model: Arc<RwLock<String>>,
}

impl OcrDesk {
    pub fn new(config: Config) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        Self::with_database(config, db)
    }

    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let client = OllamaClient::new(&config.ollama_url)?;
        let session = OcrSession::new(client.clone(), config.session.clone());
        let selected_model = Arc::new(RwLock::new(config.session.default_model.clone()));

        Ok(Self {
            config,
            db,
            client,
            session,
            selected_model,
        })
    }

    /// Restore persisted settings
    pub fn initialize(&self) -> Result<()> {
        if let Some(model) = self.db.get_setting(MODEL_SETTING)? {
            *self.selected_model.write() = model;
        }

        tracing::info!(
            ollama_url = %self.client.base_url(),
            model = %self.selected_model(),
            "ocrdesk initialized"
        );

        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &OcrSession<OllamaClient> {
        &self.session
    }

    pub fn selected_model(&self) -> String {
        self.selected_model.read().clone()
    }

    pub fn set_model(&self, model: &str) -> Result<()> {
        let model = model.trim();
        if model.is_empty() {
            return Err(CoreError::Config("model name is empty".to_string()));
        }

        self.db.set_setting(MODEL_SETTING, model)?;
        *self.selected_model.write() = model.to_string();

        tracing::info!(model = %model, "Selected model");
        Ok(())
    }

    pub async fn check_connection(&self) -> bool {
        self.client.is_reachable().await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(self.client.list_models().await?)
    }

    /// Transcribe an image with `model`, or the selected model when `None`.
    ///
    /// Fails only when the request itself is invalid; everything that happens
    /// once the run has started is reported through `emit` and the outcome.
    pub async fn run_ocr(
        &self,
        image_base64: String,
        model: Option<String>,
        emit: impl FnMut(SessionEvent) + Send,
    ) -> Result<RunOutcome> {
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.selected_model());
        let request = OcrRequest::new(image_base64, model)?;

        Ok(self.session.run(request, emit).await)
    }

    pub async fn abort_ocr(&self) {
        self.session.abort().await;
    }
}

impl Clone for OcrDesk {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            db: self.db.clone(),
            client: self.client.clone(),
            session: self.session.clone(),
            selected_model: Arc::clone(&self.selected_model),
        }
    }
}
