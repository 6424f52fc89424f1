//! Application state management
use ocrdesk_core::{Config, OcrDesk, Result};

/// State shared by all commands; `OcrDesk` is internally synchronized
pub struct AppState {
    desk: OcrDesk,
}

impl AppState {
    pub fn new() -> Result<Self> {
        let config = Config::default();
        let desk = OcrDesk::new(config)?;

        Ok(Self { desk })
    }

    pub fn initialize(&self) -> Result<()> {
        self.desk.initialize()
    }

    /// Handle that can be moved into async command bodies
    pub fn desk(&self) -> OcrDesk {
        self.desk.clone()
    }
}
