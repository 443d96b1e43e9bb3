//! Command-line entry points.

use std::sync::Arc;

use clap::Args;

use crate::{
    ocr::{
        engines::{EngineKind, OcrEngine, ocr_engine_for_kind},
        languages::LanguageConfig,
    },
    prelude::*,
    settings::Settings,
};

pub mod check;
pub mod ocr;

/// Options for choosing and configuring an OCR engine.
#[derive(Debug, Clone, Args)]
pub struct EngineOpts {
    /// The OCR engine to use.
    #[clap(long, value_enum, default_value = "tesseract")]
    pub engine: EngineKind,

    /// Languages to recognize, separated by `+` or `,`. Accepts names
    /// ("arabic") or codes ("ara", "ar").
    #[clap(long = "lang", default_value = "arabic")]
    pub languages: LanguageConfig,

    /// A TOML settings file with engine details.
    #[clap(long)]
    pub settings: Option<PathBuf>,
}

impl EngineOpts {
    /// Load our settings and create the selected engine.
    pub async fn engine(&self) -> Result<Arc<dyn OcrEngine>> {
        let settings = Settings::load(self.settings.as_deref()).await?;
        Ok(ocr_engine_for_kind(self.engine, &settings))
    }
}
