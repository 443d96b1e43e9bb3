//! OCR engine interface.
//!
//! An engine turns one image into text. We wrap external OCR tools rather
//! than implementing recognition ourselves, so recognition quality is whatever
//! the installed engine provides.

use std::{io, process::Output, sync::Arc};

use clap::ValueEnum;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;
use tokio::process::Command;

use crate::{cpu_limit::with_cpu_semaphore, prelude::*, settings::Settings};

use super::languages::LanguageConfig;

pub mod easyocr;
pub mod tesseract;

/// Errors reported by an [`OcrEngine`].
///
/// Missing engines and missing language data are kept distinct from ordinary
/// failures, because the user can fix them by installing something.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine itself could not be run.
    #[error("{engine} is not available: {hint}")]
    EngineUnavailable { engine: &'static str, hint: String },

    /// The engine is installed, but lacks data for a requested language.
    #[error("{engine} has no data for language {language:?}: {hint}")]
    MissingLanguage {
        engine: &'static str,
        language: String,
        hint: String,
    },

    /// The engine ran, but failed.
    #[error("{engine} failed: {message}")]
    Failed {
        engine: &'static str,
        message: String,
    },
}

impl OcrError {
    /// Build an [`OcrError`] from an I/O error that occurred while starting or
    /// talking to the engine.
    pub fn from_io(engine: &'static str, command: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            OcrError::EngineUnavailable {
                engine,
                hint: format!("could not find {command:?} on the PATH"),
            }
        } else {
            OcrError::Failed {
                engine,
                message: format!("could not run {command:?}: {err}"),
            }
        }
    }

    /// Can the user fix this by installing something?
    pub fn is_installation_problem(&self) -> bool {
        matches!(
            self,
            OcrError::EngineUnavailable { .. } | OcrError::MissingLanguage { .. }
        )
    }
}

/// An engine-specific layout analysis strategy, such as Tesseract's page
/// segmentation modes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineMode {
    /// A short human-readable name.
    pub name: String,
    /// Extra command-line arguments selecting this mode.
    pub args: Vec<String>,
}

/// Interface to an OCR engine.
///
/// Engines are shared between all the passes of a run, and may be called
/// concurrently.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// The engine's name, for logs and error messages.
    fn name(&self) -> &'static str;

    /// The layout analysis modes that passes rotate through. Should contain at
    /// least two distinct modes.
    fn modes(&self) -> &[EngineMode];

    /// Check that the engine is installed and has data for `languages`.
    async fn check_ready(&self, languages: &LanguageConfig) -> Result<(), OcrError>;

    /// Recognize the text in `image`, which was rasterized at `dpi`. If `mode`
    /// is `None`, use the engine's defaults.
    async fn recognize(
        &self,
        image: &DynamicImage,
        languages: &LanguageConfig,
        dpi: u32,
        mode: Option<&EngineMode>,
    ) -> Result<String, OcrError>;
}

/// The OCR engines we support.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// Tesseract, which supports several page layout analysis modes.
    #[default]
    Tesseract,
    /// EasyOCR, a neural network engine.
    #[value(name = "easyocr")]
    EasyOcr,
}

/// Create the OCR engine for `kind`.
pub fn ocr_engine_for_kind(kind: EngineKind, settings: &Settings) -> Arc<dyn OcrEngine> {
    match kind {
        EngineKind::Tesseract => Arc::new(tesseract::TesseractOcrEngine::new(
            settings.tesseract.clone(),
        )),
        EngineKind::EasyOcr => {
            Arc::new(easyocr::EasyOcrEngine::new(settings.easyocr.clone()))
        }
    }
}

/// Write `image` as a PNG file in a new temporary directory, so we can pass it
/// to a command-line engine. The file is deleted when the directory is dropped.
pub(crate) fn write_temp_png(
    engine: &'static str,
    image: &DynamicImage,
) -> Result<(tempfile::TempDir, PathBuf), OcrError> {
    let failed = |message: String| OcrError::Failed { engine, message };
    let tmpdir = tempfile::TempDir::with_prefix(engine)
        .map_err(|err| failed(format!("cannot create temporary directory: {err}")))?;
    let path = tmpdir.path().join("input.png");
    image
        .save_with_format(&path, ImageFormat::Png)
        .map_err(|err| failed(format!("cannot write {engine} input image: {err}")))?;
    Ok((tmpdir, path))
}

/// Run an engine's command while holding a CPU permit, and collect its output.
///
/// A non-zero exit status is not treated as an error here, because engines
/// need to look at standard error to classify the failure.
pub(crate) async fn run_engine_command(
    engine: &'static str,
    command_name: &str,
    cmd: &mut Command,
) -> Result<Output, OcrError> {
    let output = with_cpu_semaphore(|| async { Ok(cmd.output().await) })
        .await
        .map_err(|err| OcrError::Failed {
            engine,
            message: format!("{err:#}"),
        })?;
    output.map_err(|err| OcrError::from_io(engine, command_name, err))
}
