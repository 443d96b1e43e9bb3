//! Optional settings file, for details of the OCR engines that don't deserve
//! their own command-line flags.
//!
//! ```toml
//! [tesseract]
//! command = "tesseract"
//! page_segmentation_modes = [6, 3, 11, 12]
//! engine_mode = 3
//!
//! [easyocr]
//! command = "easyocr"
//! gpu = false
//! ```

use std::collections::BTreeSet;

use toml_span::{DeserError, Value, de_helpers::TableHelper};

use crate::{
    prelude::*,
    toml_utils::{custom_deser_error, describe_deser_error, from_toml_str},
};

/// Tesseract page segmentation modes, in the order passes rotate through them:
/// uniform block, fully automatic, sparse text, sparse text with OSD.
pub const DEFAULT_PAGE_SEGMENTATION_MODES: &[u32] = &[6, 3, 11, 12];

/// All our settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    /// Settings for `tesseract`.
    pub tesseract: TesseractSettings,
    /// Settings for `easyocr`.
    pub easyocr: EasyOcrSettings,
}

impl Settings {
    /// Load settings from `path`, or use the defaults if no path is given.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read settings {:?}", path.display()))?;
        from_toml_str::<Self>(&source).map_err(|err| {
            anyhow!(
                "failed to parse settings {:?}: {}",
                path.display(),
                describe_deser_error(&source, &err)
            )
        })
    }
}

impl<'de> toml_span::Deserialize<'de> for Settings {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let mut th = TableHelper::new(value)?;
        let tesseract = th.optional("tesseract").unwrap_or_default();
        let easyocr = th.optional("easyocr").unwrap_or_default();
        th.finalize(None)?;
        Ok(Self {
            tesseract,
            easyocr,
        })
    }
}

/// Settings for the `tesseract` engine.
#[derive(Clone, Debug, PartialEq)]
pub struct TesseractSettings {
    /// The command to run.
    pub command: String,
    /// Page segmentation modes (`--psm`) to rotate through.
    pub page_segmentation_modes: Vec<u32>,
    /// OCR engine mode (`--oem`), if any.
    pub engine_mode: Option<u32>,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            command: "tesseract".to_owned(),
            page_segmentation_modes: DEFAULT_PAGE_SEGMENTATION_MODES.to_vec(),
            engine_mode: None,
        }
    }
}

impl<'de> toml_span::Deserialize<'de> for TesseractSettings {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let defaults = Self::default();
        let mut th = TableHelper::new(value)?;
        let command = th.optional("command").unwrap_or(defaults.command);
        let modes = th.optional_s::<Vec<u32>>("page_segmentation_modes");
        let engine_mode = th.optional_s::<u32>("engine_mode");
        th.finalize(None)?;

        let page_segmentation_modes = match modes {
            Some(modes) => {
                // 0 is "orientation and script detection only", which
                // recognizes no text.
                if modes.value.iter().any(|&m| !(1..=13).contains(&m)) {
                    return Err(custom_deser_error(
                        modes.span,
                        "page segmentation modes must be between 1 and 13",
                    ));
                }
                let distinct = modes.value.iter().collect::<BTreeSet<_>>();
                if distinct.len() < 2 {
                    return Err(custom_deser_error(
                        modes.span,
                        "at least 2 distinct page segmentation modes are required",
                    ));
                }
                modes.value
            }
            None => defaults.page_segmentation_modes,
        };
        let engine_mode = match engine_mode {
            Some(oem) if oem.value > 3 => {
                return Err(custom_deser_error(
                    oem.span,
                    "engine_mode must be between 0 and 3",
                ));
            }
            Some(oem) => Some(oem.value),
            None => None,
        };
        Ok(Self {
            command,
            page_segmentation_modes,
            engine_mode,
        })
    }
}

/// Settings for the `easyocr` engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EasyOcrSettings {
    /// The command to run.
    pub command: String,
    /// Should `easyocr` use the GPU?
    pub gpu: bool,
}

impl Default for EasyOcrSettings {
    fn default() -> Self {
        Self {
            command: "easyocr".to_owned(),
            gpu: false,
        }
    }
}

impl<'de> toml_span::Deserialize<'de> for EasyOcrSettings {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let defaults = Self::default();
        let mut th = TableHelper::new(value)?;
        let command = th.optional("command").unwrap_or(defaults.command);
        let gpu = th.optional("gpu").unwrap_or(defaults.gpu);
        th.finalize(None)?;
        Ok(Self { command, gpu })
    }
}
