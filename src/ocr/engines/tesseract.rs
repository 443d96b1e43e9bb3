//! Tesseract OCR engine.

use std::sync::LazyLock;

use image::DynamicImage;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, ocr::languages::LanguageConfig, prelude::*,
    settings::TesseractSettings,
};

use super::{EngineMode, OcrEngine, OcrError, run_engine_command, write_temp_png};

/// Our engine name.
const NAME: &str = "tesseract";

/// Messages printed by `tesseract` when language data is missing.
static MISSING_LANGUAGE_REGEXES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"Failed loading language '([^']+)'").expect("failed to compile regex"),
        Regex::new(r"Error opening data file .*?([A-Za-z0-9_]+)\.traineddata")
            .expect("failed to compile regex"),
    ]
});

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractOcrEngine {
    /// Our settings.
    settings: TesseractSettings,
    /// One mode per configured page segmentation mode.
    modes: Vec<EngineMode>,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(settings: TesseractSettings) -> Self {
        let modes = settings
            .page_segmentation_modes
            .iter()
            .map(|&psm| EngineMode {
                name: format!("psm {psm} ({})", psm_label(psm)),
                args: vec!["--psm".to_owned(), psm.to_string()],
            })
            .collect();
        Self { settings, modes }
    }

    /// Build the `tesseract` command line. Our PNGs carry no resolution
    /// metadata, so we always pass `--dpi`.
    fn command(
        &self,
        input: &Path,
        output_base: &Path,
        languages: &LanguageConfig,
        dpi: u32,
        mode: Option<&EngineMode>,
    ) -> Command {
        let mut cmd = Command::new(&self.settings.command);
        cmd.arg(input)
            .arg(output_base)
            .arg("-l")
            .arg(languages.tesseract_arg())
            .arg("--dpi")
            .arg(dpi.to_string());
        if let Some(oem) = self.settings.engine_mode {
            cmd.arg("--oem").arg(oem.to_string());
        }
        if let Some(mode) = mode {
            cmd.args(&mode.args);
        }
        cmd
    }

    /// List the languages installed for `tesseract`.
    #[instrument(level = "debug", skip_all)]
    async fn installed_languages(&self) -> Result<Vec<String>, OcrError> {
        let command = &self.settings.command;
        let output = Command::new(command)
            .arg("--list-langs")
            .output()
            .await
            .map_err(|err| OcrError::from_io(NAME, command, err))?;
        check_for_command_failure(NAME, &output, None).map_err(|err| {
            OcrError::Failed {
                engine: NAME,
                message: format!("{err:#}"),
            }
        })?;

        // Older versions print the list to standard error.
        let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
        listing.push('\n');
        listing.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_language_list(&listing))
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn modes(&self) -> &[EngineMode] {
        &self.modes
    }

    async fn check_ready(&self, languages: &LanguageConfig) -> Result<(), OcrError> {
        let installed = self.installed_languages().await?;
        debug!(installed = ?installed, "Found tesseract languages");
        match languages
            .tesseract_codes()
            .iter()
            .find(|code| !installed.contains(*code))
        {
            Some(missing) => Err(missing_language(missing)),
            None => Ok(()),
        }
    }

    #[instrument(level = "trace", skip_all, fields(mode = %mode.map_or("default", |m| m.name.as_str())))]
    async fn recognize(
        &self,
        image: &DynamicImage,
        languages: &LanguageConfig,
        dpi: u32,
        mode: Option<&EngineMode>,
    ) -> Result<String, OcrError> {
        let (tmpdir, input_path) = write_temp_png(NAME, image)?;
        let output_base = tmpdir.path().join("output");

        let mut cmd = self.command(&input_path, &output_base, languages, dpi, mode);
        let output = run_engine_command(NAME, &self.settings.command, &mut cmd).await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(language) = missing_language_in(&stderr) {
            return Err(missing_language(&language));
        }
        check_for_command_failure(NAME, &output, None).map_err(|err| {
            OcrError::Failed {
                engine: NAME,
                message: format!("{err:#}"),
            }
        })?;

        tokio::fs::read_to_string(output_base.with_extension("txt"))
            .await
            .map_err(|err| OcrError::Failed {
                engine: NAME,
                message: format!("cannot read tesseract output file: {err}"),
            })
    }
}

/// A short description of a page segmentation mode.
fn psm_label(psm: u32) -> &'static str {
    match psm {
        1 => "automatic with OSD",
        2 => "automatic without OCR",
        3 => "fully automatic",
        4 => "single column",
        5 => "vertical block",
        6 => "uniform block",
        7 => "single line",
        8 => "single word",
        9 => "circled word",
        10 => "single character",
        11 => "sparse text",
        12 => "sparse text with OSD",
        13 => "raw line",
        _ => "unknown",
    }
}

/// Parse the output of `tesseract --list-langs`.
fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of available languages")
        })
        .map(ToOwned::to_owned)
        .collect()
}

/// Find the language whose data `tesseract` failed to load, if any.
fn missing_language_in(stderr: &str) -> Option<String> {
    MISSING_LANGUAGE_REGEXES
        .iter()
        .find_map(|re| re.captures(stderr))
        .map(|caps| caps[1].to_owned())
}

fn missing_language(language: &str) -> OcrError {
    OcrError::MissingLanguage {
        engine: NAME,
        language: language.to_owned(),
        hint: format!(
            "install its traineddata file, for example with `apt install tesseract-ocr-{}`",
            language.to_lowercase().replace('_', "-")
        ),
    }
}
