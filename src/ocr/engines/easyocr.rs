//! EasyOCR engine, via the `easyocr` command-line tool.

use std::sync::LazyLock;

use image::DynamicImage;
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, ocr::languages::LanguageConfig, prelude::*,
    settings::EasyOcrSettings,
};

use super::{EngineMode, OcrEngine, OcrError, run_engine_command, write_temp_png};

/// Our engine name.
const NAME: &str = "easyocr";

/// The message printed by `easyocr` for an unknown language code.
static UNSUPPORTED_LANGUAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'?([A-Za-z_]+)'? is not supported").expect("failed to compile regex")
});

/// OCR engine wrapping the `easyocr` CLI tool.
pub struct EasyOcrEngine {
    /// Our settings.
    settings: EasyOcrSettings,
    /// Line-level and paragraph-level grouping.
    modes: Vec<EngineMode>,
}

impl EasyOcrEngine {
    /// Create a new `easyocr` engine.
    pub fn new(settings: EasyOcrSettings) -> Self {
        // The CLI parses its flags with Python's `bool`, so any non-empty
        // value means true. Line grouping is its default.
        let modes = vec![
            EngineMode {
                name: "lines".to_owned(),
                args: vec![],
            },
            EngineMode {
                name: "paragraphs".to_owned(),
                args: vec!["--paragraph".to_owned(), "True".to_owned()],
            },
        ];
        Self { settings, modes }
    }

    /// Build the `easyocr` command line for `input`.
    fn command(
        &self,
        input: &Path,
        languages: &LanguageConfig,
        mode: Option<&EngineMode>,
    ) -> Command {
        let mut cmd = Command::new(&self.settings.command);
        cmd.arg("-l")
            .args(languages.easyocr_codes())
            .arg("-f")
            .arg(input)
            .arg("--detail")
            .arg("0")
            .arg("--gpu")
            .arg(if self.settings.gpu { "True" } else { "" });
        if let Some(mode) = mode {
            cmd.args(&mode.args);
        }
        cmd
    }
}

#[async_trait]
impl OcrEngine for EasyOcrEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn modes(&self) -> &[EngineMode] {
        &self.modes
    }

    /// `easyocr` has no way to list its languages, so this only checks that it
    /// runs. Unsupported languages are reported by [`Self::recognize`].
    async fn check_ready(&self, _languages: &LanguageConfig) -> Result<(), OcrError> {
        let command = &self.settings.command;
        let output = Command::new(command)
            .arg("--help")
            .output()
            .await
            .map_err(|err| OcrError::from_io(NAME, command, err))?;
        check_for_command_failure(NAME, &output, None).map_err(|err| OcrError::Failed {
            engine: NAME,
            message: format!("{err:#}"),
        })
    }

    #[instrument(level = "trace", skip_all, fields(mode = %mode.map_or("default", |m| m.name.as_str())))]
    async fn recognize(
        &self,
        image: &DynamicImage,
        languages: &LanguageConfig,
        _dpi: u32,
        mode: Option<&EngineMode>,
    ) -> Result<String, OcrError> {
        let (_tmpdir, input_path) = write_temp_png(NAME, image)?;
        let mut cmd = self.command(&input_path, languages, mode);
        let output = run_engine_command(NAME, &self.settings.command, &mut cmd).await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(caps) = UNSUPPORTED_LANGUAGE_REGEX.captures(&stderr) {
            return Err(OcrError::MissingLanguage {
                engine: NAME,
                language: caps[1].to_owned(),
                hint: "check the language list in the EasyOCR documentation".to_owned(),
            });
        }
        check_for_command_failure(NAME, &output, None).map_err(|err| OcrError::Failed {
            engine: NAME,
            message: format!("{err:#}"),
        })?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_args(
        engine: &EasyOcrEngine,
        languages: &str,
        mode: Option<&EngineMode>,
    ) -> Vec<String> {
        let langs = languages.parse::<LanguageConfig>().unwrap();
        let cmd = engine.command(Path::new("page.png"), &langs, mode);
        cmd.as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_line_includes_languages_and_mode() {
        let engine = EasyOcrEngine::new(EasyOcrSettings::default());
        let base = [
            "-l", "ar", "en", "-f", "page.png", "--detail", "0", "--gpu", "",
        ];

        let lines = command_args(&engine, "arabic+english", Some(&engine.modes()[0]));
        assert_eq!(lines, base);

        let paragraphs = command_args(&engine, "arabic+english", Some(&engine.modes()[1]));
        let mut expected = base.to_vec();
        expected.extend(["--paragraph", "True"]);
        assert_eq!(paragraphs, expected);

        assert_eq!(command_args(&engine, "arabic+english", None), base);
    }

    #[test]
    fn gpu_flag_is_only_truthy_when_enabled() {
        let engine = EasyOcrEngine::new(EasyOcrSettings {
            gpu: true,
            ..EasyOcrSettings::default()
        });
        let args = command_args(&engine, "english", None);
        assert_eq!(args[args.len() - 2..], ["--gpu", "True"]);
    }

    #[test]
    fn unsupported_languages_are_recognized() {
        let stderr = "ValueError: xx is not supported";
        let caps = UNSUPPORTED_LANGUAGE_REGEX.captures(stderr).unwrap();
        assert_eq!(&caps[1], "xx");
        assert!(UNSUPPORTED_LANGUAGE_REGEX.captures("Downloading detection model").is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = EasyOcrEngine::new(EasyOcrSettings {
            command: "/nonexistent/easyocr-for-tests".to_owned(),
            gpu: false,
        });
        let langs = "ara".parse::<LanguageConfig>().unwrap();
        let err = engine.check_ready(&langs).await.unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable { .. }), "{err}");
    }
}
