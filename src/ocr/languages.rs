//! Which languages an OCR engine should recognize.

use std::{fmt, str::FromStr};

use crate::prelude::*;

/// Languages we know by name, as `(name, tesseract code, easyocr code)`.
const KNOWN_LANGUAGES: &[(&str, &str, &str)] = &[
    ("arabic", "ara", "ar"),
    ("english", "eng", "en"),
    ("french", "fra", "fr"),
    ("german", "deu", "de"),
    ("persian", "fas", "fa"),
    ("spanish", "spa", "es"),
    ("urdu", "urd", "ur"),
];

/// One or more languages, in priority order.
///
/// Languages are stored as Tesseract codes (`ara`, `eng`, ...). Codes we don't
/// recognize are passed to the engine unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageConfig {
    languages: Vec<String>,
}

impl LanguageConfig {
    /// Create a configuration from a list of language names or codes.
    pub fn new<S: AsRef<str>>(languages: &[S]) -> Result<Self> {
        let mut normalized: Vec<String> = vec![];
        for language in languages {
            let language = normalize(language.as_ref());
            if !language.is_empty() && !normalized.contains(&language) {
                normalized.push(language);
            }
        }
        if normalized.is_empty() {
            bail!("at least one OCR language is required");
        }
        Ok(Self {
            languages: normalized,
        })
    }

    /// The languages, as Tesseract codes.
    pub fn tesseract_codes(&self) -> &[String] {
        &self.languages
    }

    /// The value for `tesseract -l`.
    pub fn tesseract_arg(&self) -> String {
        self.languages.join("+")
    }

    /// The languages, as EasyOCR codes.
    pub fn easyocr_codes(&self) -> Vec<String> {
        self.languages
            .iter()
            .map(|code| {
                KNOWN_LANGUAGES
                    .iter()
                    .find(|(_, tesseract, _)| tesseract == code)
                    .map(|(_, _, easyocr)| (*easyocr).to_owned())
                    .unwrap_or_else(|| code.clone())
            })
            .collect()
    }
}

/// Map a language name or code to a Tesseract code, if we know it.
fn normalize(language: &str) -> String {
    let language = language.trim().to_lowercase();
    KNOWN_LANGUAGES
        .iter()
        .find(|(name, tesseract, easyocr)| {
            language == *name || language == *tesseract || language == *easyocr
        })
        .map(|(_, tesseract, _)| (*tesseract).to_owned())
        .unwrap_or(language)
}

impl FromStr for LanguageConfig {
    type Err = anyhow::Error;

    /// Parse `ara+eng`, `arabic,english` and similar.
    fn from_str(s: &str) -> Result<Self> {
        let parts = s.split(['+', ',']).collect::<Vec<_>>();
        Self::new(&parts)
    }
}

impl fmt::Display for LanguageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tesseract_arg())
    }
}
