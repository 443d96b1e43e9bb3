//! Running several OCR passes over the variants of one page.

use futures::{StreamExt as _, stream};
use image::DynamicImage;

use crate::prelude::*;

use super::{
    engines::{OcrEngine, OcrError},
    languages::LanguageConfig,
};

/// Which variant and engine mode a single pass uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassPlan {
    /// 0-based pass index.
    pub pass_idx: usize,
    /// Index into the page's variants.
    pub variant_idx: usize,
    /// Index into the engine's modes, or `None` if the engine has no modes.
    pub mode_idx: Option<usize>,
}

/// Plan `num_passes` passes, rotating through variants and modes.
///
/// Pass `k` uses variant `k mod variant_count` and mode `k mod mode_count`.
/// Because both rotate together, passes beyond `variant_count` reuse variants
/// with a different mode whenever the counts differ.
pub fn schedule(num_passes: usize, variant_count: usize, mode_count: usize) -> Vec<PassPlan> {
    if variant_count == 0 {
        return vec![];
    }
    (0..num_passes)
        .map(|pass_idx| PassPlan {
            pass_idx,
            variant_idx: pass_idx % variant_count,
            mode_idx: (mode_count > 0).then(|| pass_idx % mode_count),
        })
        .collect()
}

/// The outcome of all passes over a page.
#[derive(Debug, Default, PartialEq)]
pub struct PassReport {
    /// Non-empty, trimmed texts, in pass order.
    pub candidates: Vec<String>,
    /// How many passes failed.
    pub failures: usize,
}

/// Run `num_passes` OCR passes over `variants`, which were rasterized at `dpi`.
///
/// Up to `concurrency` passes run at once, but candidates are always returned
/// in pass order. A failed pass is logged and skipped, and so is a pass that
/// recognizes only whitespace. An installation problem can't be fixed by
/// another pass, so it stops the remaining passes and is returned.
#[instrument(level = "debug", skip_all, fields(engine = engine.name(), num_passes = num_passes))]
pub async fn run_passes(
    engine: &dyn OcrEngine,
    variants: &[DynamicImage],
    languages: &LanguageConfig,
    dpi: u32,
    num_passes: usize,
    concurrency: usize,
) -> Result<PassReport, OcrError> {
    let modes = engine.modes();
    let plans = schedule(num_passes, variants.len(), modes.len());
    let mut results = stream::iter(plans)
        .map(|plan| async move {
            let mode = plan.mode_idx.map(|idx| &modes[idx]);
            let result = engine
                .recognize(&variants[plan.variant_idx], languages, dpi, mode)
                .await;
            (plan, result)
        })
        .buffered(concurrency.max(1));

    let mut report = PassReport::default();
    while let Some((plan, result)) = results.next().await {
        match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!(pass = plan.pass_idx, "OCR pass found no text");
                } else {
                    report.candidates.push(text.to_owned());
                }
            }
            Err(err) if err.is_installation_problem() => return Err(err),
            Err(err) => {
                warn!(pass = plan.pass_idx, "OCR pass failed: {}", err);
                report.failures += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::RgbImage;

    use super::*;
    use crate::ocr::engines::EngineMode;

    /// An engine that records its calls, and returns canned results keyed by
    /// image width.
    struct RecordingEngine {
        modes: Vec<EngineMode>,
        calls: Mutex<Vec<(u32, Option<String>)>>,
    }

    impl RecordingEngine {
        fn new(mode_names: &[&str]) -> Self {
            Self {
                modes: mode_names
                    .iter()
                    .map(|name| EngineMode {
                        name: (*name).to_owned(),
                        args: vec![],
                    })
                    .collect(),
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<(u32, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OcrEngine for RecordingEngine {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn modes(&self) -> &[EngineMode] {
            &self.modes
        }

        async fn check_ready(&self, _languages: &LanguageConfig) -> Result<(), OcrError> {
            Ok(())
        }

        async fn recognize(
            &self,
            image: &DynamicImage,
            languages: &LanguageConfig,
            _dpi: u32,
            mode: Option<&EngineMode>,
        ) -> Result<String, OcrError> {
            self.calls
                .lock()
                .unwrap()
                .push((image.width(), mode.map(|m| m.name.clone())));
            match image.width() {
                1 => Err(OcrError::Failed {
                    engine: "recording",
                    message: "boom".to_owned(),
                }),
                2 => Ok("  \n\t ".to_owned()),
                4 => Err(OcrError::MissingLanguage {
                    engine: "recording",
                    language: languages.to_string(),
                    hint: "install it".to_owned(),
                }),
                width => Ok(format!("  text {width}\n")),
            }
        }
    }

    /// Variants whose widths are the given values.
    fn variants(widths: &[u32]) -> Vec<DynamicImage> {
        widths
            .iter()
            .map(|&w| DynamicImage::ImageRgb8(RgbImage::new(w, 1)))
            .collect()
    }

    fn langs() -> LanguageConfig {
        "eng".parse().unwrap()
    }

    #[test]
    fn schedule_rotates_variants_and_modes_together() {
        let plans = schedule(6, 5, 4);
        let pairs = plans
            .iter()
            .map(|p| (p.variant_idx, p.mode_idx.unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, [(0, 0), (1, 1), (2, 2), (3, 3), (4, 0), (0, 1)]);
        assert!(schedule(3, 0, 4).is_empty());
        assert!(schedule(2, 1, 0).iter().all(|p| p.mode_idx.is_none()));
    }

    #[tokio::test]
    async fn engine_is_called_once_per_pass_in_order() {
        let engine = RecordingEngine::new(&["a", "b"]);
        let variants = variants(&[10, 20, 30]);
        let report = run_passes(&engine, &variants, &langs(), 300, 4, 3)
            .await
            .unwrap();
        assert_eq!(
            report.candidates,
            ["text 10", "text 20", "text 30", "text 10"]
        );
        assert_eq!(report.failures, 0);

        let mut calls = engine.calls();
        calls.sort();
        assert_eq!(
            calls,
            [
                (10, Some("a".to_owned())),
                (10, Some("b".to_owned())),
                (20, Some("b".to_owned())),
                (30, Some("a".to_owned())),
            ]
        );
    }

    #[tokio::test]
    async fn runs_are_reproducible() {
        let variants = variants(&[10, 20, 30, 40, 50]);
        let first = RecordingEngine::new(&["a", "b", "c"]);
        let second = RecordingEngine::new(&["a", "b", "c"]);
        run_passes(&first, &variants, &langs(), 300, 7, 1)
            .await
            .unwrap();
        run_passes(&second, &variants, &langs(), 300, 7, 1)
            .await
            .unwrap();
        assert_eq!(first.calls().len(), 7);
        assert_eq!(first.calls(), second.calls());
    }

    #[tokio::test]
    async fn failures_and_blank_passes_are_skipped() {
        let engine = RecordingEngine::new(&["a", "b"]);
        let variants = variants(&[1, 2, 3]);
        let report = run_passes(&engine, &variants, &langs(), 300, 3, 1)
            .await
            .unwrap();
        assert_eq!(report.candidates, ["text 3"]);
        assert_eq!(report.failures, 1);
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn missing_language_stops_the_passes() {
        let engine = RecordingEngine::new(&["a", "b"]);
        let variants = variants(&[3, 4, 5]);
        let err = run_passes(&engine, &variants, &langs(), 300, 6, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::MissingLanguage { .. }), "{err}");
        assert_eq!(engine.calls().len(), 2);
    }
}
