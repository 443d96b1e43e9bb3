//! Multi-pass OCR of whole documents.
//!
//! Each page is rasterized, expanded into several preprocessed
//! [variants](variants), run through several OCR [passes](passes), and the
//! resulting candidate texts are reduced to one page text by the
//! [consensus selector](consensus). The work runs on a background task, which
//! reports progress to the caller as a stream of [`OcrEvent`]s.

use std::sync::Arc;

use futures::StreamExt as _;
use image::DynamicImage;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    async_utils::{
        BoxedStream, JoinWorker,
        blocking_iter_streams::{BlockingIterStream, spawn_blocking_propagating_panics},
        io::write_text_output,
    },
    page_iter::{Rasterizer, check_pdf},
    prelude::*,
};

use self::{
    engines::OcrEngine,
    events::{DocumentSummary, EVENT_BUFFER_SIZE, EventSender, OcrEvent},
    languages::LanguageConfig,
    passes::run_passes,
    variants::generate_variants,
};

pub mod consensus;
pub mod engines;
pub mod events;
pub mod languages;
pub mod passes;
pub mod variants;

/// Width of the rule above and below each page heading.
const PAGE_RULE_WIDTH: usize = 60;

/// Progress once the document has been rasterized.
const RASTERIZED_PROGRESS: f32 = 0.05;

/// Progress once page images are ready for OCR.
const IMAGES_READY_PROGRESS: f32 = 0.10;

/// Share of progress spent on OCRing pages.
const PAGES_PROGRESS_SHARE: f32 = 0.85;

/// Progress just before the output is written.
const WRITING_PROGRESS: f32 = 0.95;

/// Everything needed to OCR one document.
#[derive(Clone, Debug)]
pub struct OcrJob {
    /// The PDF to OCR.
    pub document_path: PathBuf,
    /// Where to write the recognized text.
    pub output_path: PathBuf,
    /// Languages to recognize.
    pub languages: LanguageConfig,
    /// Rasterization resolution.
    pub dpi: u32,
    /// OCR passes per page.
    pub num_passes: usize,
    /// Maximum number of passes of one page to run at once.
    pub pass_concurrency: usize,
    /// If no pass finds any text, try once more with the engine's defaults.
    pub fallback: bool,
}

impl OcrJob {
    /// Check our inputs before doing any work.
    pub fn validate(&self) -> Result<()> {
        if self.dpi == 0 {
            bail!("DPI must be greater than 0");
        }
        if self.num_passes == 0 {
            bail!("at least 1 OCR pass is required");
        }
        if self.pass_concurrency == 0 {
            bail!("pass concurrency must be at least 1");
        }
        check_pdf(&self.document_path)
    }
}

/// The result of [`DocumentOcr::process`].
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentOutput {
    /// The text of all pages, with page headings.
    pub text: String,
    /// Number of pages processed.
    pub page_count: usize,
    /// Number of OCR passes per page.
    pub num_passes: usize,
}

/// A running OCR job.
pub struct OcrRun {
    /// Events from the job, ending with [`OcrEvent::Finished`] or
    /// [`OcrEvent::Error`]. Dropping this stream cancels the job.
    pub events: BoxedStream<OcrEvent>,
    /// The background worker. Returns the job's error, if any.
    pub worker: JoinWorker,
}

/// OCRs documents with a given rasterizer and engine.
#[derive(Clone)]
pub struct DocumentOcr {
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn OcrEngine>,
}

impl DocumentOcr {
    /// Create a new [`DocumentOcr`].
    pub fn new(rasterizer: Arc<dyn Rasterizer>, engine: Arc<dyn OcrEngine>) -> Self {
        Self { rasterizer, engine }
    }

    /// Start OCRing a document on a background task.
    ///
    /// Input errors and engine installation problems are returned from here,
    /// before any work starts. Everything after that is reported through
    /// [`OcrRun::events`] and [`OcrRun::worker`].
    #[instrument(level = "debug", skip_all, fields(path = %job.document_path.display()))]
    pub async fn start(&self, job: OcrJob) -> Result<OcrRun> {
        job.validate()?;
        self.engine.check_ready(&job.languages).await?;

        let (mut sender, rx) = EventSender::channel(EVENT_BUFFER_SIZE);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.run(&job, &mut sender).await;
            if let Err(err) = &result {
                error!("OCR failed: {:#}", err);
                if sender.send(OcrEvent::Error(format!("{err:#}"))).await.is_err() {
                    debug!("No one is listening for the OCR error");
                }
            }
            result
        });

        Ok(OcrRun {
            events: ReceiverStream::new(rx).boxed(),
            worker: JoinWorker::from_handle(handle),
        })
    }

    /// Process a document and write the output.
    async fn run(&self, job: &OcrJob, events: &mut EventSender) -> Result<()> {
        let output = self.process(job, events).await?;

        events.progress(WRITING_PROGRESS).await?;
        events.status("Saving text...").await?;
        write_text_output(&job.output_path, &output.text).await?;
        events.progress(1.0).await?;

        info!(
            pages = output.page_count,
            passes = output.num_passes,
            output = %job.output_path.display(),
            "OCR complete"
        );
        events
            .send(OcrEvent::Finished(DocumentSummary {
                output_path: job.output_path.clone(),
                page_count: output.page_count,
                num_passes: output.num_passes,
            }))
            .await
    }

    /// OCR every page of a document, reporting progress and page text as we
    /// go. Fails if the document can't be rasterized.
    #[instrument(level = "debug", skip_all, fields(path = %job.document_path.display()))]
    pub async fn process(
        &self,
        job: &OcrJob,
        events: &mut EventSender,
    ) -> Result<DocumentOutput> {
        let path = &job.document_path;
        events.status("Converting PDF to images...").await?;
        let pages = self
            .rasterizer
            .rasterize(path, job.dpi)
            .await
            .with_context(|| format!("failed to rasterize {:?}", path.display()))?;
        events.progress(RASTERIZED_PROGRESS).await?;

        let page_count = pages.page_count();
        events.status(format!("Found {page_count} pages")).await?;
        events.progress(IMAGES_READY_PROGRESS).await?;

        let mut text = String::new();
        let mut pages = BlockingIterStream::new(pages).enumerate();
        while let Some((page_idx, page)) = pages.next().await {
            let page_number = page_idx + 1;
            let page = page.with_context(|| {
                format!("failed to rasterize page {page_number} of {:?}", path.display())
            })?;
            events
                .status(format!("Processing page {page_number}/{page_count}..."))
                .await?;

            let page_text = self.ocr_page(job, page_number, page).await?;
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format_page_section(page_number, &page_text));

            let done = page_number as f32 / page_count.max(1) as f32;
            events
                .progress(IMAGES_READY_PROGRESS + done * PAGES_PROGRESS_SHARE)
                .await?;
            events
                .send(OcrEvent::PageText {
                    page_number,
                    page_count,
                    page_text,
                    document_text: text.clone(),
                })
                .await?;
        }

        Ok(DocumentOutput {
            text,
            page_count,
            num_passes: job.num_passes,
        })
    }

    /// OCR a single page, returning its consensus text. A page where nothing
    /// could be recognized has empty text. Fails only if the engine is missing
    /// something it needs, in which case no other page would fare better.
    #[instrument(level = "debug", skip_all, fields(page = page_number))]
    async fn ocr_page(
        &self,
        job: &OcrJob,
        page_number: usize,
        page: DynamicImage,
    ) -> Result<String> {
        let variants =
            spawn_blocking_propagating_panics(move || generate_variants(&page)).await;
        debug!(variants = variants.len(), "Generated page variants");

        let report = run_passes(
            self.engine.as_ref(),
            &variants,
            &job.languages,
            job.dpi,
            job.num_passes,
            job.pass_concurrency,
        )
        .await?;
        if !report.candidates.is_empty() {
            return Ok(consensus::select(&report.candidates));
        }

        warn!(failures = report.failures, "No OCR pass found any text");
        if job.fallback
            && let Some(original) = variants.first()
        {
            match self
                .engine
                .recognize(original, &job.languages, job.dpi, None)
                .await
            {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_owned()),
                Ok(_) => debug!("Fallback OCR found no text"),
                Err(err) if err.is_installation_problem() => return Err(err.into()),
                Err(err) => warn!("Fallback OCR failed: {}", err),
            }
        }
        Ok(String::new())
    }
}

/// Format a page's text with a heading.
pub(crate) fn format_page_section(page_number: usize, page_text: &str) -> String {
    let rule = "=".repeat(PAGE_RULE_WIDTH);
    format!("\n{rule}\nPage {page_number}\n{rule}\n\n{page_text}\n")
}
