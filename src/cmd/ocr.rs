//! The `ocr` subcommand.

use std::sync::Arc;

use clap::Args;
use futures::StreamExt as _;

use crate::{
    ocr::{DocumentOcr, OcrJob, OcrRun, events::OcrEvent, format_page_section},
    page_iter::PdfRasterizer,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::EngineOpts;

/// Options for the `ocr` subcommand.
#[derive(Debug, Args)]
pub struct OcrOpts {
    /// The PDF file to OCR.
    pub input: PathBuf,

    /// Where to write the text. Defaults to the input path with a `.txt`
    /// extension.
    #[clap(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    #[clap(flatten)]
    pub engine_opts: EngineOpts,

    /// Resolution used to rasterize pages.
    #[clap(long, default_value = "300")]
    pub dpi: u32,

    /// OCR passes per page. More passes are slower, but may recover more
    /// text.
    #[clap(long, default_value = "3")]
    pub passes: usize,

    /// Max number of passes of one page to run at a time.
    #[clap(long = "pass-jobs", default_value = "1")]
    pub pass_jobs: usize,

    /// Don't retry blank pages with the engine's default settings.
    #[clap(long)]
    pub no_fallback: bool,

    /// Print each page to standard output as it is finished.
    #[clap(long)]
    pub print: bool,
}

impl OcrOpts {
    /// Where we should write our output.
    fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("txt"))
    }
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all, fields(input = %opts.input.display()))]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let engine = opts.engine_opts.engine().await?;
    let job = OcrJob {
        document_path: opts.input.clone(),
        output_path: opts.output_path(),
        languages: opts.engine_opts.languages.clone(),
        dpi: opts.dpi,
        num_passes: opts.passes,
        pass_concurrency: opts.pass_jobs,
        fallback: !opts.no_fallback,
    };
    info!(
        engine = engine.name(),
        languages = %job.languages,
        dpi = job.dpi,
        passes = job.num_passes,
        "Starting OCR"
    );

    let ocr = DocumentOcr::new(Arc::new(PdfRasterizer), engine);
    let OcrRun { mut events, worker } = ocr.start(job).await?;

    // Configure our progress bar.
    let pb = ui.new_percent_bar(&ProgressConfig {
        emoji: "📄",
        msg: "OCRing pages",
        done_msg: "OCRed pages",
    });

    while let Some(event) = events.next().await {
        match event {
            OcrEvent::Progress(fraction) => pb.set_fraction(fraction),
            OcrEvent::Status(msg) => pb.set_status(msg),
            OcrEvent::PageText {
                page_number,
                page_count,
                page_text,
                document_text,
            } => {
                debug!(
                    page_number,
                    page_count,
                    page_chars = page_text.chars().count(),
                    document_chars = document_text.chars().count(),
                    "Page done"
                );
                if page_text.is_empty() {
                    warn!(page_number, "No text found on page");
                }
                if opts.print {
                    ui.println_stdout(&format_page_section(page_number, &page_text));
                }
            }
            OcrEvent::Finished(summary) => {
                info!(
                    "Wrote {} pages ({} passes each) to {:?}",
                    summary.page_count,
                    summary.num_passes,
                    summary.output_path.display()
                );
            }
            OcrEvent::Error(msg) => pb.fail(msg),
        }
    }

    worker.join().await
}
