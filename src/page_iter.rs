//! Iterate over the rasterized pages of a PDF.

use std::{
    collections::BTreeMap,
    fs,
    sync::LazyLock,
    vec,
};

use image::{DynamicImage, ImageFormat};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
};

/// The only MIME type we accept as input.
const PDF_MIME_TYPE: &str = "application/pdf";

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler reports damaged cross-reference tables as errors, but renders the
/// pages anyway.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// The pages of a document, as decoded images in page order.
///
/// Implementations should hold at most one decoded page in memory at a time.
pub trait PageSource: Iterator<Item = Result<DynamicImage>> + Send + 'static {
    /// The number of pages this source will yield.
    fn page_count(&self) -> usize;
}

/// Something that can turn a document into page images.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Rasterize the document at `path` at `dpi` dots per inch.
    async fn rasterize(&self, path: &Path, dpi: u32) -> Result<Box<dyn PageSource>>;
}

/// Rasterizes PDFs using Poppler's `pdfinfo` and `pdftocairo` CLI tools.
#[derive(Clone, Debug, Default)]
pub struct PdfRasterizer;

#[async_trait]
impl Rasterizer for PdfRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi = dpi))]
    async fn rasterize(&self, path: &Path, dpi: u32) -> Result<Box<dyn PageSource>> {
        // Count the number of pages in the PDF.
        let expected_pages = get_pdf_page_count(path).await?;
        if expected_pages == 0 {
            return Ok(Box::new(PdfPages::empty()));
        }

        // Construct an output filename. pdftocairo will add zero-padded page
        // numbers to this.
        let filename = path
            .file_name()
            .context("failed to get filename from PDF path")?;

        // Create a temporary directory to hold the PNG files.
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;
        let out_path = tmpdir.path().join(filename).with_extension("");

        // Run pdftocairo to convert the PDF to PNG files.
        //
        // We use `with_cpu_semaphore` because `pdftocairo` will use _at least_
        // 100% of a CPU.
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png").arg("-r").arg(dpi.to_string());
        let output = with_cpu_semaphore(|| async {
            cmd.arg(path).arg(out_path).output().await.with_context(|| {
                format!("failed to run pdftocairo on {:?}", path.display())
            })
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let pages = PdfPages::from_tempdir(tmpdir)?;
        if pages.page_count() != expected_pages {
            warn!(
                expected_pages,
                rendered_pages = pages.page_count(),
                "pdftocairo rendered an unexpected number of pages"
            );
        }
        Ok(Box::new(pages))
    }
}

/// The pages of a rasterized PDF, stored as PNG files in a temporary directory.
pub struct PdfPages {
    /// Our temporary directory, which holds the rendered pages.
    ///
    /// This is released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    /// Iterator over the page files in the temporary directory.
    dir_iter: vec::IntoIter<PathBuf>,
    /// Number of pages in the document.
    page_count: usize,
}

impl PdfPages {
    /// A document with no pages.
    fn empty() -> Self {
        Self {
            tmpdir: None,
            dir_iter: vec![].into_iter(),
            page_count: 0,
        }
    }

    /// Create a [`PdfPages`] from a [`tempfile::TempDir`] full of PNG files
    /// named in lexical order.
    fn from_tempdir(tmpdir: tempfile::TempDir) -> Result<Self> {
        let tmpdir_path = tmpdir.path();
        let mut dir_paths = tmpdir_path
            .read_dir()
            .with_context(|| {
                format!(
                    "failed to read temporary directory {:?}",
                    tmpdir_path.display()
                )
            })?
            .map(|entry| {
                let entry = entry.with_context(|| {
                    format!(
                        "failed to read entry in temporary directory {:?}",
                        tmpdir_path.display()
                    )
                })?;
                Ok(entry.path())
            })
            .collect::<Result<Vec<_>>>()?;
        dir_paths.retain(|path| path.extension().is_some_and(|ext| ext == "png"));
        dir_paths.sort();

        let page_count = dir_paths.len();
        Ok(Self {
            tmpdir: Some(tmpdir),
            dir_iter: dir_paths.into_iter(),
            page_count,
        })
    }
}

impl PageSource for PdfPages {
    fn page_count(&self) -> usize {
        self.page_count
    }
}

impl Drop for PdfPages {
    fn drop(&mut self) {
        // Delete our temporary directory, if we have one.
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

impl Iterator for PdfPages {
    type Item = Result<DynamicImage>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.dir_iter.next()?;
        Some(read_page(&path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.dir_iter.size_hint()
    }
}

/// Read and decode a rendered page, deleting the file to recover space early.
fn read_page(path: &Path) -> Result<DynamicImage> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read file {:?}", path.display()))?;
    fs::remove_file(path)
        .with_context(|| format!("failed to delete file {:?}", path.display()))?;
    image::load_from_memory_with_format(&bytes, ImageFormat::Png)
        .with_context(|| format!("failed to decode page image {:?}", path.display()))
}

/// Check that `path` exists and contains a PDF, judging by its contents.
pub fn check_pdf(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("input file {:?} not found", path.display());
    }
    let kind = infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?;
    match kind {
        Some(kind) if kind.mime_type() == PDF_MIME_TYPE => Ok(()),
        Some(kind) => bail!(
            "input file {:?} is not a PDF (found {})",
            path.display(),
            kind.mime_type()
        ),
        None => bail!(
            "input file {:?} is not a PDF (unknown file type)",
            path.display()
        ),
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output).with_context(|| {
        format!(
            "failed to get page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Parse the `Pages:` property out of `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("no page count in pdfinfo output"))?;
    page_count
        .parse::<usize>()
        .with_context(|| format!("invalid page count {page_count:?}"))
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;

    #[test]
    fn test_is_error_line() {
        assert!(is_error_line("Error: something went wrong"));
        assert!(is_error_line("Syntax Error (123): Illegal character"));
        assert!(!is_error_line("Syntax Error: xref num 12 not found"));
        assert!(!is_error_line("Warning: something went wrong"));
    }

    #[test]
    fn pdfinfo_page_count_is_parsed() {
        let output = "Title:          Scan\nCreator:        scanner: v2\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_page_count(output).unwrap(), 12);
        assert!(parse_pdfinfo_page_count("Title: x\n").is_err());
        assert!(parse_pdfinfo_page_count("Pages: many\n").is_err());
    }

    #[test]
    fn pages_are_read_in_order_and_deleted() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("pages-test")?;
        let mut paths = vec![];
        // Written out of order, with widths matching page numbers.
        for page in [2u32, 10, 1] {
            let path = tmpdir.path().join(format!("scan-{page:02}.png"));
            RgbImage::new(page, 1).save(&path)?;
            paths.push(path);
        }
        fs::write(tmpdir.path().join("notes.txt"), "not a page")?;

        let mut pages = PdfPages::from_tempdir(tmpdir)?;
        assert_eq!(pages.page_count(), 3);
        let first = pages.next().unwrap()?;
        assert_eq!(first.width(), 1);
        assert!(!paths[2].exists());
        let widths = pages.map(|page| page.map(|p| p.width())).collect::<Result<Vec<_>>>()?;
        assert_eq!(widths, [2, 10]);
        Ok(())
    }

    #[test]
    fn corrupt_pages_are_errors() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("pages-test")?;
        fs::write(tmpdir.path().join("scan-1.png"), "not a png")?;
        let mut pages = PdfPages::from_tempdir(tmpdir)?;
        assert!(pages.next().unwrap().is_err());
        assert!(pages.next().is_none());
        Ok(())
    }

    #[test]
    fn check_pdf_rejects_missing_and_non_pdf_files() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("check-pdf")?;
        let missing = tmpdir.path().join("missing.pdf");
        let err = check_pdf(&missing).unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");

        let png = tmpdir.path().join("page.png");
        RgbImage::new(1, 1).save(&png)?;
        let err = check_pdf(&png).unwrap_err();
        assert!(err.to_string().contains("not a PDF (found image/png)"), "{err}");

        let text = tmpdir.path().join("notes.txt");
        fs::write(&text, "plain text")?;
        let err = check_pdf(&text).unwrap_err();
        assert!(err.to_string().contains("not a PDF"), "{err}");

        let pdf = tmpdir.path().join("doc.pdf");
        fs::write(&pdf, b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n")?;
        check_pdf(&pdf)?;
        Ok(())
    }
}
