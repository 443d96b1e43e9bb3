//! I/O utilities.
//!
//! We only write one kind of output: a UTF-8 text file containing the OCRed
//! document. It is written once, at the very end of a run, and it must never
//! be left half-written if something goes wrong.

use std::{fs, io::Write as _};

use tempfile::NamedTempFile;

use super::blocking_iter_streams::spawn_blocking_propagating_panics;
use crate::prelude::*;

/// Write `text` to `path` as UTF-8, creating parent directories as needed.
///
/// The text is written to a temporary file next to `path`, synced to disk and
/// then renamed into place, so readers see either the old file or the complete
/// new one.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn write_text_output(path: &Path, text: &str) -> Result<()> {
    let path = path.to_owned();
    let text = text.to_owned();
    spawn_blocking_propagating_panics(move || write_text_output_sync(&path, &text))
        .await
}

/// Synchronous implementation of [`write_text_output`].
fn write_text_output_sync(path: &Path, text: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| {
        format!("failed to create output directory {:?}", parent.display())
    })?;

    let mut tmp = NamedTempFile::new_in(parent).with_context(|| {
        format!("failed to create temporary file in {:?}", parent.display())
    })?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("failed to write output for {:?}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync output for {:?}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to save output to {:?}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_parent_directories_and_writes_utf8() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("write-output")?;
        let path = dir.path().join("nested/deeper/out.txt");
        write_text_output(&path, "مرحبا\nhello\n").await?;
        assert_eq!(fs::read_to_string(&path)?, "مرحبا\nhello\n");
        Ok(())
    }

    #[tokio::test]
    async fn replaces_existing_output() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("write-output")?;
        let path = dir.path().join("out.txt");
        fs::write(&path, "old contents that are longer")?;
        write_text_output(&path, "new").await?;
        assert_eq!(fs::read_to_string(&path)?, "new");
        // Only the output file remains; the temporary file was renamed.
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }
}
