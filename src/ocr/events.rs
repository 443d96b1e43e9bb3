//! Events reported by a running OCR job.

use tokio::sync::mpsc;

use crate::prelude::*;

/// How many events may be queued before the worker waits for the receiver.
pub const EVENT_BUFFER_SIZE: usize = 64;

/// Something that happened while processing a document.
#[derive(Clone, Debug, PartialEq)]
pub enum OcrEvent {
    /// Overall progress, from 0.0 to 1.0. Never decreases.
    Progress(f32),
    /// A human-readable status message.
    Status(String),
    /// A page has been recognized.
    PageText {
        /// 1-based page number.
        page_number: usize,
        /// Total number of pages.
        page_count: usize,
        /// The consensus text for this page.
        page_text: String,
        /// The document text so far, including this page.
        document_text: String,
    },
    /// The job succeeded. This is always the last event of a successful job.
    Finished(DocumentSummary),
    /// The job failed. This is always the last event of a failed job.
    Error(String),
}

/// Summary of a completed job.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSummary {
    /// Where we wrote the text.
    pub output_path: PathBuf,
    /// Number of pages processed.
    pub page_count: usize,
    /// Number of OCR passes per page.
    pub num_passes: usize,
}

/// Sends [`OcrEvent`]s from the worker, enforcing that progress only goes up.
///
/// If the receiver is dropped, sending fails. The worker treats this as a
/// request to stop.
pub struct EventSender {
    tx: mpsc::Sender<OcrEvent>,
    last_progress: Option<f32>,
}

impl EventSender {
    /// Create a new sender and its matching receiver.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OcrEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let sender = Self {
            tx,
            last_progress: None,
        };
        (sender, rx)
    }

    /// Send an event.
    pub async fn send(&self, event: OcrEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("OCR event receiver closed, stopping"))
    }

    /// Report progress. Values are clamped to `0.0..=1.0`, and a value that is
    /// not greater than the last one reported is silently dropped.
    pub async fn progress(&mut self, value: f32) -> Result<()> {
        let value = value.clamp(0.0, 1.0);
        if self.last_progress.is_some_and(|last| value <= last) {
            trace!(value, "Skipping non-increasing progress");
            return Ok(());
        }
        self.last_progress = Some(value);
        self.send(OcrEvent::Progress(value)).await
    }

    /// Report a status message.
    pub async fn status(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        debug!(status = %message, "OCR status");
        self.send(OcrEvent::Status(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_only_increases() -> Result<()> {
        let (mut sender, mut rx) = EventSender::channel(16);
        for value in [0.05, 0.05, 0.1, 0.07, 0.5, 2.0, 1.0] {
            sender.progress(value).await?;
        }
        drop(sender);

        let mut seen = vec![];
        while let Some(event) = rx.recv().await {
            match event {
                OcrEvent::Progress(value) => seen.push(value),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(seen, [0.05, 0.1, 0.5, 1.0]);
        Ok(())
    }

    #[tokio::test]
    async fn closed_receiver_is_an_error() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        assert!(sender.status("hello").await.is_err());
    }
}
