//! Progress display for the terminal.
//!
//! OCR runs report progress as a fraction of the whole document, plus a
//! free-form status line, so our main bar is a percentage bar rather than an
//! item counter. Log output goes through [`SafeStderrWriter`], which pauses the
//! bars while it writes.
//!
//! The bar and writer plumbing is adapted from `substudy` by Eric Kidd, which
//! is licensed under Apache-2.0 OR MIT. Used with permission.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// How often bars redraw themselves, even if nothing changed. OCR passes can
/// take a while, and a frozen bar looks like a hung program.
const STEADY_TICK: Duration = Duration::from_millis(250);

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress bars. Shared with the tracing writer, which may be called
    /// from any thread.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI, drawing to stderr.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a UI that never draws anything.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Hide all our progress bars completely. Used when page text is going to
    /// `stdout` and stderr isn't a terminal worth drawing on.
    pub fn hide_progress_bars(&self) {
        self.multi_progress
            .set_draw_target(ProgressDrawTarget::hidden());
    }

    /// Get a writer for `tracing` that won't tear our bars.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Create a bar showing how much of a document has been OCRed.
    pub fn new_percent_bar(&self, config: &ProgressConfig<'_>) -> PercentBar {
        let pb = ProgressBar::new(100).with_style(percent_progress_style());
        let pb = self.add(pb, config);
        PercentBar { pb }
    }

    /// Create a spinner, for work with no meaningful progress fraction.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        let sp = ProgressBar::new_spinner().with_style(default_spinner_style());
        self.add(sp, config)
    }

    /// Register `pb` with our bars and apply `config`.
    fn add(&self, pb: ProgressBar, config: &ProgressConfig<'_>) -> ProgressBar {
        let pb = self.multi_progress.add(pb);
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(STEADY_TICK);
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Print a line to standard output without disturbing any progress bars.
    pub fn println_stdout(&self, text: &str) {
        self.multi_progress.suspend(|| println!("{text}"));
    }
}

/// Configuration for a progress bar.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the progress bar.
    pub emoji: &'a str,
    /// Message to display in a running progress bar.
    pub msg: &'a str,
    /// Message to display in a progress bar when it is done.
    pub done_msg: &'a str,
}

/// A progress bar driven by a completion fraction in `0.0..=1.0`.
pub struct PercentBar {
    pb: ProgressBar,
}

impl PercentBar {
    /// Show `fraction` of the work as done.
    pub fn set_fraction(&self, fraction: f32) {
        self.pb.set_position(fraction_to_percent(fraction));
    }

    /// Replace the status message.
    pub fn set_status(&self, msg: impl Into<Cow<'static, str>>) {
        self.pb.set_message(msg);
    }

    /// Leave the bar where it is, showing `msg` instead of the done message.
    pub fn fail(&self, msg: impl Into<Cow<'static, str>>) {
        self.pb.abandon_with_message(msg);
    }

    /// The position shown, in percent.
    pub fn percent(&self) -> u64 {
        self.pb.position()
    }
}

/// Convert a completion fraction to a whole percentage. Out-of-range and NaN
/// values are clamped.
fn fraction_to_percent(fraction: f32) -> u64 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u64
}

fn percent_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{wide_msg} {pos:>3}% {elapsed_precise} {bar:30.cyan/blue}")
        .expect("bad progress bar template")
}

fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {prefix:3}{msg}")
        .expect("bad progress bar template")
}

/// A writer for `stderr` that suspends the progress bars around each write.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

// Every write method goes through `suspend`, or the default implementations
// would split one log line across several redraws.
impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_become_clamped_percentages() {
        assert_eq!(fraction_to_percent(0.0), 0);
        assert_eq!(fraction_to_percent(0.05), 5);
        assert_eq!(fraction_to_percent(0.1 + 0.4 * 0.85), 44);
        assert_eq!(fraction_to_percent(1.0), 100);
        assert_eq!(fraction_to_percent(1.7), 100);
        assert_eq!(fraction_to_percent(-0.2), 0);
        assert_eq!(fraction_to_percent(f32::NAN), 0);
    }

    #[test]
    fn percent_bar_tracks_fraction() {
        let ui = Ui::init_for_tests();
        let bar = ui.new_percent_bar(&ProgressConfig {
            emoji: "📄",
            msg: "OCRing pages",
            done_msg: "OCRed pages",
        });
        bar.set_fraction(0.95);
        assert_eq!(bar.percent(), 95);
        bar.set_status("Saving text...");
        bar.set_fraction(1.0);
        assert_eq!(bar.percent(), 100);
    }
}
