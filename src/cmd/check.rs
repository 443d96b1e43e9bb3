//! The `check` subcommand.

use clap::Args;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::EngineOpts;

/// Options for the `check` subcommand.
#[derive(Debug, Args)]
pub struct CheckOpts {
    #[clap(flatten)]
    pub engine_opts: EngineOpts,
}

/// The `check` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_check(ui: Ui, opts: &CheckOpts) -> Result<()> {
    let engine = opts.engine_opts.engine().await?;
    let languages = &opts.engine_opts.languages;

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🔎",
        msg: "Checking OCR engine",
        done_msg: "Checked OCR engine",
    });
    let result = engine.check_ready(languages).await;
    spinner.finish_and_clear();

    if let Err(err) = result {
        let advice = if err.is_installation_problem() {
            "install it, then run `check` again"
        } else {
            "run with RUST_LOG=debug for details"
        };
        return Err(anyhow::Error::from(err).context(format!(
            "{} is not ready for {} ({})",
            engine.name(),
            languages,
            advice
        )));
    }
    ui.println_stdout(&format!("{} is ready for {}", engine.name(), languages));
    Ok(())
}
