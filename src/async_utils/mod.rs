//! Asynchronous utilities for use with Tokio.
//!
//! OCR is a mix of slow external processes and CPU-bound image work. The
//! helpers here keep both off the async executor's threads, and give the
//! background OCR worker a handle that callers can await.

use std::{pin::Pin, process::Output};

use futures::Stream;
use tokio::task::JoinHandle;

use crate::prelude::*;

pub mod blocking_iter_streams;
pub mod io;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// A handle for a background worker. This can be awaited to wait for the
/// worker to complete, and to collect its final error, if any.
pub struct JoinWorker {
    /// The task handle.
    future: BoxedFuture<Result<()>>,
}

impl JoinWorker {
    /// Create a new worker handle from a [`JoinHandle`].
    pub fn from_handle(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            future: Box::pin(async move { handle.await.context("could not join task")? }),
        }
    }

    /// Wait for the worker to complete.
    pub async fn join(self) -> Result<()> {
        self.future.await
    }
}

/// Report any command failures, and include any error output.
///
/// The output of standard error and standard output will be logged. Standard
/// error may be optionally checked line-by-line to determine if the command
/// failed even though it exited successfully.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );
    if !stderr.trim().is_empty() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line {
            if stderr.lines().any(is_error_line) {
                return Err(anyhow!(
                    "{} printed error output:\n{}",
                    command_name,
                    stderr,
                ));
            }
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt as _;
    use std::process::ExitStatus;

    use regex::Regex;

    use super::*;

    fn output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: vec![],
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn successful_command_passes() {
        assert!(check_for_command_failure("true", &output(0, ""), None).is_ok());
    }

    #[test]
    fn nonzero_exit_is_reported_with_stderr() {
        let err = check_for_command_failure("false", &output(2, "bad input"), None)
            .unwrap_err()
            .to_string();
        assert!(err.contains("exit code 2"));
        assert!(err.contains("bad input"));
    }

    #[test]
    fn error_lines_fail_successful_commands() {
        let regex = Regex::new(r"(?i)error").unwrap();
        let matcher = |line: &str| regex.is_match(line);
        let out = output(0, "Syntax Warning: odd\nSyntax Error: worse");
        assert!(check_for_command_failure("tool", &out, Some(&matcher)).is_err());
        let out = output(0, "Syntax Warning: odd");
        assert!(check_for_command_failure("tool", &out, Some(&matcher)).is_ok());
    }
}
