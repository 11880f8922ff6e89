// SPDX-License-Identifier: GPL-3.0-only

use crate::StorageError;

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Process execution seam for the mount/unmount/listing utilities
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion, capturing its output.
    ///
    /// Only failures to launch are errors; a non-zero exit is reported in
    /// the returned [`CommandOutput`].
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError>;

    /// Like [`CommandRunner::run`], but a non-zero exit becomes an
    /// `ExternalToolFailure` carrying stderr.
    fn run_checked(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError> {
        let output = self.run(program, args)?;
        if !output.success() {
            let stderr = if output.stderr.trim().is_empty() {
                format!("exit status {:?}", output.code)
            } else {
                output.stderr.clone()
            };
            return Err(StorageError::tool_failure(&render(program, args), &stderr));
        }
        Ok(output)
    }
}
