// SPDX-License-Identifier: GPL-3.0-only

//! External command execution

use std::process::Command;

use storage_contracts::traits::command::render;
use storage_contracts::{CommandOutput, CommandRunner, StorageError, StorageErrorKind};
use tracing::{debug, warn};
use which::which;

/// Runs programs found on `PATH` with a C locale so their output parses stably.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Whether `program` can be resolved on `PATH`
    pub fn is_available(program: &str) -> bool {
        which(program).is_ok()
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError> {
        let rendered = render(program, args);
        let binary = which(program).map_err(|_| {
            StorageError::new(
                StorageErrorKind::ExternalToolFailure,
                format!("{program} is not installed"),
            )
        })?;

        debug!("Running {}", rendered);
        let output = Command::new(&binary)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .map_err(|e| {
                StorageError::new(
                    StorageErrorKind::ExternalToolFailure,
                    format!("Failed to execute {rendered}: {e}"),
                )
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success() {
            warn!("{} exited with {:?}: {}", rendered, result.code, result.stderr.trim());
        }

        Ok(result)
    }
}
