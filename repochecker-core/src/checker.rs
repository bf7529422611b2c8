//! External repository consistency checker.
//!
//! The checker is an opaque program: it gets a directory of downloaded
//! binaries and a comma-separated list of binary names to ignore, exits 0
//! when the set is consistent and otherwise explains itself on its output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::CheckerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub success: bool,
    /// Captured output, used verbatim as the review message on failure.
    pub output: String,
}

#[async_trait]
pub trait ConsistencyChecker: Send + Sync {
    async fn check(&self, dir: &Path, ignore: &[String]) -> Result<CheckOutcome, CheckerError>;
}

/// Runs the checker script with perl under the C locale.
#[derive(Debug, Clone)]
pub struct ScriptChecker {
    interpreter: String,
    script: PathBuf,
}

impl ScriptChecker {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: "perl".to_string(),
            script: script.into(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

#[async_trait]
impl ConsistencyChecker for ScriptChecker {
    async fn check(&self, dir: &Path, ignore: &[String]) -> Result<CheckOutcome, CheckerError> {
        info!(
            "Running {} on {} ({} ignored)",
            self.script.display(),
            dir.display(),
            ignore.len()
        );

        let output = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(dir)
            .arg(ignore.join(","))
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CheckerError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!("Checker exited with {}", output.status);

        Ok(CheckOutcome {
            success: output.status.success(),
            output: text,
        })
    }
}
