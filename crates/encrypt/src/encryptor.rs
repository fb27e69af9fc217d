//! The external encryption executable behind a substitutable port.

use crate::{EncryptError, EncryptResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

/// Default bound on a single encryption run.
pub const DEFAULT_ENCRYPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Produces an encrypted artifact from a plaintext payload.
///
/// Implementations write a file into `output_dir` named after the input
/// file. Success of the *run* is reported here; validity of the artifact
/// is judged separately by the caller's header check.
#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(&self, input: &Path, output_dir: &Path) -> EncryptResult<()>;
}

/// The production encryptor: a Java program invoked per datapack.
///
/// Invocation: `java -jar <jar> -d <input> -enc <output_dir> -node`.
/// The run is bounded by a timeout and the child is killed if it expires.
/// A non-zero exit is logged but does not fail the run by itself; some
/// encryptor builds exit non-zero after emitting warnings while still
/// producing a valid artifact, and the header check is the gate either
/// way.
#[derive(Debug, Clone)]
pub struct JavaEncryptor {
    jar: PathBuf,
    timeout: Duration,
}

impl JavaEncryptor {
    pub fn new(jar: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            jar: jar.into(),
            timeout,
        }
    }

    pub fn with_default_timeout(jar: impl Into<PathBuf>) -> Self {
        Self::new(jar, DEFAULT_ENCRYPT_TIMEOUT)
    }
}

#[async_trait]
impl Encryptor for JavaEncryptor {
    async fn encrypt(&self, input: &Path, output_dir: &Path) -> EncryptResult<()> {
        let mut command = tokio::process::Command::new("java");
        command
            .arg("-jar")
            .arg(&self.jar)
            .arg("-d")
            .arg(input)
            .arg("-enc")
            .arg(output_dir)
            .arg("-node")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            "running encryptor: java -jar {} -d {} -enc {} -node",
            self.jar.display(),
            input.display(),
            output_dir.display()
        );

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                EncryptError::ProcessFailed(format!(
                    "encryptor timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| EncryptError::ProcessFailed(format!("failed to run encryptor: {e}")))?;

        if !output.stdout.is_empty() {
            tracing::debug!(
                "encryptor stdout: {}",
                String::from_utf8_lossy(&output.stdout).trim_end()
            );
        }
        if !output.stderr.is_empty() {
            tracing::warn!(
                "encryptor stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        if !output.status.success() {
            tracing::warn!("encryptor exited with {}", output.status);
        }
        Ok(())
    }
}
