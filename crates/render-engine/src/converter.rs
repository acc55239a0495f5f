//! External video conversion.
//!
//! The converter is an opaque program invoked as `converter <input> <output>`.
//! Exit status 0 means success, anything else is failure; its stdout and
//! stderr are captured for diagnosis. [`ConverterAdapter`] adds the check
//! that success actually produced a non-empty file at the requested path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use animmuf_common::config::AppConfig;
use animmuf_common::error::ConversionError;
use async_trait::async_trait;
use tokio::process::Command;

/// A program that turns the intermediate animation into the final video.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `input` into `output`.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;

    /// Converter name for logs.
    fn name(&self) -> &str;
}

/// Runs an executable as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    log_path: Option<PathBuf>,
    name: String,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            program,
            args: Vec::new(),
            timeout,
            log_path: None,
            name,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.converter, config.converter_timeout)
            .with_log(&config.converter_log)
    }

    /// Arguments placed before the input and output paths.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Write the command line and captured output of every run to `path`.
    pub fn with_log(mut self, path: &Path) -> Self {
        self.log_path = Some(path.to_path_buf());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether the program can be found: an existing file for a path, or a
    /// `PATH` entry for a bare name.
    pub fn is_available(&self) -> bool {
        if self.program.components().count() > 1 {
            return self.program.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(&self.program).is_file()))
            .unwrap_or(false)
    }

    fn command_line(&self, input: &Path, output: &Path) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.push(input.display().to_string());
        parts.push(output.display().to_string());
        parts.join(" ")
    }

    async fn write_log(&self, command_line: &str, status: &str, captured: &str) {
        let Some(path) = &self.log_path else {
            return;
        };
        let body = format!("$ {command_line}\n{captured}\n[{status}]\n");
        if let Err(err) = tokio::fs::write(path, body).await {
            tracing::warn!(error = %err, path = %path.display(), "Failed to write converter log");
        }
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let command_line = self.command_line(input, output);
        tracing::info!(command = %command_line, "Running converter");

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConversionError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                self.write_log(&command_line, "timed out", "").await;
                return Err(ConversionError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };
        let out = result.map_err(|e| ConversionError::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })?;

        let mut captured = String::from_utf8_lossy(&out.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&out.stderr));
        let captured = captured.trim().to_string();
        self.write_log(&command_line, &out.status.to_string(), &captured)
            .await;

        if !out.status.success() {
            tracing::error!(status = %out.status, output = %captured, "Converter failed");
            return Err(ConversionError::NonZeroExit {
                exit_code: out.status.code(),
                captured_output: captured,
            });
        }

        tracing::debug!(output = %captured, "Converter finished");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sibling path a file is written to before being renamed into place:
/// `muf.mp4` becomes `muf.partial.mp4`, keeping the extension so tools
/// that pick a format from it still work.
pub fn staging_path(path: &Path) -> PathBuf {
    tagged_path(path, "partial")
}

/// Where the previous video waits while a new one is converted:
/// `muf.mp4` becomes `muf.previous.mp4`.
pub fn backup_path(path: &Path) -> PathBuf {
    tagged_path(path, "previous")
}

fn tagged_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{tag}"),
    };
    path.with_file_name(name)
}

/// Runs a [`Converter`] and enforces its post-condition.
///
/// The converter is handed the real output path. Any previous video is
/// moved to [`backup_path`] first and put back if the conversion fails or
/// leaves an empty file, so a failed run never destroys the last good video.
#[derive(Clone)]
pub struct ConverterAdapter {
    converter: Arc<dyn Converter>,
}

impl ConverterAdapter {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self { converter }
    }

    pub fn name(&self) -> &str {
        self.converter.name()
    }

    /// Convert `input` to `output`, returning the output path.
    pub async fn convert_checked(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<PathBuf, ConversionError> {
        let backup = backup_path(output);
        let had_previous = match tokio::fs::rename(output, &backup).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(ConversionError::Finalize {
                    path: output.to_path_buf(),
                    source,
                })
            }
        };

        match self.run(input, output).await {
            Ok(size) => {
                if had_previous {
                    if let Err(err) = tokio::fs::remove_file(&backup).await {
                        tracing::warn!(error = %err, path = %backup.display(), "Failed to remove previous video");
                    }
                }
                tracing::info!(
                    converter = self.converter.name(),
                    path = %output.display(),
                    bytes = size,
                    "Video written"
                );
                Ok(output.to_path_buf())
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(output).await;
                if had_previous {
                    if let Err(e) = tokio::fs::rename(&backup, output).await {
                        tracing::error!(error = %e, path = %backup.display(), "Failed to restore previous video");
                    }
                }
                Err(err)
            }
        }
    }

    /// Run the converter and return the size of what it wrote.
    async fn run(&self, input: &Path, output: &Path) -> Result<u64, ConversionError> {
        self.converter.convert(input, output).await?;

        let size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(ConversionError::EmptyOutput {
                path: output.to_path_buf(),
            });
        }
        Ok(size)
    }
}
