//! ALSA `arecord` recorder.
//!
//! Runs `arecord` as a child process writing a 16-bit WAV file named after
//! the start time. The child is killed if the recording future is dropped.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Local;
use tokio::process::Command;
use tracing::{debug, info};

use super::Recorder;
use crate::data::Recording;
use crate::error::{Result, WaspiError};

/// Capture parameters
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Executable to run (normally `arecord`)
    pub command: String,
    /// ALSA capture device
    pub device: String,
    pub duration_s: u32,
    pub samplerate: u32,
    pub channels: u16,
    pub output_dir: PathBuf,
}

/// [`Recorder`] backed by `arecord`
#[derive(Debug, Clone)]
pub struct ArecordRecorder {
    settings: RecorderSettings,
}

impl ArecordRecorder {
    pub fn new(settings: RecorderSettings) -> Self {
        Self { settings }
    }

    /// Arguments for one capture into `path`
    pub fn args(&self, path: &std::path::Path) -> Vec<String> {
        vec![
            "-D".to_string(),
            self.settings.device.clone(),
            "-f".to_string(),
            "S16_LE".to_string(),
            "-c".to_string(),
            self.settings.channels.to_string(),
            "-r".to_string(),
            self.settings.samplerate.to_string(),
            "-d".to_string(),
            self.settings.duration_s.to_string(),
            "-t".to_string(),
            "wav".to_string(),
            path.display().to_string(),
        ]
    }
}

#[async_trait]
impl Recorder for ArecordRecorder {
    fn duration_s(&self) -> u32 {
        self.settings.duration_s
    }

    async fn record(&self) -> Result<Recording> {
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        let now = Local::now();
        let path = self
            .settings
            .output_dir
            .join(format!("{}.wav", now.format("%Y%m%d_%H%M%S")));

        debug!("Running {} for {} s", self.settings.command, self.settings.duration_s);

        let output = Command::new(&self.settings.command)
            .args(self.args(&path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                WaspiError::Recording(format!("cannot run {}: {}", self.settings.command, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WaspiError::Recording(format!(
                "{} exited with {}: {}",
                self.settings.command,
                output.status,
                stderr.trim()
            )));
        }

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(WaspiError::Recording(format!(
                "{} produced no file at {}",
                self.settings.command,
                path.display()
            )));
        }

        info!("Recorded {}", path.display());

        Ok(Recording {
            path,
            datetime: now,
            duration: self.settings.duration_s,
            samplerate: self.settings.samplerate,
            channels: self.settings.channels,
        })
    }
}
