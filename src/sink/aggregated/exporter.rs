//! Metric exporters.
//!
//! Enum dispatch rather than trait objects keeps async dispatch free of
//! boxed futures. `PromFile` atomically rewrites a whole keyed-pair
//! snapshot on every publish (write-to-temp then rename); `TaggedFile`
//! appends semicolon-tagged samples stamped with log time, which is what
//! historical replays consume.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::debug;

use super::metric::MetricValues;
use super::render::{render_keyed, render_tagged, FixedLabels};

pub enum Exporter {
    PromFile(PromFileExporter),
    TaggedFile(TaggedFileExporter),
}

impl Exporter {
    /// Returns the exporter name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PromFile(_) => "prom_file",
            Self::TaggedFile(_) => "tagged_file",
        }
    }

    /// Initialize the exporter.
    pub async fn start(&mut self) -> Result<()> {
        match self {
            Self::PromFile(e) => e.start().await,
            Self::TaggedFile(e) => e.start().await,
        }
    }

    /// Publish one snapshot.
    pub async fn export(
        &self,
        values: &MetricValues,
        fixed: &FixedLabels,
        log_time: Option<NaiveDateTime>,
    ) -> Result<()> {
        match self {
            Self::PromFile(e) => e.export(values, fixed).await,
            Self::TaggedFile(e) => e.export(values, fixed, log_time).await,
        }
    }
}

/// Rewrites the keyed-pair snapshot atomically on each publish.
pub struct PromFileExporter {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl PromFileExporter {
    pub fn new(path: PathBuf) -> Self {
        let mut tmp_path = path.clone();
        tmp_path.set_extension("tmp");
        Self { path, tmp_path }
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        Ok(())
    }

    async fn export(&self, values: &MetricValues, fixed: &FixedLabels) -> Result<()> {
        let rendered = render_keyed(values, fixed);

        tokio::fs::write(&self.tmp_path, rendered.as_bytes())
            .await
            .with_context(|| format!("writing {}", self.tmp_path.display()))?;
        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .with_context(|| format!("renaming to {}", self.path.display()))?;

        debug!(path = %self.path.display(), bytes = rendered.len(), "wrote metrics snapshot");
        Ok(())
    }
}

/// Appends semicolon-tagged samples with log-time timestamps.
pub struct TaggedFileExporter {
    path: PathBuf,
}

impl TaggedFileExporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        // Start each run from an empty file.
        tokio::fs::write(&self.path, b"")
            .await
            .with_context(|| format!("truncating {}", self.path.display()))?;
        Ok(())
    }

    async fn export(
        &self,
        values: &MetricValues,
        fixed: &FixedLabels,
        log_time: Option<NaiveDateTime>,
    ) -> Result<()> {
        // Without log time there is nothing meaningful to stamp yet.
        let Some(log_time) = log_time else {
            return Ok(());
        };

        let rendered = render_tagged(values, fixed, log_time.and_utc().timestamp());
        if rendered.is_empty() {
            return Ok(());
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;

        use tokio::io::AsyncWriteExt;
        file.write_all(rendered.as_bytes())
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;

        Ok(())
    }
}
