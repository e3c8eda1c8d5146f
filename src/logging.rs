use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The `<out>.log` file of a run. Every line written to it is also emitted
/// as a tracing event.
pub struct RunLog {
    file: File,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create log file {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn info(&mut self, message: &str) -> Result<()> {
        info!("{message}");
        self.write(message)
    }

    /// Per-set detail; shown on the console only at debug level.
    pub fn detail(&mut self, message: &str) -> Result<()> {
        debug!("{message}");
        self.write(message)
    }

    pub fn warn(&mut self, message: &str) -> Result<()> {
        warn!("{message}");
        self.write(message)
    }

    fn write(&mut self, message: &str) -> Result<()> {
        writeln!(self.file, "{message}").context("write log file")
    }
}

/// Opens a report file for appending, creating it when absent.
pub fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {} for appending", path.display()))
}
