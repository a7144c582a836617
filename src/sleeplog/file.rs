// Per-session sleep log file
//
// One file per session, named by the timestamp of its first record:
//   <dir>/<YYYY-MM-DD-HH-MM-SS>.log.inprogress   while being written
//   <dir>/<YYYY-MM-DD-HH-MM-SS>.log              once finalized (atomic rename)

use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{MonitorError, Result};

pub const LOG_EXTENSION: &str = ".log";
pub const IN_PROGRESS_SUFFIX: &str = ".inprogress";

/// Open append handle of the current session log
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
    lines: u64,
}

impl LogFile {
    /// Create `<dir>/<stamp>.log.inprogress`, creating `dir` if needed.
    pub async fn create(dir: &Path, stamp: &str) -> Result<Self> {
        fs::create_dir_all(dir).await.map_err(|source| MonitorError::LogFile {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(format!("{}{}{}", stamp, LOG_EXTENSION, IN_PROGRESS_SUFFIX));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| MonitorError::LogFile {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), "Opened sleep log");
        Ok(Self {
            path,
            file,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Append one record and flush it to the OS before returning.
    pub async fn append_line(&mut self, line: &str) -> Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        self.file
            .write_all(record.as_bytes())
            .await
            .map_err(|source| self.error(source))?;
        self.file.flush().await.map_err(|source| self.error(source))?;
        self.lines += 1;
        Ok(())
    }

    /// Close the file and drop the in-progress marker from its name.
    pub async fn finalize(mut self) -> Result<PathBuf> {
        self.file.flush().await.map_err(|source| self.error(source))?;
        let LogFile { path, file, lines } = self;
        drop(file);

        let final_path = finalized_path(&path);
        fs::rename(&path, &final_path)
            .await
            .map_err(|source| MonitorError::LogFile {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %final_path.display(), lines, "Finalized sleep log");
        Ok(final_path)
    }

    fn error(&self, source: std::io::Error) -> MonitorError {
        MonitorError::LogFile {
            path: self.path.clone(),
            source,
        }
    }
}

/// Name of a log once the in-progress marker is removed
pub fn finalized_path(path: &Path) -> PathBuf {
    let name = path.to_string_lossy();
    match name.strip_suffix(IN_PROGRESS_SUFFIX) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}
