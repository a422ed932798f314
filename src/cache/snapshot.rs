//! On-demand pool dumps to disk.
//!
//! [`DumpConfig`] names the directory and filename prefix; each dump
//! lands in a fresh `<prefix>_<8 hex chars>.txt` so files are never
//! overwritten. The directory is created on demand. Formatting lives
//! here too so the file layout is testable without a filesystem.

use std::fs::{DirBuilder, OpenOptions};
use std::io::ErrorKind;
#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{MuninnError, Result};

use super::pool::GroupSnapshot;

/// Configuration for diagnostic dumps.
///
/// ```rust
/// # use muninn::DumpConfig;
/// let config = DumpConfig::new().dir("/var/tmp").prefix("fsvc");
/// ```
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Directory dumps are written to. Default: `/tmp`.
    pub dir: PathBuf,
    /// Filename prefix. Default: `dump`.
    pub prefix: String,
    /// Mode for created dump files. Default: `0644`.
    pub file_mode: u32,
    /// Mode for the dump directory when created on demand. Default:
    /// `0755`.
    pub dir_mode: u32,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp"),
            prefix: "dump".to_string(),
            file_mode: 0o644,
            dir_mode: 0o755,
        }
    }
}

impl DumpConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dump directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the filename prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Format one dump line per group: the waiting counters, then each
/// entry's name, address and CPU accounting, tab-separated.
pub(crate) fn format_groups(groups: &[GroupSnapshot]) -> Vec<String> {
    groups
        .iter()
        .map(|group| {
            let mut line = format!(
                "svc_waiting:{}\tqueue_len:{}",
                group.svc_waiting, group.queue_len
            );
            for entry in &group.svcs {
                line.push_str(&format!(
                    "\tfunction_name:{}\tfn_svc_address:{}\tcurrent_cpu_usage:{}\tcpu_limit:{}",
                    entry.function_name, entry.address, entry.current_cpu_usage, entry.cpu_limit
                ));
            }
            line
        })
        .collect()
}

/// Write `lines` to a fresh dump file under `config.dir`.
///
/// The directory is created on demand with `config.dir_mode`. Returns
/// the path of the created file.
pub(crate) async fn write_dump(config: &DumpConfig, lines: &[String]) -> Result<PathBuf> {
    ensure_dir(&config.dir, config.dir_mode).await?;

    let token = uuid::Uuid::new_v4().simple().to_string();
    let path = config.dir.join(format!("{}_{}.txt", config.prefix, &token[..8]));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(config.file_mode);
    let std_file = options.open(&path).map_err(|e| {
        MuninnError::Internal(format!("creating dump file {}: {e}", path.display()))
    })?;
    let mut file = File::from_std(std_file);

    let mut data = lines.join("\n");
    data.push('\n');
    file.write_all(data.as_bytes())
        .await
        .map_err(|e| MuninnError::Internal(format!("writing dump {}: {e}", path.display())))?;
    file.flush()
        .await
        .map_err(|e| MuninnError::Internal(format!("flushing dump {}: {e}", path.display())))?;

    debug!(path = %path.display(), lines = lines.len(), "wrote pool dump");
    Ok(path)
}

async fn ensure_dir(dir: &Path, mode: u32) -> Result<()> {
    match tokio::fs::metadata(dir).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let mut builder = DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(mode);
            builder.create(dir).map_err(|e| {
                MuninnError::Internal(format!("creating dump directory {}: {e}", dir.display()))
            })
        }
        Err(e) => Err(MuninnError::Internal(format!(
            "inspecting dump directory {}: {e}",
            dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::pool::EntrySnapshot;
    use crate::types::Quantity;

    #[test]
    fn format_groups_one_line_per_group() {
        let groups = vec![
            GroupSnapshot {
                svc_waiting: 1,
                queue_len: 2,
                svcs: vec![EntrySnapshot {
                    address: "10.0.0.1:8080".into(),
                    function_name: "hello".into(),
                    current_cpu_usage: Quantity::millis(120),
                    cpu_limit: Quantity::millis(500),
                }],
            },
            GroupSnapshot {
                svc_waiting: 0,
                queue_len: 0,
                svcs: vec![],
            },
        ];
        let lines = format_groups(&groups);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "svc_waiting:1\tqueue_len:2\tfunction_name:hello\tfn_svc_address:10.0.0.1:8080\tcurrent_cpu_usage:0.12\tcpu_limit:0.5"
        );
        assert_eq!(lines[1], "svc_waiting:0\tqueue_len:0");
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = DumpConfig::new().dir("/var/tmp").prefix("fsvc");
        assert_eq!(config.dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.prefix, "fsvc");
        assert_eq!(config.file_mode, 0o644);
        assert_eq!(config.dir_mode, 0o755);
    }
}
