//! The hidden per-volume activity log, `/fs.log`.
//!
//! The log is a regular file whose directory slot carries the deleted marker, so other
//! FAT implementations never list it. Each read or write of another file appends one
//! tab-separated line: timestamp, user, path, operation.

use fat_api_types::fs::FsOperation;
use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::hierarchy_tree::NodeId;
use crate::layout::LOG_FILE_NAME;
use crate::time::DateTime;
use crate::volume::Volume;

const LOG_PATH: &str = "/fs.log";

/// Login name of whoever runs the driver.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn format_line(at: DateTime, user: &str, path: &str, op: FsOperation) -> String {
    format!("{}\t{user}\t{path}\t{}\n", at.log_stamp(), op.as_str())
}

impl<D: BlockDevice> Volume<D> {
    fn activity_log_enabled(&self) -> bool {
        self.options.activity_log && self.options.is_writable()
    }

    /// Creates `/fs.log` in the root directory if it isn't there yet.
    pub(crate) fn ensure_activity_log(&mut self) -> Result<Option<NodeId>> {
        if !self.activity_log_enabled() {
            return Ok(None);
        }
        let root = self.root;
        self.ensure_children(root)?;
        if let Some(id) = self.cache.search(LOG_PATH) {
            return Ok(Some(id));
        }
        let id = self.create_in(root, LOG_FILE_NAME, false, true)?;
        debug!("fat32: created activity log");
        Ok(Some(id))
    }

    /// Appends a line for `op` on `path`. Failures are logged and otherwise ignored,
    /// since the request being recorded already succeeded.
    pub(crate) fn record_activity(&mut self, path: &str, op: FsOperation) {
        if !self.activity_log_enabled() {
            return;
        }
        if let Err(e) = self.append_activity(path, op) {
            warn!("fat32: activity log append failed: {e}");
        }
    }

    fn append_activity(&mut self, path: &str, op: FsOperation) -> Result<()> {
        let Some(id) = self.ensure_activity_log()? else { return Ok(()) };
        let line = format_line(DateTime::now(), &current_user(), path, op);
        let log = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
        let end = log.size() as u64;
        log.write(&mut self.table, line.as_bytes(), end)?;
        Ok(())
    }
}
