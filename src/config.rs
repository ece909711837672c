/*!
 * Job configuration: the single read-only struct a job is constructed from.
 */

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::pattern::PatternSet;

/// Whether the job may, must, or must not use the acceleration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPolicy {
    /// Use the server when reachable; fall back to local I/O otherwise.
    Auto,
    /// Require the server; abort the job if it cannot be used.
    Required,
    /// Never attempt a server connection.
    Disabled,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self::Auto
    }
}

/// When to use unbuffered (direct) I/O versus buffered I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedIoPolicy {
    /// Unbuffered for files >= 16 MiB, buffered otherwise.
    Auto,
    Always,
    Never,
}

impl Default for BufferedIoPolicy {
    fn default() -> Self {
        Self::Auto
    }
}

/// Files at or above this size use unbuffered I/O under `BufferedIoPolicy::Auto`.
pub const UNBUFFERED_THRESHOLD_BYTES: u64 = 16 * 1024 * 1024;

/// Whole-file compression setting. `level == 0` means adaptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { enabled: false, level: 0 }
    }
}

impl CompressionConfig {
    pub fn off() -> Self {
        Self { enabled: false, level: 0 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.level != 0 && !(1..=22).contains(&self.level) {
            return Err(Error::ConfigError(format!(
                "compression level must be 0 (adaptive) or 1-22, got {}",
                self.level
            )));
        }
        Ok(())
    }
}

/// Which metadata facets a directory copy preserves beyond last-write-time
/// (last-write-time is always preserved, per the pipeline invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirCopyFlags {
    pub data: bool,
    pub attributes: bool,
    pub timestamps: bool,
}

impl DirCopyFlags {
    pub fn data_only() -> Self {
        Self { data: true, attributes: false, timestamps: false }
    }
}

/// Policy for symlinked directories encountered at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkPolicy {
    /// Replace a symlinked destination directory with a real directory
    /// before writing any child beneath it.
    Replace,
    /// Leave symlinked destination directories alone.
    Keep,
}

impl Default for SymlinkPolicy {
    fn default() -> Self {
        Self::Replace
    }
}

/// The complete, validated description of one copy job.
///
/// Constructed once (via [`JobConfig::validate`]) and never mutated again;
/// every worker thread holds only a shared reference to it.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,

    pub include: PatternSet,
    pub exclude: PatternSet,
    pub optional: PatternSet,

    /// How many directory levels below the roots discovery descends.
    /// `0` means source root's immediate children only; `usize::MAX` means unlimited.
    pub copy_subdir_depth: usize,
    pub copy_empty_dirs: bool,
    pub purge_destination: bool,
    pub flatten: bool,
    pub force_copy: bool,

    pub thread_count: usize,
    pub retry_count: u32,
    pub retry_wait_ms: u64,

    pub server_policy: ServerPolicy,
    pub server_addr: Option<String>,
    pub server_port: u16,
    pub server_connect_timeout_ms: u64,

    pub delta_threshold_bytes: u64,
    /// Whether the client builds and can send a delta script; the receive
    /// path always supports both whole-file and delta transfers.
    pub delta_send_enabled: bool,

    pub compression: CompressionConfig,
    pub buffered_io: BufferedIoPolicy,
    pub symlink_policy: SymlinkPolicy,
    pub dir_copy_flags: DirCopyFlags,
}

/// Default TCP port the acceleration service listens on.
pub const DEFAULT_SERVER_PORT: u16 = 14714;

const MIN_THREADS: usize = 1;
const MAX_THREADS: usize = 128;
const DEFAULT_THREADS: usize = 8;

impl JobConfig {
    /// Build a config for local-only work against two directories, useful
    /// for tests and for callers that do not need the CLI surface.
    pub fn local(source_root: PathBuf, dest_root: PathBuf) -> Self {
        Self {
            source_root,
            dest_root,
            include: PatternSet::match_all(),
            exclude: PatternSet::empty(),
            optional: PatternSet::empty(),
            copy_subdir_depth: usize::MAX,
            copy_empty_dirs: false,
            purge_destination: false,
            flatten: false,
            force_copy: false,
            thread_count: DEFAULT_THREADS,
            retry_count: 3,
            retry_wait_ms: 1000,
            server_policy: ServerPolicy::Disabled,
            server_addr: None,
            server_port: DEFAULT_SERVER_PORT,
            server_connect_timeout_ms: 5000,
            delta_threshold_bytes: 256 * 1024,
            delta_send_enabled: true,
            compression: CompressionConfig::off(),
            buffered_io: BufferedIoPolicy::Auto,
            symlink_policy: SymlinkPolicy::Replace,
            dir_copy_flags: DirCopyFlags { data: true, attributes: false, timestamps: false },
        }
    }

    /// Validate cross-field constraints and clamp `thread_count` into range.
    ///
    /// Returns a [`Error::ConfigError`] for anything that should abort the
    /// job before any work starts; never panics.
    pub fn validate(mut self) -> Result<Self> {
        if self.source_root.as_os_str().is_empty() {
            return Err(Error::ConfigError("source root must not be empty".into()));
        }
        if self.dest_root.as_os_str().is_empty() {
            return Err(Error::ConfigError("destination root must not be empty".into()));
        }
        self.thread_count = self.thread_count.clamp(MIN_THREADS, MAX_THREADS);
        self.compression.validate()?;
        if self.server_policy == ServerPolicy::Required && self.server_addr.is_none() {
            return Err(Error::ConfigError(
                "server policy is Required but no server address was given".into(),
            ));
        }
        if self.purge_destination && self.copy_subdir_depth < 2 {
            tracing::warn!(
                depth = self.copy_subdir_depth,
                "purge combined with a small subdir depth only purges within that depth; \
                 files deeper in the destination tree are left untouched"
            );
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_thread_count() {
        let mut cfg = JobConfig::local("/src".into(), "/dst".into());
        cfg.thread_count = 0;
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.thread_count, MIN_THREADS);

        let mut cfg = JobConfig::local("/src".into(), "/dst".into());
        cfg.thread_count = 9000;
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.thread_count, MAX_THREADS);
    }

    #[test]
    fn rejects_required_server_without_address() {
        let mut cfg = JobConfig::local("/src".into(), "/dst".into());
        cfg.server_policy = ServerPolicy::Required;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_invalid_compression_level() {
        let mut cfg = JobConfig::local("/src".into(), "/dst".into());
        cfg.compression = CompressionConfig { enabled: true, level: 99 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_roots() {
        let cfg = JobConfig::local("".into(), "/dst".into());
        assert!(cfg.validate().is_err());
    }
}
