/*!
 * Command-line front end: a `clap` derive struct and its conversion into a
 * validated [`JobConfig`]. Deliberately a conventional long-flag grammar
 * rather than a legacy slash-flag syntax.
 */

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{
    BufferedIoPolicy, CompressionConfig, DirCopyFlags, JobConfig, ServerPolicy, SymlinkPolicy,
    DEFAULT_SERVER_PORT,
};
use crate::discovery::read_include_file;
use crate::error::{Error, Result};
use crate::logging::LogOptions;
use crate::pattern::PatternSet;

#[derive(Debug, Parser)]
#[command(name = "turbocopy", version, about = "Accelerated bulk file-replication tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Source directory.
    pub source: Option<PathBuf>,
    /// Destination directory.
    pub dest: Option<PathBuf>,

    /// How many directory levels below the roots to descend (default: unlimited).
    #[arg(long, value_name = "N")]
    pub depth: Option<usize>,
    /// Create empty destination directories that have no copyable files.
    #[arg(long)]
    pub copy_empty_dirs: bool,
    /// Delete destination entries not present in source.
    #[arg(long)]
    pub purge: bool,
    /// Shorthand for --purge --force.
    #[arg(long)]
    pub mirror: bool,
    /// Leave symlinked destination directories alone instead of replacing them.
    #[arg(long)]
    pub keep_symlinks: bool,
    /// Copy even when destination already matches (lastWrite, size).
    #[arg(long)]
    pub force: bool,
    /// Only these names/wildcards are eligible (repeatable).
    #[arg(long = "include")]
    pub include: Vec<String>,
    /// Read additional include patterns from this file, one per line.
    #[arg(long, value_name = "PATH")]
    pub include_from: Option<PathBuf>,
    /// Exclude matching names/wildcards (repeatable).
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
    /// A failure to copy a matching name is not counted as a job failure.
    #[arg(long = "optional")]
    pub optional: Vec<String>,

    /// Worker thread count (clamped to [1, 128]).
    #[arg(long, short = 'j', default_value_t = 8)]
    pub threads: usize,
    /// Retry attempts per file before it is marked failed.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,
    /// Milliseconds to wait between retries.
    #[arg(long, default_value_t = 1000)]
    pub retry_wait_ms: u64,

    /// Never use the acceleration service.
    #[arg(long)]
    pub no_server: bool,
    /// Require the acceleration service; abort if it is unreachable.
    #[arg(long)]
    pub require_server: bool,
    /// Acceleration service address (host or UNC-style `\\host\share`).
    #[arg(long)]
    pub server_addr: Option<String>,
    /// Acceleration service port.
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    pub server_port: u16,
    /// Connect timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub server_connect_timeout_ms: u64,

    /// Enable whole-file compression.
    #[arg(long)]
    pub compress: bool,
    /// Compression level (1-22), or 0 for adaptive.
    #[arg(long, default_value_t = 0)]
    pub compress_level: i32,
    /// Minimum file size, in bytes, eligible for delta transfer.
    #[arg(long, default_value_t = 256 * 1024)]
    pub delta_threshold: u64,
    /// Disable client-side delta script construction (receive path is unaffected).
    #[arg(long)]
    pub no_delta_send: bool,

    /// Copy file attribute bits in addition to content.
    #[arg(long)]
    pub dcopy_attributes: bool,
    /// Copy timestamps beyond the mandatory last-write-time.
    #[arg(long)]
    pub dcopy_timestamps: bool,

    /// Write log lines to this file instead of stdout (JSON formatted).
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,
    /// Suppress per-file log lines; only the final summary is emitted.
    #[arg(long)]
    pub log_min: bool,
    /// Emit debug-level log lines.
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query the acceleration service's status and exit.
    Status {
        #[arg(long)]
        server_addr: String,
        #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
        server_port: u16,
        #[arg(long, default_value_t = 5000)]
        server_connect_timeout_ms: u64,
    },
}

impl Cli {
    pub fn log_options(&self) -> LogOptions {
        LogOptions { verbose: self.verbose, log_file: self.log.clone(), minimal: self.log_min }
    }
}

fn collect_patterns(explicit: &[String], from_file: &Option<PathBuf>) -> Result<PatternSet> {
    let mut patterns: Vec<String> = explicit.to_vec();
    if let Some(path) = from_file {
        patterns.extend(read_include_file(path)?);
    }
    if patterns.is_empty() {
        Ok(PatternSet::empty())
    } else {
        Ok(PatternSet::new(patterns))
    }
}

impl TryFrom<Cli> for JobConfig {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let source = cli.source.ok_or_else(|| Error::ConfigError("missing source directory".into()))?;
        let dest = cli.dest.ok_or_else(|| Error::ConfigError("missing destination directory".into()))?;

        let include = collect_patterns(&cli.include, &cli.include_from)?;
        let include = if include.is_empty() { PatternSet::match_all() } else { include };
        let exclude = collect_patterns(&cli.exclude, &None)?;
        let optional = collect_patterns(&cli.optional, &None)?;

        let purge_destination = cli.purge || cli.mirror;
        let force_copy = cli.force || cli.mirror;

        let server_policy = if cli.no_server {
            ServerPolicy::Disabled
        } else if cli.require_server {
            ServerPolicy::Required
        } else if cli.server_addr.is_some() {
            ServerPolicy::Auto
        } else {
            ServerPolicy::Disabled
        };

        let config = JobConfig {
            source_root: source,
            dest_root: dest,
            include,
            exclude,
            optional,
            copy_subdir_depth: cli.depth.unwrap_or(usize::MAX),
            copy_empty_dirs: cli.copy_empty_dirs,
            purge_destination,
            flatten: false,
            force_copy,
            thread_count: cli.threads,
            retry_count: cli.retries,
            retry_wait_ms: cli.retry_wait_ms,
            server_policy,
            server_addr: normalize_server_addr(cli.server_addr),
            server_port: cli.server_port,
            server_connect_timeout_ms: cli.server_connect_timeout_ms,
            delta_threshold_bytes: cli.delta_threshold,
            delta_send_enabled: !cli.no_delta_send,
            compression: CompressionConfig { enabled: cli.compress, level: cli.compress_level },
            buffered_io: BufferedIoPolicy::Auto,
            symlink_policy: if cli.keep_symlinks { SymlinkPolicy::Keep } else { SymlinkPolicy::Replace },
            dir_copy_flags: DirCopyFlags {
                data: true,
                attributes: cli.dcopy_attributes,
                timestamps: cli.dcopy_timestamps,
            },
        };

        config.validate()
    }
}

/// Normalize a UNC-style `\\host\share` address to `//host/share` so the
/// rest of the codebase only ever deals with forward slashes.
fn normalize_server_addr(addr: Option<String>) -> Option<String> {
    addr.map(|a| a.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("turbocopy").chain(args.iter().copied()))
    }

    #[test]
    fn minimal_copy_invocation_parses() {
        let cli = parse(&["/src", "/dst"]);
        let config = JobConfig::try_from(cli).unwrap();
        assert_eq!(config.source_root, PathBuf::from("/src"));
        assert_eq!(config.dest_root, PathBuf::from("/dst"));
        assert_eq!(config.thread_count, 8);
    }

    #[test]
    fn mirror_implies_purge_and_force() {
        let cli = parse(&["/src", "/dst", "--mirror"]);
        let config = JobConfig::try_from(cli).unwrap();
        assert!(config.purge_destination);
        assert!(config.force_copy);
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let cli = parse(&[]);
        assert!(JobConfig::try_from(cli).is_err());
    }

    #[test]
    fn require_server_without_address_is_rejected_at_validation() {
        let cli = parse(&["/src", "/dst", "--require-server"]);
        assert!(JobConfig::try_from(cli).is_err());
    }

    #[test]
    fn status_subcommand_parses_independently_of_positional_args() {
        let cli = parse(&["status", "--server-addr", "builder01"]);
        match cli.command {
            Some(Command::Status { server_addr, .. }) => assert_eq!(server_addr, "builder01"),
            _ => panic!("expected Status subcommand"),
        }
    }

    #[test]
    fn unc_style_server_address_is_normalized() {
        let cli = parse(&["/src", "/dst", "--server-addr", r"\\builder01\share"]);
        let config = JobConfig::try_from(cli).unwrap();
        assert_eq!(config.server_addr.as_deref(), Some("//builder01/share"));
    }
}
