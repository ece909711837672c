/*!
 * Work scheduler: the job state machine, worker pool, retry-with-backoff,
 * and the post-copy purge pass.
 *
 * ```text
 *   Init -> Discovering -> Running -> [Purging] -> Finalizing -> Done
 *                            ^__retry__|
 * ```
 */

use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use walkdir::WalkDir;

use crate::buffer::BufferPool;
use crate::config::JobConfig;
use crate::discovery::{self, CollectingVisitor, CopyEntry};
use crate::error::{Error, Result};
use crate::handled_set::HandledSet;
use crate::logging::LogSink;
use crate::pipeline::{self, Outcome};
use crate::protocol::{self, Connection};
use crate::stats::{JobStats, StatsDelta};

/// Phases of a job, in the order a single run passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Init,
    Discovering,
    Running,
    Purging,
    Finalizing,
    Done,
}

struct QueueItem {
    entry: CopyEntry,
    retries_left: u32,
}

/// Discover, distribute, and drive one copy job to completion, merging
/// every worker's statistics into `stats`. Returns once the job has
/// reached [`JobPhase::Done`].
pub fn run_job(config: &JobConfig, stats: &JobStats, log: &LogSink) -> Result<()> {
    log.info("discovering source tree");
    let mut visitor = CollectingVisitor::default();
    discovery::discover(config, &mut visitor)?;
    let entries = visitor.entries;
    log.info(&format!("discovered {} files, {} directories", entries.len(), visitor.dirs.len()));

    let handled_files: Arc<HandledSet<PathBuf>> = Arc::new(HandledSet::new());
    let touched_dirs: Arc<HandledSet<PathBuf>> = Arc::new(HandledSet::new());
    for dir in &visitor.dirs {
        touched_dirs.claim(dir.clone());
    }

    if config.copy_empty_dirs {
        for dir in &visitor.dirs {
            crate::fs::ensure_dir(&config.dest_root.join(dir), false)?;
        }
    }

    let pending = Arc::new(AtomicUsize::new(entries.len()));
    let aborted = Arc::new(AtomicBool::new(false));
    let (tx, rx) = crossbeam_channel::unbounded::<QueueItem>();
    for entry in entries {
        tx.send(QueueItem { entry, retries_left: config.retry_count }).expect("queue receiver alive");
    }

    let mut handles = Vec::new();
    for worker_id in 0..config.thread_count {
        let rx = rx.clone();
        let tx = tx.clone();
        let pending = Arc::clone(&pending);
        let handled_files = Arc::clone(&handled_files);
        let aborted = Arc::clone(&aborted);
        let stats = stats.clone();
        let config = config.clone();
        let log = log.clone();
        handles.push(thread::spawn(move || {
            worker_loop(worker_id, rx, tx, pending, handled_files, aborted, stats, config, log)
        }));
    }
    drop(tx);
    drop(rx);

    let mut first_err: Option<Error> = None;
    for handle in handles {
        let result = handle.join().expect("worker thread panicked");
        if let Err(e) = result {
            if e.is_server_unavailable() {
                log.error(&format!("aborting job: {}", e));
            }
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    if config.purge_destination {
        log.info("purging destination entries not present in source");
        purge(config, &handled_files, &touched_dirs)?;
    }

    Ok(())
}

fn worker_loop(
    _worker_id: usize,
    rx: Receiver<QueueItem>,
    tx: Sender<QueueItem>,
    pending: Arc<AtomicUsize>,
    handled_files: Arc<HandledSet<PathBuf>>,
    aborted: Arc<AtomicBool>,
    stats: JobStats,
    config: JobConfig,
    log: LogSink,
) -> Result<()> {
    let mut buffers = BufferPool::new();
    let mut dest_conn: Option<Connection<TcpStream>> = None;
    let mut dest_connect_attempted = false;

    loop {
        if aborted.load(Ordering::Acquire) || pending.load(Ordering::Acquire) == 0 {
            break;
        }
        let item = match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        ensure_dest_connection(&mut dest_conn, &mut dest_connect_attempted, &config, &log, &aborted)?;

        if !handled_files.claim(item.entry.dest_path.clone()) {
            pending.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        let mut delta = StatsDelta::default();
        let result = pipeline::run(&item.entry, &config, dest_conn.as_mut(), None, &mut buffers, &mut delta);

        match result {
            Ok(Outcome::Skip) => {
                delta.skip_count += 1;
                delta.skip_size += item.entry.source_info.size;
                stats.merge(&delta);
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(Outcome::Copy { bytes }) => {
                delta.copy_count += 1;
                delta.copy_size += bytes;
                stats.merge(&delta);
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(Outcome::Link { bytes }) => {
                delta.link_count += 1;
                delta.link_size += bytes;
                stats.merge(&delta);
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Err(e) if e.is_retryable() && item.retries_left > 0 => {
                log.warn(&format!(
                    "retrying {} ({} attempts left): {}",
                    item.entry.relative_path.display(),
                    item.retries_left,
                    e
                ));
                thread::sleep(Duration::from_millis(config.retry_wait_ms));
                delta.retry_count += 1;
                stats.merge(&delta);
                let retries_left = item.retries_left - 1;
                tx.send(QueueItem { entry: item.entry, retries_left }).ok();
            }
            Err(e) => {
                if item.entry.optional {
                    delta.skip_count += 1;
                } else {
                    delta.fail_count += 1;
                    log.error(&format!("failed to copy {}: {}", item.entry.relative_path.display(), e));
                }
                stats.merge(&delta);
                pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
    Ok(())
}

/// One-shot lazy connection setup: attempted at most once per worker, per
/// the invariant that TCP/DNS resolution happens at most once per endpoint.
/// Under `ServerPolicy::Required` a failed attempt is fatal to the job: it
/// sets `aborted` and returns `Err` instead of degrading to local I/O.
fn ensure_dest_connection(
    conn: &mut Option<Connection<TcpStream>>,
    attempted: &mut bool,
    config: &JobConfig,
    log: &LogSink,
    aborted: &Arc<AtomicBool>,
) -> Result<()> {
    if *attempted || config.server_policy == crate::config::ServerPolicy::Disabled {
        return Ok(());
    }
    *attempted = true;
    let Some(addr) = &config.server_addr else { return Ok(()) };

    let timeout = Duration::from_millis(config.server_connect_timeout_ms);
    match protocol::connect(addr, config.server_port, timeout) {
        Ok(c) => {
            *conn = Some(c);
            Ok(())
        }
        Err(e) => {
            if config.server_policy == crate::config::ServerPolicy::Required {
                aborted.store(true, Ordering::Release);
                return Err(Error::ServerUnavailable(format!(
                    "{}:{}: {}",
                    addr, config.server_port, e
                )));
            }
            log.warn(&format!("acceleration service unavailable at {}:{}: {}", addr, config.server_port, e));
            Ok(())
        }
    }
}

/// Delete destination files not claimed by discovery, and destination
/// subdirectories discovery never visited, scoped to `copy_subdir_depth`
/// (the same bound discovery used, per the documented open question).
fn purge(config: &JobConfig, handled_files: &HandledSet<PathBuf>, touched_dirs: &HandledSet<PathBuf>) -> Result<()> {
    if !crate::fs::exists(&config.dest_root) {
        return Ok(());
    }

    let max_depth = config.copy_subdir_depth.saturating_add(1);
    let mut to_delete_files = Vec::new();
    let mut to_delete_dirs = Vec::new();

    for entry in WalkDir::new(&config.dest_root).follow_links(false).max_depth(max_depth).contents_first(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let relative = match entry.path().strip_prefix(&config.dest_root) {
            Ok(p) if !p.as_os_str().is_empty() => p.to_owned(),
            _ => continue,
        };

        if entry.file_type().is_dir() {
            if !touched_dirs.contains(&relative) {
                to_delete_dirs.push(entry.path().to_owned());
            }
        } else if !handled_files.contains(&entry.path().to_owned()) {
            to_delete_files.push(entry.path().to_owned());
        }
    }

    for file in to_delete_files {
        crate::fs::delete_file(&file)?;
    }
    for dir in to_delete_dirs {
        crate::fs::delete_tree(&dir).ok();
    }
    Ok(())
}
