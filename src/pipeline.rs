/*!
 * Per-file pipeline: the decision ladder that chooses skip/link/send/recv/
 * local-copy for one `CopyEntry`, drives the staged I/O, and guarantees
 * timestamp/attribute parity on success.
 */

use std::net::TcpStream;

use crate::compress;
use crate::compress::delta::build_script;
use crate::config::{JobConfig, ServerPolicy};
use crate::discovery::CopyEntry;
use crate::error::{Error, Result};
use crate::fs::{self as vfs, Attributes};
use crate::protocol::commands::{
    CreateDirectoryRequest, ReadFileRequest, ReadFileResponse, WriteFileRequest, WriteFileResponse,
};
use crate::protocol::Connection;
use crate::stats::StatsDelta;

/// How an entry's content ended up on disk, for the scheduler to translate
/// into the right stat counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skip,
    Copy { bytes: u64 },
    Link { bytes: u64 },
}

/// Run the decision ladder for one entry. Either connection may be absent
/// (no server configured, or the worker downgraded to local I/O after a
/// connect failure under `ServerPolicy::Auto`).
pub fn run(
    entry: &CopyEntry,
    config: &JobConfig,
    dest_conn: Option<&mut Connection<TcpStream>>,
    src_conn: Option<&mut Connection<TcpStream>>,
    buffers: &mut crate::buffer::BufferPool,
    delta: &mut StatsDelta,
) -> Result<Outcome> {
    if let Some(parent) = entry.dest_path.parent() {
        vfs::ensure_dir(parent, config.symlink_policy == crate::config::SymlinkPolicy::Replace)?;
    }

    if !config.force_copy {
        if let Ok(dest_info) = vfs::stat(&entry.dest_path) {
            if dest_info.matches_for_skip(&entry.source_info) {
                return Ok(Outcome::Skip);
            }
        }
    }

    let outcome = run_content_stage(entry, config, dest_conn, src_conn, buffers, delta);

    match outcome {
        Ok(Outcome::Skip) => Ok(Outcome::Skip),
        Ok(outcome) => {
            finalize(entry, config)?;
            Ok(outcome)
        }
        Err(e) => {
            vfs::delete_file(&entry.dest_path).ok();
            Err(e)
        }
    }
}

fn run_content_stage(
    entry: &CopyEntry,
    config: &JobConfig,
    dest_conn: Option<&mut Connection<TcpStream>>,
    src_conn: Option<&mut Connection<TcpStream>>,
    buffers: &mut crate::buffer::BufferPool,
    delta: &mut StatsDelta,
) -> Result<Outcome> {
    if let Some(conn) = dest_conn {
        delta.server_attempt = true;
        match send_via_server(entry, config, conn, buffers, delta)? {
            Some(outcome) => return Ok(outcome),
            None if config.server_policy == ServerPolicy::Required => {
                return Err(Error::ServerBusy);
            }
            None => { /* ServerBusy under Auto: fall through to the next option */ }
        }
    }

    if let Some(conn) = src_conn {
        return recv_via_server(entry, config, conn, delta);
    }

    local_copy(entry, config, buffers, delta)
}

/// Returns `Ok(None)` on `ServerBusy`, signaling the caller to fall back to
/// the next option in the ladder.
fn send_via_server(
    entry: &CopyEntry,
    config: &JobConfig,
    conn: &mut Connection<TcpStream>,
    buffers: &mut crate::buffer::BufferPool,
    delta: &mut StatsDelta,
) -> Result<Option<Outcome>> {
    let req = WriteFileRequest {
        relative_dst: relative_str(entry),
        size: entry.source_info.size,
        last_write: entry.source_info.last_write_time,
        flags: 0,
    };
    let buffered = !vfs::should_use_unbuffered(config.buffered_io, entry.source_info.size);

    match conn.write_file(&req)? {
        WriteFileResponse::AlreadyExists => Ok(Some(Outcome::Skip)),
        WriteFileResponse::ServerBusy => Ok(None),
        WriteFileResponse::SendWhole => {
            delta.dest_server_used = true;
            let data = vfs::read_whole(&entry.source_path, &mut buffers.read, buffered)?;
            let payload = maybe_compress(&data, config, conn, delta)?;
            let ack = conn.send_whole_file(&payload, crate::buffer::BUFFER_SIZE, delta)?;
            Ok(Some(link_or_copy(ack.hardlinked, entry.source_info.size)))
        }
        WriteFileResponse::SendDelta(signature) => {
            delta.dest_server_used = true;
            if !config.delta_send_enabled {
                let data = vfs::read_whole(&entry.source_path, &mut buffers.read, buffered)?;
                let payload = maybe_compress(&data, config, conn, delta)?;
                let ack = conn.send_whole_file(&payload, crate::buffer::BUFFER_SIZE, delta)?;
                return Ok(Some(link_or_copy(ack.hardlinked, entry.source_info.size)));
            }
            let data = vfs::read_whole(&entry.source_path, &mut buffers.read, buffered)?;
            let script = build_script(&data, &signature);
            let ack = conn.send_delta_script(&script, delta)?;
            Ok(Some(link_or_copy(ack.hardlinked, entry.source_info.size)))
        }
    }
}

fn link_or_copy(hardlinked: bool, size: u64) -> Outcome {
    if hardlinked {
        Outcome::Link { bytes: size }
    } else {
        Outcome::Copy { bytes: size }
    }
}

fn maybe_compress(
    data: &[u8],
    config: &JobConfig,
    conn: &mut Connection<TcpStream>,
    delta: &mut StatsDelta,
) -> Result<Vec<u8>> {
    if !config.compression.enabled {
        return Ok(data.to_vec());
    }
    if !conn.compression.negotiated {
        conn.negotiate_compression(true, config.compression.level);
    }
    let started = std::time::Instant::now();
    let outcome = compress::compress(data, config.compression.level, None)?;
    delta.timers.compress_ms += started.elapsed().as_millis() as u64;
    delta.compression_level_sum += outcome.level_used as u64;
    delta.compression_count += 1;
    Ok(outcome.compressed)
}

fn recv_via_server(
    entry: &CopyEntry,
    config: &JobConfig,
    conn: &mut Connection<TcpStream>,
    delta: &mut StatsDelta,
) -> Result<Outcome> {
    delta.source_server_used = true;
    let req = ReadFileRequest { relative_src: relative_str(entry) };
    match conn.read_file(&req)? {
        ReadFileResponse::NotFound => {
            if entry.optional {
                Ok(Outcome::Skip)
            } else {
                Err(Error::NotFound(entry.source_path.clone()))
            }
        }
        ReadFileResponse::ServerBusy => Err(Error::ServerBusy),
        ReadFileResponse::Stream { size, .. } => {
            let raw = conn.recv_whole_file(delta)?;
            let data = if conn.compression.negotiated && conn.compression.enabled {
                compress::decompress(&raw, size as usize)?
            } else {
                raw
            };
            let buffered = !vfs::should_use_unbuffered(config.buffered_io, size);
            let mut handle = vfs::open_write(&entry.dest_path, buffered)?;
            handle.write_all(&data)?;
            handle.sync_and_close()?;
            Ok(Outcome::Copy { bytes: size })
        }
    }
}

fn local_copy(
    entry: &CopyEntry,
    config: &JobConfig,
    buffers: &mut crate::buffer::BufferPool,
    delta: &mut StatsDelta,
) -> Result<Outcome> {
    let started = std::time::Instant::now();
    let buffered = !vfs::should_use_unbuffered(config.buffered_io, entry.source_info.size);
    let mut reader = vfs::open_read(&entry.source_path, buffered)?;
    let mut writer = vfs::open_write(&entry.dest_path, buffered)?;
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffers.read)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffers.read[..n])?;
        total += n as u64;
    }
    writer.sync_and_close()?;
    delta.timers.read_ms += started.elapsed().as_millis() as u64 / 2;
    delta.timers.write_ms += started.elapsed().as_millis() as u64 / 2;
    Ok(Outcome::Copy { bytes: total })
}

fn finalize(entry: &CopyEntry, config: &JobConfig) -> Result<()> {
    vfs::set_last_write_time(&entry.dest_path, entry.source_info.last_write_time)?;
    if config.dir_copy_flags.attributes {
        if let Ok(attrs) = vfs::read_attributes(&entry.source_path) {
            vfs::apply_attributes(&entry.dest_path, &attrs)?;
        }
    }
    Ok(())
}

fn relative_str(entry: &CopyEntry) -> String {
    entry.relative_path.to_string_lossy().replace('\\', "/")
}

/// Create one destination directory via the server, for workers whose
/// destination connection is active but who need an empty directory
/// materialized (`copy_empty_dirs`).
pub fn create_directory_via_server(conn: &mut Connection<TcpStream>, relative_dir: &str) -> Result<Vec<String>> {
    let resp = conn.create_directory(&CreateDirectoryRequest { relative_dir: relative_dir.to_string(), flags: 0 })?;
    Ok(resp.created)
}

/// Apply attributes directly, used by the scheduler's directory-creation
/// path where there is no `CopyEntry` to hand to [`finalize`].
pub fn apply_dir_attributes(dest_dir: &std::path::Path, source_attrs: &Attributes) -> Result<()> {
    vfs::apply_attributes(dest_dir, source_attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::config::JobConfig;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn entry(src: &std::path::Path, dst: &std::path::Path, rel: &str) -> CopyEntry {
        CopyEntry {
            source_path: src.to_owned(),
            dest_path: dst.to_owned(),
            relative_path: PathBuf::from(rel),
            source_info: vfs::stat(src).unwrap(),
            optional: false,
        }
    }

    #[test]
    fn local_copy_then_second_run_skips() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let src = src_dir.path().join("a.txt");
        fs::write(&src, b"hello world").unwrap();
        let dst = dst_dir.path().join("a.txt");

        let config = JobConfig::local(src_dir.path().to_owned(), dst_dir.path().to_owned());
        let mut buffers = BufferPool::new();
        let mut delta = StatsDelta::default();
        let e = entry(&src, &dst, "a.txt");

        let outcome = run(&e, &config, None, None, &mut buffers, &mut delta).unwrap();
        assert_eq!(outcome, Outcome::Copy { bytes: 11 });
        assert_eq!(fs::read(&dst).unwrap(), b"hello world");

        let e2 = entry(&src, &dst, "a.txt");
        let outcome2 = run(&e2, &config, None, None, &mut buffers, &mut delta).unwrap();
        assert_eq!(outcome2, Outcome::Skip);
    }

    #[test]
    fn force_copy_bypasses_skip() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let src = src_dir.path().join("a.txt");
        fs::write(&src, b"v1").unwrap();
        let dst = dst_dir.path().join("a.txt");
        fs::write(&dst, b"v1").unwrap();
        filetime::set_file_mtime(&dst, filetime::FileTime::from_system_time(vfs::stat(&src).unwrap().last_write_time)).unwrap();

        let mut config = JobConfig::local(src_dir.path().to_owned(), dst_dir.path().to_owned());
        config.force_copy = true;
        let mut buffers = BufferPool::new();
        let mut delta = StatsDelta::default();
        let e = entry(&src, &dst, "a.txt");

        let outcome = run(&e, &config, None, None, &mut buffers, &mut delta).unwrap();
        assert_eq!(outcome, Outcome::Copy { bytes: 2 });
    }

    #[test]
    fn failed_write_cleans_up_partial_destination() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let src = src_dir.path().join("missing.txt");
        let dst = dst_dir.path().join("missing.txt");
        let config = JobConfig::local(src_dir.path().to_owned(), dst_dir.path().to_owned());
        let mut buffers = BufferPool::new();
        let mut delta = StatsDelta::default();

        let e = CopyEntry {
            source_path: src,
            dest_path: dst.clone(),
            relative_path: PathBuf::from("missing.txt"),
            source_info: crate::fs::FileInfo {
                creation_time: std::time::UNIX_EPOCH,
                last_write_time: std::time::UNIX_EPOCH,
                size: 0,
            },
            optional: false,
        };

        assert!(run(&e, &config, None, None, &mut buffers, &mut delta).is_err());
        assert!(!dst.exists());
    }
}
