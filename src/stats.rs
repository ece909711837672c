/*!
 * Job statistics: typed counters and per-phase timers, merged from worker
 * thread-local deltas under a short lock rather than updated per-byte
 * atomically.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Millisecond timers for each named phase of the job.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimers {
    pub connect_ms: u64,
    pub send_ms: u64,
    pub recv_ms: u64,
    pub compress_ms: u64,
    pub decompress_ms: u64,
    pub delta_ms: u64,
    pub create_dir_ms: u64,
    pub purge_ms: u64,
    pub find_file_ms: u64,
    pub read_ms: u64,
    pub write_ms: u64,
    pub create_write_ms: u64,
    pub set_last_write_time_ms: u64,
}

impl PhaseTimers {
    fn merge(&mut self, other: &PhaseTimers) {
        self.connect_ms += other.connect_ms;
        self.send_ms += other.send_ms;
        self.recv_ms += other.recv_ms;
        self.compress_ms += other.compress_ms;
        self.decompress_ms += other.decompress_ms;
        self.delta_ms += other.delta_ms;
        self.create_dir_ms += other.create_dir_ms;
        self.purge_ms += other.purge_ms;
        self.find_file_ms += other.find_file_ms;
        self.read_ms += other.read_ms;
        self.write_ms += other.write_ms;
        self.create_write_ms += other.create_write_ms;
        self.set_last_write_time_ms += other.set_last_write_time_ms;
    }
}

/// One worker's accumulated counters before they are merged into the shared
/// [`JobStats`]. Never shared across threads; built up locally, then
/// [`JobStats::merge`]d once the worker finishes an entry (or a batch).
#[derive(Debug, Clone, Default)]
pub struct StatsDelta {
    pub copy_count: u64,
    pub copy_size: u64,
    pub link_count: u64,
    pub link_size: u64,
    pub skip_count: u64,
    pub skip_size: u64,
    pub fail_count: u64,
    pub retry_count: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub timers: PhaseTimers,
    /// Sum of chosen compression levels, for computing the running average.
    pub compression_level_sum: u64,
    pub compression_count: u64,
    pub server_attempt: bool,
    pub dest_server_used: bool,
    pub source_server_used: bool,
}

/// Shared, mutex-guarded job statistics. Cloning gives another handle to the
/// same underlying counters (an `Arc`), matching how `Connection`s and
/// workers each hold a reference to one job-wide stats sink.
#[derive(Debug, Clone)]
pub struct JobStats {
    inner: Arc<Mutex<StatsDelta>>,
}

impl Default for JobStats {
    fn default() -> Self {
        Self { inner: Arc::new(Mutex::new(StatsDelta::default())) }
    }
}

impl JobStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a worker's local delta into the shared totals under one lock.
    pub fn merge(&self, delta: &StatsDelta) {
        let mut guard = self.inner.lock().expect("stats mutex poisoned");
        guard.copy_count += delta.copy_count;
        guard.copy_size += delta.copy_size;
        guard.link_count += delta.link_count;
        guard.link_size += delta.link_size;
        guard.skip_count += delta.skip_count;
        guard.skip_size += delta.skip_size;
        guard.fail_count += delta.fail_count;
        guard.retry_count += delta.retry_count;
        guard.bytes_sent += delta.bytes_sent;
        guard.bytes_recv += delta.bytes_recv;
        guard.timers.merge(&delta.timers);
        guard.compression_level_sum += delta.compression_level_sum;
        guard.compression_count += delta.compression_count;
        guard.server_attempt |= delta.server_attempt;
        guard.dest_server_used |= delta.dest_server_used;
        guard.source_server_used |= delta.source_server_used;
    }

    /// Take a consistent point-in-time copy of the totals.
    pub fn snapshot(&self) -> StatsDelta {
        self.inner.lock().expect("stats mutex poisoned").clone()
    }

    pub fn compression_average_level(&self) -> f64 {
        let g = self.inner.lock().expect("stats mutex poisoned");
        if g.compression_count == 0 {
            0.0
        } else {
            g.compression_level_sum as f64 / g.compression_count as f64
        }
    }

    /// Total terminal outcomes recorded so far, for the
    /// `copyCount + linkCount + skipCount + failCount == |selected(S)|`
    /// invariant.
    pub fn total_handled(&self) -> u64 {
        let g = self.inner.lock().expect("stats mutex poisoned");
        g.copy_count + g.link_count + g.skip_count + g.fail_count
    }

    /// Render the human-readable summary table emitted at job end.
    pub fn render_summary(&self, elapsed: Duration) -> String {
        let g = self.inner.lock().expect("stats mutex poisoned");
        let mut out = String::new();
        out.push_str("turbocopy summary\n");
        out.push_str("==================\n");
        out.push_str(&format!(
            "  copied:  {:>6} files, {}\n",
            g.copy_count,
            format_bytes(g.copy_size)
        ));
        out.push_str(&format!(
            "  linked:  {:>6} files, {}\n",
            g.link_count,
            format_bytes(g.link_size)
        ));
        out.push_str(&format!(
            "  skipped: {:>6} files, {}\n",
            g.skip_count,
            format_bytes(g.skip_size)
        ));
        out.push_str(&format!("  failed:  {:>6} files\n", g.fail_count));
        out.push_str(&format!("  retries: {:>6}\n", g.retry_count));
        if g.bytes_sent > 0 || g.bytes_recv > 0 {
            out.push_str(&format!(
                "  network: sent {} / recv {}\n",
                format_bytes(g.bytes_sent),
                format_bytes(g.bytes_recv)
            ));
        }
        if g.compression_count > 0 {
            out.push_str(&format!(
                "  compression: avg level {:.1} over {} files\n",
                g.compression_level_sum as f64 / g.compression_count as f64,
                g.compression_count
            ));
        }
        out.push_str(&format!("  elapsed: {:.2}s\n", elapsed.as_secs_f64()));
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_across_workers() {
        let stats = JobStats::new();
        let mut a = StatsDelta::default();
        a.copy_count = 2;
        a.copy_size = 100;
        stats.merge(&a);

        let mut b = StatsDelta::default();
        b.skip_count = 1;
        stats.merge(&b);

        let snap = stats.snapshot();
        assert_eq!(snap.copy_count, 2);
        assert_eq!(snap.skip_count, 1);
        assert_eq!(stats.total_handled(), 3);
    }

    #[test]
    fn compression_average_divides_correctly() {
        let stats = JobStats::new();
        let mut d = StatsDelta::default();
        d.compression_level_sum = 9;
        d.compression_count = 3;
        stats.merge(&d);
        assert_eq!(stats.compression_average_level(), 3.0);
    }

    #[test]
    fn compression_average_zero_when_unused() {
        let stats = JobStats::new();
        assert_eq!(stats.compression_average_level(), 0.0);
    }

    #[test]
    fn format_bytes_human_readable() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1536), "1.50 KiB");
    }
}
