/*!
 * Client façade: the two entry points the CLI binary drives. Everything
 * above this layer only ever talks to [`process`] or
 * [`report_server_status`].
 */

use std::time::{Duration, Instant};

use crate::config::JobConfig;
use crate::logging::LogSink;
use crate::scheduler;
use crate::stats::JobStats;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = -1;

/// Run one copy job to completion and report its outcome.
///
/// Returns the accumulated [`JobStats`] and a process exit code: `0` on full
/// success, `1` if any file failed, `-1` if the configuration itself was
/// invalid (no work was attempted in that case).
pub fn process(config: JobConfig, log: &LogSink) -> (JobStats, i32) {
    let config = match config.validate() {
        Ok(c) => c,
        Err(e) => {
            log.error(&format!("configuration error: {}", e));
            return (JobStats::new(), EXIT_CONFIG_ERROR);
        }
    };

    let stats = JobStats::new();
    let started = Instant::now();

    if let Err(e) = scheduler::run_job(&config, &stats, log) {
        log.error(&format!("job aborted: {}", e));
        let exit = if e.is_fatal() { EXIT_CONFIG_ERROR } else { EXIT_PARTIAL_FAILURE };
        return (stats, exit);
    }

    let elapsed = started.elapsed();
    if !log.minimal() {
        log.info(&stats.render_summary(elapsed));
    }

    let exit = if stats.snapshot().fail_count > 0 { EXIT_PARTIAL_FAILURE } else { EXIT_SUCCESS };
    (stats, exit)
}

/// Open a single connection to the configured server and report its status.
pub fn report_server_status(config: &JobConfig, log: &LogSink) -> i32 {
    let Some(addr) = &config.server_addr else {
        log.error("no server address configured");
        return EXIT_CONFIG_ERROR;
    };

    let timeout = Duration::from_millis(config.server_connect_timeout_ms);
    match crate::protocol::connect(addr, config.server_port, timeout) {
        Ok(mut conn) => match conn.server_status() {
            Ok(status) => {
                log.info(&format!("{}:{} — {}", addr, config.server_port, status));
                EXIT_SUCCESS
            }
            Err(e) => {
                log.error(&format!("status request failed: {}", e));
                EXIT_PARTIAL_FAILURE
            }
        },
        Err(e) => {
            log.error(&format!("could not reach {}:{}: {}", addr, config.server_port, e));
            EXIT_PARTIAL_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn process_returns_config_error_exit_code_for_invalid_job() {
        let config = JobConfig::local("".into(), "/dst".into());
        let log = LogSink::test_sink();
        let (_, exit) = process(config, &log);
        assert_eq!(exit, EXIT_CONFIG_ERROR);
    }

    #[test]
    fn process_returns_success_exit_code_for_clean_job() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hi").unwrap();
        let config = JobConfig::local(src.path().to_owned(), dst.path().to_owned());
        let log = LogSink::test_sink();
        let (stats, exit) = process(config, &log);
        assert_eq!(exit, EXIT_SUCCESS);
        assert_eq!(stats.snapshot().copy_count, 1);
    }

    #[test]
    fn report_server_status_without_address_is_config_error() {
        let config = JobConfig::local("/src".into(), "/dst".into());
        let log = LogSink::test_sink();
        assert_eq!(report_server_status(&config, &log), EXIT_CONFIG_ERROR);
    }
}
