/*!
 * Exercises the path a real invocation takes: argv -> `Cli` -> `JobConfig`
 * -> `facade::process`, without going through `main`'s `process::exit`.
 */

use std::fs;

use clap::Parser;
use tempfile::tempdir;
use turbocopy::cli::Cli;
use turbocopy::config::JobConfig;
use turbocopy::facade;
use turbocopy::logging::LogSink;

fn parse(args: &[&str]) -> Cli {
    Cli::parse_from(std::iter::once("turbocopy").chain(args.iter().copied()))
}

#[test]
fn depth_limited_invocation_stops_at_the_requested_level() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    fs::create_dir_all(src.path().join("a/b")).unwrap();
    fs::write(src.path().join("top.txt"), b"top").unwrap();
    fs::write(src.path().join("a/mid.txt"), b"mid").unwrap();
    fs::write(src.path().join("a/b/deep.txt"), b"deep").unwrap();

    let src_arg = src.path().to_string_lossy().into_owned();
    let dst_arg = dst.path().to_string_lossy().into_owned();
    let cli = parse(&[&src_arg, &dst_arg, "--depth", "1"]);
    let config = JobConfig::try_from(cli).unwrap();
    let log = LogSink::test_sink();
    let (stats, exit) = facade::process(config, &log);

    assert_eq!(exit, facade::EXIT_SUCCESS);
    assert_eq!(stats.snapshot().copy_count, 2);
    assert!(dst.path().join("top.txt").exists());
    assert!(dst.path().join("a/mid.txt").exists());
    assert!(!dst.path().join("a/b/deep.txt").exists());
}

#[test]
fn include_from_file_restricts_the_job_to_listed_patterns() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    fs::write(src.path().join("keep.txt"), b"keep").unwrap();
    fs::write(src.path().join("drop.dat"), b"drop").unwrap();
    let list_path = src.path().join("include.lst");
    fs::write(&list_path, "# only text files\n*.txt\n").unwrap();

    let src_arg = src.path().to_string_lossy().into_owned();
    let dst_arg = dst.path().to_string_lossy().into_owned();
    let list_arg = list_path.to_string_lossy().into_owned();
    let cli = parse(&[&src_arg, &dst_arg, "--include-from", &list_arg]);
    let config = JobConfig::try_from(cli).unwrap();
    let log = LogSink::test_sink();
    let (_, exit) = facade::process(config, &log);

    assert_eq!(exit, facade::EXIT_SUCCESS);
    assert!(dst.path().join("keep.txt").exists());
    assert!(!dst.path().join("drop.dat").exists());
}

#[test]
fn mirror_flag_implies_force_and_purge_end_to_end() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    fs::write(src.path().join("a.txt"), b"v2").unwrap();
    fs::write(dst.path().join("a.txt"), b"v1-stale-content-same-length").unwrap();
    fs::write(dst.path().join("orphan.txt"), b"should be purged").unwrap();

    let src_arg = src.path().to_string_lossy().into_owned();
    let dst_arg = dst.path().to_string_lossy().into_owned();
    let cli = parse(&[&src_arg, &dst_arg, "--mirror"]);
    let config = JobConfig::try_from(cli).unwrap();
    let log = LogSink::test_sink();
    let (_, exit) = facade::process(config, &log);

    assert_eq!(exit, facade::EXIT_SUCCESS);
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"v2");
    assert!(!dst.path().join("orphan.txt").exists());
}
