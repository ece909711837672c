/*!
 * Discovery: walks the source tree up to `copy_subdir_depth` levels,
 * applies include/exclude/optional pattern sets, and records `CopyEntry`
 * rows for the scheduler to hand out to workers.
 */

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::fs::{self as vfs, FileInfo};

/// A single source -> destination unit of work, consumed exactly once by
/// one worker.
#[derive(Debug, Clone)]
pub struct CopyEntry {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub relative_path: PathBuf,
    pub source_info: FileInfo,
    /// `true` if this entry matched the optional pattern set: a failure to
    /// copy it does not count as a job failure.
    pub optional: bool,
}

/// Parameterizes directory traversal without heap-allocated closures,
/// mirroring the source's callback-based walk: `discover` calls
/// `on_file`/`on_dir` for every entry it visits and respects the returned
/// [`ControlFlow`].
pub trait FileVisitor {
    fn on_file(&mut self, entry: &CopyEntry) -> ControlFlow<()>;

    /// Called for each directory visited (including empty ones), before its
    /// children. The default implementation does nothing.
    fn on_dir(&mut self, _relative_path: &Path) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// A [`FileVisitor`] that simply appends every entry it sees, used by the
/// scheduler to build its initial work queue.
#[derive(Default)]
pub struct CollectingVisitor {
    pub entries: Vec<CopyEntry>,
    pub dirs: Vec<PathBuf>,
}

impl FileVisitor for CollectingVisitor {
    fn on_file(&mut self, entry: &CopyEntry) -> ControlFlow<()> {
        self.entries.push(entry.clone());
        ControlFlow::Continue(())
    }

    fn on_dir(&mut self, relative_path: &Path) -> ControlFlow<()> {
        self.dirs.push(relative_path.to_owned());
        ControlFlow::Continue(())
    }
}

/// Walk `config.source_root`, calling `visitor` for every directory and
/// file selected by the include/exclude/optional pattern sets, bounded by
/// `config.copy_subdir_depth`.
pub fn discover(config: &JobConfig, visitor: &mut dyn FileVisitor) -> Result<()> {
    let root = &config.source_root;
    if !vfs::exists(root) {
        return Err(Error::NotFound(root.clone()));
    }

    // walkdir's min_depth/max_depth count the root itself as depth 0, so a
    // `copy_subdir_depth` of N means files up to N directory levels below
    // the root are visited.
    let max_depth = config.copy_subdir_depth.saturating_add(1);

    let mut walker = WalkDir::new(root).follow_links(false).max_depth(max_depth).into_iter();

    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(e)) => e,
            Some(Err(_)) => continue,
        };

        let relative = match entry.path().strip_prefix(root) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let base_name = entry.file_name().to_string_lossy().into_owned();

        if entry.file_type().is_dir() {
            if is_excluded(config, &base_name, relative) {
                walker.skip_current_dir();
                continue;
            }
            if visitor.on_dir(relative) == ControlFlow::Break(()) {
                break;
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let included = config.include.is_empty() || config.include.is_match(&base_name, relative);
        if !included || is_excluded(config, &base_name, relative) {
            continue;
        }

        let source_info = vfs::stat(entry.path())?;
        let dest_path = if config.flatten {
            config.dest_root.join(&base_name)
        } else {
            config.dest_root.join(relative)
        };
        let optional = config.optional.is_match(&base_name, relative);

        let copy_entry = CopyEntry {
            source_path: entry.path().to_owned(),
            dest_path,
            relative_path: relative.to_owned(),
            source_info,
            optional,
        };

        if visitor.on_file(&copy_entry) == ControlFlow::Break(()) {
            break;
        }
    }

    Ok(())
}

fn is_excluded(config: &JobConfig, base_name: &str, relative: &Path) -> bool {
    !config.exclude.is_empty() && config.exclude.is_match(base_name, relative)
}

/// Expand an include-from-file list: one pattern or relative path per
/// non-blank, non-comment (`#`) line. Bounded to the same depth semantics
/// as ordinary include patterns; this function only parses the file, it
/// does not itself walk the tree.
pub fn read_include_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternSet;
    use std::fs;
    use tempfile::tempdir;

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("b.tmp"), b"b").unwrap();
        fs::write(root.join("sub/c.txt"), b"c").unwrap();
        fs::write(root.join("sub/deeper/d.txt"), b"d").unwrap();
    }

    #[test]
    fn collects_all_files_with_default_config() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_tree(src.path());

        let config = JobConfig::local(src.path().to_owned(), dst.path().to_owned());
        let mut visitor = CollectingVisitor::default();
        discover(&config, &mut visitor).unwrap();

        let names: Vec<_> = visitor
            .entries
            .iter()
            .map(|e| e.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"b.tmp".to_string()));
        assert!(names.contains(&"sub/c.txt".to_string()));
        assert!(names.contains(&"sub/deeper/d.txt".to_string()));
    }

    #[test]
    fn exclude_pattern_skips_matching_files() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_tree(src.path());

        let mut config = JobConfig::local(src.path().to_owned(), dst.path().to_owned());
        config.exclude = PatternSet::new(vec!["*.tmp".to_string()]);
        let mut visitor = CollectingVisitor::default();
        discover(&config, &mut visitor).unwrap();

        assert!(visitor.entries.iter().all(|e| !e.relative_path.to_string_lossy().ends_with(".tmp")));
    }

    #[test]
    fn subdir_depth_bounds_the_walk() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_tree(src.path());

        let mut config = JobConfig::local(src.path().to_owned(), dst.path().to_owned());
        config.copy_subdir_depth = 1;
        let mut visitor = CollectingVisitor::default();
        discover(&config, &mut visitor).unwrap();

        let names: Vec<_> = visitor.entries.iter().map(|e| e.relative_path.to_string_lossy().into_owned()).collect();
        assert!(names.iter().any(|n| n == "a.txt"));
        assert!(!names.iter().any(|n| n.contains("deeper")));
    }

    #[test]
    fn optional_pattern_marks_entries_as_optional() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write_tree(src.path());

        let mut config = JobConfig::local(src.path().to_owned(), dst.path().to_owned());
        config.optional = PatternSet::new(vec!["*.tmp".to_string()]);
        let mut visitor = CollectingVisitor::default();
        discover(&config, &mut visitor).unwrap();

        let tmp_entry = visitor.entries.iter().find(|e| e.relative_path.to_string_lossy().ends_with(".tmp")).unwrap();
        assert!(tmp_entry.optional);
        let txt_entry = visitor.entries.iter().find(|e| e.relative_path.to_string_lossy() == "a.txt").unwrap();
        assert!(!txt_entry.optional);
    }

    #[test]
    fn missing_source_root_is_an_error() {
        let dst = tempdir().unwrap();
        let config = JobConfig::local(PathBuf::from("/nonexistent/turbocopy-test-src"), dst.path().to_owned());
        let mut visitor = CollectingVisitor::default();
        assert!(discover(&config, &mut visitor).is_err());
    }

    #[test]
    fn read_include_file_skips_blank_and_comment_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("includes.txt");
        fs::write(&path, "# comment\n\n*.txt\nsub/*.dat\n").unwrap();
        let lines = read_include_file(&path).unwrap();
        assert_eq!(lines, vec!["*.txt".to_string(), "sub/*.dat".to_string()]);
    }
}
