//! Bounded, lazy traversal of a project work area.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const PRUNED_DIRS: &[&str] = &["target", "node_modules", "dist", "build", "vendor", "__pycache__"];

pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub depth: usize,
    pub size: u64,
}

/// A project tree walked to at most `max_depth` levels.
///
/// `files()` builds a fresh iterator each call, so the walk can be restarted.
/// Nothing is collected up front.
#[derive(Debug, Clone)]
pub struct ProjectTree {
    root: PathBuf,
    max_depth: usize,
}

impl ProjectTree {
    pub fn new(root: impl Into<PathBuf>, max_depth: usize) -> Self {
        Self {
            root: root.into(),
            max_depth,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> impl Iterator<Item = FileRecord> + use<> {
        WalkDir::new(&self.root)
            .max_depth(self.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_pruned(entry))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| FileRecord {
                size: entry.metadata().map(|m| m.len()).unwrap_or(0),
                depth: entry.depth(),
                path: entry.into_path(),
            })
    }

    /// Files whose path below the root looks like a test.
    pub fn test_files(&self) -> impl Iterator<Item = FileRecord> + use<> {
        let root = self.root.clone();
        self.files()
            .filter(move |record| is_test_file(relative_to(&root, &record.path)))
    }

    pub fn doc_files(&self) -> impl Iterator<Item = FileRecord> + use<> {
        let root = self.root.clone();
        self.files()
            .filter(move |record| is_doc_file(relative_to(&root, &record.path)))
    }
}

/// Directories above the root must not influence classification.
fn relative_to<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn is_pruned(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && PRUNED_DIRS.contains(&name.as_ref()))
}

/// Heuristic over common naming conventions (`*_test.*`, `*.test.*`,
/// `*.spec.*`, `test_*`, anything under a `tests`/`__tests__` directory).
pub fn is_test_file(path: &Path) -> bool {
    let in_test_dir = path.components().any(|c| {
        let part = c.as_os_str().to_string_lossy();
        part == "tests" || part == "__tests__" || part == "test"
    });
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return false;
    };
    let stem = name.split('.').next().unwrap_or_default();
    in_test_dir
        || name.contains(".test.")
        || name.contains(".spec.")
        || stem.ends_with("_test")
        || stem.starts_with("test_")
}

/// Markdown or reStructuredText anywhere, or any file under a `docs` directory.
pub fn is_doc_file(path: &Path) -> bool {
    let in_docs = path.parent().is_some_and(|dir| {
        dir.components()
            .any(|c| c.as_os_str().eq_ignore_ascii_case("docs"))
    });
    let markdown = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("rst"));
    markdown || in_docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_walk_prunes_hidden_and_build_dirs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/main.rs");
        touch(dir.path(), ".git/config");
        touch(dir.path(), "node_modules/pkg/index.js");
        touch(dir.path(), "target/debug/app");

        let files: Vec<_> = ProjectTree::new(dir.path(), 8).files().collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("src/main.rs"));
        assert_eq!(files[0].depth, 2);
        assert_eq!(files[0].size, 1);
    }

    #[test]
    fn test_walk_respects_max_depth() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "a/b/c/d/deep.txt");
        touch(dir.path(), "top.txt");

        let tree = ProjectTree::new(dir.path(), 2);
        let names: Vec<_> = tree.files().map(|f| f.path).collect();
        assert_eq!(names.len(), 1);
        assert_eq!(ProjectTree::new(dir.path(), 5).files().count(), 2);
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "one.rs");
        touch(dir.path(), "two.rs");
        let tree = ProjectTree::new(dir.path(), 3);
        assert_eq!(tree.files().count(), 2);
        assert_eq!(tree.files().count(), 2);
    }

    #[test]
    fn test_test_and_doc_classification() {
        assert!(is_test_file(Path::new("src/cart_test.go")));
        assert!(is_test_file(Path::new("web/cart.spec.ts")));
        assert!(is_test_file(Path::new("tests/integration.rs")));
        assert!(is_test_file(Path::new("test_cart.py")));
        assert!(!is_test_file(Path::new("src/contest.rs")));

        assert!(is_doc_file(Path::new("README.md")));
        assert!(is_doc_file(Path::new("docs/api.html")));
        assert!(!is_doc_file(Path::new("src/lib.rs")));
    }

    #[test]
    fn test_counts_tests_and_docs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "README.md");
        touch(dir.path(), "docs/guide.md");
        touch(dir.path(), "src/cart.rs");
        touch(dir.path(), "tests/cart.rs");
        let tree = ProjectTree::new(dir.path(), DEFAULT_MAX_DEPTH);
        assert_eq!(tree.test_files().count(), 1);
        assert_eq!(tree.doc_files().count(), 2);
    }

    #[test]
    fn test_classification_ignores_directories_above_root() {
        let dir = tempdir().unwrap();
        let under_tests = dir.path().join("tests/shop");
        touch(&under_tests, "src/cart.rs");
        touch(&under_tests, "src/lib.rs");
        let tree = ProjectTree::new(&under_tests, DEFAULT_MAX_DEPTH);
        assert_eq!(tree.files().count(), 2);
        assert_eq!(tree.test_files().count(), 0);

        let under_docs = dir.path().join("docs/shop");
        touch(&under_docs, "src/lib.rs");
        touch(&under_docs, "tests/cart.rs");
        let tree = ProjectTree::new(&under_docs, DEFAULT_MAX_DEPTH);
        assert_eq!(tree.doc_files().count(), 0);
        assert_eq!(tree.test_files().count(), 1);
    }
}
