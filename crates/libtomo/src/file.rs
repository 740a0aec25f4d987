//! Source file representation and the bounded source cache.
//!
//! Every span in the compiler points back into a [`SourceFile`]. Files are
//! cheap to clone (the path and the code are `Arc`-shared) so they can be
//! carried inside parser state, AST spans and diagnostics alike.

use std::{path::PathBuf, sync::Arc};

use indexmap::IndexMap;
use miette::NamedSource;

/// Maximum number of entries the [`SourceCache`] keeps before evicting.
pub const SOURCE_CACHE_CAP: usize = 100;

/// A source file with its path and code content
///
/// This structure is used throughout the compiler to track source files
/// and provide error reporting with proper file context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    /// The file path as a vector of path components
    pub path: Arc<Vec<String>>,
    /// The source code content of the file
    pub code: Arc<String>,
}

impl SourceFile {
    /// Creates a new source file with the given path components and code
    pub fn new(path: Vec<String>, code: String) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
        }
    }

    /// Returns a reference to the file path components
    pub fn path(&self) -> &Vec<String> {
        &self.path
    }

    /// Returns a reference to the source code content
    pub fn code(&self) -> &String {
        self.code.as_ref()
    }

    /// The module name of this file: the last path component without the
    /// `.tm` extension.
    pub fn module_name(&self) -> String {
        let last = self.path.last().map(String::as_str).unwrap_or("<memory>");
        last.strip_suffix(".tm").unwrap_or(last).to_string()
    }

    /// The path joined back into a single display string.
    pub fn display_path(&self) -> String {
        let buffer = PathBuf::from_iter(self.path.iter());
        buffer.to_string_lossy().to_string()
    }
}

impl std::fmt::Display for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceFile: {:?}", self.path)
    }
}

impl From<SourceFile> for NamedSource<String> {
    fn from(file: SourceFile) -> Self {
        NamedSource::new(file.display_path(), file.code().clone())
    }
}

impl From<&SourceFile> for NamedSource<String> {
    fn from(file: &SourceFile) -> Self {
        NamedSource::new(file.display_path(), file.code().clone())
    }
}

/// A bounded cache of loaded source files keyed by resolved path.
///
/// The driver uses this when chasing `use ./foo.tm` imports so the same file
/// is not read (or re-parsed) twice. The cache is capped: when it grows past
/// [`SOURCE_CACHE_CAP`] entries, the oldest entry is dropped. Correctness
/// never depends on a hit; a miss simply re-reads the file.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: IndexMap<PathBuf, SourceFile>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a previously loaded file by resolved path.
    pub fn get(&self, path: &PathBuf) -> Option<&SourceFile> {
        self.files.get(path)
    }

    /// Stores a loaded file, evicting the oldest entry when full.
    pub fn insert(&mut self, path: PathBuf, file: SourceFile) {
        if self.files.len() >= SOURCE_CACHE_CAP && !self.files.contains_key(&path) {
            self.files.shift_remove_index(0);
        }
        self.files.insert(path, file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_is_bounded() {
        let mut cache = SourceCache::new();
        for i in 0..(SOURCE_CACHE_CAP + 10) {
            let path = PathBuf::from(format!("file{i}.tm"));
            cache.insert(path, SourceFile::new(vec![format!("file{i}.tm")], String::new()));
        }
        assert_eq!(cache.len(), SOURCE_CACHE_CAP);
        // The newest entry is always retained
        assert!(cache.get(&PathBuf::from(format!("file{}.tm", SOURCE_CACHE_CAP + 9))).is_some());
    }

    #[test]
    fn module_name_strips_extension() {
        let file = SourceFile::new(vec!["dir".into(), "vectors.tm".into()], String::new());
        assert_eq!(file.module_name(), "vectors");
    }
}
