//! Source file representation for the slang compiler.
//!
//! A [`SourceFile`] carries the module path and the source text of one
//! compilation unit. It is cheap to clone (the contents are `Arc`-shared) and
//! converts into [`miette::NamedSource`] so diagnostics can render snippets.

use std::{path::PathBuf, sync::Arc};

use miette::NamedSource;

/// A source file with its module path and contents.
///
/// The path is kept as components (`["collections", "list"]` for the module
/// `collections::list`) so the compiler can derive both the qualified module
/// name and an on-disk file name from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    /// Module path components.
    pub path: Arc<Vec<String>>,
    /// Source text.
    pub code: Arc<String>,
}

impl SourceFile {
    /// Creates a new source file from path components and source text.
    pub fn new(path: Vec<String>, code: String) -> Self {
        Self {
            path: path.into(),
            code: code.into(),
        }
    }

    /// Returns the module path components.
    pub fn path(&self) -> &Vec<String> {
        &self.path
    }

    /// Returns the source text.
    pub fn code(&self) -> &String {
        self.code.as_ref()
    }

    /// Returns the qualified module name, components joined with `::`.
    pub fn module_name(&self) -> String {
        self.path.join("::")
    }
}

impl From<SourceFile> for NamedSource<String> {
    fn from(file: SourceFile) -> Self {
        let pathbuffer = PathBuf::from_iter(file.path.iter());
        let path = pathbuffer.to_string_lossy();

        NamedSource::new(path, file.code.to_string())
    }
}

impl From<&SourceFile> for NamedSource<String> {
    fn from(file: &SourceFile) -> Self {
        let pathbuffer = PathBuf::from_iter(file.path.iter());
        let path = pathbuffer.to_string_lossy();

        NamedSource::new(path, file.code.to_string())
    }
}

impl std::fmt::Display for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceFile: {:?}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_joins_components() {
        let file = SourceFile::new(vec!["collections".into(), "list".into()], String::new());
        assert_eq!(file.module_name(), "collections::list");
    }

    #[test]
    fn clones_share_contents() {
        let file = SourceFile::new(vec!["main".into()], "fn main() -> void {}".to_string());
        let clone = file.clone();
        assert!(Arc::ptr_eq(&file.code, &clone.code));
    }
}
