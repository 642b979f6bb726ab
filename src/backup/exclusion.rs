use std::ffi::OsStr;

/// Build and VCS artifact directories skipped by default.
pub const DEFAULT_EXCLUDES: &[&str] = &["node_modules", ".git", ".svn", "bin", "obj"];

/// Directory names whose whole subtree is left out of counting and copying.
///
/// Matching is exact but ASCII case-insensitive, so `Node_Modules` is excluded
/// just like `node_modules`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    names: Vec<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.names.iter().any(|exc| exc.eq_ignore_ascii_case(name))
    }

    /// Non-UTF-8 names can never match a configured entry.
    pub fn is_excluded_os(&self, name: &OsStr) -> bool {
        name.to_str().is_some_and(|n| self.is_excluded(n))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDES.iter().copied())
    }
}

impl std::fmt::Display for ExclusionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.names.join(", "))
    }
}
