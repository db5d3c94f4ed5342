// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, and model the relative paths that the reconciliation
//! engine keys all of its manifests by.

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path, PathBuf},
};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf, NoWayHome> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to tree definition file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/oxitree/tree.toml` as the
/// default absolute path for a tree definition. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_definition_path() -> Result<PathBuf, NoWayHome> {
    dirs::config_dir()
        .map(|path| path.join("oxitree").join("tree.toml"))
        .ok_or(NoWayHome)
}

/// Relative path inside a managed tree.
///
/// Only holds normal components, i.e., no root, prefix, `.`, or `..`
/// components. The empty relative path denotes the root of the tree itself.
///
/// Ordering is component-wise, so a directory always sorts before anything
/// nested beneath it. Manifests rely on this to visit parents first.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelPath(PathBuf);

impl RelPath {
    /// Relative path of the tree root.
    pub fn root() -> Self {
        Self(PathBuf::new())
    }

    /// Construct new relative path.
    ///
    /// Current directory components are dropped.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidRelPath`] if path is absolute or contains parent
    ///   directory components.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, InvalidRelPath> {
        let path = path.as_ref();
        let mut rel = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => rel.push(name),
                Component::CurDir => continue,
                _ => return Err(InvalidRelPath(path.to_path_buf())),
            }
        }

        Ok(Self(rel))
    }

    /// Extend relative path by one or more normal components.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidRelPath`] if `name` is not a relative path.
    pub fn join(&self, name: impl AsRef<Path>) -> Result<Self, InvalidRelPath> {
        let tail = Self::new(name)?;
        Ok(self.concat(&tail))
    }

    /// Concatenate two relative paths.
    pub fn concat(&self, tail: &RelPath) -> Self {
        Self(self.0.join(&tail.0))
    }

    /// Replace final component of relative path.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidRelPath`] if `name` is not a single normal component.
    pub fn with_file_name(&self, name: impl AsRef<OsStr>) -> Result<Self, InvalidRelPath> {
        let name = Path::new(name.as_ref());
        let mut components = name.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(Self(self.0.with_file_name(name))),
            _ => Err(InvalidRelPath(name.to_path_buf())),
        }
    }

    /// Check if relative path points to tree root.
    pub fn is_root(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    /// Final component of relative path, unless it points to tree root.
    pub fn file_name(&self) -> Option<&OsStr> {
        self.0.file_name()
    }

    /// Iterate through every proper ancestor, nearest first, tree root last.
    pub fn ancestors(&self) -> impl Iterator<Item = RelPath> + '_ {
        self.0
            .ancestors()
            .skip(1)
            .map(|ancestor| Self(ancestor.to_path_buf()))
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.0.components().count()
    }

    /// Check if `base` is this path or one of its ancestors.
    pub fn starts_with(&self, base: &RelPath) -> bool {
        self.0.starts_with(&base.0)
    }

    /// Check if this path is strictly nested beneath `base`.
    pub fn is_beneath(&self, base: &RelPath) -> bool {
        self != base && self.starts_with(base)
    }

    /// Treat relative path as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Resolve relative path against an absolute root.
    pub fn resolve(&self, root: impl AsRef<Path>) -> PathBuf {
        if self.is_root() {
            return root.as_ref().to_path_buf();
        }

        root.as_ref().join(&self.0)
    }
}

impl Display for RelPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.is_root() {
            return fmt.write_str(".");
        }

        fmt.write_str(self.0.to_string_lossy().as_ref())
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Path cannot be used as a relative path inside a tree.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{:?} is not a plain relative path", .0.display())]
pub struct InvalidRelPath(pub PathBuf);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("a/./b", "a/b"; "drops current dir")]
    #[test_case("./a", "a"; "leading current dir")]
    #[test_case("a/b/", "a/b"; "trailing slash")]
    #[test_case("", ""; "tree root")]
    #[test]
    fn rel_path_normalizes(input: &str, expect: &str) {
        let result = RelPath::new(input).unwrap();
        pretty_assertions::assert_eq!(result.as_path(), Path::new(expect));
    }

    #[test_case("../a"; "leading parent")]
    #[test_case("a/../../b"; "nested parent")]
    #[test_case("/etc/passwd"; "absolute")]
    #[test]
    fn rel_path_rejects(input: &str) {
        pretty_assertions::assert_eq!(RelPath::new(input), Err(InvalidRelPath(input.into())));
    }

    #[test]
    fn rel_path_orders_parents_first() -> anyhow::Result<()> {
        let mut paths = vec![
            RelPath::new("a-b")?,
            RelPath::new("a/b/c")?,
            RelPath::new("a")?,
            RelPath::new("a/b")?,
        ];
        paths.sort();
        let result = paths.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(result, vec!["a", "a/b", "a/b/c", "a-b"]);
        Ok(())
    }

    #[test]
    fn rel_path_nesting() -> anyhow::Result<()> {
        let dir = RelPath::new("etc/nginx")?;
        let file = dir.join("nginx.conf")?;
        assert!(file.is_beneath(&dir));
        assert!(file.is_beneath(&RelPath::root()));
        assert!(!dir.is_beneath(&dir));
        assert!(!RelPath::new("etc/nginx-old")?.starts_with(&dir));
        assert_eq!(file.depth(), 3);
        assert_eq!(
            file.ancestors().map(|p| p.to_string()).collect::<Vec<_>>(),
            vec!["etc/nginx", "etc", "."]
        );
        Ok(())
    }
}
