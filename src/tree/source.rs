// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Source resolution.
//!
//! A tree is assembled from an ordered listing of __source roots__. Each
//! source root is either a directory or a single file. Directories can be
//! declared in two ways:
//!
//! - `nginx/` contributes the _contents_ of the directory, rooted at the
//!   destination.
//! - `nginx` contributes the directory itself, so everything lands one level
//!   deeper beneath `nginx` at the destination.
//!
//! A single file always lands at the top level of the destination under its
//! own base name.
//!
//! # Override Semantics
//!
//! Source roots are processed strictly in order, and every discovered path
//! is upserted into the [`LogicalManifest`] by destination-relative path.
//! Thus, a later source root always wins over an earlier one. Directories
//! merge by union of their children, whereas files are simply replaced. If
//! a directory gets replaced by a file, or vice versa, the entire previous
//! subtree is discarded before the new entry is inserted.

use crate::{
    config::{MissingSources, Mode, SourceDefinition},
    path::RelPath,
    tree::classify::{Classifier, EntryKind},
};

use ignore::WalkBuilder;
use std::{
    collections::{btree_map, BTreeMap},
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Single source root declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    /// Path to source root, absolute or relative to the search path.
    pub path: PathBuf,

    /// Only contribute the contents of a directory, not the directory itself.
    pub contents_only: bool,

    /// Treat source root as empty when it cannot be found.
    pub optional: bool,
}

impl SourceRoot {
    /// Parse source root declaration.
    ///
    /// A trailing separator marks the declaration as contents-only.
    pub fn parse(data: impl AsRef<str>) -> Self {
        let data = data.as_ref();
        let trimmed = data.trim_end_matches(std::path::is_separator);
        let contents_only = trimmed.len() != data.len() && !trimmed.is_empty();

        Self {
            path: PathBuf::from(if trimmed.is_empty() { data } else { trimmed }),
            contents_only,
            optional: false,
        }
    }

    /// Mark source root as optional.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

impl From<&SourceDefinition> for SourceRoot {
    fn from(definition: &SourceDefinition) -> Self {
        Self::parse(&definition.path).optional(definition.optional)
    }
}

/// Locate source roots.
pub trait SourceLocator {
    /// Determine absolute location of source root, if it exists.
    fn locate(&self, path: &Path) -> Option<PathBuf>;
}

impl<L> SourceLocator for &L
where
    L: SourceLocator + ?Sized,
{
    fn locate(&self, path: &Path) -> Option<PathBuf> {
        (**self).locate(path)
    }
}

/// Locate source roots through an ordered listing of search directories.
///
/// Absolute source roots are used as-is. Relative source roots are tried
/// against each search directory in order, and the first one that exists
/// wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Construct new search path.
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }
}

impl SourceLocator for SearchPath {
    fn locate(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            return path.exists().then(|| path.to_path_buf());
        }

        self.dirs
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.exists())
    }
}

/// Resolved view of one destination-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalEntry {
    pub kind: EntryKind,

    /// Absolute location of the winning source.
    pub source: PathBuf,

    /// Target permission bits.
    pub mode: Mode,
}

/// Override-resolved mapping from destination-relative path to entry.
///
/// # Invariant
///
/// - Exactly one entry per relative path.
/// - Every ancestor of an entry is a directory entry, except the tree root,
///   which never appears as an entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogicalManifest {
    entries: BTreeMap<RelPath, LogicalEntry>,
}

impl LogicalManifest {
    /// Construct new empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entry, replacing whatever occupied its path.
    ///
    /// When a directory is replaced by a file or vice versa, the previous
    /// subtree is discarded first.
    pub fn upsert(&mut self, path: RelPath, entry: LogicalEntry) {
        if let Some(existing) = self.entries.get(&path) {
            if existing.kind.is_dir() != entry.kind.is_dir() {
                debug!("discard {} subtree at {path}", existing.kind);
                self.entries.retain(|key, _| !key.starts_with(&path));
            }
        }

        self.entries.insert(path, entry);
    }

    pub fn get(&self, path: &RelPath) -> Option<&LogicalEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &RelPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order, parents before children.
    pub fn iter(&self) -> btree_map::Iter<'_, RelPath, LogicalEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a LogicalManifest {
    type Item = (&'a RelPath, &'a LogicalEntry);
    type IntoIter = btree_map::Iter<'a, RelPath, LogicalEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Resolve ordered source roots into a logical manifest.
#[derive(Debug, Clone)]
pub struct Resolver<L>
where
    L: SourceLocator,
{
    locator: L,
    classifier: Classifier,
    missing: MissingSources,
    file_mode: Mode,
    directory_mode: Mode,
}

impl<L> Resolver<L>
where
    L: SourceLocator,
{
    /// Construct new resolver with default settings.
    pub fn new(locator: L) -> Self {
        Self {
            locator,
            classifier: Classifier::default(),
            missing: MissingSources::default(),
            file_mode: Mode::FILE,
            directory_mode: Mode::DIRECTORY,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_missing_sources(mut self, missing: MissingSources) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_modes(mut self, file_mode: Mode, directory_mode: Mode) -> Self {
        self.file_mode = file_mode;
        self.directory_mode = directory_mode;
        self
    }

    /// Resolve ordered source roots.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::EscapingRoot`] if a relative source root
    ///   climbs out of the search path.
    /// - Return [`ResolveError::MissingRoot`] if a required source root
    ///   cannot be found.
    /// - Return [`ResolveError::Walk`] if a source directory cannot be
    ///   walked.
    #[instrument(skip(self, roots), level = "debug")]
    pub fn resolve<'r>(
        &self,
        roots: impl IntoIterator<Item = &'r SourceRoot>,
    ) -> Result<LogicalManifest> {
        let mut manifest = LogicalManifest::new();
        for root in roots {
            check_namespace(&root.path)?;

            let Some(location) = self.locator.locate(&root.path) else {
                if root.optional || self.missing == MissingSources::Skip {
                    warn!("skip missing source {:?}", root.path.display());
                    continue;
                }

                return Err(ResolveError::MissingRoot(root.path.clone()));
            };

            info!(
                "resolve source {:?} -> {:?}",
                root.path.display(),
                location.display()
            );
            self.resolve_root(&mut manifest, root, &location)?;
        }

        Ok(manifest)
    }

    fn resolve_root(
        &self,
        manifest: &mut LogicalManifest,
        root: &SourceRoot,
        location: &Path,
    ) -> Result<()> {
        let file_name = location
            .file_name()
            .map(RelPath::new)
            .transpose()
            .map_err(|_| ResolveError::NoFileName(location.to_path_buf()))?
            .ok_or_else(|| ResolveError::NoFileName(location.to_path_buf()))?;

        if !location.is_dir() {
            self.upsert(manifest, &RelPath::root(), &file_name, location, false);
            return Ok(());
        }

        let prefix = if root.contents_only {
            RelPath::root()
        } else {
            self.upsert(manifest, &RelPath::root(), &file_name, location, true);
            file_name
        };

        // INVARIANT: Walk in file name order so that classification
        //   collisions, e.g., "a.conf" next to "a.conf.j2", resolve the same
        //   way on every run.
        let walker = WalkBuilder::new(location)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }

            let Some(file_type) = entry.file_type() else {
                continue;
            };

            if !file_type.is_dir() && !file_type.is_file() {
                warn!(
                    "ignore unsupported source file type at {:?}",
                    entry.path().display()
                );
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(location)
                .ok()
                .and_then(|path| RelPath::new(path).ok())
                .ok_or_else(|| ResolveError::NoFileName(entry.path().to_path_buf()))?;
            self.upsert(manifest, &prefix, &relative, entry.path(), file_type.is_dir());
        }

        Ok(())
    }

    fn upsert(
        &self,
        manifest: &mut LogicalManifest,
        prefix: &RelPath,
        relative: &RelPath,
        source: &Path,
        is_dir: bool,
    ) {
        let (kind, destination) = self.classifier.classify(relative, is_dir);
        let mode = if is_dir {
            self.directory_mode
        } else {
            self.file_mode
        };

        let destination = prefix.concat(&destination);
        debug!("map {:?} -> {destination} as {kind}", source.display());
        manifest.upsert(
            destination,
            LogicalEntry {
                kind,
                source: source.to_path_buf(),
                mode,
            },
        );
    }
}

fn check_namespace(path: &Path) -> Result<()> {
    if path.is_absolute() {
        return Ok(());
    }

    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir if depth == 0 => {
                return Err(ResolveError::EscapingRoot(path.to_path_buf()));
            }
            Component::ParentDir => depth -= 1,
            _ => continue,
        }
    }

    Ok(())
}

/// Source resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Required source root does not exist.
    #[error("source {:?} cannot be found", .0.display())]
    MissingRoot(PathBuf),

    /// Relative source root resolves outside the search path.
    #[error("source {:?} escapes search path", .0.display())]
    EscapingRoot(PathBuf),

    /// Source path has no usable file name.
    #[error("source {:?} has no usable file name", .0.display())]
    NoFileName(PathBuf),

    /// Source directory cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
