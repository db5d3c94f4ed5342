// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Destination scanning.
//!
//! Capture what currently exists beneath the destination root. The scan is
//! taken fresh at the start of every reconciliation run, and only records
//! kind and permission bits. File content is never read.

use crate::{
    path::RelPath,
    tree::transport::{NodeKind, NodeStat, Transport, TransportError},
};

use std::{
    collections::{btree_map, BTreeMap, VecDeque},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Snapshot of destination subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationManifest {
    root: PathBuf,
    root_exists: bool,
    entries: BTreeMap<RelPath, NodeStat>,
}

impl DestinationManifest {
    /// Construct new empty manifest for a destination that does not exist.
    pub fn absent(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            root_exists: false,
            entries: BTreeMap::new(),
        }
    }

    /// Construct new manifest from existing entries.
    pub fn with_entries(
        root: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = (RelPath, NodeStat)>,
    ) -> Self {
        Self {
            root: root.into(),
            root_exists: true,
            entries: entries.into_iter().collect(),
        }
    }

    /// Absolute path to destination root.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Check if destination root exists.
    pub fn root_exists(&self) -> bool {
        self.root_exists
    }

    pub fn get(&self, path: &RelPath) -> Option<&NodeStat> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order, parents before children.
    pub fn iter(&self) -> btree_map::Iter<'_, RelPath, NodeStat> {
        self.entries.iter()
    }

    /// Iterate every entry strictly beneath `base`.
    pub fn descendants<'a>(
        &'a self,
        base: &'a RelPath,
    ) -> impl Iterator<Item = (&'a RelPath, &'a NodeStat)> + 'a {
        self.entries
            .range(base.clone()..)
            .skip_while(move |(path, _)| *path == base)
            .take_while(move |(path, _)| path.starts_with(base))
    }
}

/// Scan destination subtree through transport.
///
/// # Errors
///
/// - Return [`ScanError::RelativeRoot`] if destination root is not absolute.
/// - Return [`ScanError::NotADirectory`] if destination root exists, but is
///   not a directory.
/// - Return [`ScanError::Transport`] if transport fails to stat or list.
#[instrument(skip(transport), level = "debug")]
pub fn scan(transport: &impl Transport, root: &Path) -> Result<DestinationManifest> {
    if !root.is_absolute() {
        return Err(ScanError::RelativeRoot(root.to_path_buf()));
    }

    match transport.stat(root)? {
        None => {
            debug!("destination {:?} does not exist yet", root.display());
            return Ok(DestinationManifest::absent(root));
        }
        Some(stat) if stat.kind != NodeKind::Directory => {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }
        Some(_) => (),
    }

    let mut entries = BTreeMap::new();
    let mut pending = VecDeque::new();
    pending.push_front(RelPath::root());

    // Use DFS to traverse destination subtree.
    while let Some(dir) = pending.pop_front() {
        for child in transport.list_dir(&dir.resolve(root))? {
            let path = dir
                .join(&child.name)
                .map_err(|_| ScanError::InvalidName(dir.resolve(root).join(&child.name)))?;

            // INVARIANT: Never descend into symlinks or special files.
            if child.stat.kind == NodeKind::Directory {
                pending.push_front(path.clone());
            }

            entries.insert(path, child.stat);
        }
    }

    debug!("found {} entries in {:?}", entries.len(), root.display());

    Ok(DestinationManifest::with_entries(root, entries))
}

/// Destination scanning error types.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Destination root must be absolute.
    #[error("destination {:?} is not an absolute path", .0.display())]
    RelativeRoot(PathBuf),

    /// Destination root exists, but is not a directory.
    #[error("destination {:?} exists, but is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Transport listed a name that is not a plain path component.
    #[error("destination entry {:?} has an invalid name", .0.display())]
    InvalidName(PathBuf),

    /// Transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Friendly result alias :3
pub type Result<T, E = ScanError> = std::result::Result<T, E>;
