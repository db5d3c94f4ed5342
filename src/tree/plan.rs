// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reconciliation planning.
//!
//! Diff the logical manifest against the destination manifest, and produce
//! the ordered listing of operations needed to make the destination match.
//! Planning is a pure function: nothing is read or written, so a plan can be
//! shown to the user as a dry run, and executing it is the only step that
//! has side effects.
//!
//! # Ordering
//!
//! All removals come first, deepest path first, so children always go
//! before their parents. Everything else follows in path order, so parents
//! always get created before their children. Thus, whenever an entry
//! changes kind, the old subtree is gone before the replacement is written.
//!
//! # Exclusive Mode
//!
//! By default, destination entries that no source provides are left alone,
//! because deploying into a shared directory is the common case. In
//! exclusive mode they get removed, except for anything matched by an
//! exclusive ignore pattern, everything beneath such a match, and the
//! ancestors needed to keep the match in place.

use crate::{
    config::{Mode, Ownership},
    path::RelPath,
    tree::{
        classify::EntryKind,
        scan::DestinationManifest,
        source::{LogicalEntry, LogicalManifest},
        transport::NodeKind,
    },
};

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Where the content of a written file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Render template with variable bindings.
    Render(PathBuf),

    /// Copy bytes verbatim.
    Copy(PathBuf),
}

impl ContentSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Render(path) | Self::Copy(path) => path.as_path(),
        }
    }
}

/// Single reconciliation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create directory.
    EnsureDirectory { path: RelPath, mode: Mode },

    /// Write file content and permission bits.
    WriteFile {
        path: RelPath,
        content: ContentSource,
        mode: Mode,

        /// File of same kind already exists at path.
        exists: bool,
    },

    /// Fix permission bits of existing entry.
    SetMode { path: RelPath, mode: Mode },

    /// Fix numeric owner and group of entry.
    SetOwner { path: RelPath, ownership: Ownership },

    /// Remove entry, recursively for directories.
    Remove { path: RelPath, kind: NodeKind },
}

impl Operation {
    pub fn path(&self) -> &RelPath {
        match self {
            Self::EnsureDirectory { path, .. }
            | Self::WriteFile { path, .. }
            | Self::SetMode { path, .. }
            | Self::SetOwner { path, .. }
            | Self::Remove { path, .. } => path,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::EnsureDirectory { .. } => OperationKind::EnsureDirectory,
            Self::WriteFile {
                content: ContentSource::Render(_),
                ..
            } => OperationKind::RenderFile,
            Self::WriteFile {
                content: ContentSource::Copy(_),
                ..
            } => OperationKind::CopyFile,
            Self::SetMode { .. } => OperationKind::SetMode,
            Self::SetOwner { .. } => OperationKind::SetOwner,
            Self::Remove { .. } => OperationKind::Remove,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::EnsureDirectory { path, mode } => write!(fmt, "mkdir  {mode} {path}"),
            Self::WriteFile {
                path,
                content: ContentSource::Render(source),
                mode,
                ..
            } => write!(fmt, "render {mode} {path} <- {}", source.display()),
            Self::WriteFile {
                path,
                content: ContentSource::Copy(source),
                mode,
                ..
            } => write!(fmt, "copy   {mode} {path} <- {}", source.display()),
            Self::SetMode { path, mode } => write!(fmt, "chmod  {mode} {path}"),
            Self::SetOwner { path, ownership } => write!(fmt, "chown  {ownership} {path}"),
            Self::Remove { path, kind } => write!(fmt, "remove {kind} {path}"),
        }
    }
}

/// Kind of operation, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    EnsureDirectory,
    RenderFile,
    CopyFile,
    SetMode,
    SetOwner,
    Remove,
}

impl Display for OperationKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::EnsureDirectory => fmt.write_str("create directory"),
            Self::RenderFile => fmt.write_str("render file"),
            Self::CopyFile => fmt.write_str("copy file"),
            Self::SetMode => fmt.write_str("set mode"),
            Self::SetOwner => fmt.write_str("set owner"),
            Self::Remove => fmt.write_str("remove"),
        }
    }
}

/// Planner options.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Remove destination entries that no source provides.
    pub exclusive: bool,

    /// Destination entries that exclusive mode must keep.
    pub exclusive_ignore: Vec<glob::Pattern>,

    /// Rewrite existing files, leaving change detection to the transport.
    pub refresh_files: bool,

    /// Permission bits for destination root, if it must be created.
    pub root_mode: Mode,

    /// Ownership enforced on managed entries.
    pub ownership: Ownership,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            exclusive: false,
            exclusive_ignore: Vec::new(),
            refresh_files: true,
            root_mode: Mode::DIRECTORY,
            ownership: Ownership::default(),
        }
    }
}

impl PlanOptions {
    fn own(&self, operations: &mut Vec<Operation>, path: &RelPath) {
        if !self.ownership.is_unset() {
            operations.push(Operation::SetOwner {
                path: path.clone(),
                ownership: self.ownership,
            });
        }
    }

    fn is_ignored(&self, path: &RelPath) -> bool {
        std::iter::once(path.clone())
            .chain(path.ancestors().filter(|ancestor| !ancestor.is_root()))
            .any(|candidate| {
                self.exclusive_ignore
                    .iter()
                    .any(|pattern| pattern.matches_path(candidate.as_path()))
            })
    }
}

/// Immutable, ordered listing of operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    root: PathBuf,
    operations: Vec<Operation>,
    unchanged: Vec<RelPath>,
    managed: BTreeMap<RelPath, NodeKind>,
}

impl Plan {
    /// Absolute path to destination root.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        self.operations.as_slice()
    }

    /// Managed entries that are already reconciled.
    pub fn unchanged(&self) -> &[RelPath] {
        self.unchanged.as_slice()
    }

    /// Every entry the logical manifest provides, along with its kind.
    pub fn managed(&self) -> impl Iterator<Item = (&RelPath, NodeKind)> + '_ {
        self.managed.iter().map(|(path, kind)| (path, *kind))
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Number of removals in plan.
    pub fn removals(&self) -> usize {
        self.operations
            .iter()
            .filter(|operation| matches!(operation, Operation::Remove { .. }))
            .count()
    }
}

impl Display for Plan {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for operation in &self.operations {
            writeln!(fmt, "{operation}")?;
        }

        Ok(())
    }
}

/// Plan reconciliation of destination against logical manifest.
#[instrument(skip_all, level = "debug")]
pub fn plan(
    logical: &LogicalManifest,
    destination: &DestinationManifest,
    options: &PlanOptions,
) -> Plan {
    let mut removals = BTreeMap::new();
    let mut operations = Vec::new();
    let mut unchanged = Vec::new();

    if !destination.root_exists() {
        operations.push(Operation::EnsureDirectory {
            path: RelPath::root(),
            mode: options.root_mode,
        });
        options.own(&mut operations, &RelPath::root());
    }

    for (path, entry) in logical {
        let Some(current) = destination.get(path) else {
            operations.push(create(path, entry, false));
            options.own(&mut operations, path);
            continue;
        };

        if current.kind != node_kind(entry.kind) {
            debug!("replace {} at {path} with {}", current.kind, entry.kind);
            removals.insert(path.clone(), current.kind);
            for (descendant, stat) in destination.descendants(path) {
                removals.insert(descendant.clone(), stat.kind);
            }
            operations.push(create(path, entry, false));
            options.own(&mut operations, path);
            continue;
        }

        let pending = operations.len();
        match entry.kind {
            EntryKind::RenderableFile | EntryKind::VerbatimFile if options.refresh_files => {
                operations.push(create(path, entry, true));
            }
            _ if current.mode != entry.mode => {
                operations.push(Operation::SetMode {
                    path: path.clone(),
                    mode: entry.mode,
                });
            }
            _ => (),
        }

        if !options.ownership.is_satisfied_by(current.owner, current.group) {
            operations.push(Operation::SetOwner {
                path: path.clone(),
                ownership: options.ownership,
            });
        }

        if operations.len() == pending {
            unchanged.push(path.clone());
        }
    }

    if options.exclusive {
        let kept = kept_strays(logical, destination, options);
        for (path, stat) in destination.iter() {
            if logical.contains(path) || kept.contains(path) {
                continue;
            }

            debug!("remove stray {} at {path}", stat.kind);
            removals.insert(path.clone(), stat.kind);
        }
    }

    // INVARIANT: Removals deepest first, and all of them before anything is
    //   created, so replaced subtrees are gone before replacements land.
    let mut removals = removals.into_iter().collect::<Vec<_>>();
    removals.sort_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
    let mut ordered = removals
        .into_iter()
        .map(|(path, kind)| Operation::Remove { path, kind })
        .collect::<Vec<_>>();
    ordered.extend(operations);

    Plan {
        root: destination.root().to_path_buf(),
        operations: ordered,
        unchanged,
        managed: logical
            .iter()
            .map(|(path, entry)| (path.clone(), node_kind(entry.kind)))
            .collect(),
    }
}

/// Stray entries that exclusive mode keeps, along with their ancestors.
fn kept_strays(
    logical: &LogicalManifest,
    destination: &DestinationManifest,
    options: &PlanOptions,
) -> BTreeSet<RelPath> {
    let mut kept = BTreeSet::new();
    if options.exclusive_ignore.is_empty() {
        return kept;
    }

    for (path, _) in destination.iter() {
        if logical.contains(path) || !options.is_ignored(path) {
            continue;
        }

        debug!("keep {path} matched by exclusive ignore");
        kept.insert(path.clone());
        kept.extend(path.ancestors().filter(|ancestor| !ancestor.is_root()));
    }

    kept
}

fn create(path: &RelPath, entry: &LogicalEntry, exists: bool) -> Operation {
    match entry.kind {
        EntryKind::Directory => Operation::EnsureDirectory {
            path: path.clone(),
            mode: entry.mode,
        },
        EntryKind::RenderableFile => Operation::WriteFile {
            path: path.clone(),
            content: ContentSource::Render(entry.source.clone()),
            mode: entry.mode,
            exists,
        },
        EntryKind::VerbatimFile => Operation::WriteFile {
            path: path.clone(),
            content: ContentSource::Copy(entry.source.clone()),
            mode: entry.mode,
            exists,
        },
    }
}

fn node_kind(kind: EntryKind) -> NodeKind {
    match kind {
        EntryKind::Directory => NodeKind::Directory,
        EntryKind::RenderableFile | EntryKind::VerbatimFile => NodeKind::File,
    }
}
