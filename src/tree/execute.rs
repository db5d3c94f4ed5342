// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Plan execution.
//!
//! Apply the operations of a [`Plan`] strictly in order through a
//! [`Transport`], and record what happened to each path in a [`Summary`].
//!
//! Execution is not transactional. A failed operation is recorded, and
//! everything that does not depend on it keeps going. Only a failed
//! directory creation or removal takes operations down with it: anything
//! later at that path or nested beneath it is skipped, and marked as failed
//! due to an unmet dependency. Thus, an entry that could not be removed is
//! never written through.

use crate::{
    path::RelPath,
    tree::{
        plan::{ContentSource, Operation, OperationKind, Plan},
        render::{Bindings, RenderError, Renderer},
        transport::{NodeKind, Transport, TransportError},
    },
};

use std::{
    collections::{btree_map, BTreeMap},
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// What happened to a path.
#[derive(Debug)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    Removed,
    Failed(Failure),
}

impl Outcome {
    /// Check if outcome changed the destination.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Removed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Display for Outcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Created => fmt.write_str("created"),
            Self::Updated => fmt.write_str("updated"),
            Self::Unchanged => fmt.write_str("unchanged"),
            Self::Removed => fmt.write_str("removed"),
            Self::Failed(failure) => write!(fmt, "failed to {failure}"),
        }
    }
}

/// Failed operation on a path.
#[derive(Debug, thiserror::Error)]
#[error("{operation}: {error}")]
pub struct Failure {
    pub operation: OperationKind,

    #[source]
    pub error: OperationError,
}

/// Per-path result of executing a plan.
#[derive(Debug, Default)]
pub struct Summary {
    outcomes: BTreeMap<RelPath, Outcome>,
    managed: BTreeMap<RelPath, NodeKind>,
}

impl Summary {
    /// Check if any path changed.
    pub fn changed(&self) -> bool {
        self.outcomes.values().any(Outcome::is_change)
    }

    /// Check if any path failed.
    pub fn failed(&self) -> bool {
        self.outcomes.values().any(Outcome::is_failure)
    }

    pub fn get(&self, path: &RelPath) -> Option<&Outcome> {
        self.outcomes.get(path)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Iterate outcomes in path order.
    pub fn iter(&self) -> btree_map::Iter<'_, RelPath, Outcome> {
        self.outcomes.iter()
    }

    /// Paths removed from destination.
    pub fn removed(&self) -> impl Iterator<Item = &RelPath> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, Outcome::Removed))
            .map(|(path, _)| path)
    }

    /// Directories the tree provides.
    pub fn managed_directories(&self) -> impl Iterator<Item = &RelPath> + '_ {
        self.managed_by_kind(NodeKind::Directory)
    }

    /// Files the tree provides.
    pub fn managed_files(&self) -> impl Iterator<Item = &RelPath> + '_ {
        self.managed_by_kind(NodeKind::File)
    }

    fn managed_by_kind(&self, kind: NodeKind) -> impl Iterator<Item = &RelPath> + '_ {
        self.managed
            .iter()
            .filter(move |(_, managed)| **managed == kind)
            .map(|(path, _)| path)
    }

    /// Paths that failed along with the reason.
    pub fn failures(&self) -> impl Iterator<Item = (&RelPath, &Failure)> + '_ {
        self.outcomes.iter().filter_map(|(path, outcome)| match outcome {
            Outcome::Failed(failure) => Some((path, failure)),
            _ => None,
        })
    }

    /// Count outcomes matching predicate.
    pub fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.values().filter(|outcome| predicate(outcome)).count()
    }

    // INVARIANT: A path removed and then re-created by the same plan was
    //   replaced, follow-up fixes never downgrade an earlier change, and the
    //   first failure recorded for a path sticks.
    fn record(&mut self, path: RelPath, outcome: Outcome) -> &Outcome {
        let merged = match (self.outcomes.remove(&path), outcome) {
            (Some(failed @ Outcome::Failed(_)), _) => failed,
            (_, failed @ Outcome::Failed(_)) => failed,
            (Some(Outcome::Removed), Outcome::Created) => Outcome::Updated,
            (Some(Outcome::Created), _) => Outcome::Created,
            (Some(Outcome::Updated), Outcome::Unchanged) => Outcome::Updated,
            (_, outcome) => outcome,
        };

        self.outcomes.entry(path).or_insert(merged)
    }
}

impl Display for Summary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (path, outcome) in &self.outcomes {
            writeln!(fmt, "{path}: {outcome}")?;
        }

        Ok(())
    }
}

/// Apply plans through transport.
#[derive(Debug)]
pub struct Executor<'b, T, R>
where
    T: Transport,
    R: Renderer,
{
    transport: T,
    renderer: R,
    bindings: &'b Bindings,
}

impl<'b, T, R> Executor<'b, T, R>
where
    T: Transport,
    R: Renderer,
{
    /// Construct new executor.
    pub fn new(transport: T, renderer: R, bindings: &'b Bindings) -> Self {
        Self {
            transport,
            renderer,
            bindings,
        }
    }

    /// Execute plan.
    pub fn execute(&self, plan: &Plan) -> Summary {
        self.execute_with(plan, |_, _| ())
    }

    /// Execute plan, notifying observer after every recorded outcome.
    #[instrument(skip_all, level = "debug")]
    pub fn execute_with(
        &self,
        plan: &Plan,
        mut observer: impl FnMut(&RelPath, &Outcome),
    ) -> Summary {
        let mut summary = Summary {
            managed: plan.managed().map(|(path, kind)| (path.clone(), kind)).collect(),
            ..Summary::default()
        };
        for path in plan.unchanged() {
            debug!("{path} already up to date");
            observer(path, summary.record(path.clone(), Outcome::Unchanged));
        }

        let mut blocked: Vec<RelPath> = Vec::new();
        for operation in plan.operations() {
            let path = operation.path();
            let blocker = blocked
                .iter()
                .find(|dep| path == *dep || path.is_beneath(dep))
                .cloned();
            let outcome = match blocker {
                Some(dependency) => {
                    warn!("skip {} of {path}, {dependency} failed", operation.kind());
                    Outcome::Failed(Failure {
                        operation: operation.kind(),
                        error: OperationError::DependencyUnmet { dependency },
                    })
                }
                None => match self.apply(plan.root(), operation) {
                    Ok(outcome) => {
                        if outcome.is_change() {
                            info!("{} {path}: {outcome}", operation.kind());
                        } else {
                            debug!("{} {path}: {outcome}", operation.kind());
                        }
                        outcome
                    }
                    Err(error) => {
                        if matches!(
                            operation,
                            Operation::EnsureDirectory { .. } | Operation::Remove { .. }
                        ) {
                            blocked.push(path.clone());
                        }
                        warn!("failed to {} {path}: {error}", operation.kind());
                        Outcome::Failed(Failure {
                            operation: operation.kind(),
                            error,
                        })
                    }
                },
            };

            observer(path, summary.record(path.clone(), outcome));
        }

        summary
    }

    fn apply(&self, root: &Path, operation: &Operation) -> Result<Outcome> {
        let target = operation.path().resolve(root);
        match operation {
            Operation::EnsureDirectory { mode, .. } => {
                self.transport.mkdir(&target, *mode)?;
                Ok(Outcome::Created)
            }
            Operation::WriteFile {
                content,
                mode,
                exists,
                ..
            } => {
                let bytes = self.content(content)?;
                let changed = self.transport.write_file(&target, &bytes, *mode)?;
                Ok(match (exists, changed) {
                    (false, _) => Outcome::Created,
                    (true, true) => Outcome::Updated,
                    (true, false) => Outcome::Unchanged,
                })
            }
            Operation::SetMode { mode, .. } => {
                self.transport.chmod(&target, *mode)?;
                Ok(Outcome::Updated)
            }
            Operation::SetOwner { ownership, .. } => {
                self.transport.chown(&target, *ownership)?;
                Ok(Outcome::Updated)
            }
            Operation::Remove { .. } => {
                self.transport.remove(&target)?;
                Ok(Outcome::Removed)
            }
        }
    }

    fn content(&self, source: &ContentSource) -> Result<Vec<u8>> {
        let path = source.path();
        let bytes = fs::read(path).map_err(|err| OperationError::ReadSource {
            source: err,
            path: path.to_path_buf(),
        })?;

        match source {
            ContentSource::Copy(_) => Ok(bytes),
            ContentSource::Render(_) => self
                .renderer
                .render(&bytes, self.bindings)
                .map(String::into_bytes)
                .map_err(|err| OperationError::Render {
                    source: err,
                    path: path.to_path_buf(),
                }),
        }
    }
}

/// Per-operation error types.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// Source file cannot be read.
    #[error("failed to read source {:?}", path.display())]
    ReadSource {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Template cannot be rendered.
    #[error("failed to render template {:?}", path.display())]
    Render {
        #[source]
        source: RenderError,
        path: PathBuf,
    },

    /// Transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Earlier operation at path or one of its parents failed.
    #[error("depends on {dependency}, which failed")]
    DependencyUnmet { dependency: RelPath },
}

/// Friendly result alias :3
pub type Result<T, E = OperationError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::{Mode, Ownership},
        tree::{
            plan::{plan, PlanOptions},
            render::ShellExpandRenderer,
            scan::scan,
            source::{Resolver, SearchPath, SourceRoot},
            transport::{LocalTransport, NodeEntry, NodeStat},
        },
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    /// Local transport that refuses to create one directory, and optionally
    /// refuses to remove anything.
    #[derive(Default)]
    struct Faulty {
        inner: LocalTransport,
        refuse_mkdir: Option<PathBuf>,
        refuse_remove: bool,
    }

    impl Transport for Faulty {
        fn stat(&self, path: &Path) -> crate::tree::transport::Result<Option<NodeStat>> {
            self.inner.stat(path)
        }

        fn list_dir(&self, path: &Path) -> crate::tree::transport::Result<Vec<NodeEntry>> {
            self.inner.list_dir(path)
        }

        fn mkdir(&self, path: &Path, mode: Mode) -> crate::tree::transport::Result<()> {
            if self.refuse_mkdir.as_deref() == Some(path) {
                return Err(TransportError::CreateDir {
                    source: std::io::Error::other("permission denied"),
                    path: path.to_path_buf(),
                });
            }
            self.inner.mkdir(path, mode)
        }

        fn write_file(
            &self,
            path: &Path,
            content: &[u8],
            mode: Mode,
        ) -> crate::tree::transport::Result<bool> {
            self.inner.write_file(path, content, mode)
        }

        fn chmod(&self, path: &Path, mode: Mode) -> crate::tree::transport::Result<()> {
            self.inner.chmod(path, mode)
        }

        fn chown(&self, path: &Path, ownership: Ownership) -> crate::tree::transport::Result<()> {
            self.inner.chown(path, ownership)
        }

        fn remove(&self, path: &Path) -> crate::tree::transport::Result<()> {
            if self.refuse_remove {
                return Err(TransportError::Remove {
                    source: std::io::Error::other("device or resource busy"),
                    path: path.to_path_buf(),
                });
            }
            self.inner.remove(path)
        }
    }

    fn setup(files: &[(&str, &str)]) -> anyhow::Result<PathBuf> {
        let root = std::env::current_dir()?;
        for (path, content) in files {
            let path = root.join("src").join(path);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(path, content)?;
        }
        Ok(root)
    }

    fn plan_for(root: &Path, transport: &impl Transport) -> anyhow::Result<Plan> {
        let manifest = Resolver::new(SearchPath::new([root])).resolve(&[SourceRoot::parse("src/")])?;
        let destination = scan(transport, &root.join("dest"))?;
        Ok(plan(&manifest, &destination, &PlanOptions::default()))
    }

    fn outcomes(summary: &Summary) -> Vec<(String, String)> {
        summary
            .iter()
            .map(|(path, outcome)| (path.to_string(), outcome.to_string()))
            .collect()
    }

    #[sealed_test]
    fn execute_twice_is_idempotent() -> anyhow::Result<()> {
        let root = setup(&[("motd.j2", "welcome to $host\n"), ("conf.d/a.conf", "a\n")])?;
        let bindings = Bindings::from([("host".into(), "blah".into())]);
        let executor = Executor::new(LocalTransport::new(), ShellExpandRenderer::new(), &bindings);

        let summary = executor.execute(&plan_for(&root, &LocalTransport::new())?);
        assert!(summary.changed());
        assert!(!summary.failed());
        assert_eq!(
            fs::read_to_string(root.join("dest/motd"))?,
            "welcome to blah\n"
        );

        let summary = executor.execute(&plan_for(&root, &LocalTransport::new())?);
        assert!(!summary.changed());
        assert_eq!(summary.count(|outcome| matches!(outcome, Outcome::Unchanged)), 3);
        assert_eq!(summary.managed_directories().collect::<Vec<_>>(), vec![&RelPath::new("conf.d")?]);
        assert_eq!(summary.managed_files().count(), 2);

        Ok(())
    }

    #[sealed_test]
    fn render_failure_does_not_block_siblings() -> anyhow::Result<()> {
        let root = setup(&[("broken.j2", "$missing\n"), ("fine", "fine\n")])?;
        let bindings = Bindings::new();
        let executor = Executor::new(LocalTransport::new(), ShellExpandRenderer::new(), &bindings);

        let summary = executor.execute(&plan_for(&root, &LocalTransport::new())?);
        assert!(summary.failed());
        assert!(summary.changed());
        assert!(matches!(
            summary.get(&RelPath::new("broken")?),
            Some(Outcome::Failed(Failure {
                operation: OperationKind::RenderFile,
                error: OperationError::Render { .. },
            }))
        ));
        assert_eq!(fs::read_to_string(root.join("dest/fine"))?, "fine\n");

        Ok(())
    }

    #[sealed_test]
    fn failed_directory_skips_descendants() -> anyhow::Result<()> {
        let root = setup(&[("bad/nested/file", ""), ("bad/file", ""), ("good/file", "")])?;
        let transport = Faulty {
            refuse_mkdir: Some(root.join("dest/bad")),
            ..Faulty::default()
        };
        let bindings = Bindings::new();
        let executor = Executor::new(&transport, ShellExpandRenderer::new(), &bindings);

        let mut observed = 0;
        let summary = executor.execute_with(&plan_for(&root, &transport)?, |_, _| observed += 1);
        let result = outcomes(&summary);
        let expect = vec![
            (".".to_string(), "created".to_string()),
            (
                "bad".into(),
                "failed to create directory: failed to create directory \"/dest/bad\""
                    .replace("/dest/bad", &root.join("dest/bad").display().to_string()),
            ),
            (
                "bad/file".into(),
                "failed to copy file: depends on bad, which failed".into(),
            ),
            (
                "bad/nested".into(),
                "failed to create directory: depends on bad, which failed".into(),
            ),
            (
                "bad/nested/file".into(),
                "failed to copy file: depends on bad, which failed".into(),
            ),
            ("good".into(), "created".into()),
            ("good/file".into(), "created".into()),
        ];
        assert_eq!(result, expect);
        assert_eq!(observed, expect.len());

        Ok(())
    }

    #[sealed_test]
    fn kind_change_reports_update() -> anyhow::Result<()> {
        let root = setup(&[("d", "now a file\n")])?;
        fs::create_dir_all(root.join("dest/d/sub"))?;
        fs::write(root.join("dest/d/sub/old"), "")?;
        let bindings = Bindings::new();
        let executor = Executor::new(LocalTransport::new(), ShellExpandRenderer::new(), &bindings);

        let summary = executor.execute(&plan_for(&root, &LocalTransport::new())?);
        let result = outcomes(&summary);
        let expect = vec![
            ("d".to_string(), "updated".to_string()),
            ("d/sub".into(), "removed".into()),
            ("d/sub/old".into(), "removed".into()),
        ];
        assert_eq!(result, expect);
        assert_eq!(fs::read_to_string(root.join("dest/d"))?, "now a file\n");
        assert_eq!(summary.removed().count(), 2);

        Ok(())
    }

    #[sealed_test]
    fn failed_removal_is_never_written_through() -> anyhow::Result<()> {
        let root = setup(&[("motd", "managed\n"), ("d/a", "managed\n")])?;
        fs::create_dir_all(root.join("outside"))?;
        fs::write(root.join("outside/precious"), "precious\n")?;
        fs::create_dir_all(root.join("dest"))?;
        std::os::unix::fs::symlink("../outside/precious", root.join("dest/motd"))?;
        std::os::unix::fs::symlink("../outside", root.join("dest/d"))?;
        let transport = Faulty {
            refuse_remove: true,
            ..Faulty::default()
        };
        let bindings = Bindings::new();
        let executor = Executor::new(&transport, ShellExpandRenderer::new(), &bindings);

        let summary = executor.execute(&plan_for(&root, &transport)?);
        let result = summary
            .iter()
            .map(|(path, outcome)| match outcome {
                Outcome::Failed(Failure { operation, error }) => (
                    path.to_string(),
                    operation.to_string(),
                    matches!(error, OperationError::DependencyUnmet { .. }),
                ),
                outcome => (path.to_string(), outcome.to_string(), false),
            })
            .collect::<Vec<_>>();
        let expect = vec![
            ("d".to_string(), "remove".to_string(), false),
            ("d/a".into(), "copy file".into(), true),
            ("motd".into(), "remove".into(), false),
        ];
        assert_eq!(result, expect);
        assert_eq!(
            fs::read_to_string(root.join("outside/precious"))?,
            "precious\n"
        );
        assert!(!root.join("outside/a").exists());

        Ok(())
    }

    #[sealed_test]
    fn ownership_fix_keeps_creation_outcome() -> anyhow::Result<()> {
        let root = setup(&[("motd", "hello\n")])?;
        let owner = fs::metadata(&root).map(|metadata| {
            use std::os::unix::fs::MetadataExt;
            metadata.uid()
        })?;
        let manifest =
            Resolver::new(SearchPath::new([root.as_path()])).resolve(&[SourceRoot::parse("src/")])?;
        let options = PlanOptions {
            ownership: Ownership {
                owner: Some(owner),
                group: None,
            },
            ..PlanOptions::default()
        };
        let bindings = Bindings::new();
        let executor = Executor::new(LocalTransport::new(), ShellExpandRenderer::new(), &bindings);

        let destination = scan(&LocalTransport::new(), &root.join("dest"))?;
        let summary = executor.execute(&plan(&manifest, &destination, &options));
        let result = outcomes(&summary);
        let expect = vec![
            (".".to_string(), "created".to_string()),
            ("motd".into(), "created".into()),
        ];
        assert_eq!(result, expect);

        let destination = scan(&LocalTransport::new(), &root.join("dest"))?;
        let summary = executor.execute(&plan(&manifest, &destination, &options));
        assert!(!summary.changed());

        Ok(())
    }
}
