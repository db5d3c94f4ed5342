// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed tree domain representation.
//!
//! A __tree__ is a destination directory whose contents are assembled from
//! an ordered listing of source roots. Sources are merged on top of each
//! other by relative path, such that later sources override earlier ones,
//! and the merged result is reconciled into the destination.
//!
//! # Reconciliation Pipeline
//!
//! Every run goes through the same four stages:
//!
//! 1. __Resolve__ the ordered source roots into a logical manifest of what
//!    the destination should contain. See [`source`].
//! 2. __Scan__ the destination into a manifest of what it actually contains.
//!    See [`scan`].
//! 3. __Plan__ the ordered operations that turn the latter into the former.
//!    Planning never touches anything, so stopping here is a dry run. See
//!    [`plan`].
//! 4. __Execute__ the plan through a transport, rendering templates along
//!    the way. See [`execute`].
//!
//! Configuration errors surface in the first three stages, before the
//! destination is mutated in any way. Execution only ever fails per path.
//!
//! # Collaborators
//!
//! The engine never touches the host directly. Everything goes through a
//! [`Transport`], templates go through a [`Renderer`], and relative source
//! roots are found through a [`SourceLocator`](source::SourceLocator). The
//! defaults work against the local file system.

pub mod classify;
pub mod execute;
pub mod plan;
pub mod render;
pub mod scan;
pub mod source;
pub mod transport;

use crate::{
    config::TreeDefinition,
    path::RelPath,
    tree::{
        classify::Classifier,
        execute::{Executor, Outcome, Summary},
        plan::{Plan, PlanOptions},
        render::{Renderer, ShellExpandRenderer},
        scan::scan,
        source::{LogicalManifest, Resolver, SearchPath, SourceRoot},
        transport::{LocalTransport, Transport},
    },
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// A managed tree.
///
/// Pairs a [`TreeDefinition`] with the collaborators needed to reconcile it.
/// Relative source roots and search directories are resolved against the
/// __base directory__, which is usually the directory holding the definition
/// file.
#[derive(Debug)]
pub struct Tree<T = LocalTransport, R = ShellExpandRenderer>
where
    T: Transport,
    R: Renderer,
{
    definition: TreeDefinition,
    base: PathBuf,
    transport: T,
    renderer: R,
}

impl Tree {
    /// Construct new tree over local file system.
    pub fn new(definition: TreeDefinition, base: impl Into<PathBuf>) -> Self {
        Self {
            definition,
            base: base.into(),
            transport: LocalTransport::new(),
            renderer: ShellExpandRenderer::new(),
        }
    }

    /// Load tree from definition file.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::ReadDefinition`] if definition file cannot be
    ///   read.
    /// - Return [`TreeError::Config`] if definition file is malformed.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|err| TreeError::ReadDefinition {
            source: err,
            path: path.to_path_buf(),
        })?;
        let definition = data.parse::<TreeDefinition>()?;
        let base = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        info!("load tree definition {:?}", path.display());
        Ok(Self::new(definition, base))
    }
}

impl<T, R> Tree<T, R>
where
    T: Transport,
    R: Renderer,
{
    /// Swap out transport.
    pub fn with_transport<U: Transport>(self, transport: U) -> Tree<U, R> {
        Tree {
            definition: self.definition,
            base: self.base,
            transport,
            renderer: self.renderer,
        }
    }

    /// Swap out renderer.
    pub fn with_renderer<U: Renderer>(self, renderer: U) -> Tree<T, U> {
        Tree {
            definition: self.definition,
            base: self.base,
            transport: self.transport,
            renderer,
        }
    }

    pub fn definition(&self) -> &TreeDefinition {
        &self.definition
    }

    /// Mutable access to definition, e.g., for command line overrides.
    pub fn definition_mut(&mut self) -> &mut TreeDefinition {
        &mut self.definition
    }

    /// Absolute path to destination root.
    pub fn destination(&self) -> &Path {
        self.definition.settings.destination.as_path()
    }

    /// Resolve source roots into logical manifest.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::Resolve`] if source roots cannot be resolved.
    pub fn resolve(&self) -> Result<LogicalManifest> {
        let settings = &self.definition.settings;
        let roots = self
            .definition
            .sources
            .iter()
            .map(SourceRoot::from)
            .collect::<Vec<_>>();

        let resolver = Resolver::new(SearchPath::new(self.definition.search_dirs(&self.base)))
            .with_classifier(Classifier::new(settings.template_suffix.as_str()))
            .with_missing_sources(settings.missing_sources)
            .with_modes(settings.file_mode, settings.directory_mode);

        Ok(resolver.resolve(&roots)?)
    }

    /// Plan reconciliation of destination.
    ///
    /// Nothing gets mutated, so showing the plan is a dry run.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError::Config`] if exclusive ignore patterns are
    ///   malformed.
    /// - Return [`TreeError::Resolve`] if source roots cannot be resolved.
    /// - Return [`TreeError::Scan`] if destination cannot be scanned.
    #[instrument(skip(self), level = "debug")]
    pub fn plan(&self) -> Result<Plan> {
        let settings = &self.definition.settings;
        let options = PlanOptions {
            exclusive: settings.exclusive,
            exclusive_ignore: self.definition.ignore_patterns()?,
            refresh_files: settings.refresh_files,
            root_mode: settings.directory_mode,
            ownership: settings.ownership(),
        };

        let logical = self.resolve()?;
        let destination = scan(&self.transport, self.destination())?;
        let plan = plan::plan(&logical, &destination, &options);
        info!(
            "planned {} operations for {:?}",
            plan.len(),
            self.destination().display()
        );

        Ok(plan)
    }

    /// Execute plan.
    pub fn apply(&self, plan: &Plan) -> Summary {
        self.apply_with(plan, |_, _| ())
    }

    /// Execute plan, notifying observer after every recorded outcome.
    pub fn apply_with(&self, plan: &Plan, observer: impl FnMut(&RelPath, &Outcome)) -> Summary {
        Executor::new(&self.transport, &self.renderer, &self.definition.variables)
            .execute_with(plan, observer)
    }

    /// Plan and execute reconciliation in one go.
    ///
    /// # Errors
    ///
    /// - Return [`TreeError`] if planning fails. Execution failures are
    ///   recorded in the returned summary instead.
    pub fn reconcile(&self) -> Result<Summary> {
        let plan = self.plan()?;
        Ok(self.apply(&plan))
    }
}

/// Tree error types.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Definition file cannot be read.
    #[error("failed to read tree definition {:?}", path.display())]
    ReadDefinition {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Tree definition is malformed.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Source roots cannot be resolved.
    #[error(transparent)]
    Resolve(#[from] crate::tree::source::ResolveError),

    /// Destination cannot be scanned.
    #[error(transparent)]
    Scan(#[from] crate::tree::scan::ScanError),
}

/// Friendly result alias :3
pub type Result<T, E = TreeError> = std::result::Result<T, E>;
