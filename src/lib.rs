// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template tree reconciliation.
//!
//! Oxitree assembles a destination directory from an ordered listing of
//! source roots, renders templates along the way, and reconciles the result
//! into place. See [`tree`] for the reconciliation pipeline, and [`config`]
//! for the tree definition file layout.

pub mod config;
pub mod path;
pub mod tree;

pub use tree::{Tree, TreeError};
