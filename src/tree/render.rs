// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template rendering.
//!
//! The reconciliation engine treats rendering as a pure function from
//! template text and variable bindings to rendered text. Anything that can
//! do that may implement [`Renderer`]. The stock [`ShellExpandRenderer`]
//! expands shell-style `$name` and `${name}` references.

use std::collections::BTreeMap;

/// Variable bindings handed to a renderer.
pub type Bindings = BTreeMap<String, String>;

/// Expand template text with variable bindings.
pub trait Renderer {
    /// Render template text.
    ///
    /// # Errors
    ///
    /// - Return [`RenderError`] if the template cannot be expanded.
    fn render(&self, template: &[u8], bindings: &Bindings) -> Result<String>;
}

impl<R> Renderer for &R
where
    R: Renderer + ?Sized,
{
    fn render(&self, template: &[u8], bindings: &Bindings) -> Result<String> {
        (**self).render(template, bindings)
    }
}

/// Render templates through shell-style variable expansion.
///
/// Every variable referenced must be bound, otherwise rendering fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellExpandRenderer;

impl ShellExpandRenderer {
    /// Construct new shell expansion renderer.
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for ShellExpandRenderer {
    fn render(&self, template: &[u8], bindings: &Bindings) -> Result<String> {
        let template = std::str::from_utf8(template)?;
        let rendered = shellexpand::env_with_context(template, |name| {
            bindings
                .get(name)
                .map(|value| Some(value.as_str()))
                .ok_or(Unbound)
        })
        .map_err(|err| RenderError::UnboundVariable(err.var_name))?;

        Ok(rendered.into_owned())
    }
}

/// Variable lookup miss.
#[derive(Debug, thiserror::Error)]
#[error("unbound")]
struct Unbound;

/// Rendering error types.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Template is not UTF-8 text.
    #[error("template is not valid UTF-8")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// Template references a variable without binding.
    #[error("variable {0:?} is not bound")]
    UnboundVariable(String),

    /// Renderer specific failure.
    #[error("{0}")]
    Custom(String),
}

/// Friendly result alias :3
pub type Result<T, E = RenderError> = std::result::Result<T, E>;
