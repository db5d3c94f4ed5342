// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path classification.
//!
//! Decide whether a source path gets rendered or copied byte for byte, and
//! where it lands inside the destination. The only naming convention
//! recognized is the template suffix: `ssl.conf.j2` is rendered into
//! `ssl.conf`, everything else keeps its name.

use crate::{config::DEFAULT_TEMPLATE_SUFFIX, path::RelPath};

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Kind of entry in the logical view of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    RenderableFile,
    VerbatimFile,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, Self::Directory)
    }
}

impl Display for EntryKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Directory => fmt.write_str("directory"),
            Self::RenderableFile => fmt.write_str("renderable file"),
            Self::VerbatimFile => fmt.write_str("verbatim file"),
        }
    }
}

/// Classify relative source paths by template suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    suffix: String,
}

impl Classifier {
    /// Construct new classifier for given template suffix.
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// Template suffix in use.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Classify relative path, and determine its destination-relative path.
    ///
    /// Directories are never renamed. A file whose name is nothing but the
    /// suffix is treated as verbatim, because stripping it would leave no
    /// name at all.
    pub fn classify(&self, path: &RelPath, is_dir: bool) -> (EntryKind, RelPath) {
        if is_dir {
            return (EntryKind::Directory, path.clone());
        }

        let stripped = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(self.suffix.as_str()))
            .filter(|name| !name.is_empty() && !self.suffix.is_empty())
            .and_then(|name| path.with_file_name(name).ok());

        match stripped {
            Some(destination) => (EntryKind::RenderableFile, destination),
            None => (EntryKind::VerbatimFile, path.clone()),
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("ssl.conf.j2", EntryKind::RenderableFile, "ssl.conf"; "template at top level")]
    #[test_case("conf.d/site.conf.j2", EntryKind::RenderableFile, "conf.d/site.conf"; "nested template")]
    #[test_case("ffdhe4096.pem", EntryKind::VerbatimFile, "ffdhe4096.pem"; "verbatim file")]
    #[test_case("notes.j2.txt", EntryKind::VerbatimFile, "notes.j2.txt"; "suffix not at end")]
    #[test_case(".j2", EntryKind::VerbatimFile, ".j2"; "name is only suffix")]
    #[test_case("SSL.CONF.J2", EntryKind::VerbatimFile, "SSL.CONF.J2"; "case sensitive")]
    #[test]
    fn classify_file(input: &str, kind: EntryKind, destination: &str) {
        let classifier = Classifier::default();
        let result = classifier.classify(&RelPath::new(input).unwrap(), false);
        pretty_assertions::assert_eq!(result, (kind, RelPath::new(destination).unwrap()));
    }

    #[test]
    fn classify_directory_never_renames() {
        let classifier = Classifier::default();
        let path = RelPath::new("templates.j2").unwrap();
        assert_eq!(
            classifier.classify(&path, true),
            (EntryKind::Directory, path.clone())
        );
    }

    #[test]
    fn classify_custom_suffix() {
        let classifier = Classifier::new(".tmpl");
        let result = classifier.classify(&RelPath::new("motd.tmpl").unwrap(), false);
        assert_eq!(
            result,
            (EntryKind::RenderableFile, RelPath::new("motd").unwrap())
        );

        let result = classifier.classify(&RelPath::new("motd.j2").unwrap(), false);
        assert_eq!(result.0, EntryKind::VerbatimFile);
    }
}
