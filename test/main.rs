// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use oxitree::{
    config::{Mode, Ownership},
    tree::{
        render::{Bindings, RenderError, Renderer},
        transport::{self, LocalTransport, NodeEntry, NodeStat, Transport, TransportError},
    },
    Tree,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Throwaway tree rooted at the current directory.
///
/// Sources go under "files/", the destination is "dest/", and the tree
/// definition is "tree.toml".
pub(crate) struct TreeFixture {
    root: PathBuf,
}

impl TreeFixture {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            root: std::env::current_dir()?,
        })
    }

    pub(crate) fn with_source_file(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<&Self> {
        write(&self.root.join("files").join(path), contents.as_ref())?;
        Ok(self)
    }

    pub(crate) fn with_destination_file(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<&Self> {
        write(&self.destination().join(path), contents.as_ref())?;
        Ok(self)
    }

    pub(crate) fn with_definition(&self, contents: impl AsRef<str>) -> Result<&Self> {
        fs::write(self.root.join("tree.toml"), contents.as_ref())?;
        Ok(self)
    }

    pub(crate) fn destination(&self) -> PathBuf {
        self.root.join("dest")
    }

    pub(crate) fn tree(&self) -> Result<Tree> {
        Ok(Tree::load(self.root.join("tree.toml"))?)
    }

    pub(crate) fn read(&self, path: impl AsRef<Path>) -> Result<String> {
        Ok(fs::read_to_string(self.destination().join(path))?)
    }

    pub(crate) fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.destination().join(path).exists()
    }

    #[cfg(unix)]
    pub(crate) fn mode(&self, path: impl AsRef<Path>) -> Result<u32> {
        use std::os::unix::fs::PermissionsExt;

        Ok(fs::metadata(self.destination().join(path))?.permissions().mode() & 0o7777)
    }
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

/// Local transport that cannot remove anything.
#[derive(Debug, Default)]
pub(crate) struct StickyTransport(LocalTransport);

impl Transport for StickyTransport {
    fn stat(&self, path: &Path) -> transport::Result<Option<NodeStat>> {
        self.0.stat(path)
    }

    fn list_dir(&self, path: &Path) -> transport::Result<Vec<NodeEntry>> {
        self.0.list_dir(path)
    }

    fn mkdir(&self, path: &Path, mode: Mode) -> transport::Result<()> {
        self.0.mkdir(path, mode)
    }

    fn write_file(&self, path: &Path, content: &[u8], mode: Mode) -> transport::Result<bool> {
        self.0.write_file(path, content, mode)
    }

    fn chmod(&self, path: &Path, mode: Mode) -> transport::Result<()> {
        self.0.chmod(path, mode)
    }

    fn chown(&self, path: &Path, ownership: Ownership) -> transport::Result<()> {
        self.0.chown(path, ownership)
    }

    fn remove(&self, path: &Path) -> transport::Result<()> {
        Err(TransportError::Remove {
            source: std::io::Error::other("operation not permitted"),
            path: path.to_path_buf(),
        })
    }
}

/// Renderer that upper cases templates, and rejects block tags.
#[derive(Debug, Default)]
pub(crate) struct ShoutingRenderer;

impl Renderer for ShoutingRenderer {
    fn render(&self, template: &[u8], _bindings: &Bindings) -> Result<String, RenderError> {
        let template = std::str::from_utf8(template)?;
        if template.contains("{%") {
            return Err(RenderError::Custom("block tags are not supported".into()));
        }

        Ok(template.to_uppercase())
    }
}
