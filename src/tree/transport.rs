// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Destination transport.
//!
//! Reconciliation never touches the destination directly. Every read and
//! write goes through a [`Transport`], which only needs to know how to
//! inspect and mutate single paths. How the bytes actually reach the managed
//! host is up to the implementation; [`LocalTransport`] simply uses the local
//! file system.

use crate::config::{Mode, Ownership};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, Metadata},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Kind of node observed at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    File,

    /// Symlinks, sockets, fifos, devices, etc.
    Other,
}

impl Display for NodeKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Directory => fmt.write_str("directory"),
            Self::File => fmt.write_str("file"),
            Self::Other => fmt.write_str("special file"),
        }
    }
}

/// Observed state of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    pub kind: NodeKind,
    pub mode: Mode,

    /// Numeric user id.
    pub owner: u32,

    /// Numeric group id.
    pub group: u32,
}

impl NodeStat {
    /// Construct new stat owned by root.
    pub fn new(kind: NodeKind, mode: Mode) -> Self {
        Self {
            kind,
            mode,
            owner: 0,
            group: 0,
        }
    }
}

/// Named node inside a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub name: OsString,
    pub stat: NodeStat,
}

/// Primitive operations on the managed host.
///
/// Symlinks are never followed: they are reported as [`NodeKind::Other`].
/// Creating a directory or writing a file over anything that is not already
/// a directory or regular file respectively must fail, so nothing outside
/// the destination can be reached through a link.
pub trait Transport {
    /// Inspect path, returning `None` if nothing exists there.
    fn stat(&self, path: &Path) -> Result<Option<NodeStat>>;

    /// List immediate children of directory.
    fn list_dir(&self, path: &Path) -> Result<Vec<NodeEntry>>;

    /// Create directory, including any missing parents.
    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()>;

    /// Write file content and permission bits.
    ///
    /// Return `true` if anything about the file changed.
    fn write_file(&self, path: &Path, content: &[u8], mode: Mode) -> Result<bool>;

    /// Set permission bits.
    fn chmod(&self, path: &Path, mode: Mode) -> Result<()>;

    /// Set numeric owner and group, leaving unset ids alone.
    fn chown(&self, path: &Path, ownership: Ownership) -> Result<()>;

    /// Remove path, recursively for directories.
    fn remove(&self, path: &Path) -> Result<()>;
}

impl<T> Transport for &T
where
    T: Transport + ?Sized,
{
    fn stat(&self, path: &Path) -> Result<Option<NodeStat>> {
        (**self).stat(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<NodeEntry>> {
        (**self).list_dir(path)
    }

    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()> {
        (**self).mkdir(path, mode)
    }

    fn write_file(&self, path: &Path, content: &[u8], mode: Mode) -> Result<bool> {
        (**self).write_file(path, content, mode)
    }

    fn chmod(&self, path: &Path, mode: Mode) -> Result<()> {
        (**self).chmod(path, mode)
    }

    fn chown(&self, path: &Path, ownership: Ownership) -> Result<()> {
        (**self).chown(path, ownership)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        (**self).remove(path)
    }
}

/// Transport through the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl LocalTransport {
    /// Construct new local transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn stat(&self, path: &Path) -> Result<Option<NodeStat>> {
        match fs::symlink_metadata(path) {
            Ok(metadata) => Ok(Some(node_stat(&metadata))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TransportError::Stat {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<NodeEntry>> {
        let to_error = |err| TransportError::ListDir {
            source: err,
            path: path.to_path_buf(),
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(to_error)? {
            let entry = entry.map_err(to_error)?;

            // INVARIANT: DirEntry::metadata does not traverse symlinks.
            let metadata = entry.metadata().map_err(to_error)?;
            entries.push(NodeEntry {
                name: entry.file_name(),
                stat: node_stat(&metadata),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }

    #[instrument(skip(self), level = "debug")]
    fn mkdir(&self, path: &Path, mode: Mode) -> Result<()> {
        let to_error = |err| TransportError::CreateDir {
            source: err,
            path: path.to_path_buf(),
        };

        match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_dir() => (),
            Ok(metadata) => {
                return Err(TransportError::Occupied {
                    kind: node_stat(&metadata).kind,
                    path: path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                mkdirp::mkdirp(path).map(|_| ()).map_err(to_error)?;
            }
            Err(err) => return Err(to_error(err)),
        }

        set_mode(path, mode).map_err(to_error)
    }

    #[instrument(skip(self, content), level = "debug")]
    fn write_file(&self, path: &Path, content: &[u8], mode: Mode) -> Result<bool> {
        let to_error = |err| TransportError::WriteFile {
            source: err,
            path: path.to_path_buf(),
        };

        let current = match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_file() => Some(node_stat(&metadata).mode),
            Ok(metadata) => {
                return Err(TransportError::Occupied {
                    kind: node_stat(&metadata).kind,
                    path: path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(to_error(err)),
        };

        if let Some(current) = current {
            let same_content = fs::read(path).map_err(to_error)? == content;
            if same_content && current == mode {
                debug!("{:?} already up to date", path.display());
                return Ok(false);
            }

            if same_content {
                set_mode(path, mode).map_err(to_error)?;
                return Ok(true);
            }
        }

        fs::write(path, content).map_err(to_error)?;
        set_mode(path, mode).map_err(to_error)?;

        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    fn chmod(&self, path: &Path, mode: Mode) -> Result<()> {
        set_mode(path, mode).map_err(|err| TransportError::SetMode {
            source: err,
            path: path.to_path_buf(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn chown(&self, path: &Path, ownership: Ownership) -> Result<()> {
        set_owner(path, ownership).map_err(|err| TransportError::SetOwner {
            source: err,
            path: path.to_path_buf(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn remove(&self, path: &Path) -> Result<()> {
        let to_error = |err| TransportError::Remove {
            source: err,
            path: path.to_path_buf(),
        };

        let result = match fs::symlink_metadata(path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(to_error(err)),
        }
    }
}

fn node_stat(metadata: &Metadata) -> NodeStat {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        NodeKind::Directory
    } else if file_type.is_file() {
        NodeKind::File
    } else {
        NodeKind::Other
    };

    let (owner, group) = owner_of(metadata);
    NodeStat {
        kind,
        mode: mode_of(metadata, kind),
        owner,
        group,
    }
}

#[cfg(unix)]
fn owner_of(metadata: &Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.uid(), metadata.gid())
}

#[cfg(not(unix))]
fn owner_of(_metadata: &Metadata) -> (u32, u32) {
    (0, 0)
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata, _kind: NodeKind) -> Mode {
    use std::os::unix::fs::PermissionsExt;
    Mode::new(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn mode_of(_metadata: &Metadata, kind: NodeKind) -> Mode {
    match kind {
        NodeKind::Directory => Mode::DIRECTORY,
        _ => Mode::FILE,
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Mode) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode.bits()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Mode) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_owner(path: &Path, ownership: Ownership) -> std::io::Result<()> {
    std::os::unix::fs::lchown(path, ownership.owner, ownership.group)
}

#[cfg(not(unix))]
fn set_owner(_path: &Path, _ownership: Ownership) -> std::io::Result<()> {
    Ok(())
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Path cannot be inspected.
    #[error("failed to stat {:?}", path.display())]
    Stat {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be listed.
    #[error("failed to list directory {:?}", path.display())]
    ListDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be written.
    #[error("failed to write file {:?}", path.display())]
    WriteFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Permission bits cannot be set.
    #[error("failed to set permission bits of {:?}", path.display())]
    SetMode {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Numeric owner or group cannot be set.
    #[error("failed to set owner of {:?}", path.display())]
    SetOwner {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Something other than the expected kind of node sits at path.
    #[error("refusing to replace {kind} at {:?}", path.display())]
    Occupied { kind: NodeKind, path: PathBuf },

    /// Path cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
