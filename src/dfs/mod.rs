//! Remote filesystem collaborators
//!
//! This module holds everything the cache needs to know about the remote
//! side without knowing any wire protocol:
//! - `DfsType` / `FileSystemDescriptor`: identity of a remote filesystem
//! - `PathResolver`: mapping between local cache paths and remote origins
//! - `pool`: scoped connection handles
//! - `adaptor`: the remote read contract
//! - `registry`: configured namenodes
//!
//! Local cache layout is `<root>/<schema>/<host>/<port>/<relative name>`,
//! which is what makes a cache directory self-describing after a restart.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

pub mod adaptor;
pub mod pool;
pub mod registry;

pub use adaptor::{LocalDirAdaptor, RemoteAdaptor};
pub use pool::{ConnectionPool, PooledConnection};
pub use registry::{NamenodeBound, NamenodeRegistry};

/// Supported remote filesystem types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DfsType {
    Hdfs,
    S3n,
    S3a,
    Local,
    Tachyon,
    Other,
    #[serde(rename = "default")]
    NonSpecified,
}

impl DfsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DfsType::Hdfs => "hdfs",
            DfsType::S3n => "s3n",
            DfsType::S3a => "s3a",
            DfsType::Local => "local",
            DfsType::Tachyon => "tachyon",
            DfsType::Other => "other",
            DfsType::NonSpecified => "default",
        }
    }
}

impl fmt::Display for DfsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DfsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hdfs" => Ok(DfsType::Hdfs),
            "s3n" => Ok(DfsType::S3n),
            "s3a" => Ok(DfsType::S3a),
            "local" => Ok(DfsType::Local),
            "tachyon" => Ok(DfsType::Tachyon),
            "other" => Ok(DfsType::Other),
            "default" => Ok(DfsType::NonSpecified),
            _ => Err(format!("Unsupported filesystem type '{}'", s)),
        }
    }
}

/// Identity of a remote filesystem (namenode)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSystemDescriptor {
    pub dfs_type: DfsType,
    pub host: String,
    pub port: u16,
}

impl FileSystemDescriptor {
    pub fn new(dfs_type: DfsType, host: impl Into<String>, port: u16) -> Self {
        Self {
            dfs_type,
            host: host.into(),
            port,
        }
    }

    /// Fully qualified network path of a file on this filesystem
    pub fn network_path(&self, relative: &str) -> String {
        format!(
            "{}://{}:{}/{}",
            self.dfs_type,
            self.host,
            self.port,
            relative.trim_start_matches('/')
        )
    }
}

impl fmt::Display for FileSystemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.dfs_type, self.host, self.port)
    }
}

/// Remote coordinates recovered from a local cache path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub descriptor: FileSystemDescriptor,
    /// Fully qualified network path (FQNP)
    pub network_path: String,
    /// Path of the file relative to its origin filesystem root
    pub relative_name: String,
}

/// Maps local cache paths to remote origins and back
#[derive(Debug)]
pub struct PathResolver {
    root: RwLock<PathBuf>,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.root.read().clone()
    }

    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = root.into();
    }

    /// Recover the remote identity of a local cache file
    ///
    /// Returns `None` when the path is outside the root, does not follow the
    /// `<schema>/<host>/<port>/<relative>` layout, names an unsupported
    /// schema, or carries a non-normal component such as `..`.
    pub fn resolve_origin(&self, local: &Path) -> Option<Origin> {
        let root = self.root.read();
        let rest = local.strip_prefix(&*root).ok()?;

        let mut parts = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        if parts.len() < 4 {
            return None;
        }

        let dfs_type = DfsType::from_str(parts[0]).ok()?;
        let host = parts[1];
        let port = parts[2].parse::<u16>().ok()?;
        let relative_name = parts[3..].join("/");

        let descriptor = FileSystemDescriptor::new(dfs_type, host, port);
        let network_path = descriptor.network_path(&relative_name);
        Some(Origin {
            descriptor,
            network_path,
            relative_name,
        })
    }

    /// Inverse of [`resolve_origin`](Self::resolve_origin)
    pub fn construct_local_path(&self, descriptor: &FileSystemDescriptor, relative: &str) -> PathBuf {
        let mut path = self
            .root
            .read()
            .join(descriptor.dfs_type.as_str())
            .join(&descriptor.host)
            .join(descriptor.port.to_string());
        for part in relative.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    /// Local cache path for a `schema://host:port/relative` network path
    pub fn local_path_for_network(&self, network_path: &str) -> Option<PathBuf> {
        let (schema, rest) = network_path.split_once("://")?;
        let dfs_type = DfsType::from_str(schema).ok()?;
        let (authority, relative) = rest.split_once('/')?;
        let (host, port) = authority.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        if host.is_empty() || relative.is_empty() || relative.split('/').any(|p| p == "..") {
            return None;
        }
        Some(self.construct_local_path(&FileSystemDescriptor::new(dfs_type, host, port), relative))
    }
}
