//! Registry of configured namenodes

use super::adaptor::RemoteAdaptor;
use super::pool::ConnectionPool;
use super::FileSystemDescriptor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A configured namenode: its connection pool and remote adaptor
pub struct NamenodeBound {
    descriptor: FileSystemDescriptor,
    pool: ConnectionPool,
    adaptor: Arc<dyn RemoteAdaptor>,
}

impl NamenodeBound {
    pub fn descriptor(&self) -> &FileSystemDescriptor {
        &self.descriptor
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn adaptor(&self) -> Arc<dyn RemoteAdaptor> {
        self.adaptor.clone()
    }
}

/// Thread-safe lookup of namenodes by filesystem descriptor
#[derive(Default)]
pub struct NamenodeRegistry {
    namenodes: RwLock<HashMap<FileSystemDescriptor, Arc<NamenodeBound>>>,
}

impl NamenodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a filesystem
    pub fn configure_filesystem(
        &self,
        descriptor: FileSystemDescriptor,
        adaptor: Arc<dyn RemoteAdaptor>,
        max_connections: usize,
    ) -> Arc<NamenodeBound> {
        let bound = Arc::new(NamenodeBound {
            descriptor: descriptor.clone(),
            pool: ConnectionPool::new(max_connections),
            adaptor,
        });
        info!(
            filesystem = %descriptor,
            max_connections = max_connections,
            "Filesystem configured"
        );
        self.namenodes.write().insert(descriptor, bound.clone());
        bound
    }

    pub fn namenode(&self, descriptor: &FileSystemDescriptor) -> Option<Arc<NamenodeBound>> {
        self.namenodes.read().get(descriptor).cloned()
    }

    pub fn is_configured(&self, descriptor: &FileSystemDescriptor) -> bool {
        self.namenodes.read().contains_key(descriptor)
    }

    pub fn len(&self) -> usize {
        self.namenodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.namenodes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfs::{DfsType, LocalDirAdaptor};

    #[test]
    fn test_lookup_configured_filesystem() {
        let registry = NamenodeRegistry::new();
        let fs = FileSystemDescriptor::new(DfsType::Local, "localhost", 0);
        registry.configure_filesystem(fs.clone(), Arc::new(LocalDirAdaptor::new("/tmp")), 3);

        let bound = registry.namenode(&fs).expect("namenode should be registered");
        assert_eq!(bound.descriptor(), &fs);
        assert_eq!(bound.pool().capacity(), 3);
        assert!(registry.is_configured(&fs));
    }

    #[test]
    fn test_unknown_filesystem_is_not_configured() {
        let registry = NamenodeRegistry::new();
        let fs = FileSystemDescriptor::new(DfsType::Hdfs, "nn", 8020);
        assert!(registry.namenode(&fs).is_none());
        assert!(registry.is_empty());
    }
}
