use crate::{
    backend::{backend_from_config, pool_call_arguments, Backend, Cluster, PoolOptions},
    config::ClusterConfig,
    group::ProcessGroup,
};

use super::{
    collective::{finish_bulk, on_root, validate_collective_call},
    DistributedError, DistributedPool,
};

/// A cluster shared by every rank of a process group.
///
/// Each rank holds its own backend cluster handle, opened from the same [`ClusterConfig`].
/// The configuration is retained so the handle can be recreated when the backend requires reconnection after a structural change.
#[derive(Debug)]
pub struct DistributedCluster {
    config: ClusterConfig,
    backend: Backend,
    cluster: Cluster,
    group: ProcessGroup,
}

impl DistributedCluster {
    /// Open and connect the cluster described by `config` on this rank.
    ///
    /// Every rank should open the cluster with the same configuration.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the backend is unknown or the cluster cannot be opened or connected.
    pub fn open(config: &ClusterConfig, group: ProcessGroup) -> Result<Self, DistributedError> {
        let backend = backend_from_config(config)?;
        Self::open_with_backend(backend, config, group)
    }

    /// Open and connect the cluster named in `config` with an explicit `backend`.
    ///
    /// The backend kind in `config` is ignored.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the cluster cannot be opened or connected.
    pub fn open_with_backend(
        backend: Backend,
        config: &ClusterConfig,
        group: ProcessGroup,
    ) -> Result<Self, DistributedError> {
        if backend.is_process_local() && !group.shares_address_space() && group.size() > 1 {
            log::warn!(
                "the {} backend is local to one process, but the process group of size {} does not share an address space",
                backend.kind(),
                group.size()
            );
        }
        let cluster = backend.open_cluster(config.name())?;
        cluster.connect()?;
        log::debug!(
            "rank {} opened {} cluster {}",
            group.rank(),
            backend.kind(),
            config.name()
        );
        Ok(Self {
            config: config.clone(),
            backend,
            cluster,
            group,
        })
    }

    /// The cluster configuration.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The process group.
    #[must_use]
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// The backend cluster handle of this rank.
    #[must_use]
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Connect the cluster handle of this rank.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on failure.
    pub fn connect(&self) -> Result<(), DistributedError> {
        Ok(self.cluster.connect()?)
    }

    /// Disconnect the cluster handle of this rank.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on failure.
    pub fn disconnect(&self) -> Result<(), DistributedError> {
        Ok(self.cluster.disconnect()?)
    }

    /// Returns true if the cluster handle of this rank is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.cluster.is_connected()
    }

    /// Create the pool `name` with no options and return a handle to it on every rank.
    ///
    /// See [`create_pool_opt`](Self::create_pool_opt).
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the pool could not be created, e.g. it already exists.
    pub fn create_pool(&mut self, name: &str) -> Result<DistributedPool, DistributedError> {
        self.create_pool_opt(name, &PoolOptions::default())
    }

    /// Create the pool `name` with backend-specific `options` and return a handle to it on every rank.
    ///
    /// This is a collective operation.
    /// Only the root creates the pool.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the pool could not be created, e.g. it already exists.
    pub fn create_pool_opt(
        &mut self,
        name: &str,
        options: &PoolOptions,
    ) -> Result<DistributedPool, DistributedError> {
        validate_collective_call(self.group.as_ref(), || {
            format!("create_pool({})", pool_call_arguments(name, options))
        })?;
        on_root(self.group.as_ref(), || {
            log::debug!("root creating pool {name}");
            Ok(self.cluster.create_pool_opt(name, options)?)
        })?;
        self.refresh_after_structural_change()?;
        self.get_pool(name)
    }

    /// Get a handle to the existing pool `name`.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] if the pool does not exist.
    pub fn get_pool(&self, name: &str) -> Result<DistributedPool, DistributedError> {
        let pool = self.cluster.get_pool(name)?;
        Ok(DistributedPool::new(pool, self.group.clone()))
    }

    /// Returns true if the pool `name` exists.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on failure.
    pub fn has_pool(&self, name: &str) -> Result<bool, DistributedError> {
        Ok(self.cluster.has_pool(name)?)
    }

    /// List the pools of the cluster, sorted by name.
    ///
    /// # Errors
    /// Returns a [`DistributedError::Backend`] on failure.
    pub fn list_pools(&self) -> Result<Vec<String>, DistributedError> {
        Ok(self.cluster.list_pools()?)
    }

    /// Delete the pool `name` and everything in it.
    ///
    /// This is a collective operation.
    /// Outstanding work is drained with a barrier before the root deletes the pool.
    ///
    /// # Errors
    /// Returns a [`DistributedError`] on every rank if the pool could not be deleted, e.g. it does not exist.
    pub fn del_pool(&mut self, name: &str) -> Result<(), DistributedError> {
        validate_collective_call(self.group.as_ref(), || format!("del_pool({name})"))?;
        self.group.barrier()?;
        on_root(self.group.as_ref(), || {
            log::debug!("root deleting pool {name}");
            Ok(self.cluster.del_pool(name)?)
        })?;
        self.refresh_after_structural_change()
    }

    /// Replace the cluster handle of every rank in lockstep if the backend invalidates handles on structural change.
    fn refresh_after_structural_change(&mut self) -> Result<(), DistributedError> {
        if !self.backend.requires_reconnect_after_structural_change() {
            return Ok(());
        }
        log::debug!(
            "rank {} reconnecting to cluster {}",
            self.group.rank(),
            self.config.name()
        );
        let result = self.reconnect();
        finish_bulk(self.group.as_ref(), result)
    }

    fn reconnect(&mut self) -> Result<(), DistributedError> {
        self.cluster.disconnect()?;
        let cluster = self.backend.open_cluster(self.config.name())?;
        cluster.connect()?;
        self.cluster = cluster;
        Ok(())
    }
}
