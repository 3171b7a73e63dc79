use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::error::OrmError;
use crate::models::{ConnectionDescriptor, ConnectionStatus};
use crate::services::adapter::Driver;

/// Mutability requirement for a connection selection.
///
/// Writes force `Mutable`; reads default to `Any` to exploit replicas, while
/// `Immutable` explicitly targets a read-only endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Any,
    Mutable,
    Immutable,
}

impl Mutability {
    pub fn accepts(self, mutable: bool) -> bool {
        match self {
            Mutability::Any => true,
            Mutability::Mutable => mutable,
            Mutability::Immutable => !mutable,
        }
    }
}

/// Shared, append-only registry of database endpoints.
///
/// Descriptors are added at initialization and live for the process lifetime;
/// the pool itself carries no session state and is shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    descriptors: Vec<Arc<ConnectionDescriptor>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, descriptor: ConnectionDescriptor) {
        tracing::info!(
            "registered connection {} (mutable: {})",
            descriptor.masked_dsn(),
            descriptor.mutable
        );
        self.descriptors.push(Arc::new(descriptor));
    }

    pub fn descriptors(&self) -> &[Arc<ConnectionDescriptor>] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// A session's view of one selected endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    descriptor: Arc<ConnectionDescriptor>,
    status: ConnectionStatus,
    last_connected_at: Option<DateTime<Utc>>,
}

impl ConnectionHandle {
    fn new(descriptor: Arc<ConnectionDescriptor>) -> Self {
        Self {
            descriptor,
            status: ConnectionStatus::Disconnected,
            last_connected_at: None,
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.last_connected_at
    }

    fn mark_connected(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.last_connected_at = Some(Utc::now());
    }

    fn mark_error(&mut self) {
        self.status = ConnectionStatus::Error;
    }
}

/// Per-session active-connection slot over a shared pool.
///
/// One logical unit of work owns exactly one active handle at a time.
/// Selection is sticky: as long as the active handle satisfies the requested
/// mutability it is returned unchanged; otherwise the descriptor set is
/// shuffled for load distribution and the first match is promoted.
#[derive(Debug)]
pub struct PoolSession {
    pool: Arc<ConnectionPool>,
    active: Option<ConnectionHandle>,
}

impl PoolSession {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool, active: None }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn active(&self) -> Option<&ConnectionHandle> {
        self.active.as_ref()
    }

    /// Select a connection satisfying the mutability requirement.
    ///
    /// Never returns a mismatched handle: an empty pool or an unsatisfiable
    /// requirement is a `PoolExhausted` failure.
    pub fn select(&mut self, required: Mutability) -> Result<&mut ConnectionHandle, OrmError> {
        let satisfied = matches!(
            &self.active,
            Some(handle) if required.accepts(handle.descriptor.mutable)
        );
        if !satisfied {
            let descriptor = self.pick(required)?;
            tracing::debug!(
                "promoting connection {} to active (mutable: {})",
                descriptor.masked_dsn(),
                descriptor.mutable
            );
            self.active = Some(ConnectionHandle::new(descriptor));
        }
        Ok(self
            .active
            .as_mut()
            .expect("active connection is set when satisfied or just promoted"))
    }

    fn pick(&self, required: Mutability) -> Result<Arc<ConnectionDescriptor>, OrmError> {
        if self.pool.is_empty() {
            tracing::error!("could not get a valid connection: pool is empty");
            return Err(OrmError::PoolExhausted);
        }
        let mut candidates: Vec<Arc<ConnectionDescriptor>> = self.pool.descriptors().to_vec();
        candidates.shuffle(&mut rand::rng());
        for descriptor in candidates {
            if required.accepts(descriptor.mutable) {
                return Ok(descriptor);
            }
        }
        tracing::error!(
            "no registered connection satisfies mutability requirement {:?}",
            required
        );
        Err(OrmError::PoolExhausted)
    }

    /// Select and establish transport. Re-invoking on an already-connected
    /// handle is a no-op success.
    pub fn connect(
        &mut self,
        driver: &dyn Driver,
        required: Mutability,
    ) -> Result<&mut ConnectionHandle, OrmError> {
        let handle = self.select(required)?;
        if handle.is_connected() {
            return Ok(handle);
        }
        match driver.connect(&handle.descriptor) {
            Ok(true) => {
                tracing::debug!("connected to {}", handle.descriptor.masked_dsn());
                handle.mark_connected();
                Ok(handle)
            }
            Ok(false) => {
                handle.mark_error();
                Err(OrmError::Driver(format!(
                    "connection refused by {}",
                    handle.descriptor.masked_dsn()
                )))
            }
            Err(err) => {
                handle.mark_error();
                Err(err)
            }
        }
    }
}
