//! Management API abstraction.
//!
//! The collector core never talks to the wire directly. Everything it needs
//! from vCenter goes through the [`VcenterApi`] trait, and fresh
//! authenticated clients are produced by a [`Connector`].
//!
//! # Backends
//!
//! - [`rest::RestConnector`]: vSphere Automation REST API over `reqwest`
//! - [`memory::InMemoryConnector`]: in-memory inventory with fault injection

/// In-memory backend.
pub mod memory;

/// vSphere Automation REST backend.
pub mod rest;

/// Entity and summary types.
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use types::{
    AboutInfo, Cluster, ClusterSummary, Datacenter, Datastore, DatastoreSummary, DvpSummary,
    DvsSummary, EntityStatus, EsxcliResponse, HostConnectionState, HostSummary, HostSystem,
    ManagedObjectRef, NetworkEntity, NetworkInfo, NetworkKind, VirtualMachine, VmSummary,
};
pub use types::{
    hba_link_state_code, nic_link_status_code, vm_connection_state_code, vm_power_state_code,
};

/// Operations the collector core needs from a vCenter endpoint.
///
/// Listing operations return [`Error::NotFound`](crate::Error::NotFound) when
/// the entity class does not exist in the datacenter; callers treat that as
/// an empty list.
#[async_trait]
pub trait VcenterApi: Send + Sync {
    /// Host part of the endpoint URL, used as the `vcenter` tag.
    fn endpoint(&self) -> &str;

    /// Re-authenticate the existing session.
    async fn login(&self) -> Result<()>;

    /// Terminate the session.
    async fn logout(&self) -> Result<()>;

    /// Server time; a cheap round trip used as a liveness check.
    async fn current_time(&self) -> Result<DateTime<Utc>>;

    /// Product information of the endpoint.
    async fn about(&self) -> Result<AboutInfo>;

    async fn datacenters(&self) -> Result<Vec<Datacenter>>;

    async fn clusters(&self, dc: &Datacenter) -> Result<Vec<Cluster>>;

    async fn hosts(&self, dc: &Datacenter) -> Result<Vec<HostSystem>>;

    async fn networks(&self, dc: &Datacenter) -> Result<Vec<NetworkEntity>>;

    async fn datastores(&self, dc: &Datacenter) -> Result<Vec<Datastore>>;

    async fn vms(&self, dc: &Datacenter) -> Result<Vec<VirtualMachine>>;

    async fn cluster_summary(&self, cluster: &ManagedObjectRef) -> Result<ClusterSummary>;

    async fn host_summary(&self, host: &ManagedObjectRef) -> Result<HostSummary>;

    async fn dvs_summary(&self, dvs: &ManagedObjectRef) -> Result<DvsSummary>;

    async fn dvp_summary(&self, dvp: &ManagedObjectRef) -> Result<DvpSummary>;

    /// Retrieve summaries for a batch of datastores in one query.
    async fn datastore_summaries(&self, refs: &[ManagedObjectRef])
        -> Result<Vec<DatastoreSummary>>;

    /// Retrieve summaries for a batch of virtual machines in one query.
    async fn vm_summaries(&self, refs: &[ManagedObjectRef]) -> Result<Vec<VmSummary>>;

    /// Run an esxcli-style command against a host, e.g.
    /// `["storage", "core", "adapter", "list"]`.
    async fn esxcli(&self, host: &ManagedObjectRef, command: &[&str]) -> Result<EsxcliResponse>;
}

/// Optional capabilities a backend may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// [`VcenterApi::dvs_summary`] and distributed switches in
    /// [`VcenterApi::networks`]
    DistributedSwitchSummary,
    /// [`VcenterApi::dvp_summary`]
    DistributedPortgroupSummary,
    /// [`VcenterApi::esxcli`]
    HostCommands,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::DistributedSwitchSummary => write!(f, "distributed switch summaries"),
            Feature::DistributedPortgroupSummary => write!(f, "distributed portgroup summaries"),
            Feature::HostCommands => write!(f, "host esxcli commands"),
        }
    }
}

/// Factory for new authenticated API clients.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate, returning a ready client.
    async fn connect(&self) -> Result<Arc<dyn VcenterApi>>;

    /// Whether clients from this connector serve `feature`.
    fn supports(&self, _feature: Feature) -> bool {
        true
    }
}
