//! Entity cache with per-class TTL refresh.
//!
//! The cache holds the vCenter inventory as lists indexed by datacenter
//! position: for each entity class an outer `Vec` parallel to the
//! datacenter list and an inner `Vec` with the entities of that datacenter.
//! Each class has its own refresh timestamp; a refresh is a no-op while
//! the class is younger than the TTL.
//!
//! Host liveness records live next to the host lists and survive refreshes
//! as long as the number of hosts of their datacenter does not change.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::api::{
    Cluster, Datacenter, Datastore, HostSystem, ManagedObjectRef, NetworkEntity, VcenterApi,
    VirtualMachine,
};
use crate::context::CycleContext;
use crate::error::Result;
use crate::liveness::{HostState, LivenessTable};

/// Last successful refresh of each entity class.
#[derive(Debug, Clone, Copy, Default)]
struct RefreshTimes {
    datacenters: Option<Instant>,
    clusters_and_hosts: Option<Instant>,
    networks: Option<Instant>,
    datastores: Option<Instant>,
    vms: Option<Instant>,
}

fn is_fresh(last: Option<Instant>, ttl: Duration) -> bool {
    last.is_some_and(|t| t.elapsed() < ttl)
}

/// Treat an absent entity class as an empty list.
fn or_empty<T>(res: Result<Vec<T>>) -> Result<Vec<T>> {
    match res {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}

/// Cluster owning `host`, by inventory path nesting. Empty when the host
/// sits directly under its datacenter.
pub fn cluster_name_for<'a>(clusters: &'a [Cluster], host: &HostSystem) -> &'a str {
    clusters
        .iter()
        .find(|c| {
            host.inventory_path
                .strip_prefix(c.inventory_path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
        .map(|c| c.name.as_str())
        .unwrap_or("")
}

/// Mutable view over the host slots of one datacenter.
pub struct HostSlots<'a> {
    pub datacenter: &'a Datacenter,
    pub clusters: &'a [Cluster],
    pub hosts: &'a [HostSystem],
    pub states: &'a mut [HostState],
}

impl HostSlots<'_> {
    pub fn cluster_name(&self, host: &HostSystem) -> &str {
        cluster_name_for(self.clusters, host)
    }
}

/// Cached vCenter inventory.
#[derive(Debug)]
pub struct EntityCache {
    ttl: Duration,
    refreshed: RefreshTimes,
    datacenters: Vec<Datacenter>,
    clusters: Vec<Vec<Cluster>>,
    hosts: Vec<Vec<HostSystem>>,
    liveness: LivenessTable,
    networks: Vec<Vec<NetworkEntity>>,
    datastores: Vec<Vec<Datastore>>,
    vms: Vec<Vec<VirtualMachine>>,
}

impl EntityCache {
    /// Create an empty cache whose entity classes expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            refreshed: RefreshTimes::default(),
            datacenters: Vec::new(),
            clusters: Vec::new(),
            hosts: Vec::new(),
            liveness: LivenessTable::new(),
            networks: Vec::new(),
            datastores: Vec::new(),
            vms: Vec::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Forget all entities, liveness records and refresh times.
    pub fn reset(&mut self) {
        *self = Self::new(self.ttl);
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh the datacenter list.
    pub async fn refresh_datacenters(
        &mut self,
        api: &dyn VcenterApi,
        ctx: &CycleContext,
    ) -> Result<()> {
        if is_fresh(self.refreshed.datacenters, self.ttl) {
            trace!("datacenter list is fresh");
            return Ok(());
        }

        self.datacenters = or_empty(ctx.run(api.datacenters()).await)
            .map_err(|e| e.context("could not get datacenter list"))?;
        self.refreshed.datacenters = Some(Instant::now());
        debug!(datacenters = self.datacenters.len(), "refreshed datacenter list");
        Ok(())
    }

    /// Refresh clusters and hosts of every datacenter.
    ///
    /// Liveness records of a datacenter are reset when its host count
    /// changes, and all of them when the datacenter count changes.
    pub async fn refresh_clusters_and_hosts(
        &mut self,
        api: &dyn VcenterApi,
        ctx: &CycleContext,
    ) -> Result<()> {
        if is_fresh(self.refreshed.clusters_and_hosts, self.ttl) {
            trace!("cluster and host lists are fresh");
            return Ok(());
        }
        self.refresh_datacenters(api, ctx).await?;

        let count = self.datacenters.len();
        let resized = count != self.clusters.len() || count != self.hosts.len();
        if resized {
            debug!(datacenters = count, "datacenter topology changed, resetting host lists");
            self.clusters = vec![Vec::new(); count];
            self.hosts = vec![Vec::new(); count];
            self.liveness.resize(count);
        }

        for (i, dc) in self.datacenters.iter().enumerate() {
            self.clusters[i] = or_empty(ctx.run(api.clusters(dc)).await)
                .map_err(|e| e.context(format!("could not get {} cluster list", dc.name)))?;

            let hosts = or_empty(ctx.run(api.hosts(dc)).await)
                .map_err(|e| e.context(format!("could not get {} host list", dc.name)))?;
            let previous = self.hosts[i].len();
            self.hosts[i] = hosts;

            if resized || previous != self.hosts[i].len() || self.liveness.hosts(i) != previous {
                debug!(
                    datacenter = %dc.name,
                    previous,
                    hosts = self.hosts[i].len(),
                    "host count changed, resetting liveness"
                );
                self.liveness.reset_datacenter(i, self.hosts[i].len());
            }
        }

        self.refreshed.clusters_and_hosts = Some(Instant::now());
        Ok(())
    }

    /// Refresh the network entities of every datacenter.
    pub async fn refresh_networks(
        &mut self,
        api: &dyn VcenterApi,
        ctx: &CycleContext,
    ) -> Result<()> {
        if is_fresh(self.refreshed.networks, self.ttl) {
            return Ok(());
        }
        self.refresh_datacenters(api, ctx).await?;
        refresh_class(ctx, &self.datacenters, &mut self.networks, "network", |dc| {
            api.networks(dc)
        })
        .await?;
        self.refreshed.networks = Some(Instant::now());
        Ok(())
    }

    /// Refresh the datastores of every datacenter.
    pub async fn refresh_datastores(
        &mut self,
        api: &dyn VcenterApi,
        ctx: &CycleContext,
    ) -> Result<()> {
        if is_fresh(self.refreshed.datastores, self.ttl) {
            return Ok(());
        }
        self.refresh_datacenters(api, ctx).await?;
        refresh_class(ctx, &self.datacenters, &mut self.datastores, "datastore", |dc| {
            api.datastores(dc)
        })
        .await?;
        self.refreshed.datastores = Some(Instant::now());
        Ok(())
    }

    /// Refresh the virtual machines of every datacenter. Hosts are refreshed
    /// too, since VM records are tagged with their host.
    pub async fn refresh_vms(&mut self, api: &dyn VcenterApi, ctx: &CycleContext) -> Result<()> {
        if is_fresh(self.refreshed.vms, self.ttl) {
            return Ok(());
        }
        self.refresh_clusters_and_hosts(api, ctx).await?;
        refresh_class(ctx, &self.datacenters, &mut self.vms, "virtual machine", |dc| {
            api.vms(dc)
        })
        .await?;
        self.refreshed.vms = Some(Instant::now());
        Ok(())
    }

    /// Refresh every entity class.
    pub async fn refresh_all(&mut self, api: &dyn VcenterApi, ctx: &CycleContext) -> Result<()> {
        self.refresh_datacenters(api, ctx).await?;
        self.refresh_clusters_and_hosts(api, ctx).await?;
        self.refresh_networks(api, ctx).await?;
        self.refresh_datastores(api, ctx).await?;
        self.refresh_vms(api, ctx).await
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn datacenters(&self) -> &[Datacenter] {
        &self.datacenters
    }

    pub fn clusters(&self, dc: usize) -> &[Cluster] {
        self.clusters.get(dc).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn hosts(&self, dc: usize) -> &[HostSystem] {
        self.hosts.get(dc).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn networks(&self, dc: usize) -> &[NetworkEntity] {
        self.networks.get(dc).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn datastores(&self, dc: usize) -> &[Datastore] {
        self.datastores.get(dc).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn vms(&self, dc: usize) -> &[VirtualMachine] {
        self.vms.get(dc).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn liveness(&self) -> &LivenessTable {
        &self.liveness
    }

    pub fn host_state(&self, dc: usize, host: usize) -> Option<&HostState> {
        self.liveness.get(dc, host)
    }

    pub fn host_state_mut(&mut self, dc: usize, host: usize) -> Option<&mut HostState> {
        self.liveness.get_mut(dc, host)
    }

    /// Hosts of a datacenter with their liveness records, for passes that
    /// update liveness while iterating.
    pub fn host_slots_mut(&mut self, dc: usize) -> Option<HostSlots<'_>> {
        let states = self.liveness.states_mut(dc)?;
        let hosts = self.hosts.get(dc)?;
        if states.len() != hosts.len() {
            return None;
        }
        Some(HostSlots {
            datacenter: self.datacenters.get(dc)?,
            clusters: self.clusters.get(dc).map(Vec::as_slice).unwrap_or_default(),
            hosts,
            states,
        })
    }

    /// Cluster owning `host` in datacenter `dc`, or an empty string.
    pub fn cluster_name_for_host(&self, dc: usize, host: &HostSystem) -> &str {
        cluster_name_for(self.clusters(dc), host)
    }

    /// Host of datacenter `dc` with the given reference.
    pub fn host_by_ref(&self, dc: usize, reference: &ManagedObjectRef) -> Option<&HostSystem> {
        self.hosts(dc).iter().find(|h| &h.reference == reference)
    }

    pub fn not_responding_count(&self) -> usize {
        self.liveness.not_responding_count()
    }

    pub fn reset_response_times(&mut self) {
        self.liveness.reset_response_times();
    }
}

/// Refresh one per-datacenter entity class into `lists`.
async fn refresh_class<'a, T, F>(
    ctx: &CycleContext,
    datacenters: &'a [Datacenter],
    lists: &mut Vec<Vec<T>>,
    what: &str,
    list: F,
) -> Result<()>
where
    F: Fn(&'a Datacenter) -> BoxFuture<'a, Result<Vec<T>>>,
{
    if lists.len() != datacenters.len() {
        lists.clear();
        lists.resize_with(datacenters.len(), Vec::new);
    }
    for (i, dc) in datacenters.iter().enumerate() {
        lists[i] = or_empty(ctx.run(list(dc)).await)
            .map_err(|e| e.context(format!("could not get {} {what} list", dc.name)))?;
    }
    debug!(
        class = what,
        entities = lists.iter().map(Vec::len).sum::<usize>(),
        "refreshed entity list"
    );
    Ok(())
}
