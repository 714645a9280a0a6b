//! In-memory vCenter used by tests and dry runs.
//!
//! The inventory is mutated through `&self` methods so one
//! `Arc<InMemoryVcenter>` can be shared between a test and the collector
//! under test. Every trait call is counted per [`Op`], and failures can be
//! injected per operation or per host.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::types::*;
use super::{Connector, VcenterApi};
use crate::error::{Error, Result};

/// API operations, used for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Login,
    Logout,
    CurrentTime,
    About,
    Datacenters,
    Clusters,
    Hosts,
    Networks,
    Datastores,
    Vms,
    ClusterSummary,
    HostSummary,
    DvsSummary,
    DvpSummary,
    DatastoreSummaries,
    VmSummaries,
    Esxcli,
}

/// An injected failure.
#[derive(Debug, Clone)]
pub enum Failure {
    Query(String),
    PermissionDenied(String),
    NotFound(String),
    Network(String),
    Authentication(String),
    /// Never answer; the caller's deadline decides.
    Hang,
}

impl Failure {
    fn into_error(self) -> Option<Error> {
        match self {
            Failure::Query(m) => Some(Error::Query(m)),
            Failure::PermissionDenied(m) => Some(Error::PermissionDenied(m)),
            Failure::NotFound(m) => Some(Error::NotFound(m)),
            Failure::Network(m) => Some(Error::Network(m)),
            Failure::Authentication(m) => Some(Error::Authentication(m)),
            Failure::Hang => None,
        }
    }
}

struct HostEntry {
    host: HostSystem,
    summary: HostSummary,
    esxcli: HashMap<String, EsxcliResponse>,
}

struct DatacenterEntry {
    datacenter: Datacenter,
    clusters: Vec<(Cluster, ClusterSummary)>,
    hosts: Vec<HostEntry>,
    networks: Vec<NetworkEntity>,
    datastores: Vec<DatastoreSummary>,
    vms: Vec<VmSummary>,
}

#[derive(Default)]
struct Inventory {
    datacenters: Vec<DatacenterEntry>,
    dvs: HashMap<String, DvsSummary>,
    dvp: HashMap<String, DvpSummary>,
    next_id: u64,
}

impl Inventory {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn dc(&self, dc: &Datacenter) -> Result<&DatacenterEntry> {
        self.datacenters
            .iter()
            .find(|e| e.datacenter.reference == dc.reference)
            .ok_or_else(|| Error::NotFound(format!("datacenter {}", dc.name)))
    }

    fn host_by_ref(&self, r: &ManagedObjectRef) -> Option<&HostEntry> {
        self.datacenters
            .iter()
            .flat_map(|dc| dc.hosts.iter())
            .find(|h| &h.host.reference == r)
    }

    fn host_by_name_mut(&mut self, name: &str) -> Option<&mut HostEntry> {
        self.datacenters
            .iter_mut()
            .flat_map(|dc| dc.hosts.iter_mut())
            .find(|h| h.host.name == name)
    }
}

/// In-memory vCenter inventory.
pub struct InMemoryVcenter {
    endpoint: String,
    about: Mutex<AboutInfo>,
    inventory: Mutex<Inventory>,
    calls: Mutex<HashMap<Op, u64>>,
    failures: Mutex<HashMap<Op, Failure>>,
    host_failures: Mutex<HashMap<(Op, String), Failure>>,
}

impl InMemoryVcenter {
    /// Create an empty vCenter answering as `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            about: Mutex::new(AboutInfo {
                name: "VMware vCenter Server".into(),
                version: "8.0.2".into(),
                build: "22385739".into(),
                os_type: "linux-x64".into(),
                api_type: "VirtualCenter".into(),
            }),
            inventory: Mutex::new(Inventory::default()),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            host_failures: Mutex::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Inventory mutation
    // ------------------------------------------------------------------------

    /// Add a datacenter and return its position.
    pub fn add_datacenter(&self, name: &str) -> usize {
        let mut inv = self.inventory.lock();
        let id = inv.next_id();
        inv.datacenters.push(DatacenterEntry {
            datacenter: Datacenter {
                reference: ManagedObjectRef::new("Datacenter", format!("datacenter-{id}")),
                name: name.to_string(),
                inventory_path: format!("/{name}"),
            },
            clusters: Vec::new(),
            hosts: Vec::new(),
            networks: Vec::new(),
            datastores: Vec::new(),
            vms: Vec::new(),
        });
        inv.datacenters.len() - 1
    }

    /// Remove the datacenter at `dc`.
    pub fn remove_datacenter(&self, dc: usize) {
        self.inventory.lock().datacenters.remove(dc);
    }

    pub fn add_cluster(&self, dc: usize, name: &str) -> ManagedObjectRef {
        let mut inv = self.inventory.lock();
        let id = inv.next_id();
        let entry = &mut inv.datacenters[dc];
        let reference = ManagedObjectRef::new("ClusterComputeResource", format!("domain-c{id}"));
        entry.clusters.push((
            Cluster {
                reference: reference.clone(),
                name: name.to_string(),
                inventory_path: format!("{}/host/{name}", entry.datacenter.inventory_path),
            },
            ClusterSummary {
                overall_status: Some(EntityStatus::Green),
                ..Default::default()
            },
        ));
        reference
    }

    /// Add a host, optionally inside an existing cluster.
    pub fn add_host(&self, dc: usize, cluster: Option<&str>, name: &str) -> ManagedObjectRef {
        let mut inv = self.inventory.lock();
        let id = inv.next_id();
        let entry = &mut inv.datacenters[dc];
        let parent = match cluster {
            Some(cluster) => format!("{}/host/{cluster}", entry.datacenter.inventory_path),
            None => format!("{}/host", entry.datacenter.inventory_path),
        };
        let reference = ManagedObjectRef::new("HostSystem", format!("host-{id}"));
        entry.hosts.push(HostEntry {
            host: HostSystem {
                reference: reference.clone(),
                name: name.to_string(),
                inventory_path: format!("{parent}/{name}"),
            },
            summary: HostSummary {
                overall_status: Some(EntityStatus::Green),
                connection_state: HostConnectionState::Connected,
                reboot_required: Some(false),
                in_maintenance_mode: Some(false),
                memory_size: Some(256 * 1024 * 1024 * 1024),
                num_cpu_cores: Some(32),
                cpu_mhz: Some(2600),
            },
            esxcli: HashMap::new(),
        });
        reference
    }

    /// Remove a host by name.
    pub fn remove_host(&self, name: &str) {
        let mut inv = self.inventory.lock();
        for dc in &mut inv.datacenters {
            dc.hosts.retain(|h| h.host.name != name);
        }
    }

    pub fn add_network(&self, dc: usize, kind: NetworkKind, name: &str) -> ManagedObjectRef {
        let mut inv = self.inventory.lock();
        let id = inv.next_id();
        let (type_name, prefix) = match kind {
            NetworkKind::Standard => ("Network", "network"),
            NetworkKind::DistributedSwitch => ("VmwareDistributedVirtualSwitch", "dvs"),
            NetworkKind::DistributedPortgroup => ("DistributedVirtualPortgroup", "dvportgroup"),
            NetworkKind::Opaque => ("OpaqueNetwork", "opaque"),
        };
        let info = NetworkInfo {
            reference: ManagedObjectRef::new(type_name, format!("{prefix}-{id}")),
            name: name.to_string(),
        };
        let reference = info.reference.clone();
        let entity = match kind {
            NetworkKind::Standard => NetworkEntity::Network(info),
            NetworkKind::DistributedSwitch => {
                inv.dvs.insert(
                    reference.value.clone(),
                    DvsSummary {
                        overall_status: EntityStatus::Green,
                        num_ports: 64,
                        max_ports: 512,
                        num_standalone_ports: 0,
                    },
                );
                NetworkEntity::DistributedSwitch(info)
            }
            NetworkKind::DistributedPortgroup => {
                inv.dvp.insert(
                    reference.value.clone(),
                    DvpSummary {
                        overall_status: EntityStatus::Green,
                        num_ports: 8,
                        uplink: false,
                    },
                );
                NetworkEntity::DistributedPortgroup(info)
            }
            NetworkKind::Opaque => NetworkEntity::OpaqueNetwork(info),
        };
        inv.datacenters[dc].networks.push(entity);
        reference
    }

    pub fn add_datastore(&self, dc: usize, name: &str, capacity: i64, free: i64) -> ManagedObjectRef {
        let mut inv = self.inventory.lock();
        let id = inv.next_id();
        let reference = ManagedObjectRef::new("Datastore", format!("datastore-{id}"));
        inv.datacenters[dc].datastores.push(DatastoreSummary {
            reference: reference.clone(),
            name: name.to_string(),
            ds_type: "VMFS".into(),
            accessible: true,
            capacity,
            free_space: free,
            uncommitted: Some(0),
            maintenance_mode: Some("normal".into()),
        });
        reference
    }

    /// Add a powered-on VM, optionally placed on the named host.
    pub fn add_vm(&self, dc: usize, name: &str, host: Option<&str>) -> ManagedObjectRef {
        let mut inv = self.inventory.lock();
        let id = inv.next_id();
        let host_ref = host.and_then(|h| {
            inv.datacenters[dc]
                .hosts
                .iter()
                .find(|e| e.host.name == h)
                .map(|e| e.host.reference.clone())
        });
        let reference = ManagedObjectRef::new("VirtualMachine", format!("vm-{id}"));
        inv.datacenters[dc].vms.push(VmSummary {
            reference: reference.clone(),
            name: name.to_string(),
            guest_hostname: format!("{name}.corp.local"),
            host: host_ref,
            overall_status: Some(EntityStatus::Green),
            connection_state: Some("connected".into()),
            power_state: "poweredOn".into(),
            max_cpu_usage: Some(4800),
            max_memory_usage: Some(8192),
            memory_size_mb: 8192,
            num_cpu: 2,
            num_ethernet_cards: 1,
            num_virtual_disks: 1,
            template: Some(false),
            consolidation_needed: Some(false),
        });
        reference
    }

    /// Replace the summary of the named host.
    pub fn set_host_summary(&self, host: &str, summary: HostSummary) {
        if let Some(entry) = self.inventory.lock().host_by_name_mut(host) {
            entry.summary = summary;
        }
    }

    /// Set the response the named host gives to `command`.
    pub fn set_esxcli(&self, host: &str, command: &[&str], response: EsxcliResponse) {
        if let Some(entry) = self.inventory.lock().host_by_name_mut(host) {
            entry.esxcli.insert(command.join(" "), response);
        }
    }

    pub fn set_api_type(&self, api_type: &str) {
        self.about.lock().api_type = api_type.to_string();
    }

    // ------------------------------------------------------------------------
    // Fault injection and call accounting
    // ------------------------------------------------------------------------

    /// Make every call of `op` fail.
    pub fn fail(&self, op: Op, failure: Failure) {
        self.failures.lock().insert(op, failure);
    }

    /// Make `op` fail only when it targets the named host.
    pub fn fail_host(&self, op: Op, host: &str, failure: Failure) {
        self.host_failures
            .lock()
            .insert((op, host.to_string()), failure);
    }

    /// Remove all injected failures.
    pub fn heal(&self) {
        self.failures.lock().clear();
        self.host_failures.lock().clear();
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: Op) -> u64 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, op: Op, host: Option<&ManagedObjectRef>) -> Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let mut failure = self.failures.lock().get(&op).cloned();
        if failure.is_none() {
            if let Some(r) = host {
                let name = self
                    .inventory
                    .lock()
                    .host_by_ref(r)
                    .map(|h| h.host.name.clone());
                if let Some(name) = name {
                    failure = self.host_failures.lock().get(&(op, name)).cloned();
                }
            }
        }

        match failure.map(Failure::into_error) {
            None => Ok(()),
            Some(Some(err)) => Err(err),
            Some(None) => std::future::pending().await,
        }
    }
}

fn non_empty<T>(items: Vec<T>, what: &str) -> Result<Vec<T>> {
    if items.is_empty() {
        Err(Error::NotFound(format!("{what} '*'")))
    } else {
        Ok(items)
    }
}

#[async_trait]
impl VcenterApi for InMemoryVcenter {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn login(&self) -> Result<()> {
        self.enter(Op::Login, None).await
    }

    async fn logout(&self) -> Result<()> {
        self.enter(Op::Logout, None).await
    }

    async fn current_time(&self) -> Result<DateTime<Utc>> {
        self.enter(Op::CurrentTime, None).await?;
        Ok(Utc::now())
    }

    async fn about(&self) -> Result<AboutInfo> {
        self.enter(Op::About, None).await?;
        Ok(self.about.lock().clone())
    }

    async fn datacenters(&self) -> Result<Vec<Datacenter>> {
        self.enter(Op::Datacenters, None).await?;
        let dcs = self
            .inventory
            .lock()
            .datacenters
            .iter()
            .map(|e| e.datacenter.clone())
            .collect();
        non_empty(dcs, "datacenter")
    }

    async fn clusters(&self, dc: &Datacenter) -> Result<Vec<Cluster>> {
        self.enter(Op::Clusters, None).await?;
        let clusters = self
            .inventory
            .lock()
            .dc(dc)?
            .clusters
            .iter()
            .map(|(c, _)| c.clone())
            .collect();
        non_empty(clusters, "cluster")
    }

    async fn hosts(&self, dc: &Datacenter) -> Result<Vec<HostSystem>> {
        self.enter(Op::Hosts, None).await?;
        let hosts = self
            .inventory
            .lock()
            .dc(dc)?
            .hosts
            .iter()
            .map(|h| h.host.clone())
            .collect();
        non_empty(hosts, "host")
    }

    async fn networks(&self, dc: &Datacenter) -> Result<Vec<NetworkEntity>> {
        self.enter(Op::Networks, None).await?;
        let nets = self.inventory.lock().dc(dc)?.networks.clone();
        non_empty(nets, "network")
    }

    async fn datastores(&self, dc: &Datacenter) -> Result<Vec<Datastore>> {
        self.enter(Op::Datastores, None).await?;
        let dss = self
            .inventory
            .lock()
            .dc(dc)?
            .datastores
            .iter()
            .map(|d| Datastore {
                reference: d.reference.clone(),
                name: d.name.clone(),
            })
            .collect();
        non_empty(dss, "datastore")
    }

    async fn vms(&self, dc: &Datacenter) -> Result<Vec<VirtualMachine>> {
        self.enter(Op::Vms, None).await?;
        let vms = self
            .inventory
            .lock()
            .dc(dc)?
            .vms
            .iter()
            .map(|v| VirtualMachine {
                reference: v.reference.clone(),
                name: v.name.clone(),
            })
            .collect();
        non_empty(vms, "virtual machine")
    }

    async fn cluster_summary(&self, cluster: &ManagedObjectRef) -> Result<ClusterSummary> {
        self.enter(Op::ClusterSummary, None).await?;
        let inv = self.inventory.lock();
        let entry = inv
            .datacenters
            .iter()
            .find(|dc| dc.clusters.iter().any(|(c, _)| &c.reference == cluster))
            .ok_or_else(|| Error::Query(format!("unknown object {cluster}")))?;
        let (c, summary) = entry
            .clusters
            .iter()
            .find(|(c, _)| &c.reference == cluster)
            .ok_or_else(|| Error::Query(format!("unknown object {cluster}")))?;

        let prefix = format!("{}/", c.inventory_path);
        let members: Vec<&HostEntry> = entry
            .hosts
            .iter()
            .filter(|h| h.host.inventory_path.starts_with(&prefix))
            .collect();
        let mut summary = summary.clone();
        summary.num_hosts = members.len() as i64;
        summary.num_effective_hosts = members
            .iter()
            .filter(|h| h.summary.connection_state == HostConnectionState::Connected)
            .count() as i64;
        let cores: i64 = members.iter().filter_map(|h| h.summary.num_cpu_cores).sum();
        let total_cpu: i64 = members
            .iter()
            .map(|h| h.summary.num_cpu_cores.unwrap_or(0) * h.summary.cpu_mhz.unwrap_or(0))
            .sum();
        let total_memory: i64 = members.iter().filter_map(|h| h.summary.memory_size).sum();
        summary.num_cpu_cores = Some(cores);
        summary.num_cpu_threads = Some(cores * 2);
        summary.total_cpu = Some(total_cpu);
        summary.total_memory = Some(total_memory);
        summary.effective_cpu = Some(total_cpu);
        summary.effective_memory = Some(total_memory / (1024 * 1024));
        summary.num_vms = entry
            .vms
            .iter()
            .filter(|vm| {
                vm.host
                    .as_ref()
                    .is_some_and(|r| members.iter().any(|h| &h.host.reference == r))
            })
            .count() as i64;
        Ok(summary)
    }

    async fn host_summary(&self, host: &ManagedObjectRef) -> Result<HostSummary> {
        self.enter(Op::HostSummary, Some(host)).await?;
        self.inventory
            .lock()
            .host_by_ref(host)
            .map(|h| h.summary.clone())
            .ok_or_else(|| Error::Query(format!("unknown object {host}")))
    }

    async fn dvs_summary(&self, dvs: &ManagedObjectRef) -> Result<DvsSummary> {
        self.enter(Op::DvsSummary, None).await?;
        self.inventory
            .lock()
            .dvs
            .get(&dvs.value)
            .cloned()
            .ok_or_else(|| Error::Query(format!("unknown object {dvs}")))
    }

    async fn dvp_summary(&self, dvp: &ManagedObjectRef) -> Result<DvpSummary> {
        self.enter(Op::DvpSummary, None).await?;
        self.inventory
            .lock()
            .dvp
            .get(&dvp.value)
            .cloned()
            .ok_or_else(|| Error::Query(format!("unknown object {dvp}")))
    }

    async fn datastore_summaries(
        &self,
        refs: &[ManagedObjectRef],
    ) -> Result<Vec<DatastoreSummary>> {
        self.enter(Op::DatastoreSummaries, None).await?;
        let inv = self.inventory.lock();
        Ok(inv
            .datacenters
            .iter()
            .flat_map(|dc| dc.datastores.iter())
            .filter(|ds| refs.contains(&ds.reference))
            .cloned()
            .collect())
    }

    async fn vm_summaries(&self, refs: &[ManagedObjectRef]) -> Result<Vec<VmSummary>> {
        self.enter(Op::VmSummaries, None).await?;
        let inv = self.inventory.lock();
        Ok(inv
            .datacenters
            .iter()
            .flat_map(|dc| dc.vms.iter())
            .filter(|vm| refs.contains(&vm.reference))
            .cloned()
            .collect())
    }

    async fn esxcli(&self, host: &ManagedObjectRef, command: &[&str]) -> Result<EsxcliResponse> {
        self.enter(Op::Esxcli, Some(host)).await?;
        let inv = self.inventory.lock();
        let entry = inv
            .host_by_ref(host)
            .ok_or_else(|| Error::Query(format!("unknown object {host}")))?;
        Ok(entry
            .esxcli
            .get(&command.join(" "))
            .cloned()
            .unwrap_or_default())
    }
}

/// Connector handing out a shared [`InMemoryVcenter`].
#[derive(Clone)]
pub struct InMemoryConnector {
    api: Arc<InMemoryVcenter>,
}

impl InMemoryConnector {
    pub fn new(api: Arc<InMemoryVcenter>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn VcenterApi>> {
        self.api.enter(Op::Connect, None).await?;
        Ok(self.api.clone())
    }
}
