//! vSphere Automation REST backend.
//!
//! Talks to the `/api` endpoints of a vCenter with a session token obtained
//! through basic authentication. The REST surface exposes less than the
//! property collector does:
//!
//! - Summaries are assembled from listings and per-object detail calls.
//!   Values no endpoint reports are left `None` and never reach a record.
//! - Distributed switch and portgroup summaries and host commands are not
//!   served. [`RestConnector`] reports them through [`Connector::supports`]
//!   so configuration enabling them is rejected up front.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use super::types::*;
use super::{Connector, Feature, VcenterApi};
use crate::error::{Error, Result};

/// Header carrying the session token.
const SESSION_HEADER: &str = "vmware-api-session-id";

/// Default timeout for a single HTTP request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TimeInfo {
    seconds_since_epoch: f64,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(default)]
    product: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    build: String,
}

#[derive(Debug, Deserialize)]
struct DatacenterItem {
    datacenter: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClusterItem {
    cluster: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct HostItem {
    host: String,
    name: String,
    #[serde(default)]
    connection_state: String,
}

#[derive(Debug, Deserialize)]
struct NetworkItem {
    network: String,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct DatastoreItem {
    datastore: String,
    name: String,
}

/// `GET /api/vcenter/datastore/{datastore}`
#[derive(Debug, Deserialize)]
struct DatastoreInfo {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    accessible: bool,
    #[serde(default)]
    free_space: i64,
    #[serde(default)]
    capacity: i64,
}

#[derive(Debug, Deserialize)]
struct VmItem {
    vm: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct VmCpu {
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Default, Deserialize)]
struct VmMemory {
    #[serde(rename = "size_MiB", default)]
    size_mib: i64,
}

/// `GET /api/vcenter/vm/{vm}`
#[derive(Debug, Deserialize)]
struct VmInfo {
    name: String,
    #[serde(default)]
    power_state: String,
    #[serde(default)]
    cpu: VmCpu,
    #[serde(default)]
    memory: VmMemory,
    #[serde(default)]
    nics: HashMap<String, IgnoredAny>,
    #[serde(default)]
    disks: HashMap<String, IgnoredAny>,
}

/// `GET /api/vcenter/vm/{vm}/guest/identity`
#[derive(Debug, Deserialize)]
struct GuestIdentity {
    #[serde(default)]
    host_name: String,
}

fn host_connection_state(state: &str) -> HostConnectionState {
    match state {
        "CONNECTED" => HostConnectionState::Connected,
        "NOT_RESPONDING" => HostConnectionState::NotResponding,
        _ => HostConnectionState::Disconnected,
    }
}

fn vm_power_state(state: &str) -> &'static str {
    match state {
        "POWERED_ON" => "poweredOn",
        "POWERED_OFF" => "poweredOff",
        "SUSPENDED" => "suspended",
        _ => "unknown",
    }
}

/// Classify a transport failure. Anything that broke the exchange with the
/// peer (refused, reset or closed connections, truncated bodies) is a
/// network error and ends the cycle.
fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::DeadlineExceeded
    } else if err.is_decode() {
        Error::parse("response body", err)
    } else if err.is_connect() || err.is_request() || err.is_body() || has_io_source(&err) {
        Error::Network(err.to_string())
    } else {
        Error::Query(err.to_string())
    }
}

fn has_io_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if e.is::<std::io::Error>() {
            return true;
        }
        source = e.source();
    }
    false
}

// ============================================================================
// Connector
// ============================================================================

/// Connector producing authenticated [`RestClient`]s.
#[derive(Debug, Clone)]
pub struct RestConnector {
    url: Url,
    username: String,
    password: String,
    insecure: bool,
    timeout: Duration,
}

impl RestConnector {
    /// Create a connector for the vCenter at `url`.
    pub fn new(url: Url, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url,
            username: username.into(),
            password: password.into(),
            insecure: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Skip TLS certificate verification.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.insecure)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))
    }
}

#[async_trait]
impl Connector for RestConnector {
    async fn connect(&self) -> Result<Arc<dyn VcenterApi>> {
        let client = RestClient {
            http: self.build_client()?,
            base: self.url.clone(),
            endpoint: self.url.host_str().unwrap_or_default().to_string(),
            username: self.username.clone(),
            password: self.password.clone(),
            token: RwLock::new(None),
        };
        client.login().await?;
        Ok(Arc::new(client))
    }

    fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::DistributedSwitchSummary
            | Feature::DistributedPortgroupSummary
            | Feature::HostCommands => false,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated REST client for one vCenter.
pub struct RestClient {
    http: Client,
    base: Url,
    endpoint: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl RestClient {
    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("invalid URL path {path}: {e}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let mut request = self.http.request(method, self.url(path)?);
        if let Some(token) = self.token.read().as_deref() {
            request = request.header(SESSION_HEADER, token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        trace!(what, status = status.as_u16(), "vCenter response");

        match status {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(Error::Authentication(format!(
                "session rejected while requesting {what}"
            ))),
            StatusCode::FORBIDDEN => Err(Error::PermissionDenied(what.to_string())),
            StatusCode::NOT_FOUND => Err(Error::NotFound(what.to_string())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Query(format!("{what}: HTTP {status}: {body}")))
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let request = self.request(Method::GET, path)?.query(query);
        self.send(request, path)
            .await?
            .json()
            .await
            .map_err(map_transport_error)
    }

    /// List helper: an empty result becomes `NotFound`, matching the finder
    /// semantics the collector expects.
    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let items: Vec<T> = self.get(path, query).await?;
        if items.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(items)
    }

    async fn list_or_empty<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        match self.get(path, query).await {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    /// Detail lookup: `None` when the object vanished since it was listed.
    async fn detail<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path, &[]).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Host each of `refs` runs on. The VM listing carries no placement, so
    /// VMs are listed once per host, scoped to `refs`.
    async fn placements(&self, refs: &[ManagedObjectRef]) -> Result<HashMap<String, String>> {
        let hosts: Vec<HostItem> = self.list_or_empty("/api/vcenter/host", &[]).await?;
        let vms = join_refs(refs);
        let mut placed = HashMap::new();
        for host in hosts {
            let items: Vec<VmItem> = self
                .list_or_empty(
                    "/api/vcenter/vm",
                    &[("hosts", host.host.clone()), ("vms", vms.clone())],
                )
                .await?;
            for item in items {
                placed.insert(item.vm, host.host.clone());
            }
        }
        Ok(placed)
    }

    /// Guest host name from VMware Tools. Tools that are not running answer
    /// with an error status; that only costs the tag.
    async fn guest_hostname(&self, vm: &str) -> Result<String> {
        let path = format!("/api/vcenter/vm/{vm}/guest/identity");
        match self.get::<GuestIdentity>(&path, &[]).await {
            Ok(identity) => Ok(identity.host_name),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                trace!(vm, error = %e, "no guest identity");
                Ok(String::new())
            }
        }
    }
}

fn join_refs(refs: &[ManagedObjectRef]) -> String {
    refs.iter()
        .map(|r| r.value.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl VcenterApi for RestClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn login(&self) -> Result<()> {
        let request = self
            .http
            .post(self.url("/api/session")?)
            .basic_auth(&self.username, Some(&self.password));
        let token: String = match self.send(request, "session").await {
            Ok(response) => response.json().await.map_err(map_transport_error)?,
            Err(Error::Authentication(_)) => {
                return Err(Error::Authentication(format!(
                    "vCenter rejected credentials of user {}",
                    self.username
                )))
            }
            Err(e) => return Err(e),
        };
        debug!(endpoint = %self.endpoint, "vCenter session established");
        *self.token.write() = Some(token);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let request = self.request(Method::DELETE, "/api/session")?;
        self.send(request, "session").await?;
        *self.token.write() = None;
        Ok(())
    }

    async fn current_time(&self) -> Result<DateTime<Utc>> {
        let info: TimeInfo = self.get("/api/appliance/system/time", &[]).await?;
        let millis = (info.seconds_since_epoch * 1000.0) as i64;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::parse("server time", info.seconds_since_epoch))
    }

    async fn about(&self) -> Result<AboutInfo> {
        match self
            .get::<VersionInfo>("/api/appliance/system/version", &[])
            .await
        {
            Ok(v) => Ok(AboutInfo {
                name: v.product,
                version: v.version,
                build: v.build,
                os_type: "linux-x64".to_string(),
                api_type: "VirtualCenter".to_string(),
            }),
            // Standalone hosts do not serve the appliance API.
            Err(e) if e.is_not_found() => Ok(AboutInfo {
                api_type: "HostAgent".to_string(),
                ..Default::default()
            }),
            Err(e) => Err(e),
        }
    }

    async fn datacenters(&self) -> Result<Vec<Datacenter>> {
        let items: Vec<DatacenterItem> = self.list("/api/vcenter/datacenter", &[]).await?;
        Ok(items
            .into_iter()
            .map(|i| Datacenter {
                reference: ManagedObjectRef::new("Datacenter", i.datacenter),
                inventory_path: format!("/{}", i.name),
                name: i.name,
            })
            .collect())
    }

    async fn clusters(&self, dc: &Datacenter) -> Result<Vec<Cluster>> {
        let items: Vec<ClusterItem> = self
            .list(
                "/api/vcenter/cluster",
                &[("datacenters", dc.reference.value.clone())],
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|i| Cluster {
                reference: ManagedObjectRef::new("ClusterComputeResource", i.cluster),
                inventory_path: format!("{}/host/{}", dc.inventory_path, i.name),
                name: i.name,
            })
            .collect())
    }

    async fn hosts(&self, dc: &Datacenter) -> Result<Vec<HostSystem>> {
        let items: Vec<HostItem> = self
            .list(
                "/api/vcenter/host",
                &[("datacenters", dc.reference.value.clone())],
            )
            .await?;

        // Host listings carry no parent, so resolve cluster membership per cluster.
        let clusters = match self.clusters(dc).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut parents = HashMap::new();
        for cluster in &clusters {
            let members: Vec<HostItem> = self
                .list_or_empty(
                    "/api/vcenter/host",
                    &[("clusters", cluster.reference.value.clone())],
                )
                .await?;
            for m in members {
                parents.insert(m.host, cluster.inventory_path.clone());
            }
        }

        Ok(items
            .into_iter()
            .map(|i| {
                let parent = parents
                    .get(&i.host)
                    .cloned()
                    .unwrap_or_else(|| format!("{}/host", dc.inventory_path));
                HostSystem {
                    reference: ManagedObjectRef::new("HostSystem", i.host),
                    inventory_path: format!("{parent}/{}", i.name),
                    name: i.name,
                }
            })
            .collect())
    }

    async fn networks(&self, dc: &Datacenter) -> Result<Vec<NetworkEntity>> {
        let items: Vec<NetworkItem> = self
            .list(
                "/api/vcenter/network",
                &[("datacenters", dc.reference.value.clone())],
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|i| {
                let kind = i.kind;
                let type_name = match kind.as_str() {
                    "DISTRIBUTED_PORTGROUP" => "DistributedVirtualPortgroup",
                    "OPAQUE_NETWORK" => "OpaqueNetwork",
                    _ => "Network",
                };
                let info = NetworkInfo {
                    reference: ManagedObjectRef::new(type_name, i.network),
                    name: i.name,
                };
                match kind.as_str() {
                    "DISTRIBUTED_PORTGROUP" => NetworkEntity::DistributedPortgroup(info),
                    "OPAQUE_NETWORK" => NetworkEntity::OpaqueNetwork(info),
                    _ => NetworkEntity::Network(info),
                }
            })
            .collect())
    }

    async fn datastores(&self, dc: &Datacenter) -> Result<Vec<Datastore>> {
        let items: Vec<DatastoreItem> = self
            .list(
                "/api/vcenter/datastore",
                &[("datacenters", dc.reference.value.clone())],
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|i| Datastore {
                reference: ManagedObjectRef::new("Datastore", i.datastore),
                name: i.name,
            })
            .collect())
    }

    async fn vms(&self, dc: &Datacenter) -> Result<Vec<VirtualMachine>> {
        let items: Vec<VmItem> = self
            .list(
                "/api/vcenter/vm",
                &[("datacenters", dc.reference.value.clone())],
            )
            .await?;
        Ok(items
            .into_iter()
            .map(|i| VirtualMachine {
                reference: ManagedObjectRef::new("VirtualMachine", i.vm),
                name: i.name,
            })
            .collect())
    }

    /// Membership counts only; status and capacity totals stay `None`.
    async fn cluster_summary(&self, cluster: &ManagedObjectRef) -> Result<ClusterSummary> {
        let scope = [("clusters", cluster.value.clone())];
        let hosts: Vec<HostItem> = self.list_or_empty("/api/vcenter/host", &scope).await?;
        let vms: Vec<VmItem> = self.list_or_empty("/api/vcenter/vm", &scope).await?;
        Ok(ClusterSummary {
            num_hosts: hosts.len() as i64,
            num_effective_hosts: hosts
                .iter()
                .filter(|h| h.connection_state == "CONNECTED")
                .count() as i64,
            num_vms: vms.len() as i64,
            ..Default::default()
        })
    }

    /// Connection state only; the host listing is all the REST surface has.
    async fn host_summary(&self, host: &ManagedObjectRef) -> Result<HostSummary> {
        let items: Vec<HostItem> = self
            .list("/api/vcenter/host", &[("hosts", host.value.clone())])
            .await
            .map_err(|e| e.context(format!("host {host}")))?;
        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| Error::Query(format!("no summary for {host}")))?;
        Ok(HostSummary {
            connection_state: host_connection_state(&item.connection_state),
            ..Default::default()
        })
    }

    async fn dvs_summary(&self, dvs: &ManagedObjectRef) -> Result<DvsSummary> {
        Err(Error::Unsupported(format!("distributed switch summary for {dvs}")))
    }

    async fn dvp_summary(&self, dvp: &ManagedObjectRef) -> Result<DvpSummary> {
        Err(Error::Unsupported(format!("distributed portgroup summary for {dvp}")))
    }

    async fn datastore_summaries(
        &self,
        refs: &[ManagedObjectRef],
    ) -> Result<Vec<DatastoreSummary>> {
        let mut summaries = Vec::with_capacity(refs.len());
        for r in refs {
            let path = format!("/api/vcenter/datastore/{}", r.value);
            let Some(info) = self.detail::<DatastoreInfo>(&path).await? else {
                debug!(datastore = %r, "datastore vanished before its summary");
                continue;
            };
            summaries.push(DatastoreSummary {
                reference: r.clone(),
                name: info.name,
                ds_type: info.kind,
                accessible: info.accessible,
                capacity: info.capacity,
                free_space: info.free_space,
                uncommitted: None,
                maintenance_mode: None,
            });
        }
        Ok(summaries)
    }

    async fn vm_summaries(&self, refs: &[ManagedObjectRef]) -> Result<Vec<VmSummary>> {
        let placements = self.placements(refs).await?;
        let mut summaries = Vec::with_capacity(refs.len());
        for r in refs {
            let path = format!("/api/vcenter/vm/{}", r.value);
            let Some(info) = self.detail::<VmInfo>(&path).await? else {
                debug!(vm = %r, "virtual machine vanished before its summary");
                continue;
            };
            let power_state = vm_power_state(&info.power_state);
            let guest_hostname = if power_state == "poweredOn" {
                self.guest_hostname(&r.value).await?
            } else {
                String::new()
            };
            summaries.push(VmSummary {
                reference: r.clone(),
                name: info.name,
                guest_hostname,
                host: placements
                    .get(&r.value)
                    .map(|h| ManagedObjectRef::new("HostSystem", h.as_str())),
                overall_status: None,
                connection_state: None,
                power_state: power_state.to_string(),
                max_cpu_usage: None,
                max_memory_usage: None,
                memory_size_mb: info.memory.size_mib,
                num_cpu: info.cpu.count,
                num_ethernet_cards: info.nics.len() as i64,
                num_virtual_disks: info.disks.len() as i64,
                template: None,
                consolidation_needed: None,
            });
        }
        Ok(summaries)
    }

    async fn esxcli(&self, host: &ManagedObjectRef, command: &[&str]) -> Result<EsxcliResponse> {
        Err(Error::Unsupported(format!(
            "esxcli '{}' on {host}",
            command.join(" ")
        )))
    }
}
