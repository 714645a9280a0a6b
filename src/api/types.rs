//! Inventory entities and property summaries returned by the management API.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// References and Entities
// ============================================================================

/// Stable reference to a managed object: its type and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    /// Object type, e.g. `HostSystem`
    pub kind: String,
    /// Identifier within the vCenter, e.g. `host-12`
    pub value: String,
}

impl ManagedObjectRef {
    /// Create a new reference.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Root inventory unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datacenter {
    pub reference: ManagedObjectRef,
    pub name: String,
    /// Inventory path, e.g. `/DC1`
    pub inventory_path: String,
}

/// Compute cluster within a datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub reference: ManagedObjectRef,
    pub name: String,
    /// Inventory path, e.g. `/DC1/host/Prod`
    pub inventory_path: String,
}

/// ESXi host. Its inventory path nests under a cluster path when the host
/// belongs to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSystem {
    pub reference: ManagedObjectRef,
    pub name: String,
    /// Inventory path, e.g. `/DC1/host/Prod/esx01`
    pub inventory_path: String,
}

/// Datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub reference: ManagedObjectRef,
    pub name: String,
}

/// Virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub reference: ManagedObjectRef,
    pub name: String,
}

/// Identity shared by all network entity variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub reference: ManagedObjectRef,
    pub name: String,
}

/// Kind of a network entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    /// Standard switch portgroup
    Standard,
    /// Distributed virtual switch
    DistributedSwitch,
    /// Distributed virtual portgroup
    DistributedPortgroup,
    /// NSX opaque network
    Opaque,
}

/// A network entity of a datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "info", rename_all = "snake_case")]
pub enum NetworkEntity {
    Network(NetworkInfo),
    DistributedSwitch(NetworkInfo),
    DistributedPortgroup(NetworkInfo),
    OpaqueNetwork(NetworkInfo),
}

impl NetworkEntity {
    /// The entity kind.
    pub fn kind(&self) -> NetworkKind {
        match self {
            NetworkEntity::Network(_) => NetworkKind::Standard,
            NetworkEntity::DistributedSwitch(_) => NetworkKind::DistributedSwitch,
            NetworkEntity::DistributedPortgroup(_) => NetworkKind::DistributedPortgroup,
            NetworkEntity::OpaqueNetwork(_) => NetworkKind::Opaque,
        }
    }

    /// Shared identity of the entity.
    pub fn info(&self) -> &NetworkInfo {
        match self {
            NetworkEntity::Network(info)
            | NetworkEntity::DistributedSwitch(info)
            | NetworkEntity::DistributedPortgroup(info)
            | NetworkEntity::OpaqueNetwork(info) => info,
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn reference(&self) -> &ManagedObjectRef {
        &self.info().reference
    }
}

// ============================================================================
// Status Enums
// ============================================================================

/// Overall status of a managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Green,
    #[default]
    Gray,
    Yellow,
    Red,
}

impl EntityStatus {
    /// Numeric code for alerting: green 0, gray 1, yellow 2, red 3.
    pub fn code(self) -> i64 {
        match self {
            EntityStatus::Green => 0,
            EntityStatus::Gray => 1,
            EntityStatus::Yellow => 2,
            EntityStatus::Red => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Green => "green",
            EntityStatus::Gray => "gray",
            EntityStatus::Yellow => "yellow",
            EntityStatus::Red => "red",
        }
    }
}

/// Host connection state as reported by the management server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostConnectionState {
    #[default]
    Connected,
    NotResponding,
    Disconnected,
}

impl HostConnectionState {
    /// Numeric code: connected 0, notResponding 1, disconnected 2.
    pub fn code(self) -> i64 {
        match self {
            HostConnectionState::Connected => 0,
            HostConnectionState::NotResponding => 1,
            HostConnectionState::Disconnected => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostConnectionState::Connected => "connected",
            HostConnectionState::NotResponding => "notResponding",
            HostConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Numeric code for a VM power state string.
pub fn vm_power_state_code(state: &str) -> i64 {
    match state {
        "poweredOn" => 0,
        "suspended" => 1,
        "poweredOff" => 2,
        _ => 3,
    }
}

/// Numeric code for a VM connection state string.
pub fn vm_connection_state_code(state: &str) -> i64 {
    match state {
        "connected" => 0,
        "orphaned" => 1,
        "invalid" => 2,
        "disconnected" => 3,
        "inaccessible" => 4,
        _ => 5,
    }
}

/// Numeric code for a storage adapter link state.
pub fn hba_link_state_code(state: &str) -> i64 {
    match state {
        "link-up" | "online" => 0,
        "link-n/a" | "unbound" => 1,
        "link-down" | "offline" => 3,
        _ => 1,
    }
}

/// Numeric code for a physical NIC link status.
pub fn nic_link_status_code(state: &str) -> i64 {
    match state {
        "Up" => 0,
        "Unknown" => 1,
        "Down" => 2,
        _ => 1,
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Product information of the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AboutInfo {
    pub name: String,
    pub version: String,
    pub build: String,
    pub os_type: String,
    /// `VirtualCenter` for a vCenter, `HostAgent` for a standalone host
    pub api_type: String,
}

impl AboutInfo {
    /// Whether the endpoint is a vCenter server.
    pub fn is_vcenter(&self) -> bool {
        self.api_type == "VirtualCenter"
    }
}

/// Cluster summary. Membership counts are always known; status and
/// capacity totals are `None` when the backend does not expose them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub overall_status: Option<EntityStatus>,
    pub num_hosts: i64,
    pub num_effective_hosts: i64,
    pub num_cpu_cores: Option<i64>,
    pub num_cpu_threads: Option<i64>,
    /// MHz
    pub total_cpu: Option<i64>,
    /// Bytes
    pub total_memory: Option<i64>,
    /// MHz
    pub effective_cpu: Option<i64>,
    /// MB
    pub effective_memory: Option<i64>,
    pub num_vms: i64,
}

/// Host summary. Only the connection state is guaranteed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostSummary {
    pub overall_status: Option<EntityStatus>,
    pub connection_state: HostConnectionState,
    pub reboot_required: Option<bool>,
    pub in_maintenance_mode: Option<bool>,
    /// Bytes
    pub memory_size: Option<i64>,
    pub num_cpu_cores: Option<i64>,
    pub cpu_mhz: Option<i64>,
}

/// Distributed virtual switch configuration summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DvsSummary {
    pub overall_status: EntityStatus,
    pub num_ports: i64,
    pub max_ports: i64,
    pub num_standalone_ports: i64,
}

/// Distributed virtual portgroup configuration summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DvpSummary {
    pub overall_status: EntityStatus,
    pub num_ports: i64,
    pub uplink: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreSummary {
    pub reference: ManagedObjectRef,
    pub name: String,
    pub ds_type: String,
    pub accessible: bool,
    pub capacity: i64,
    pub free_space: i64,
    pub uncommitted: Option<i64>,
    pub maintenance_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSummary {
    pub reference: ManagedObjectRef,
    pub name: String,
    /// Guest host name reported by VMware Tools, empty when unknown
    pub guest_hostname: String,
    /// Host the VM runs on, if known
    pub host: Option<ManagedObjectRef>,
    pub overall_status: Option<EntityStatus>,
    pub connection_state: Option<String>,
    pub power_state: String,
    /// MHz
    pub max_cpu_usage: Option<i64>,
    /// MB
    pub max_memory_usage: Option<i64>,
    pub memory_size_mb: i64,
    pub num_cpu: i64,
    pub num_ethernet_cards: i64,
    pub num_virtual_disks: i64,
    pub template: Option<bool>,
    pub consolidation_needed: Option<bool>,
}

/// Tabular result of an esxcli-style command: one map per row, each column
/// holding one or more values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EsxcliResponse {
    pub values: Vec<HashMap<String, Vec<String>>>,
}

impl EsxcliResponse {
    /// Build a response from rows of single-valued columns.
    pub fn from_rows<'a, R>(rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let values = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
                    .collect()
            })
            .collect();
        Self { values }
    }

    /// First value of `column` in `row`, if present.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        self.values
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

/// First value of `column` in a response row, or an empty string.
pub(crate) fn column<'a>(row: &'a HashMap<String, Vec<String>>, column: &str) -> &'a str {
    row.get(column)
        .and_then(|v| v.first())
        .map(String::as_str)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_kind_dispatch() {
        let info = NetworkInfo {
            reference: ManagedObjectRef::new("DistributedVirtualPortgroup", "dvportgroup-9"),
            name: "pg-prod".into(),
        };
        let net = NetworkEntity::DistributedPortgroup(info);
        assert_eq!(net.kind(), NetworkKind::DistributedPortgroup);
        assert_eq!(net.name(), "pg-prod");
        assert_eq!(net.reference().value, "dvportgroup-9");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EntityStatus::Green.code(), 0);
        assert_eq!(EntityStatus::Red.code(), 3);
        assert_eq!(HostConnectionState::Disconnected.code(), 2);
        assert_eq!(hba_link_state_code("link-down"), 3);
        assert_eq!(hba_link_state_code("mystery"), 1);
        assert_eq!(nic_link_status_code("Up"), 0);
        assert_eq!(vm_power_state_code("poweredOff"), 2);
        assert_eq!(vm_connection_state_code("orphaned"), 1);
    }

    #[test]
    fn test_esxcli_response_lookup() {
        let res = EsxcliResponse::from_rows([[("HBAName", "vmhba0"), ("LinkState", "link-up")]]);
        assert_eq!(res.value(0, "HBAName"), Some("vmhba0"));
        assert_eq!(res.value(0, "Driver"), None);
        assert_eq!(res.value(1, "HBAName"), None);
        assert_eq!(column(&res.values[0], "Driver"), "");
    }

    #[test]
    fn test_about_is_vcenter() {
        let about = AboutInfo {
            api_type: "HostAgent".into(),
            ..Default::default()
        };
        assert!(!about.is_vcenter());
    }
}
