//! esxcli-style host commands and the records shaped from their output.

use crate::api::types::column;
use crate::api::{hba_link_state_code, nic_link_status_code, EsxcliResponse};
use crate::error::{Error, Result};
use crate::metric::Metric;

/// Host command run by one of the esxcli passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// `storage core adapter list`
    Hba,
    /// `network nic list`
    Nic,
    /// `network firewall get`
    Firewall,
    /// `graphics device stats list`
    Graphics,
}

/// Tags shared by every host-level record.
pub(super) struct HostTags<'a> {
    pub vcenter: &'a str,
    pub dcname: &'a str,
    pub clustername: &'a str,
    pub esxhostname: &'a str,
}

impl HostTags<'_> {
    pub fn metric(&self, name: &str) -> Metric {
        Metric::new(name)
            .tag("clustername", self.clustername)
            .tag("dcname", self.dcname)
            .tag("esxhostname", self.esxhostname)
            .tag("vcenter", self.vcenter)
    }
}

impl HostCommand {
    pub fn command(self) -> &'static [&'static str] {
        match self {
            HostCommand::Hba => &["storage", "core", "adapter", "list"],
            HostCommand::Nic => &["network", "nic", "list"],
            HostCommand::Firewall => &["network", "firewall", "get"],
            HostCommand::Graphics => &["graphics", "device", "stats", "list"],
        }
    }

    /// Short name used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            HostCommand::Hba => "storage",
            HostCommand::Nic => "network",
            HostCommand::Firewall => "firewall",
            HostCommand::Graphics => "graphics device",
        }
    }

    pub fn measurement(self) -> &'static str {
        match self {
            HostCommand::Hba => "vcstat_host_hba",
            HostCommand::Nic => "vcstat_host_nic",
            HostCommand::Firewall => "vcstat_host_firewall",
            HostCommand::Graphics => "vcstat_host_graphics",
        }
    }

    /// Turn a command response into records.
    pub(super) fn records(self, response: &EsxcliResponse, host: &HostTags<'_>) -> Result<Vec<Metric>> {
        let name = self.measurement();
        let rows = response.values.iter();
        let metrics = match self {
            HostCommand::Hba => rows
                .filter(|row| !column(row, "LinkState").is_empty())
                .map(|row| {
                    let state = column(row, "LinkState");
                    host.metric(name)
                        .tag("device", column(row, "HBAName"))
                        .tag("driver", column(row, "Driver"))
                        .field("link_state", state)
                        .field("link_state_code", hba_link_state_code(state))
                })
                .collect(),
            HostCommand::Nic => rows
                .filter(|row| !column(row, "LinkStatus").is_empty())
                .map(|row| {
                    let status = column(row, "LinkStatus");
                    host.metric(name)
                        .tag("device", column(row, "Name"))
                        .tag("driver", column(row, "Driver"))
                        .field("admin_status", column(row, "AdminStatus"))
                        .field("duplex", column(row, "Duplex"))
                        .field("link_status", status)
                        .field("link_status_code", nic_link_status_code(status))
                        .field("mac", column(row, "MACAddress"))
                        .field("speed", column(row, "Speed"))
                })
                .collect(),
            HostCommand::Firewall => {
                let Some(row) = response.values.first() else {
                    return Ok(Vec::new());
                };
                if column(row, "Enabled").is_empty() {
                    return Ok(Vec::new());
                }
                let enabled = parse_bool(column(row, "Enabled"))?;
                let loaded = parse_bool(column(row, "Loaded"))?;
                vec![host
                    .metric(name)
                    .field("defaultaction", column(row, "DefaultAction"))
                    .field("enabled", enabled)
                    .field("loaded", loaded)]
            }
            HostCommand::Graphics => rows
                .filter(|row| !column(row, "DeviceName").is_empty())
                .map(|row| {
                    host.metric(name)
                        .tag("address", column(row, "Address"))
                        .tag("device", column(row, "DeviceName"))
                        .field("driver", column(row, "DriverVersion"))
                        .field("memory", parse_float(column(row, "MemoryUsed")))
                        .field("temperature", parse_float(column(row, "Temperature")))
                        .field("cpu", parse_float(column(row, "Utilization")))
                })
                .collect(),
        };
        Ok(metrics)
    }
}

/// Boolean in the spellings esxcli uses.
fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::parse("firewall info", format!("invalid boolean '{s}'"))),
    }
}

/// Gauge values missing from the output read as zero.
fn parse_float(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}
