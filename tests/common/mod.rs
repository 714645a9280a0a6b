//! Shared fixtures for the vcstat integration tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vcstat::api::memory::{InMemoryConnector, InMemoryVcenter};
use vcstat::api::EsxcliResponse;
use vcstat::collector::{CollectorSettings, HostCommand, VcCollector};
use vcstat::gather::{GatherReport, Gatherer, Instances};
use vcstat::metric::Metric;

pub const INTERVAL: Duration = Duration::from_secs(60);

/// Two storage adapters, both with a link state.
pub fn two_adapters() -> EsxcliResponse {
    EsxcliResponse::from_rows([
        [("HBAName", "vmhba0"), ("Driver", "nvme_pcie"), ("LinkState", "link-up")],
        [("HBAName", "vmhba64"), ("Driver", "iscsi_vmk"), ("LinkState", "online")],
    ])
}

/// DC1 with cluster Prod holding esx01 and esx02, DC2 empty. esx01 reports
/// two storage adapters.
pub fn two_datacenters() -> Arc<InMemoryVcenter> {
    let vc = Arc::new(InMemoryVcenter::new("vc.local"));
    let dc1 = vc.add_datacenter("DC1");
    vc.add_datacenter("DC2");
    vc.add_cluster(dc1, "Prod");
    vc.add_host(dc1, Some("Prod"), "esx01");
    vc.add_host(dc1, Some("Prod"), "esx02");
    vc.set_esxcli("esx01", HostCommand::Hba.command(), two_adapters());
    vc
}

pub fn gatherer(vc: &Arc<InMemoryVcenter>, instances: Instances) -> Gatherer {
    let collector = VcCollector::new(
        Arc::new(InMemoryConnector::new(vc.clone())),
        CollectorSettings::from_interval(INTERVAL, 20, 100),
    );
    Gatherer::new(collector, INTERVAL)
        .with_instances(instances)
        .with_vcenter("vc.local")
        .with_version("test")
}

pub fn hba_only() -> Instances {
    Instances {
        host_hba: true,
        ..Instances::default()
    }
}

/// Records of one measurement.
pub fn records<'a>(report: &'a GatherReport, name: &str) -> Vec<&'a Metric> {
    report.metrics.iter().filter(|m| m.name == name).collect()
}

/// Record of one measurement for one host.
pub fn host_record<'a>(report: &'a GatherReport, name: &str, host: &str) -> Option<&'a Metric> {
    report
        .metrics
        .iter()
        .find(|m| m.name == name && m.get_tag("esxhostname") == Some(host))
}
