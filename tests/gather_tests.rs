//! End-to-end gather cycles against the in-memory vCenter.
//!
//! These tests cover:
//! - Per-host esxcli failures staying local to the host
//! - Not-responding cool-down across cycles
//! - Slow hosts aborting a cycle
//! - Session renewal and the cache reset it implies

mod common;

use common::*;
use pretty_assertions::assert_eq;
use vcstat::api::memory::{Failure, Op};
use vcstat::error::Error;
use vcstat::gather::INTERNAL_MEASUREMENT;
use vcstat::metric::FieldValue;

// ============================================================================
// Per-host failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failing_host_is_isolated() {
    let vc = two_datacenters();
    vc.fail_host(Op::Esxcli, "esx02", Failure::Query("esxcli agent unavailable".into()));
    let mut g = gatherer(&vc, hba_only());

    let report = g.gather().await.unwrap();

    let hba = records(&report, "vcstat_host_hba");
    assert_eq!(hba.len(), 2);
    assert!(hba.iter().all(|m| m.get_tag("esxhostname") == Some("esx01")));
    assert!(hba.iter().all(|m| m.get_tag("dcname") == Some("DC1")));
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].to_string().contains("esx02"));

    assert!(report.metrics.iter().all(|m| m.get_tag("dcname") != Some("DC2")
        || m.name == "vcstat_datacenter"));
    assert_eq!(records(&report, "vcstat_host").len(), 2);

    let internal = records(&report, INTERNAL_MEASUREMENT);
    assert_eq!(
        internal[0].get_field("notresponding_esxcli_hosts"),
        Some(&FieldValue::Int(1))
    );
    assert_eq!(g.collector().not_responding_hosts(), 1);

    let esx02 = host_record(&report, "vcstat_host_esxcli", "esx02").unwrap();
    assert_eq!(esx02.get_field("responding_code"), Some(&FieldValue::Int(2)));
    let esx01 = host_record(&report, "vcstat_host_esxcli", "esx01").unwrap();
    assert_eq!(esx01.get_field("responding_code"), Some(&FieldValue::Int(0)));
}

#[tokio::test(start_paused = true)]
async fn test_datacenter_records_include_empty_datacenter() {
    let vc = two_datacenters();
    let mut g = gatherer(&vc, hba_only());
    let report = g.gather().await.unwrap();

    let dcs = records(&report, "vcstat_datacenter");
    assert_eq!(dcs.len(), 2);
    let dc2 = dcs.iter().find(|m| m.get_tag("dcname") == Some("DC2")).unwrap();
    assert_eq!(dc2.get_field("num_hosts"), Some(&FieldValue::Int(0)));
    assert_eq!(dc2.get_field("num_clusters"), Some(&FieldValue::Int(0)));
    assert!(report.errors.is_empty());
}

// ============================================================================
// Cool-down
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_not_responding_host_sits_out_cool_down() {
    let vc = two_datacenters();
    vc.fail_host(Op::Esxcli, "esx02", Failure::Query("esxcli agent unavailable".into()));
    let mut g = gatherer(&vc, hba_only());

    g.gather().await.unwrap();
    assert_eq!(vc.calls(Op::Esxcli), 2);

    // Within the cool-down only the healthy host is asked.
    tokio::time::advance(INTERVAL).await;
    let report = g.gather().await.unwrap();
    assert_eq!(vc.calls(Op::Esxcli), 3);
    assert!(report.errors.is_empty());
    assert_eq!(g.collector().not_responding_hosts(), 1);

    // Once 20 intervals passed the host gets another try.
    vc.heal();
    tokio::time::advance(INTERVAL * 20).await;
    let report = g.gather().await.unwrap();
    assert_eq!(vc.calls(Op::Esxcli), 5);
    assert!(report.errors.is_empty());
    assert_eq!(g.collector().not_responding_hosts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_host_aborts_cycle_then_is_skipped() {
    let vc = two_datacenters();
    vc.fail_host(Op::Esxcli, "esx02", Failure::Hang);
    let mut g = gatherer(&vc, hba_only());

    let err = g.gather().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err.root(), Error::DeadlineExceeded));

    let report = g.gather().await.unwrap();
    assert_eq!(records(&report, "vcstat_host_hba").len(), 2);
    let esx02 = host_record(&report, "vcstat_host_esxcli", "esx02").unwrap();
    assert_eq!(esx02.get_field("responding_code"), Some(&FieldValue::Int(2)));
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_new_session_resets_cache_and_liveness() {
    let vc = two_datacenters();
    vc.fail_host(Op::Esxcli, "esx02", Failure::Query("esxcli agent unavailable".into()));
    let mut g = gatherer(&vc, hba_only());
    g.gather().await.unwrap();
    assert_eq!(vc.calls(Op::Datacenters), 1);

    vc.fail(Op::CurrentTime, Failure::Network("connection reset by peer".into()));
    vc.fail(Op::Login, Failure::Authentication("session expired".into()));
    let report = g.gather().await.unwrap();

    assert_eq!(vc.calls(Op::Connect), 2);
    assert_eq!(vc.calls(Op::Datacenters), 2);
    assert_eq!(g.collector().sessions_created(), 2);
    // The re-authentication warning plus esx02 failing again with fresh
    // liveness records.
    assert_eq!(report.errors.len(), 2);
    assert_eq!(vc.calls(Op::Esxcli), 4);

    let internal = records(&report, INTERNAL_MEASUREMENT);
    assert_eq!(internal[0].get_field("sessions_created"), Some(&FieldValue::Int(2)));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_endpoint_fails_cycle() {
    let vc = two_datacenters();
    vc.fail(Op::Connect, Failure::Network("no such host".into()));
    let mut g = gatherer(&vc, hba_only());

    let err = g.gather().await.unwrap_err();
    assert!(err.to_string().contains("could not open session"));
    assert_eq!(g.collector().sessions_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_timestamps_are_truncated() {
    let vc = two_datacenters();
    let mut g = gatherer(&vc, hba_only());
    let report = g.gather().await.unwrap();
    assert!(report
        .metrics
        .iter()
        .all(|m| m.timestamp.timestamp_subsec_nanos() == 0));
}

#[tokio::test(start_paused = true)]
async fn test_all_instances_enabled() {
    use vcstat::api::NetworkKind;
    use vcstat::gather::Instances;

    let vc = two_datacenters();
    vc.add_network(0, NetworkKind::DistributedSwitch, "dvs-prod");
    vc.add_network(0, NetworkKind::DistributedPortgroup, "pg-web");
    vc.add_datastore(0, "ds-prod-01", 4 << 40, 1 << 40);
    vc.add_vm(0, "web01", Some("esx01"));

    let instances = Instances {
        cluster: true,
        datastore: true,
        host: true,
        host_hba: true,
        host_nic: true,
        host_firewall: true,
        host_graphics: true,
        net_dvs: true,
        net_dvp: true,
        vm: true,
    };
    let mut g = gatherer(&vc, instances);
    let report = g.gather().await.unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    for name in [
        "vcstat_vcenter",
        "vcstat_datacenter",
        "vcstat_cluster",
        "vcstat_host",
        "vcstat_host_hba",
        "vcstat_host_esxcli",
        "vcstat_net_dvs",
        "vcstat_net_dvp",
        "vcstat_datastore",
        "vcstat_vm",
        INTERNAL_MEASUREMENT,
    ] {
        assert!(!records(&report, name).is_empty(), "missing {name}");
    }
    // Four esxcli passes over two hosts.
    assert_eq!(vc.calls(Op::Esxcli), 8);
}
