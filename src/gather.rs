//! Gather-cycle orchestration.
//!
//! A [`Gatherer`] drives one [`VcCollector`] through a polling cycle: it
//! keeps the session alive, runs the enabled collection passes in a fixed
//! order and appends the `internal_vcstat` self-monitoring record.
//!
//! ```text
//! keep session ─▶ vcenter ─▶ datacenters ─▶ clusters ─▶ hosts
//!      ─▶ esxcli passes ─▶ esxcli report ─▶ dvs/dvp ─▶ datastores ─▶ vms
//!      ─▶ internal_vcstat
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::Feature;
use crate::collector::VcCollector;
use crate::context::CycleContext;
use crate::error::{Error, Result};
use crate::metric::{precision_for, Accumulator, Metric};
use crate::session::OpenOutcome;

/// Measurement name of the self-monitoring record.
pub const INTERNAL_MEASUREMENT: &str = "internal_vcstat";

// ============================================================================
// Instance Toggles
// ============================================================================

/// Which collection passes run each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instances {
    #[serde(rename = "cluster_instances")]
    pub cluster: bool,
    #[serde(rename = "datastore_instances")]
    pub datastore: bool,
    #[serde(rename = "host_instances")]
    pub host: bool,
    #[serde(rename = "host_hba_instances")]
    pub host_hba: bool,
    #[serde(rename = "host_nic_instances")]
    pub host_nic: bool,
    #[serde(rename = "host_firewall_instances")]
    pub host_firewall: bool,
    #[serde(rename = "host_graphics_instances")]
    pub host_graphics: bool,
    #[serde(rename = "net_dvs_instances")]
    pub net_dvs: bool,
    #[serde(rename = "net_dvp_instances")]
    pub net_dvp: bool,
    #[serde(rename = "vm_instances")]
    pub vm: bool,
}

impl Default for Instances {
    fn default() -> Self {
        Self {
            cluster: true,
            datastore: false,
            host: true,
            host_hba: false,
            host_nic: false,
            host_firewall: false,
            host_graphics: false,
            net_dvs: false,
            net_dvp: false,
            vm: false,
        }
    }
}

impl Instances {
    /// Whether any esxcli-style host pass is enabled.
    pub fn has_esxcli(&self) -> bool {
        self.host_hba || self.host_nic || self.host_firewall || self.host_graphics
    }

    /// Enabled toggles paired with the backend feature each one needs.
    pub fn required_features(&self) -> Vec<(&'static str, Feature)> {
        [
            (self.host_hba, "host_hba_instances", Feature::HostCommands),
            (self.host_nic, "host_nic_instances", Feature::HostCommands),
            (self.host_firewall, "host_firewall_instances", Feature::HostCommands),
            (self.host_graphics, "host_graphics_instances", Feature::HostCommands),
            (self.net_dvs, "net_dvs_instances", Feature::DistributedSwitchSummary),
            (self.net_dvp, "net_dvp_instances", Feature::DistributedPortgroupSummary),
        ]
        .into_iter()
        .filter(|(enabled, _, _)| *enabled)
        .map(|(_, key, feature)| (key, feature))
        .collect()
    }
}

// ============================================================================
// Gatherer
// ============================================================================

/// Outcome of a completed cycle.
#[derive(Debug, Default)]
pub struct GatherReport {
    pub metrics: Vec<Metric>,
    /// Transient errors recorded during the cycle
    pub errors: Vec<Error>,
}

/// Runs gather cycles against one vCenter.
pub struct Gatherer {
    collector: VcCollector,
    instances: Instances,
    interval: Duration,
    open_timeout: Duration,
    vcenter: String,
    alias: String,
    version: String,
}

impl Gatherer {
    /// Create a gatherer polling every `interval`. Sessions are opened
    /// within one interval unless [`with_open_timeout`](Self::with_open_timeout)
    /// says otherwise.
    pub fn new(collector: VcCollector, interval: Duration) -> Self {
        Self {
            collector,
            instances: Instances::default(),
            interval,
            open_timeout: interval,
            vcenter: String::new(),
            alias: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_instances(mut self, instances: Instances) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Host name of the endpoint, used as the `vcenter` tag of the
    /// self-monitoring record.
    pub fn with_vcenter(mut self, vcenter: impl Into<String>) -> Self {
        self.vcenter = vcenter.into();
        self
    }

    pub fn with_internal_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn collector(&self) -> &VcCollector {
        &self.collector
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle bounded by the polling interval.
    pub async fn gather(&mut self) -> Result<GatherReport> {
        let ctx = CycleContext::new(self.interval);
        self.gather_with(&ctx).await
    }

    /// Run one cycle under a caller-supplied context.
    ///
    /// A fatal error discards everything collected so far. Cancellation
    /// comes back as a bare [`Error::Cancelled`].
    pub async fn gather_with(&mut self, ctx: &CycleContext) -> Result<GatherReport> {
        let mut acc = Accumulator::new();
        match self.run_cycle(ctx, &mut acc).await {
            Ok(()) => {
                let (metrics, errors) = acc.into_parts();
                debug!(metrics = metrics.len(), errors = errors.len(), "gather cycle done");
                Ok(GatherReport { metrics, errors })
            }
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Log out of vCenter.
    pub async fn close(&mut self) {
        self.collector.close().await;
    }

    async fn run_cycle(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        self.keep_active_session(ctx, acc).await?;
        acc.set_precision(precision_for(self.interval));
        let started = Instant::now();

        let inst = self.instances.clone();
        let col = &mut self.collector;

        col.collect_vcenter_info(ctx, acc).await?;
        if inst.cluster || inst.host {
            col.collect_datacenter_info(ctx, acc).await?;
        }
        if inst.cluster {
            col.collect_cluster_info(ctx, acc).await?;
        }

        if inst.host {
            col.collect_host_info(ctx, acc).await?;
        }
        col.reset_response_times();
        if inst.host_hba {
            col.collect_host_hba(ctx, acc).await?;
        }
        if inst.host_nic {
            col.collect_host_nic(ctx, acc).await?;
        }
        if inst.host_firewall {
            col.collect_host_firewall(ctx, acc).await?;
        }
        if inst.host_graphics {
            col.collect_host_graphics(ctx, acc).await?;
        }
        if inst.has_esxcli() {
            col.report_host_esxcli_response(ctx, acc).await?;
        }

        if inst.net_dvs {
            col.collect_net_dvs(ctx, acc).await?;
        }
        if inst.net_dvp {
            col.collect_net_dvp(ctx, acc).await?;
        }
        if inst.datastore {
            col.collect_datastores_info(ctx, acc).await?;
        }
        if inst.vm {
            col.collect_vms_info(ctx, acc).await?;
        }

        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let mut internal = Metric::new(INTERNAL_MEASUREMENT)
            .tag("alias", self.alias.as_str())
            .tag("vcenter", self.vcenter.as_str())
            .tag("vcstat_version", self.version.as_str())
            .field("gather_time_ns", elapsed)
            .field("sessions_created", self.collector.sessions_created());
        if inst.has_esxcli() {
            internal = internal.field(
                "notresponding_esxcli_hosts",
                self.collector.not_responding_hosts(),
            );
        }
        acc.add_metric(internal);
        Ok(())
    }

    /// Open a session when there is none or the current one stopped
    /// answering. Losing an established session is reported as a
    /// transient error.
    async fn keep_active_session(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        if self.collector.is_active(ctx).await {
            return Ok(());
        }
        if self.collector.sessions_created() > 0 {
            acc.add_error(Error::Connection(format!(
                "vCenter session not active, re-authenticating with {}",
                self.vcenter
            )));
        }
        let outcome = self
            .collector
            .open(ctx, self.open_timeout)
            .await
            .map_err(|e| e.context(format!("could not open session with vCenter {}", self.vcenter)))?;
        if outcome == OpenOutcome::Created {
            info!(vcenter = %self.vcenter, "cache reset for new session");
        }
        Ok(())
    }
}
