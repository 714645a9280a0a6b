//! Host records: summaries, esxcli-style command passes and the
//! per-host responsiveness report.

use tokio::time::Instant;
use tracing::{debug, trace};

use super::esxcli::{HostCommand, HostTags};
use super::{route, VcCollector};
use crate::api::{EntityStatus, HostConnectionState};
use crate::cache::cluster_name_for;
use crate::context::CycleContext;
use crate::error::{Error, Result};
use crate::metric::{Accumulator, Metric};

impl VcCollector {
    /// Emit one `vcstat_host` per host and record whether vCenter reports it
    /// as connected.
    pub async fn collect_host_info(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        let api = self.client("hosts info")?;
        self.cache
            .refresh_clusters_and_hosts(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get cluster and host entity list"))?;

        for i in 0..self.cache.datacenters().len() {
            let Some(slots) = self.cache.host_slots_mut(i) else {
                continue;
            };
            for (host, state) in slots.hosts.iter().zip(slots.states.iter_mut()) {
                if !self.host_filter.matches(&host.name) {
                    continue;
                }
                let summary = match ctx.run(api.host_summary(&host.reference)).await {
                    Ok(s) => s,
                    Err(e) => {
                        route(acc, e.context(format!("could not get host {} summary", host.name)))?;
                        continue;
                    }
                };
                state.set_not_connected(summary.connection_state != HostConnectionState::Connected);

                acc.add_metric(
                    Metric::new("vcstat_host")
                        .tag("clustername", cluster_name_for(slots.clusters, host))
                        .tag("dcname", slots.datacenter.name.as_str())
                        .tag("esxhostname", host.name.as_str())
                        .tag("moid", host.reference.value.as_str())
                        .tag("vcenter", api.endpoint())
                        .field("connection_state", summary.connection_state.as_str())
                        .field("connection_state_code", summary.connection_state.code())
                        .field_opt("cpu_freq", summary.cpu_mhz)
                        .field_opt("in_maintenance_mode", summary.in_maintenance_mode)
                        .field_opt("memory_size", summary.memory_size)
                        .field_opt("num_cpus", summary.num_cpu_cores)
                        .field_opt("reboot_required", summary.reboot_required)
                        .field_opt("status", summary.overall_status.map(EntityStatus::as_str))
                        .field_opt("status_code", summary.overall_status.map(EntityStatus::code)),
                );
            }
        }
        Ok(())
    }

    /// Emit `vcstat_host_hba` for every storage adapter with a link state.
    pub async fn collect_host_hba(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        self.run_host_command(ctx, acc, HostCommand::Hba).await
    }

    /// Emit `vcstat_host_nic` for every physical NIC with a link status.
    pub async fn collect_host_nic(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        self.run_host_command(ctx, acc, HostCommand::Nic).await
    }

    /// Emit `vcstat_host_firewall` with the firewall state of each host.
    pub async fn collect_host_firewall(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        self.run_host_command(ctx, acc, HostCommand::Firewall).await
    }

    /// Emit `vcstat_host_graphics` for every graphics device.
    pub async fn collect_host_graphics(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        self.run_host_command(ctx, acc, HostCommand::Graphics).await
    }

    /// Run `cmd` on every connected, responding host.
    ///
    /// Each call is bounded by the per-host response ceiling and its
    /// duration is added to the host's response time. A host that fails the
    /// command is marked not responding and sits out the cool-down; one
    /// that overruns the ceiling also ends the pass.
    async fn run_host_command(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
        cmd: HostCommand,
    ) -> Result<()> {
        let api = self.client(&format!("{} info of hosts", cmd.label()))?;
        self.cache
            .refresh_clusters_and_hosts(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get cluster and host entity list"))?;

        let skip = self.settings.skip_not_responding;
        let ceiling = self.settings.max_response_time;

        for i in 0..self.cache.datacenters().len() {
            let Some(slots) = self.cache.host_slots_mut(i) else {
                continue;
            };
            for (host, state) in slots.hosts.iter().zip(slots.states.iter_mut()) {
                if !self.host_filter.matches(&host.name) {
                    continue;
                }
                if !state.is_connected_and_responding(skip) {
                    debug!(host = %host.name, command = cmd.label(), "skipping host");
                    continue;
                }

                let started = Instant::now();
                let res = ctx
                    .with_timeout(ceiling)
                    .run(api.esxcli(&host.reference, cmd.command()))
                    .await;
                let elapsed = started.elapsed();
                state.record_response_time(elapsed);
                trace!(host = %host.name, command = cmd.label(), ?elapsed, "host command");

                let response = match res {
                    Ok(response) => {
                        state.set_not_responding(false);
                        response
                    }
                    Err(Error::DeadlineExceeded) => {
                        state.set_not_responding(true);
                        return Err(Error::DeadlineExceeded
                            .context(format!("slow response from {}", host.name)));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        state.set_not_responding(true);
                        acc.add_error(e.context(format!(
                            "could not get {} info for host {}",
                            cmd.label(),
                            host.name
                        )));
                        continue;
                    }
                };

                let tags = HostTags {
                    vcenter: api.endpoint(),
                    dcname: &slots.datacenter.name,
                    clustername: cluster_name_for(slots.clusters, host),
                    esxhostname: &host.name,
                };
                match cmd.records(&response, &tags) {
                    Ok(records) => records.into_iter().for_each(|m| acc.add_metric(m)),
                    Err(e) => route(
                        acc,
                        e.context(format!("could not parse {} info for host {}", cmd.label(), host.name)),
                    )?,
                }
            }
        }
        Ok(())
    }

    /// Emit one `vcstat_host_esxcli` per host with its responsiveness code
    /// and the command time accumulated this cycle. Works on the cached
    /// host list; does not refresh it.
    pub async fn report_host_esxcli_response(
        &mut self,
        _ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let api = self.client("esxcli response report")?;
        let skip = self.settings.skip_not_responding;

        for i in 0..self.cache.datacenters().len() {
            let Some(slots) = self.cache.host_slots_mut(i) else {
                continue;
            };
            for (host, state) in slots.hosts.iter().zip(slots.states.iter_mut()) {
                if !self.host_filter.matches(&host.name) {
                    continue;
                }
                let code = state.responding_code(skip);
                let nanos = u64::try_from(state.response_time().as_nanos()).unwrap_or(u64::MAX);
                acc.add_metric(
                    Metric::new("vcstat_host_esxcli")
                        .tag("clustername", cluster_name_for(slots.clusters, host))
                        .tag("dcname", slots.datacenter.name.as_str())
                        .tag("esxhostname", host.name.as_str())
                        .tag("moid", host.reference.value.as_str())
                        .tag("vcenter", api.endpoint())
                        .field("responding_code", code.code())
                        .field("response_time_ns", nanos),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::api::memory::{Failure, InMemoryConnector, InMemoryVcenter, Op};
    use crate::api::{EsxcliResponse, HostSummary};
    use crate::collector::CollectorSettings;
    use crate::metric::FieldValue;

    fn adapters() -> EsxcliResponse {
        EsxcliResponse::from_rows([
            [("HBAName", "vmhba0"), ("Driver", "nvme"), ("LinkState", "link-up")],
            [("HBAName", "vmhba1"), ("Driver", "lsi"), ("LinkState", "offline")],
        ])
    }

    async fn collector(vc: &Arc<InMemoryVcenter>) -> VcCollector {
        let settings = CollectorSettings::from_interval(Duration::from_secs(60), 20, 100);
        let mut c = VcCollector::new(Arc::new(InMemoryConnector::new(vc.clone())), settings);
        c.open(&CycleContext::unbounded(), Duration::from_secs(5)).await.unwrap();
        c
    }

    #[tokio::test(start_paused = true)]
    async fn test_hba_pass_marks_failing_host() {
        let vc = Arc::new(InMemoryVcenter::new("vc.local"));
        let dc = vc.add_datacenter("DC1");
        vc.add_cluster(dc, "Prod");
        vc.add_host(dc, Some("Prod"), "esx01");
        vc.add_host(dc, Some("Prod"), "esx02");
        vc.set_esxcli("esx01", HostCommand::Hba.command(), adapters());
        vc.fail_host(Op::Esxcli, "esx02", Failure::Query("esxcli timed out on agent".into()));

        let mut c = collector(&vc).await;
        let ctx = CycleContext::new(Duration::from_secs(60));
        let mut acc = Accumulator::new();
        c.collect_host_hba(&ctx, &mut acc).await.unwrap();

        let records: Vec<_> = acc.measurements("vcstat_host_hba").collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|m| m.get_tag("esxhostname") == Some("esx01")));
        assert!(records.iter().all(|m| m.get_tag("clustername") == Some("Prod")));
        assert_eq!(acc.errors().len(), 1);
        assert_eq!(c.not_responding_hosts(), 1);

        // The failing host sits out the cool-down.
        let mut acc = Accumulator::new();
        c.collect_host_hba(&ctx, &mut acc).await.unwrap();
        assert_eq!(acc.errors().len(), 0);
        assert_eq!(vc.calls(Op::Esxcli), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_host_aborts_pass() {
        let vc = Arc::new(InMemoryVcenter::new("vc.local"));
        let dc = vc.add_datacenter("DC1");
        vc.add_host(dc, None, "esx01");
        vc.fail_host(Op::Esxcli, "esx01", Failure::Hang);

        let mut c = collector(&vc).await;
        let ctx = CycleContext::unbounded();
        let mut acc = Accumulator::new();
        let err = c.collect_host_nic(&ctx, &mut acc).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err.root(), Error::DeadlineExceeded));
        assert_eq!(c.not_responding_hosts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_host_is_skipped_and_reported() {
        let vc = Arc::new(InMemoryVcenter::new("vc.local"));
        let dc = vc.add_datacenter("DC1");
        vc.add_host(dc, None, "esx01");
        vc.set_host_summary(
            "esx01",
            HostSummary {
                connection_state: HostConnectionState::Disconnected,
                ..HostSummary::default()
            },
        );

        let mut c = collector(&vc).await;
        let ctx = CycleContext::new(Duration::from_secs(60));
        let mut acc = Accumulator::new();
        c.collect_host_info(&ctx, &mut acc).await.unwrap();
        c.collect_host_firewall(&ctx, &mut acc).await.unwrap();
        c.report_host_esxcli_response(&ctx, &mut acc).await.unwrap();

        assert_eq!(vc.calls(Op::Esxcli), 0);
        let host = acc.measurements("vcstat_host").next().unwrap();
        assert_eq!(host.get_field("connection_state_code"), Some(&FieldValue::Int(2)));
        // The summary carried no status or capacity, so none is reported.
        assert_eq!(host.get_field("status"), None);
        assert_eq!(host.get_field("cpu_freq"), None);
        assert_eq!(host.get_field("in_maintenance_mode"), None);
        let report = acc.measurements("vcstat_host_esxcli").next().unwrap();
        assert_eq!(report.get_field("responding_code"), Some(&FieldValue::Int(1)));
        assert_eq!(report.get_field("response_time_ns"), Some(&FieldValue::Int(0)));
    }

    #[tokio::test]
    async fn test_report_requires_session() {
        let vc = Arc::new(InMemoryVcenter::new("vc.local"));
        let mut c = VcCollector::new(
            Arc::new(InMemoryConnector::new(vc)),
            CollectorSettings::default(),
        );
        let mut acc = Accumulator::new();
        let err = c
            .report_host_esxcli_response(&CycleContext::unbounded(), &mut acc)
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::NoSession));
    }
}
