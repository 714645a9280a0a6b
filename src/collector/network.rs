//! Distributed switch and portgroup records.

use super::{route, VcCollector};
use crate::api::NetworkEntity;
use crate::context::CycleContext;
use crate::error::Result;
use crate::metric::{Accumulator, Metric};

impl VcCollector {
    /// Emit one `vcstat_net_dvs` per distributed virtual switch.
    pub async fn collect_net_dvs(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        let api = self.client("network DVSs info")?;
        self.cache
            .refresh_networks(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get network entity list"))?;

        for (i, dc) in self.cache.datacenters().iter().enumerate() {
            for net in self.cache.networks(i) {
                let NetworkEntity::DistributedSwitch(dvs) = net else {
                    continue;
                };
                let summary = match ctx.run(api.dvs_summary(&dvs.reference)).await {
                    Ok(s) => s,
                    Err(e) => {
                        route(acc, e.context(format!("could not get dvs {} config", dvs.name)))?;
                        continue;
                    }
                };

                acc.add_metric(
                    Metric::new("vcstat_net_dvs")
                        .tag("dcname", dc.name.as_str())
                        .tag("dvs", dvs.name.as_str())
                        .tag("moid", dvs.reference.value.as_str())
                        .tag("vcenter", api.endpoint())
                        .field("max_ports", summary.max_ports)
                        .field("num_ports", summary.num_ports)
                        .field("num_standalone_ports", summary.num_standalone_ports)
                        .field("status", summary.overall_status.as_str())
                        .field("status_code", summary.overall_status.code()),
                );
            }
        }
        Ok(())
    }

    /// Emit one `vcstat_net_dvp` per distributed virtual portgroup.
    pub async fn collect_net_dvp(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        let api = self.client("network DVPs info")?;
        self.cache
            .refresh_networks(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get network entity list"))?;

        for (i, dc) in self.cache.datacenters().iter().enumerate() {
            for net in self.cache.networks(i) {
                let NetworkEntity::DistributedPortgroup(dvp) = net else {
                    continue;
                };
                let summary = match ctx.run(api.dvp_summary(&dvp.reference)).await {
                    Ok(s) => s,
                    Err(e) => {
                        route(acc, e.context(format!("could not get dvp {} config", dvp.name)))?;
                        continue;
                    }
                };

                acc.add_metric(
                    Metric::new("vcstat_net_dvp")
                        .tag("dcname", dc.name.as_str())
                        .tag("dvp", dvp.name.as_str())
                        .tag("moid", dvp.reference.value.as_str())
                        .tag("uplink", summary.uplink.to_string())
                        .tag("vcenter", api.endpoint())
                        .field("num_ports", summary.num_ports)
                        .field("status", summary.overall_status.as_str())
                        .field("status_code", summary.overall_status.code()),
                );
            }
        }
        Ok(())
    }
}
