//! Cluster records.

use super::{route, VcCollector};
use crate::api::EntityStatus;
use crate::context::CycleContext;
use crate::error::Result;
use crate::metric::{Accumulator, Metric};

impl VcCollector {
    /// Emit one `vcstat_cluster` per cluster admitted by the cluster filter.
    pub async fn collect_cluster_info(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let api = self.client("clusters info")?;
        self.cache
            .refresh_clusters_and_hosts(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get cluster and host entity list"))?;

        for (i, dc) in self.cache.datacenters().iter().enumerate() {
            for cluster in self.cache.clusters(i) {
                if !self.cluster_filter.matches(&cluster.name) {
                    continue;
                }
                let summary = match ctx.run(api.cluster_summary(&cluster.reference)).await {
                    Ok(s) => s,
                    Err(e) => {
                        route(
                            acc,
                            e.context(format!(
                                "could not get cluster {} summary property",
                                cluster.name
                            )),
                        )?;
                        continue;
                    }
                };

                acc.add_metric(
                    Metric::new("vcstat_cluster")
                        .tag("clustername", cluster.name.as_str())
                        .tag("dcname", dc.name.as_str())
                        .tag("moid", cluster.reference.value.as_str())
                        .tag("vcenter", api.endpoint())
                        .field_opt("effective_cpu", summary.effective_cpu)
                        .field_opt("effective_memory", summary.effective_memory)
                        .field_opt("num_cpu_cores", summary.num_cpu_cores)
                        .field_opt("num_cpu_threads", summary.num_cpu_threads)
                        .field("num_effective_hosts", summary.num_effective_hosts)
                        .field("num_hosts", summary.num_hosts)
                        .field("num_vms", summary.num_vms)
                        .field_opt("status", summary.overall_status.map(EntityStatus::as_str))
                        .field_opt("status_code", summary.overall_status.map(EntityStatus::code))
                        .field_opt("total_cpu", summary.total_cpu)
                        .field_opt("total_memory", summary.total_memory),
                );
            }
        }
        Ok(())
    }
}
