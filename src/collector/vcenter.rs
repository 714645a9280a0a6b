//! vCenter and datacenter records.

use super::{route, VcCollector};
use crate::context::CycleContext;
use crate::error::Result;
use crate::metric::{Accumulator, Metric};

impl VcCollector {
    /// Emit `vcstat_vcenter` with product information and the datacenter
    /// count.
    pub async fn collect_vcenter_info(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let api = self.client("vcenter info")?;
        self.cache
            .refresh_datacenters(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get datacenter entity list"))?;

        let about = match ctx.run(api.about()).await {
            Ok(about) => about,
            Err(e) => return route(acc, e.context("could not get vcenter product information")),
        };

        acc.add_metric(
            Metric::new("vcstat_vcenter")
                .tag("vcenter", api.endpoint())
                .field("build", about.build)
                .field("name", about.name)
                .field("num_datacenters", self.cache.datacenters().len())
                .field("ostype", about.os_type)
                .field("version", about.version),
        );
        Ok(())
    }

    /// Emit one `vcstat_datacenter` per datacenter with its entity counts.
    /// Refreshes every entity class.
    pub async fn collect_datacenter_info(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let api = self.client("datacenters info")?;
        self.cache
            .refresh_all(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get all datacenters entity lists"))?;

        let cache = &self.cache;
        for (i, dc) in cache.datacenters().iter().enumerate() {
            acc.add_metric(
                Metric::new("vcstat_datacenter")
                    .tag("dcname", dc.name.as_str())
                    .tag("moid", dc.reference.value.as_str())
                    .tag("vcenter", api.endpoint())
                    .field("num_clusters", cache.clusters(i).len())
                    .field("num_datastores", cache.datastores(i).len())
                    .field("num_hosts", cache.hosts(i).len())
                    .field("num_networks", cache.networks(i).len()),
            );
        }
        Ok(())
    }
}
