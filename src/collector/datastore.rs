//! Datastore records, retrieved in bulk.

use super::{route, VcCollector};
use crate::api::ManagedObjectRef;
use crate::bulk::chunk_references;
use crate::context::CycleContext;
use crate::error::Result;
use crate::metric::{Accumulator, Metric};

impl VcCollector {
    /// Emit one `vcstat_datastore` per datastore. Summaries are fetched in
    /// chunks of `query_bulk_size`; a failed chunk is recorded and the next
    /// one is tried.
    pub async fn collect_datastores_info(
        &mut self,
        ctx: &CycleContext,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let api = self.client("datastores info")?;
        self.cache
            .refresh_datastores(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get datastore entity list"))?;

        for (i, dc) in self.cache.datacenters().iter().enumerate() {
            let refs: Vec<ManagedObjectRef> = self
                .cache
                .datastores(i)
                .iter()
                .map(|ds| ds.reference.clone())
                .collect();

            for chunk in chunk_references(&refs, self.settings.query_bulk_size)? {
                let summaries = match ctx.run(api.datastore_summaries(chunk)).await {
                    Ok(s) => s,
                    Err(e) => {
                        route(acc, e.context("could not retrieve summary for datastores"))?;
                        continue;
                    }
                };

                for ds in summaries {
                    acc.add_metric(
                        Metric::new("vcstat_datastore")
                            .tag("dcname", dc.name.as_str())
                            .tag("dsname", ds.name)
                            .tag("moid", ds.reference.value)
                            .tag("type", ds.ds_type)
                            .tag("vcenter", api.endpoint())
                            .field("accessible", ds.accessible)
                            .field("capacity", ds.capacity)
                            .field("freespace", ds.free_space)
                            .field_opt("maintenance_mode", ds.maintenance_mode)
                            .field_opt("uncommitted", ds.uncommitted),
                    );
                }
            }
        }
        Ok(())
    }
}
