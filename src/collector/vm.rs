//! Virtual machine records, retrieved in bulk.

use super::{route, VcCollector};
use crate::api::{vm_connection_state_code, vm_power_state_code, EntityStatus, ManagedObjectRef};
use crate::bulk::chunk_references;
use crate::context::CycleContext;
use crate::error::Result;
use crate::metric::{Accumulator, Metric};

const MIB: i64 = 1024 * 1024;

impl VcCollector {
    /// Emit one `vcstat_vm` per VM admitted by the VM filter, tagged with
    /// the host it runs on and that host's cluster.
    pub async fn collect_vms_info(&mut self, ctx: &CycleContext, acc: &mut Accumulator) -> Result<()> {
        let api = self.client("VMs info")?;
        self.cache
            .refresh_vms(api.as_ref(), ctx)
            .await
            .map_err(|e| e.context("could not get virtual machine entity list"))?;

        let cache = &self.cache;
        for (i, dc) in cache.datacenters().iter().enumerate() {
            let refs: Vec<ManagedObjectRef> = cache
                .vms(i)
                .iter()
                .filter(|vm| self.vm_filter.matches(&vm.name))
                .map(|vm| vm.reference.clone())
                .collect();

            for chunk in chunk_references(&refs, self.settings.query_bulk_size)? {
                let summaries = match ctx.run(api.vm_summaries(chunk)).await {
                    Ok(s) => s,
                    Err(e) => {
                        route(acc, e.context("could not retrieve summary for vms"))?;
                        continue;
                    }
                };

                for vm in summaries {
                    let host = vm.host.as_ref().and_then(|r| cache.host_by_ref(i, r));
                    let (esxhostname, clustername) = match host {
                        Some(h) => (h.name.as_str(), cache.cluster_name_for_host(i, h)),
                        None => ("", ""),
                    };

                    acc.add_metric(
                        Metric::new("vcstat_vm")
                            .tag("clustername", clustername)
                            .tag("dcname", dc.name.as_str())
                            .tag("esxhostname", esxhostname)
                            .tag("guesthostname", vm.guest_hostname.as_str())
                            .tag("moid", vm.reference.value.as_str())
                            .tag("vcenter", api.endpoint())
                            .tag("vmname", vm.name.as_str())
                            .field_opt("connection_state", vm.connection_state.as_deref())
                            .field_opt(
                                "connection_state_code",
                                vm.connection_state.as_deref().map(vm_connection_state_code),
                            )
                            .field_opt("consolidation_needed", vm.consolidation_needed)
                            .field_opt("max_cpu_usage", vm.max_cpu_usage)
                            .field_opt("max_mem_usage", vm.max_memory_usage.map(|mb| mb * MIB))
                            .field("memory_size", vm.memory_size_mb * MIB)
                            .field("num_eth_cards", vm.num_ethernet_cards)
                            .field("num_vcpus", vm.num_cpu)
                            .field("num_vdisks", vm.num_virtual_disks)
                            .field("power_state", vm.power_state.as_str())
                            .field("power_state_code", vm_power_state_code(&vm.power_state))
                            .field_opt("status", vm.overall_status.map(EntityStatus::as_str))
                            .field_opt("status_code", vm.overall_status.map(EntityStatus::code))
                            .field_opt("template", vm.template),
                    );
                }
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
    use crate::api::memory::{InMemoryConnector, InMemoryVcenter, Op};
    use crate::collector::CollectorSettings;
    use crate::filter::NameFilter;
    use crate::metric::FieldValue;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_vm_records_carry_host_and_cluster() {
        let vc = Arc::new(InMemoryVcenter::new("vc.local"));
        let dc = vc.add_datacenter("DC1");
        vc.add_cluster(dc, "Prod");
        vc.add_host(dc, Some("Prod"), "esx01");
        vc.add_vm(dc, "web01", Some("esx01"));
        vc.add_vm(dc, "orphan", None);
        vc.add_vm(dc, "tmpl-base", None);

        let filter = NameFilter::new(&["*"], &["tmpl-*"]).unwrap();
        let mut c = VcCollector::new(
            Arc::new(InMemoryConnector::new(vc.clone())),
            CollectorSettings::default(),
        )
        .with_vm_filter(filter);
        c.open(&CycleContext::unbounded(), Duration::from_secs(5)).await.unwrap();

        let mut acc = Accumulator::new();
        c.collect_vms_info(&CycleContext::unbounded(), &mut acc).await.unwrap();

        let records: Vec<_> = acc.measurements("vcstat_vm").collect();
        assert_eq!(records.len(), 2);
        let web = records
            .iter()
            .find(|m| m.get_tag("vmname") == Some("web01"))
            .unwrap();
        assert_eq!(web.get_tag("esxhostname"), Some("esx01"));
        assert_eq!(web.get_tag("clustername"), Some("Prod"));
        assert_eq!(web.get_tag("guesthostname"), Some("web01.corp.local"));
        assert_eq!(
            web.get_field("memory_size"),
            Some(&FieldValue::Int(8192 * 1024 * 1024))
        );
        assert_eq!(web.get_field("power_state_code"), Some(&FieldValue::Int(0)));
        assert_eq!(
            web.get_field("max_mem_usage"),
            Some(&FieldValue::Int(8192 * 1024 * 1024))
        );
        assert_eq!(web.get_field("status_code"), Some(&FieldValue::Int(0)));

        let orphan = records
            .iter()
            .find(|m| m.get_tag("vmname") == Some("orphan"))
            .unwrap();
        assert_eq!(orphan.get_tag("esxhostname"), Some(""));
        assert_eq!(vc.calls(Op::VmSummaries), 1);
    }
}
