//! Metric-shaping layer.
//!
//! [`VcCollector`] owns the session gateway, the entity cache and the name
//! filters of one vCenter. Each `collect_*` pass refreshes the entity
//! classes it needs, walks the cached inventory and pushes one record per
//! entity into an [`Accumulator`].
//!
//! # Failure routing
//!
//! Every per-entity call goes through the fatal/transient classifier:
//! transient failures are recorded in the accumulator and the pass moves
//! on to the next entity, fatal ones end the pass with `Err`.

mod cluster;
mod datastore;
mod esxcli;
mod host;
mod network;
mod vcenter;
mod vm;

use std::sync::Arc;
use std::time::Duration;

use crate::api::{Connector, VcenterApi};
use crate::cache::EntityCache;
use crate::context::CycleContext;
use crate::error::{Error, Result};
use crate::filter::NameFilter;
use crate::metric::Accumulator;
use crate::session::{OpenOutcome, Session};

pub use esxcli::HostCommand;

/// Default number of polling intervals a not-responding host is skipped.
pub const DEFAULT_INTERVALS_SKIP: u32 = 20;

/// Default number of objects per bulk property query.
pub const DEFAULT_QUERY_BULK_SIZE: usize = 100;

/// Core settings derived from the polling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSettings {
    /// Maximum age of a cached entity class
    pub cache_ttl: Duration,
    /// Ceiling of one host command; slower hosts are marked not responding
    pub max_response_time: Duration,
    /// Cool-down of a not-responding host before it is tried again
    pub skip_not_responding: Duration,
    /// Objects per bulk property query
    pub query_bulk_size: usize,
}

impl CollectorSettings {
    /// Derive settings from the polling interval: the cache lives 95% of an
    /// interval rounded to whole seconds, a host command may take up to one
    /// interval, and a not-responding host sits out `intervals_skip`
    /// intervals.
    pub fn from_interval(interval: Duration, intervals_skip: u32, query_bulk_size: usize) -> Self {
        let ttl_secs = (interval.as_secs_f64() * 0.95).round();
        Self {
            cache_ttl: Duration::from_secs(ttl_secs as u64),
            max_response_time: interval,
            skip_not_responding: interval * intervals_skip,
            query_bulk_size,
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from_interval(
            Duration::from_secs(60),
            DEFAULT_INTERVALS_SKIP,
            DEFAULT_QUERY_BULK_SIZE,
        )
    }
}

/// Record a transient failure, or hand back a fatal one.
fn route(acc: &mut Accumulator, err: Error) -> Result<()> {
    if err.is_fatal() {
        Err(err)
    } else {
        acc.add_error(err);
        Ok(())
    }
}

/// Collector of one vCenter.
pub struct VcCollector {
    session: Session,
    cache: EntityCache,
    settings: CollectorSettings,
    cluster_filter: NameFilter,
    host_filter: NameFilter,
    vm_filter: NameFilter,
}

impl VcCollector {
    pub fn new(connector: Arc<dyn Connector>, settings: CollectorSettings) -> Self {
        Self {
            session: Session::new(connector),
            cache: EntityCache::new(settings.cache_ttl),
            settings,
            cluster_filter: NameFilter::allow_all(),
            host_filter: NameFilter::allow_all(),
            vm_filter: NameFilter::allow_all(),
        }
    }

    pub fn with_cluster_filter(mut self, filter: NameFilter) -> Self {
        self.cluster_filter = filter;
        self
    }

    pub fn with_host_filter(mut self, filter: NameFilter) -> Self {
        self.host_filter = filter;
        self
    }

    pub fn with_vm_filter(mut self, filter: NameFilter) -> Self {
        self.vm_filter = filter;
        self
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Open or renew the session within `timeout`, bounded by `ctx`. A
    /// brand-new session starts from an empty cache, since entity references
    /// do not carry over between sessions.
    pub async fn open(&mut self, ctx: &CycleContext, timeout: Duration) -> Result<OpenOutcome> {
        let outcome = self.session.open(ctx, timeout).await?;
        if outcome == OpenOutcome::Created {
            self.cache.reset();
        }
        Ok(outcome)
    }

    pub async fn is_active(&self, ctx: &CycleContext) -> bool {
        self.session.is_active(ctx).await
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    pub fn sessions_created(&self) -> u64 {
        self.session.sessions_created()
    }

    fn client(&self, what: &str) -> Result<Arc<dyn VcenterApi>> {
        self.session
            .client()
            .map_err(|e| e.context(format!("could not get {what}")))
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Hosts currently flagged as not responding to commands.
    pub fn not_responding_hosts(&self) -> usize {
        self.cache.not_responding_count()
    }

    pub fn reset_response_times(&mut self) {
        self.cache.reset_response_times();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_interval() {
        let s = CollectorSettings::from_interval(Duration::from_secs(60), 20, 100);
        assert_eq!(s.cache_ttl, Duration::from_secs(57));
        assert_eq!(s.max_response_time, Duration::from_secs(60));
        assert_eq!(s.skip_not_responding, Duration::from_secs(1200));
        assert_eq!(s.query_bulk_size, 100);

        let short = CollectorSettings::from_interval(Duration::from_secs(10), 3, 50);
        assert_eq!(short.cache_ttl, Duration::from_secs(10));
        assert_eq!(short.skip_not_responding, Duration::from_secs(30));
    }

    #[test]
    fn test_route_splits_by_class() {
        let mut acc = Accumulator::new();
        assert!(route(&mut acc, Error::Query("vm-1".into())).is_ok());
        assert!(route(&mut acc, Error::DeadlineExceeded).is_err());
        assert_eq!(acc.errors().len(), 1);
    }
}
