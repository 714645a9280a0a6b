//! # vcstat - vCenter status collector
//!
//! vcstat polls a VMware vCenter endpoint on a fixed interval and emits
//! status records for its inventory: the vCenter itself, datacenters,
//! clusters, ESXi hosts (summaries plus esxcli-style HBA, NIC, firewall and
//! graphics tables), distributed switches and portgroups, datastores and
//! virtual machines.
//!
//! ## Core Concepts
//!
//! - **Session gateway**: one authenticated client per endpoint, renewed
//!   when it stops answering
//! - **Entity cache**: inventory lists per datacenter, refreshed per class
//!   once they are older than a TTL
//! - **Host liveness**: hosts that fail a command sit out a cool-down
//! - **Error classification**: fatal errors end the cycle, transient ones
//!   are recorded and collection moves on
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   CLI (clap) + poll loop (tokio)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Gatherer (cycle orchestration)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                VcCollector (collect_* passes → Metric)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                         │
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │     Session     │   │    Entity cache     │   │   Host liveness     │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │
//!          └────────────┬────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            VcenterApi (REST backend / in-memory backend)             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vcstat::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let connector = Arc::new(config.rest_connector()?);
//!     let mut gatherer = config.gatherer(connector)?;
//!
//!     let report = gatherer.gather().await?;
//!     for metric in &report.metrics {
//!         println!("{}", metric.to_line_protocol());
//!     }
//!     gatherer.close().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::api::memory::{InMemoryConnector, InMemoryVcenter};
    pub use crate::api::rest::RestConnector;
    pub use crate::api::{Connector, VcenterApi};
    pub use crate::collector::{CollectorSettings, HostCommand, VcCollector};
    pub use crate::config::Config;
    pub use crate::context::CycleContext;
    pub use crate::error::{Error, Result};
    pub use crate::gather::{GatherReport, Gatherer, Instances};
    pub use crate::metric::{Accumulator, FieldValue, Metric};
}

// ============================================================================
// Core
// ============================================================================

/// Error types and the fatal/transient classifier.
pub mod error;

/// Deadline and cancellation carried through a gather cycle.
pub mod context;

/// Management API abstraction and its backends.
pub mod api;

/// Session gateway.
pub mod session;

/// Host liveness tracking.
pub mod liveness;

/// Entity cache with per-class TTL refresh.
pub mod cache;

/// Bulk query planning.
pub mod bulk;

/// Include/exclude glob filters.
pub mod filter;

// ============================================================================
// Collection
// ============================================================================

/// Metric records, line protocol and the accumulator.
pub mod metric;

/// Per-class collection passes.
pub mod collector;

/// Gather-cycle orchestration and self-monitoring.
pub mod gather;

/// Configuration loading and validation.
pub mod config;

pub use error::{Error, Result};

/// Returns the current version of vcstat.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
