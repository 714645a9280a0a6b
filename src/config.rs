//! Configuration module for vcstat
//!
//! Configuration is read from a single TOML file, looked up in this order:
//! - Explicit path (`--config`)
//! - `VCSTAT_CONFIG` environment variable
//! - Project configuration (`./vcstat.toml`)
//! - User configuration (`~/.config/vcstat/vcstat.toml`)
//! - System configuration (`/etc/vcstat/vcstat.toml`)
//!
//! Credentials can then be overridden from the environment
//! (`VCSTAT_VCENTER`, `VCSTAT_USERNAME`, `VCSTAT_PASSWORD`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::rest::RestConnector;
use crate::api::Connector;
use crate::collector::{
    CollectorSettings, VcCollector, DEFAULT_INTERVALS_SKIP, DEFAULT_QUERY_BULK_SIZE,
};
use crate::error::Error;
use crate::filter::NameFilter;
use crate::gather::{Gatherer, Instances};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// vCenter URL, e.g. `https://vcenter.local/sdk`
    pub vcenter: String,

    pub username: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// Polling interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Session open timeout; zero or anything above the interval means
    /// one interval
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Accept any TLS certificate from the endpoint
    pub insecure_skip_verify: bool,

    /// `alias` tag of the self-monitoring record
    pub internal_alias: String,

    /// Objects per bulk property query
    pub query_bulk_size: usize,

    /// Polling intervals a not-responding host is left alone
    pub intervals_skip_notresponding_esxcli_hosts: u32,

    pub clusters_include: Vec<String>,
    pub clusters_exclude: Vec<String>,
    pub hosts_include: Vec<String>,
    pub hosts_exclude: Vec<String>,
    pub vms_include: Vec<String>,
    pub vms_exclude: Vec<String>,

    /// Collection passes to run
    #[serde(flatten)]
    pub instances: Instances,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vcenter: String::new(),
            username: String::new(),
            password: String::new(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            insecure_skip_verify: false,
            internal_alias: String::new(),
            query_bulk_size: DEFAULT_QUERY_BULK_SIZE,
            intervals_skip_notresponding_esxcli_hosts: DEFAULT_INTERVALS_SKIP,
            clusters_include: vec![],
            clusters_exclude: vec![],
            hosts_include: vec![],
            hosts_exclude: vec![],
            vms_include: vec![],
            vms_exclude: vec![],
            instances: Instances::default(),
        }
    }
}

const SAMPLE_CONFIG: &str = r#"## vCenter URL to be monitored and its credential
vcenter = "https://vcenter.local/sdk"
username = "user@corp.local"
password = "secret"
## polling interval
# interval = "60s"
## session open timeout. 0s is interpreted as the polling interval
# timeout = "10s"
## skip TLS chain and host verification
# insecure_skip_verify = false

## optional alias tag for internal metrics
# internal_alias = ""
## max number of objects to gather per query
# query_bulk_size = 100
## number of intervals to skip esxcli commands for not responding hosts
# intervals_skip_notresponding_esxcli_hosts = 20

## filter clusters, hosts and VMs by name with glob patterns,
## default is no filtering
# clusters_include = []
# clusters_exclude = []
# hosts_include = []
# hosts_exclude = []
# vms_include = []
# vms_exclude = []

## enable or disable data collection per instance type
## vcstat_cluster
# cluster_instances = true
## vcstat_datastore
# datastore_instances = false
## vcstat_host
# host_instances = true
## vcstat_host_firewall
# host_firewall_instances = false
## vcstat_host_graphics
# host_graphics_instances = false
## vcstat_host_hba
# host_hba_instances = false
## vcstat_host_nic
# host_nic_instances = false
## vcstat_net_dvs
# net_dvs_instances = false
## vcstat_net_dvp
# net_dvp_instances = false
## vcstat_vm
# vm_instances = false
"#;

impl Config {
    /// Load configuration from the first file found, then apply
    /// environment overrides. An explicit path must exist.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::get_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Config::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var("VCSTAT_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        paths.push(PathBuf::from("vcstat.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("vcstat").join("vcstat.toml"));
        }

        paths.push(PathBuf::from("/etc/vcstat/vcstat.toml"));
        paths
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(vcenter) = std::env::var("VCSTAT_VCENTER") {
            self.vcenter = vcenter;
        }
        if let Ok(user) = std::env::var("VCSTAT_USERNAME") {
            self.username = user;
        }
        if let Ok(password) = std::env::var("VCSTAT_PASSWORD") {
            self.password = password;
        }
    }

    /// Documented sample configuration.
    pub fn sample() -> &'static str {
        SAMPLE_CONFIG
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Reject configurations the collector cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        self.vcenter_url()?;
        if self.interval.is_zero() {
            return Err(Error::Config("interval must be greater than zero".into()));
        }
        if self.query_bulk_size == 0 {
            return Err(Error::InvalidChunkSize(0));
        }
        self.cluster_filter()?;
        self.host_filter()?;
        self.vm_filter()?;
        Ok(())
    }

    pub fn vcenter_url(&self) -> crate::Result<Url> {
        if self.vcenter.trim().is_empty() {
            return Err(Error::Config("vcenter URL is not set".into()));
        }
        Url::parse(&self.vcenter)
            .map_err(|e| Error::Config(format!("error parsing URL for vcenter: {e}")))
    }

    /// Host part of the vCenter URL, empty when unparsable.
    pub fn vcenter_host(&self) -> String {
        self.vcenter_url()
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    // ========================================================================
    // Derived settings
    // ========================================================================

    /// Session open timeout, capped at one interval.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() || self.timeout > self.interval {
            self.interval
        } else {
            self.timeout
        }
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings::from_interval(
            self.interval,
            self.intervals_skip_notresponding_esxcli_hosts,
            self.query_bulk_size,
        )
    }

    pub fn cluster_filter(&self) -> crate::Result<NameFilter> {
        NameFilter::new(&self.clusters_include, &self.clusters_exclude)
            .map_err(|e| e.context("error parsing clusters filters"))
    }

    pub fn host_filter(&self) -> crate::Result<NameFilter> {
        NameFilter::new(&self.hosts_include, &self.hosts_exclude)
            .map_err(|e| e.context("error parsing hosts filters"))
    }

    pub fn vm_filter(&self) -> crate::Result<NameFilter> {
        NameFilter::new(&self.vms_include, &self.vms_exclude)
            .map_err(|e| e.context("error parsing VMs filters"))
    }

    /// REST connector for the configured endpoint.
    pub fn rest_connector(&self) -> crate::Result<RestConnector> {
        Ok(
            RestConnector::new(self.vcenter_url()?, &self.username, &self.password)
                .with_insecure(self.insecure_skip_verify)
                .with_timeout(self.interval),
        )
    }

    /// Reject instance toggles whose passes `connector` cannot serve.
    pub fn check_backend(&self, connector: &dyn Connector) -> crate::Result<()> {
        let unsupported: Vec<String> = self
            .instances
            .required_features()
            .into_iter()
            .filter(|(_, feature)| !connector.supports(*feature))
            .map(|(key, feature)| format!("{key} needs {feature}"))
            .collect();
        if unsupported.is_empty() {
            return Ok(());
        }
        Err(Error::Config(format!(
            "backend cannot serve enabled instances: {}",
            unsupported.join(", ")
        )))
    }

    /// Build a gatherer over `connector` with every setting of this
    /// configuration applied.
    pub fn gatherer(&self, connector: Arc<dyn Connector>) -> crate::Result<Gatherer> {
        self.validate()?;
        self.check_backend(connector.as_ref())?;
        let collector = VcCollector::new(connector, self.collector_settings())
            .with_cluster_filter(self.cluster_filter()?)
            .with_host_filter(self.host_filter()?)
            .with_vm_filter(self.vm_filter()?);

        Ok(Gatherer::new(collector, self.interval)
            .with_instances(self.instances.clone())
            .with_open_timeout(self.effective_timeout())
            .with_vcenter(self.vcenter_host())
            .with_internal_alias(self.internal_alias.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.query_bulk_size, 100);
        assert_eq!(config.intervals_skip_notresponding_esxcli_hosts, 20);
        assert!(config.instances.cluster);
        assert!(!config.instances.vm);
        assert!(!config.instances.net_dvs);
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml_str(Config::sample()).unwrap();
        assert_eq!(config.vcenter, "https://vcenter.local/sdk");
        assert_eq!(config.password, "secret");
        assert_eq!(config.instances, Instances::default());
        config.validate().unwrap();
        assert_eq!(config.vcenter_host(), "vcenter.local");
    }

    #[test]
    fn test_durations_and_toggles() {
        let config = Config::from_toml_str(
            r#"
            vcenter = "https://vc.corp.local/sdk"
            interval = "30s"
            timeout = "0s"
            host_hba_instances = true
            vms_exclude = ["tmpl-*"]
            "#,
        )
        .unwrap();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.effective_timeout(), Duration::from_secs(30));
        assert!(config.instances.host_hba);
        assert!(!config.vm_filter().unwrap().matches("tmpl-linux"));

        let settings = config.collector_settings();
        assert_eq!(settings.cache_ttl, Duration::from_secs(29));
        assert_eq!(settings.skip_not_responding, Duration::from_secs(600));
    }

    #[test]
    fn test_validation_failures() {
        assert!(Config::default().validate().is_err());

        let mut config = Config::from_toml_str(Config::sample()).unwrap();
        config.query_bulk_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidChunkSize(0))));

        let mut config = Config::from_toml_str(Config::sample()).unwrap();
        config.hosts_include = vec!["esx[".into()];
        assert!(config.validate().is_err());

        let mut config = Config::from_toml_str(Config::sample()).unwrap();
        config.vcenter = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("VCSTAT_USERNAME", "svc-monitor@corp.local");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.username, "svc-monitor@corp.local");
        std::env::remove_var("VCSTAT_USERNAME");
    }

    #[test]
    #[serial]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vcstat.toml");
        std::fs::write(&path, "vcenter = \"https://vc.lab/sdk\"\nvm_instances = true\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.vcenter, "https://vc.lab/sdk");
        assert!(config.instances.vm);

        let missing = dir.path().join("missing.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
