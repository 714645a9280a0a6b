//! Include/exclude name filters for clusters, hosts and VMs.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// Glob-based include/exclude filter on entity names.
///
/// An empty include list admits every name; the exclude list is applied
/// after the include list.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl NameFilter {
    /// Build a filter from glob patterns.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// A filter admitting every name.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn matches(&self, name: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(name) {
                return false;
            }
        }
        !self.exclude.as_ref().is_some_and(|ex| ex.is_match(name))
    }
}

fn build_set<S: AsRef<str>>(patterns: &[S]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid glob pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_admits_everything() {
        let filter = NameFilter::allow_all();
        assert!(filter.matches("esx01.corp.local"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_include_then_exclude() {
        let filter = NameFilter::new(&["esx*"], &["esx0[3-4]*"]).unwrap();
        assert!(filter.matches("esx01.corp.local"));
        assert!(!filter.matches("esx03.corp.local"));
        assert!(!filter.matches("vcsa.corp.local"));
    }

    #[test]
    fn test_exclude_only() {
        let empty: [&str; 0] = [];
        let filter = NameFilter::new(&empty, &["*-test"]).unwrap();
        assert!(filter.matches("prod"));
        assert!(!filter.matches("cluster-test"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = NameFilter::new(&["esx[01"], &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
