//! Feature detection from an environment's installed package set

use crate::types::{normalize_package_name, Extension};

const JUPYTER_PACKAGES: &[&str] = &["jupyterlab", "notebook", "jupyter", "jupyter-server"];
const IPYTHON_PACKAGES: &[&str] = &["ipython", "ipykernel"];
const CLI_PACKAGES: &[&str] = &["openbb-cli"];

/// What an environment can do, derived purely from its extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvironmentCapabilities {
    pub jupyter: bool,
    pub ipython: bool,
    pub cli: bool,
}

impl EnvironmentCapabilities {
    pub fn from_extensions(extensions: &[Extension]) -> Self {
        Self::from_package_names(extensions.iter().map(|e| e.package.as_str()))
    }

    pub fn from_package_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut caps = Self::default();
        for name in names {
            let normalized = normalize_package_name(name);
            caps.jupyter |= JUPYTER_PACKAGES.contains(&normalized.as_str());
            caps.ipython |= IPYTHON_PACKAGES.contains(&normalized.as_str());
            caps.cli |= CLI_PACKAGES.contains(&normalized.as_str());
        }
        caps
    }

    pub fn any(&self) -> bool {
        self.jupyter || self.ipython || self.cli
    }
}
