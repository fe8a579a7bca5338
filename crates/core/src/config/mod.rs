//! Experiment configuration.
//!
//! An experiment is described by a [`RawExperimentConfig`], where every field is
//! optional, as produced by a [`ConfigSource`]. The [`ConfigResolver`] turns a
//! user supplied identifier into a fully defaulted [`ExperimentConfig`] which is
//! never re-checked afterwards.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use serde::{Deserialize, Serialize};

use crate::{
    control_flow::ControlFlowSpec,
    patch_panel::PatchPanelClass,
    topology::{TopologyClass, TopologyParams},
};

mod builtin;
mod resolver;
mod source;

pub use builtin::builtin_registry;
pub use resolver::{normalize_identifier, ConfigResolver, CONFIG_NAMESPACE, CONFIG_SUFFIX};
pub use source::{ConfigSource, DirectorySource, LayeredSource, Registry};

/// Experiment loaded when none is specified on the command line.
pub const DEFAULT_CONFIG: &str = "config.fat_tree";
/// Address a controller listens on unless configured otherwise.
pub const DEFAULT_CONTROLLER_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
/// OpenFlow port a controller listens on unless configured otherwise.
pub const DEFAULT_CONTROLLER_PORT: u16 = 6633;

const ADDRESS_PLACEHOLDER: &str = "__address__";
const PORT_PLACEHOLDER: &str = "__port__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("experiment config `{identifier}` not found (tried: {})", .tried.join(", "))]
    NotFound {
        identifier: String,
        tried: Vec<String>,
    },
    #[error("experiment config `{identifier}` must specify `{field}`")]
    MissingRequiredField {
        identifier: String,
        field: &'static str,
    },
    #[error("failed reading experiment config at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing experiment config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// How to boot a single SDN controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Command line used to launch the controller. `__address__` and `__port__`
    /// are replaced with the configured address and port.
    pub cmdline: String,
    #[serde(default = "default_controller_address")]
    pub address: IpAddr,
    #[serde(default = "default_controller_port")]
    pub port: u16,
    /// Working directory for the controller process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Sync channel URI the controller exposes its state through, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn default_controller_address() -> IpAddr {
    DEFAULT_CONTROLLER_ADDRESS
}

fn default_controller_port() -> u16 {
    DEFAULT_CONTROLLER_PORT
}

impl ControllerConfig {
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            cmdline: cmdline.into(),
            address: DEFAULT_CONTROLLER_ADDRESS,
            port: DEFAULT_CONTROLLER_PORT,
            cwd: None,
            sync: None,
            label: None,
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_sync(mut self, sync: impl Into<String>) -> Self {
        self.sync = Some(sync.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The command line with address and port placeholders substituted.
    pub fn expanded_cmdline(&self) -> String {
        self.cmdline
            .replace(ADDRESS_PLACEHOLDER, &self.address.to_string())
            .replace(PORT_PLACEHOLDER, &self.port.to_string())
    }

    /// Label used in logs and snapshots; falls back to the controller position.
    pub fn label_or_index(&self, index: usize) -> String {
        self.label.clone().unwrap_or_else(|| format!("c{index}"))
    }
}

/// An experiment description as found in a [`ConfigSource`], before defaulting.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawExperimentConfig {
    pub controllers: Option<Vec<ControllerConfig>>,
    pub topology_class: Option<TopologyClass>,
    pub topology_params: Option<TopologyParams>,
    pub patch_panel_class: Option<PatchPanelClass>,
    pub control_flow: Option<ControlFlowSpec>,
    pub dataplane_trace: Option<PathBuf>,
}

impl RawExperimentConfig {
    pub fn with_controllers(mut self, controllers: Vec<ControllerConfig>) -> Self {
        self.controllers = Some(controllers);
        self
    }

    pub fn with_topology(mut self, class: TopologyClass, params: TopologyParams) -> Self {
        self.topology_class = Some(class);
        self.topology_params = Some(params);
        self
    }

    pub fn with_patch_panel(mut self, class: PatchPanelClass) -> Self {
        self.patch_panel_class = Some(class);
        self
    }

    pub fn with_control_flow(mut self, control_flow: ControlFlowSpec) -> Self {
        self.control_flow = Some(control_flow);
        self
    }

    pub fn with_dataplane_trace(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataplane_trace = Some(path.into());
        self
    }

    /// Anchors relative trace and controller working directory paths at
    /// `root`. Absolute and empty paths are left alone.
    pub fn rebased_onto(mut self, root: &Path) -> Self {
        let rebase = |path: &mut PathBuf| {
            if !path.as_os_str().is_empty() && path.is_relative() {
                *path = root.join(&*path);
            }
        };
        if let Some(trace) = &mut self.dataplane_trace {
            rebase(trace);
        }
        for controller in self.controllers.iter_mut().flatten() {
            if let Some(cwd) = &mut controller.cwd {
                rebase(cwd);
            }
        }
        self
    }
}

/// A fully resolved experiment. Created once per run, immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentConfig {
    pub controllers: Vec<ControllerConfig>,
    pub topology_class: TopologyClass,
    pub topology_params: TopologyParams,
    pub patch_panel_class: PatchPanelClass,
    pub control_flow: ControlFlowSpec,
    pub dataplane_trace: Option<PathBuf>,
}

pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        crate::tracing::tracer::init_tracer(level).expect("failed tracing initialization")
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = level;
    }
}
