use std::{borrow::Cow, path::PathBuf};

use super::{
    builtin_registry, ConfigError, ConfigSource, DirectorySource, ExperimentConfig, LayeredSource,
    RawExperimentConfig,
};

/// Suffix marking an identifier as a path to an experiment file.
pub const CONFIG_SUFFIX: &str = ".toml";
/// Namespace tried when an identifier is not found as given.
pub const CONFIG_NAMESPACE: &str = "config";

/// Turns `config/fat_tree.toml` into `config.fat_tree`. Anything without the
/// experiment file suffix is returned untouched.
pub fn normalize_identifier(identifier: &str) -> Cow<'_, str> {
    let Some(stem) = identifier.strip_suffix(CONFIG_SUFFIX) else {
        return Cow::Borrowed(identifier);
    };
    let stem = stem.trim_start_matches("./");
    Cow::Owned(stem.replace(['/', '\\'], "."))
}

/// Resolves identifiers into fully defaulted experiment configs.
#[derive(Debug)]
pub struct ConfigResolver<S = LayeredSource> {
    source: S,
}

impl ConfigResolver<LayeredSource> {
    /// Experiment files under `config_dir` layered over the built-in experiments.
    pub fn with_defaults(config_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            LayeredSource::new()
                .with(DirectorySource::new(config_dir))
                .with(builtin_registry()),
        )
    }
}

impl<S: ConfigSource> ConfigResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn resolve(&self, identifier: &str) -> Result<ExperimentConfig, ConfigError> {
        let normalized = normalize_identifier(identifier);
        let (module_path, raw) = self.lookup(&normalized)?;
        tracing::debug!(%identifier, %module_path, "Resolved experiment config");
        apply_defaults(raw, &module_path)
    }

    fn lookup(&self, module_path: &str) -> Result<(String, RawExperimentConfig), ConfigError> {
        if let Some(raw) = self.source.load(module_path)? {
            return Ok((module_path.to_owned(), raw));
        }
        let namespaced = format!("{CONFIG_NAMESPACE}.{module_path}");
        if let Some(raw) = self.source.load(&namespaced)? {
            return Ok((namespaced, raw));
        }
        Err(ConfigError::NotFound {
            identifier: module_path.to_owned(),
            tried: vec![module_path.to_owned(), namespaced],
        })
    }
}

fn apply_defaults(
    raw: RawExperimentConfig,
    identifier: &str,
) -> Result<ExperimentConfig, ConfigError> {
    let controllers = raw
        .controllers
        .filter(|controllers| !controllers.is_empty())
        .ok_or_else(|| ConfigError::MissingRequiredField {
            identifier: identifier.to_owned(),
            field: "controllers",
        })?;
    Ok(ExperimentConfig {
        controllers,
        topology_class: raw.topology_class.unwrap_or_default(),
        topology_params: raw.topology_params.unwrap_or_default(),
        patch_panel_class: raw.patch_panel_class.unwrap_or_default(),
        control_flow: raw.control_flow.unwrap_or_default(),
        dataplane_trace: raw
            .dataplane_trace
            .filter(|path| !path.as_os_str().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        config::{ControllerConfig, Registry},
        control_flow::{ControlFlowSpec, FuzzerConfig},
        patch_panel::PatchPanelClass,
        topology::{TopologyClass, TopologyParams},
    };

    fn controllers() -> Vec<ControllerConfig> {
        vec![ControllerConfig::new("sleep 30")]
    }

    fn registry_with(module_path: &str, raw: RawExperimentConfig) -> ConfigResolver<Registry> {
        ConfigResolver::new(Registry::new().with(module_path, move || raw.clone()))
    }

    #[test]
    fn normalizes_file_paths() {
        assert_eq!(normalize_identifier("config.fat_tree"), "config.fat_tree");
        assert_eq!(normalize_identifier("config/fat_tree.toml"), "config.fat_tree");
        assert_eq!(normalize_identifier("./config/fat_tree.toml"), "config.fat_tree");
        assert_eq!(normalize_identifier("config\\nested\\mesh.toml"), "config.nested.mesh");
        assert_eq!(normalize_identifier("myconf.toml"), "myconf");
    }

    #[test]
    fn primary_lookup_resolves_directly() {
        let resolver = ConfigResolver::new(builtin_registry());
        let config = resolver.resolve("config.fat_tree").unwrap();
        assert_eq!(config.topology_class, TopologyClass::FatTree);
    }

    #[test]
    fn falls_back_to_config_namespace() -> testresult::TestResult {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("config"))?;
        std::fs::write(
            dir.path().join("config/myconf.toml"),
            "[[controllers]]\ncmdline = \"sleep 30\"\n",
        )?;
        let resolver = ConfigResolver::new(DirectorySource::new(dir.path()));
        let via_fallback = resolver.resolve("myconf.toml")?;
        assert_eq!(via_fallback.controllers, controllers());
        assert_eq!(via_fallback, resolver.resolve("config.myconf")?);
        Ok(())
    }

    #[test]
    fn module_path_and_file_path_resolve_equally() -> testresult::TestResult {
        let resolver = ConfigResolver::new(builtin_registry());
        for name in ["fat_tree", "mesh"] {
            let by_module = resolver.resolve(&format!("config.{name}"))?;
            let by_path = resolver.resolve(&format!("config/{name}.toml"))?;
            assert_eq!(by_module, by_path);
        }
        Ok(())
    }

    #[test]
    fn unknown_identifier_reports_both_attempts() {
        let resolver = ConfigResolver::new(Registry::new());
        match resolver.resolve("nope.toml") {
            Err(ConfigError::NotFound { identifier, tried }) => {
                assert_eq!(identifier, "nope");
                assert_eq!(tried, vec!["nope".to_string(), "config.nope".to_string()]);
            }
            other => panic!("unexpected resolution result: {other:?}"),
        }
    }

    #[test]
    fn controllers_are_required() {
        let resolver = registry_with(
            "config.empty",
            RawExperimentConfig::default().with_topology(TopologyClass::Mesh, TopologyParams::new()),
        );
        assert!(matches!(
            resolver.resolve("config.empty"),
            Err(ConfigError::MissingRequiredField { field: "controllers", .. })
        ));

        let resolver = registry_with(
            "config.none",
            RawExperimentConfig::default().with_controllers(vec![]),
        );
        assert!(matches!(
            resolver.resolve("none"),
            Err(ConfigError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn absent_fields_get_defaults() {
        let resolver = registry_with(
            "config.minimal",
            RawExperimentConfig::default().with_controllers(controllers()),
        );
        let config = resolver.resolve("minimal").unwrap();
        assert_eq!(config.patch_panel_class, PatchPanelClass::Buffered);
        assert_eq!(config.topology_class, TopologyClass::FatTree);
        assert!(config.topology_params.is_empty());
        assert_eq!(config.control_flow, ControlFlowSpec::Fuzzer(FuzzerConfig::default()));
        assert_eq!(config.dataplane_trace, None);
    }

    #[test]
    fn present_fields_are_kept() {
        let raw = RawExperimentConfig::default()
            .with_controllers(controllers())
            .with_topology(TopologyClass::Mesh, TopologyParams::new().with("num_switches", 5))
            .with_patch_panel(PatchPanelClass::Immediate)
            .with_dataplane_trace("traces/ping.jsonl");
        let config = registry_with("config.full", raw).resolve("config.full").unwrap();
        assert_eq!(config.topology_class, TopologyClass::Mesh);
        assert_eq!(config.topology_params.len(), 1);
        assert_eq!(config.patch_panel_class, PatchPanelClass::Immediate);
        assert_eq!(
            config.dataplane_trace.as_deref(),
            Some(Path::new("traces/ping.jsonl"))
        );
    }

    #[test]
    fn empty_trace_path_means_no_trace() {
        let raw = RawExperimentConfig::default()
            .with_controllers(controllers())
            .with_dataplane_trace("");
        let config = registry_with("config.t", raw).resolve("t").unwrap();
        assert_eq!(config.dataplane_trace, None);
    }

    #[test]
    fn resolution_is_repeatable() {
        let resolver = ConfigResolver::new(builtin_registry());
        assert_eq!(
            resolver.resolve("fat_tree").unwrap(),
            resolver.resolve("fat_tree").unwrap()
        );
    }
}
