use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{ConfigError, RawExperimentConfig, CONFIG_SUFFIX};

/// A place experiment configs can be looked up by module path, e.g. `config.fat_tree`.
pub trait ConfigSource: Send + Sync {
    /// Returns `Ok(None)` when this source does not know `module_path`.
    ///
    /// Any other failure (unreadable or malformed entry) is an error and must
    /// not be mistaken for absence.
    fn load(&self, module_path: &str) -> Result<Option<RawExperimentConfig>, ConfigError>;
}

impl<S: ConfigSource + ?Sized> ConfigSource for Box<S> {
    fn load(&self, module_path: &str) -> Result<Option<RawExperimentConfig>, ConfigError> {
        (**self).load(module_path)
    }
}

impl<S: ConfigSource + ?Sized> ConfigSource for Arc<S> {
    fn load(&self, module_path: &str) -> Result<Option<RawExperimentConfig>, ConfigError> {
        (**self).load(module_path)
    }
}

type Constructor = Arc<dyn Fn() -> RawExperimentConfig + Send + Sync>;

/// In-memory map from module paths to config constructors.
///
/// Constructors run on every lookup so each resolution gets fresh values.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, module_path: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> RawExperimentConfig + Send + Sync + 'static,
    {
        self.entries
            .insert(module_path.into(), Arc::new(constructor));
        self
    }

    pub fn with<F>(mut self, module_path: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> RawExperimentConfig + Send + Sync + 'static,
    {
        self.register(module_path, constructor);
        self
    }

    pub fn contains(&self, module_path: &str) -> bool {
        self.entries.contains_key(module_path)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl ConfigSource for Registry {
    fn load(&self, module_path: &str) -> Result<Option<RawExperimentConfig>, ConfigError> {
        Ok(self.entries.get(module_path).map(|constructor| constructor()))
    }
}

/// Experiment files on disk: module path `a.b` maps to `<root>/a/b.toml`.
///
/// Relative `dataplane_trace` and controller `cwd` paths inside a file are
/// taken relative to `root`, not to the working directory of the process.
#[derive(Clone, Debug)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, module_path: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in module_path.split('.') {
            if segment.is_empty() {
                return None;
            }
            path.push(segment);
        }
        let mut file = path.into_os_string();
        file.push(CONFIG_SUFFIX);
        Some(file.into())
    }
}

impl ConfigSource for DirectorySource {
    fn load(&self, module_path: &str) -> Result<Option<RawExperimentConfig>, ConfigError> {
        let Some(path) = self.path_for(module_path) else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let raw: RawExperimentConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(?path, "Loaded experiment file");
        Ok(Some(raw.rebased_onto(&self.root)))
    }
}

/// Queries sources in order; the first one that knows a module path wins.
#[derive(Default)]
pub struct LayeredSource {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl fmt::Debug for LayeredSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredSource")
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl ConfigSource for LayeredSource {
    fn load(&self, module_path: &str) -> Result<Option<RawExperimentConfig>, ConfigError> {
        for source in &self.sources {
            if let Some(raw) = source.load(module_path)? {
                return Ok(Some(raw));
            }
        }
        Ok(None)
    }
}
