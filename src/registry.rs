use crate::error::BindingError;
use crate::surface::{ConnectionMode, HostHandlers, ScenePublishable};
use anyhow::{Context, Result};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BUILTIN_REGISTRY: &str = include_str!("../config/bridge_registry.json");
const BUILTIN_ORIGIN: &str = "<builtin>";

pub type MethodList = SmallVec<[String; 2]>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignalBinding {
    pub signal: String,
    pub handler: String,
    #[serde(default)]
    pub mode: ConnectionMode,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    categories: BTreeMap<String, MethodList>,
    #[serde(default)]
    signals: Vec<SignalBinding>,
}

/// Declarative category-to-method and signal-to-handler bindings. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct BridgeRegistry {
    categories: BTreeMap<String, MethodList>,
    signals: Vec<SignalBinding>,
    origin: String,
}

impl BridgeRegistry {
    /// The registry shipped with the crate.
    pub fn builtin() -> Self {
        match Self::from_json_str(BUILTIN_REGISTRY, BUILTIN_ORIGIN) {
            Ok(registry) => registry,
            Err(err) => {
                error!("[registry] built-in registry is invalid: {err:?}");
                Self { origin: BUILTIN_ORIGIN.to_string(), ..Self::default() }
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bridge registry {}", path.display()))?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    pub fn from_json_str(text: &str, origin: &str) -> Result<Self> {
        let document: RegistryDocument =
            serde_json::from_str(text).with_context(|| format!("Failed to parse bridge registry {origin}"))?;
        let registry =
            Self { categories: document.categories, signals: document.signals, origin: origin.to_string() };
        for warning in registry.lint() {
            warn!("[registry] {origin}: {warning}");
        }
        Ok(registry)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Candidate remote methods for `category`, in the order they should be tried.
    pub fn methods_for(&self, category: &str) -> &[String] {
        self.categories.get(category).map(|methods| methods.as_slice()).unwrap_or(&[])
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn signals(&self) -> &[SignalBinding] {
        &self.signals
    }

    pub fn describe_routes(&self) -> RouteTable {
        RouteTable {
            origin: self.origin.clone(),
            categories: self
                .categories
                .iter()
                .map(|(category, methods)| CategoryRoute {
                    category: category.clone(),
                    methods: methods.iter().cloned().collect(),
                })
                .collect(),
            signals: self.signals.clone(),
        }
    }

    /// Wires every declared signal to its host handler. Bindings whose handler or signal is missing
    /// are skipped and reported; the rest still go through.
    pub fn register(&self, host: &HostHandlers, surface: &mut dyn ScenePublishable) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        for binding in &self.signals {
            let Some(handler) = host.get(&binding.handler) else {
                report.skip(BindingError::MissingHandler {
                    signal: binding.signal.clone(),
                    handler: binding.handler.clone(),
                });
                continue;
            };
            if surface.subscribe(&binding.signal, binding.mode, handler) {
                report.bound.push(binding.clone());
            } else {
                report.skip(BindingError::MissingSignal {
                    signal: binding.signal.clone(),
                    handler: binding.handler.clone(),
                });
            }
        }
        report
    }

    fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (category, methods) in &self.categories {
            if methods.is_empty() {
                warnings.push(format!("category '{category}' has no candidate methods"));
            }
        }
        let mut seen = BTreeSet::new();
        for binding in &self.signals {
            if !seen.insert((binding.signal.as_str(), binding.handler.as_str())) {
                warnings.push(format!("signal '{}' bound to '{}' more than once", binding.signal, binding.handler));
            }
        }
        warnings
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRoute {
    pub category: String,
    pub methods: Vec<String>,
}

/// Introspection view of a registry, for diagnostics and CLI tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTable {
    pub origin: String,
    pub categories: Vec<CategoryRoute>,
    pub signals: Vec<SignalBinding>,
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "registry: {}", self.origin)?;
        writeln!(f, "categories:")?;
        for route in &self.categories {
            writeln!(f, "  {:<12} -> {}", route.category, route.methods.join(" | "))?;
        }
        writeln!(f, "signals:")?;
        for binding in &self.signals {
            writeln!(f, "  {:<16} -> {} [{}]", binding.signal, binding.handler, binding.mode.label())?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub bound: Vec<SignalBinding>,
    pub skipped: Vec<BindingError>,
}

impl RegistrationReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, reason: BindingError) {
        warn!("[registry] skipping binding: {reason}");
        self.skipped.push(reason);
    }
}

#[derive(Debug, Clone)]
pub enum RegistrySource {
    Builtin,
    File(PathBuf),
    /// Supplied by the host; survives `reset`.
    Injected(Arc<BridgeRegistry>),
}

/// Owns the registry for one bridge instance: loaded once, shared read-only, reloadable.
#[derive(Debug)]
pub struct RegistryService {
    source: RegistrySource,
    cached: Option<Arc<BridgeRegistry>>,
}

impl RegistryService {
    pub fn new(source: RegistrySource) -> Self {
        Self { source, cached: None }
    }

    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::new(RegistrySource::File(path.to_path_buf())),
            None => Self::new(RegistrySource::Builtin),
        }
    }

    /// Pre-loaded registry; `reload` and `reset` keep the same value.
    pub fn with_registry(registry: BridgeRegistry) -> Self {
        let registry = Arc::new(registry);
        Self { source: RegistrySource::Injected(registry.clone()), cached: Some(registry) }
    }

    pub fn source(&self) -> &RegistrySource {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.cached.is_some()
    }

    /// Cached registry without triggering a load.
    pub fn current(&self) -> Option<Arc<BridgeRegistry>> {
        self.cached.clone()
    }

    /// Loads the registry if it is not cached yet.
    pub fn init(&mut self) -> Result<Arc<BridgeRegistry>> {
        if let Some(registry) = &self.cached {
            return Ok(registry.clone());
        }
        let registry = self.read_source()?;
        self.cached = Some(registry.clone());
        Ok(registry)
    }

    /// Cached registry, falling back to the built-in one when the source cannot be read.
    pub fn get(&mut self) -> Arc<BridgeRegistry> {
        match self.init() {
            Ok(registry) => registry,
            Err(err) => {
                error!("[registry] {err:?}. Falling back to the built-in registry.");
                let registry = Arc::new(BridgeRegistry::builtin());
                self.cached = Some(registry.clone());
                registry
            }
        }
    }

    /// Re-reads the source. On failure the previous registry stays in place.
    pub fn reload(&mut self) -> Result<Arc<BridgeRegistry>> {
        if matches!(self.source, RegistrySource::Builtin) {
            if let Some(registry) = &self.cached {
                return Ok(registry.clone());
            }
        }
        let registry = self.read_source()?;
        self.cached = Some(registry.clone());
        Ok(registry)
    }

    /// Drops the cache so the next `get`/`init` reads the source again.
    pub fn reset(&mut self) {
        self.cached = None;
    }

    fn read_source(&self) -> Result<Arc<BridgeRegistry>> {
        match &self.source {
            RegistrySource::Builtin => Ok(Arc::new(BridgeRegistry::builtin())),
            RegistrySource::File(path) => BridgeRegistry::load(path).map(Arc::new),
            RegistrySource::Injected(registry) => Ok(registry.clone()),
        }
    }
}
