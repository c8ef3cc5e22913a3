use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::dedup::{
    DedupGuard, DedupPolicy, ToleranceComparator, DEFAULT_ABS_TOL, DEFAULT_CAMERA_COMMANDS, DEFAULT_REL_TOL,
};
use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "DedupConfig::default_rel_tol")]
    pub rel_tol: f64,
    #[serde(default = "DedupConfig::default_abs_tol")]
    pub abs_tol: f64,
    #[serde(default = "DedupConfig::default_tolerant_categories")]
    pub tolerant_categories: Vec<String>,
    #[serde(default = "DedupConfig::default_command_keys")]
    pub command_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "AuditConfig::default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    #[serde(default = "BridgeConfig::default_alias_keys")]
    pub alias_keys: bool,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeConfigOverrides {
    pub registry_path: Option<PathBuf>,
    pub retry_delay_ms: Option<u64>,
    pub audit_jsonl: Option<PathBuf>,
}

impl DedupConfig {
    fn default_rel_tol() -> f64 {
        DEFAULT_REL_TOL
    }

    fn default_abs_tol() -> f64 {
        DEFAULT_ABS_TOL
    }

    fn default_tolerant_categories() -> Vec<String> {
        vec!["camera".to_string()]
    }

    fn default_command_keys() -> Vec<String> {
        DEFAULT_CAMERA_COMMANDS.iter().map(|key| key.to_string()).collect()
    }

    pub fn comparator(&self) -> ToleranceComparator {
        ToleranceComparator::new(self.rel_tol, self.abs_tol, self.command_keys.iter().cloned())
    }

    pub fn build_guard(&self) -> DedupGuard {
        let mut guard = DedupGuard::new();
        for category in &self.tolerant_categories {
            guard.set_policy(category.clone(), DedupPolicy::Tolerance(self.comparator()));
        }
        guard
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            rel_tol: Self::default_rel_tol(),
            abs_tol: Self::default_abs_tol(),
            tolerant_categories: Self::default_tolerant_categories(),
            command_keys: Self::default_command_keys(),
        }
    }
}

impl AuditConfig {
    const fn default_capacity() -> usize {
        DEFAULT_AUDIT_CAPACITY
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: Self::default_capacity(), jsonl_path: None }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: Self::default_retry_delay_ms(),
            registry_path: None,
            alias_keys: Self::default_alias_keys(),
            dedup: DedupConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl BridgeConfig {
    const fn default_retry_delay_ms() -> u64 {
        100
    }

    const fn default_alias_keys() -> bool {
        true
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read bridge config {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse bridge config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &BridgeConfigOverrides) {
        if let Some(path) = &overrides.registry_path {
            self.registry_path = Some(path.clone());
        }
        if let Some(delay) = overrides.retry_delay_ms {
            self.retry_delay_ms = delay;
        }
        if let Some(path) = &overrides.audit_jsonl {
            self.audit.jsonl_path = Some(path.clone());
        }
    }
}

impl BridgeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.registry_path.is_none() && self.retry_delay_ms.is_none() && self.audit_jsonl.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.registry_path.is_some() {
            fields.push("registry_path");
        }
        if self.retry_delay_ms.is_some() {
            fields.push("retry_delay_ms");
        }
        if self.audit_jsonl.is_some() {
            fields.push("audit_jsonl");
        }
        fields
    }
}
