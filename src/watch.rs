use anyhow::{Context, Result};
use log::warn;
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

pub const REGISTRY_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Watches a registry file for edits so the host can call `SceneBridge::reload_registry`.
///
/// The parent directory is watched rather than the file itself; editors that save by rename
/// would otherwise detach the watch.
pub struct RegistryWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    target: PathBuf,
}

impl RegistryWatcher {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("registry '{}' does not exist", path.display());
        }
        let target = normalize_watch_path(path);
        let dir = target.parent().map(Path::to_path_buf).unwrap_or_else(|| target.clone());
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(NotifyConfig::default().with_compare_contents(false).with_poll_interval(REGISTRY_POLL_INTERVAL))
            .context("configure registry watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", dir.display()))?;
        Ok(Self { _watcher: watcher, rx, target })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Drains pending events; `true` if any touched the registry file.
    pub fn changed(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if is_relevant(&event.kind) && event.paths.iter().any(|path| self.is_target(path)) {
                        changed = true;
                    }
                }
                Err(err) => warn!("[registry] watcher error: {err}"),
            }
        }
        changed
    }

    fn is_target(&self, path: &Path) -> bool {
        normalize_watch_path(path) == self.target
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
    )
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return canonical;
    }
    match (absolute.parent().and_then(|parent| fs::canonicalize(parent).ok()), absolute.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        (Some(parent), None) => parent,
        _ => absolute,
    }
}
