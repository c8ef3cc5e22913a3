use crate::scene_runtime::SceneRuntime;
use crate::simulation::{SimulationSettings, SimulationWorker};
use anyhow::Result;
use glam::Vec3;
use log::{info, warn};
use scene_bridge::status::StatusHistory;
use scene_bridge::{
    payload, AuditLogHandle, BridgeConfig, FlushOutcome, HostHandlers, Payload, RegistrationReport, SceneBridge,
    SyncHealth, Value,
};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const FRAME_TIME: Duration = Duration::from_millis(16);
const CAMERA_HANDLER: &str = "on_scene_camera_changed";
const SETTLE_FRAMES: u32 = 32;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub frames: u32,
    pub flushes: u64,
    pub published: u32,
    pub suppressed: u32,
    pub not_ready: u32,
    pub partial: u32,
    pub unresolved: u32,
    pub simulation_steps: u32,
    pub camera_changes: u32,
    pub camera_echoes: u32,
    pub notices: usize,
    pub health: SyncHealth,
}

impl SessionSummary {
    fn count(&mut self, outcome: FlushOutcome) {
        match outcome {
            FlushOutcome::Published => self.published += 1,
            FlushOutcome::Suppressed => self.suppressed += 1,
            FlushOutcome::NotReady => self.not_ready += 1,
            FlushOutcome::PartiallyApplied => self.partial += 1,
            FlushOutcome::Unresolved => self.unresolved += 1,
            FlushOutcome::Empty => {}
        }
    }
}

/// Headless editing session: a scripted editor, a simulation worker, and an in-process scene
/// runtime talking through one bridge.
pub struct StudioSession {
    bridge: SceneBridge,
    scene: Rc<RefCell<SceneRuntime>>,
    audit: AuditLogHandle,
    notices: Rc<RefCell<StatusHistory>>,
    camera_changes: Rc<Cell<u32>>,
    camera_echoes: Rc<Cell<u32>>,
    registration: RegistrationReport,
    #[cfg(feature = "watch")]
    watcher: Option<scene_bridge::watch::RegistryWatcher>,
    clock: Instant,
}

impl StudioSession {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let notices = Rc::new(RefCell::new(StatusHistory::default()));
        #[cfg(feature = "watch")]
        let watcher = config.registry_path.as_deref().and_then(|path| {
            scene_bridge::watch::RegistryWatcher::new(path)
                .map_err(|err| warn!("[studio] registry hot reload disabled: {err:?}"))
                .ok()
        });
        let mut bridge = SceneBridge::new(config).with_status_sink(notices.clone());
        let audit = bridge.audit_history().clone();
        let scene = Rc::new(RefCell::new(SceneRuntime::new(&bridge.registry())));
        bridge.attach_surface(scene.clone());

        let camera_changes = Rc::new(Cell::new(0));
        let camera_echoes = Rc::new(Cell::new(0));
        let echo = bridge.echo_guard();
        let (changes, echoes) = (camera_changes.clone(), camera_echoes.clone());
        let handlers = HostHandlers::new().with(CAMERA_HANDLER, move |_payload: &Payload| {
            if echo.is_suppressed() {
                echoes.set(echoes.get() + 1);
            } else {
                changes.set(changes.get() + 1);
            }
        });
        let registration = bridge.register_signals(&handlers)?;
        if registration.is_complete() {
            info!("[studio] all {} signal bindings active", registration.bound.len());
        } else {
            warn!("[studio] {} signal binding(s) skipped", registration.skipped.len());
        }
        Ok(Self {
            bridge,
            scene,
            audit,
            notices,
            camera_changes,
            camera_echoes,
            registration,
            #[cfg(feature = "watch")]
            watcher,
            clock: Instant::now(),
        })
    }

    pub fn bridge(&mut self) -> &mut SceneBridge {
        &mut self.bridge
    }

    pub fn scene(&self) -> Rc<RefCell<SceneRuntime>> {
        self.scene.clone()
    }

    pub fn audit(&self) -> &AuditLogHandle {
        &self.audit
    }

    pub fn registration(&self) -> &RegistrationReport {
        &self.registration
    }

    pub fn notices(&self) -> usize {
        self.notices.borrow().notices().len()
    }

    pub fn print_routes(&self) {
        println!("{}", self.bridge.describe_routes());
    }

    /// Runs `frames` editor turns with a simulation worker streaming alongside, then lets the
    /// bridge settle so the last batch gets its ack.
    pub fn run(&mut self, frames: u32) -> SessionSummary {
        let mut summary = SessionSummary { frames, ..Default::default() };
        let worker = SimulationWorker::spawn(
            self.bridge.producer(),
            SimulationSettings { steps: frames / 2, ..Default::default() },
        );
        for frame in 0..frames {
            self.edit(frame);
            self.step(&mut summary);
        }
        summary.simulation_steps = worker.join();
        for _ in 0..SETTLE_FRAMES {
            self.step(&mut summary);
            if self.bridge.pending_batch().is_none() && !self.bridge.is_flush_armed() {
                break;
            }
        }
        summary.flushes = self.bridge.flush_count();
        summary.camera_changes = self.camera_changes.get();
        summary.camera_echoes = self.camera_echoes.get();
        summary.notices = self.notices();
        summary.health = self.audit.health();
        summary
    }

    fn step(&mut self, summary: &mut SessionSummary) {
        self.poll_registry();
        self.clock += FRAME_TIME;
        if let Some(report) = self.bridge.pump_at(self.clock) {
            summary.count(report.outcome);
        }
        self.scene.borrow_mut().deliver_queued();
        // Acks sent by the scene are drained on the next pump.
        if let Some(report) = self.bridge.pump_at(self.clock) {
            summary.count(report.outcome);
        }
    }

    /// Scripted editor input: an orbiting camera, periodic lighting tweaks, and a redundant camera
    /// nudge that falls inside the dedup tolerance.
    fn edit(&mut self, frame: u32) {
        if frame == 0 {
            self.queue("quality", payload([("msaa_samples", 4), ("shadow_resolution", 2048)]));
        }
        if frame % 10 == 0 {
            let angle = frame as f32 * 0.05;
            let eye = Vec3::new(angle.cos() * 6.0, 2.5, angle.sin() * 6.0);
            self.queue(
                "camera",
                payload([
                    ("position", Value::from(eye.to_array())),
                    ("target", Value::from(Vec3::ZERO.to_array())),
                    ("field_of_view", Value::from(55.0)),
                ]),
            );
        }
        if frame % 10 == 5 {
            self.queue("camera", payload([("field_of_view", 55.0 + 1e-7)]));
        }
        if frame % 30 == 15 {
            let exposure = 1.0 + (frame / 30) as f64 * 0.25;
            self.queue(
                "lighting",
                payload([
                    ("exposure", Value::from(exposure)),
                    ("shadow", Value::Map(payload([("enabled", true), ("soft_edges", true)]))),
                ]),
            );
        }
    }

    fn queue(&mut self, category: &str, update: Payload) {
        self.bridge.queue_update_at(category, update, self.clock);
    }

    #[cfg(feature = "watch")]
    fn poll_registry(&mut self) {
        let changed = self.watcher.as_mut().map(|watcher| watcher.changed()).unwrap_or(false);
        if !changed {
            return;
        }
        match self.bridge.reload_registry() {
            Ok(routes) => info!("[studio] registry reloaded ({} categories)", routes.categories.len()),
            Err(err) => warn!("[studio] keeping previous registry: {err:?}"),
        }
    }

    #[cfg(not(feature = "watch"))]
    fn poll_registry(&mut self) {}
}

pub fn print_summary_json(summary: &SessionSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

pub fn print_summary(summary: &SessionSummary) {
    let health = &summary.health;
    println!(
        "[studio] {} frames, {} flushes: {} published, {} suppressed, {} not ready, {} partial, {} unresolved",
        summary.frames,
        summary.flushes,
        summary.published,
        summary.suppressed,
        summary.not_ready,
        summary.partial,
        summary.unresolved
    );
    println!(
        "[studio] queued {} dispatched {} applied {} suppressed {} failed {} unresolved {}",
        health.queued, health.dispatched, health.applied, health.suppressed, health.failed_attempts, health.unresolved
    );
    match (health.sync_rate(), health.mean_latency_ms, health.max_latency_ms) {
        (Some(rate), Some(mean), Some(max)) => {
            println!("[studio] sync rate {:.1}%, ack latency mean {mean:.2} ms, max {max:.2} ms", rate * 100.0)
        }
        (Some(rate), _, _) => println!("[studio] sync rate {:.1}%", rate * 100.0),
        _ => println!("[studio] nothing dispatched"),
    }
    println!(
        "[studio] simulation steps {}, camera changes {} (echoes ignored {}), notices {}",
        summary.simulation_steps, summary.camera_changes, summary.camera_echoes, summary.notices
    );
}
