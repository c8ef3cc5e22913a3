use glam::{Quat, Vec3};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scene_bridge::{payload, ProducerHandle, Value};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy)]
pub struct SimulationSettings {
    pub steps: u32,
    pub seed: u64,
    pub orbit_speed: f32,
    pub jitter: f32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { steps: 32, seed: 7, orbit_speed: 0.15, jitter: 0.02 }
    }
}

/// Background producer. It never touches the bridge directly; every step goes through the
/// [`ProducerHandle`] and is applied on the bridge thread's next pump.
pub struct SimulationWorker {
    handle: JoinHandle<u32>,
}

impl SimulationWorker {
    pub fn spawn(producer: ProducerHandle, settings: SimulationSettings) -> Self {
        let handle = thread::spawn(move || run(producer, settings));
        Self { handle }
    }

    /// Waits for the worker; returns how many steps were accepted by the bridge.
    pub fn join(self) -> u32 {
        self.handle.join().unwrap_or(0)
    }
}

fn run(producer: ProducerHandle, settings: SimulationSettings) -> u32 {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut sun = Vec3::new(0.3, -1.0, 0.2).normalize();
    let mut sent = 0;
    for step in 0..settings.steps {
        let wobble = rng.gen_range(-settings.jitter..=settings.jitter);
        sun = Quat::from_rotation_y(settings.orbit_speed + wobble) * sun;
        let update = payload([
            ("step", Value::from(step)),
            ("time_of_day", Value::from(step as f32 * settings.orbit_speed)),
            ("sun_direction", Value::from(sun.to_array())),
        ]);
        if !producer.queue_update("simulation", update) {
            debug!("[simulation] bridge gone after {sent} step(s)");
            break;
        }
        sent += 1;
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use scene_bridge::marshal::{BridgeInbox, BridgeMessage};

    #[test]
    fn worker_streams_every_step() {
        let inbox = BridgeInbox::new();
        let worker = SimulationWorker::spawn(inbox.producer(), SimulationSettings { steps: 5, ..Default::default() });
        assert_eq!(worker.join(), 5);
        let messages = inbox.drain();
        assert_eq!(messages.len(), 5);
        match &messages[4] {
            BridgeMessage::Update { category, payload } => {
                assert_eq!(category, "simulation");
                assert_eq!(payload["step"].as_f64(), Some(4.0));
                assert!(matches!(payload["sun_direction"], Value::NumericBuffer(ref v) if v.len() == 3));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
