use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Gate {
    deadline: Instant,
    generation: u64,
}

/// Per-channel throttle gates for outbound calls.
///
/// Each named channel holds at most one gate, installed when a throttled
/// call completes and awaited before the next call on that channel. Channels
/// are independent: waiting on one never delays another. One scheduler is
/// created per run and drained at the end of it.
#[derive(Debug, Default)]
pub struct DelayScheduler {
    gates: Mutex<HashMap<String, Gate>>,
    next_generation: AtomicU64,
}

impl DelayScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs a gate on `name` resolving after `seconds`. Non-positive
    /// durations are a no-op. The gate removes itself when its timer fires,
    /// but only if it is still the currently-installed gate; a newer gate is
    /// never clobbered by an older timer.
    pub fn set_delay(self: &Arc<Self>, name: &str, seconds: f64) {
        if seconds <= 0.0 {
            return;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + Duration::from_secs_f64(seconds);
        self.gates
            .lock()
            .insert(name.to_string(), Gate { deadline, generation });

        let scheduler = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut gates = scheduler.gates.lock();
            if gates.get(&name).map(|gate| gate.generation) == Some(generation) {
                gates.remove(&name);
            }
        });
    }

    /// Suspends until the gate installed on `name` resolves; returns
    /// immediately when the channel is idle.
    pub async fn wait_for_delay(&self, name: &str) {
        let deadline = self.gates.lock().get(name).map(|gate| gate.deadline);
        if let Some(deadline) = deadline {
            debug!("Waiting on delay channel '{name}'");
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Channels that still have an unresolved gate installed.
    pub fn incomplete_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gates.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Awaits every outstanding gate, so the process does not exit while a
    /// pacing contract is still open.
    pub async fn wait_for_all(&self) {
        for name in self.incomplete_channels() {
            self.wait_for_delay(&name).await;
        }
    }
}
