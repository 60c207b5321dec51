//! Liveness monitor: probes subscribers and evicts dead or idle ones.
//!
//! Two sweeps run on the same period but on independent tasks:
//!
//! - the **probe cycle** evicts every entry whose previous probe is still
//!   unanswered and sends a fresh ping to the rest, giving a detection
//!   window of one to two periods;
//! - the **idle sweep** evicts entries with no inbound activity for longer
//!   than the idle timeout (two periods by default), even if their probe
//!   state looks healthy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::{ConnectionRegistry, Outbound, ProbeArm};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries inspected.
    pub inspected: usize,
    /// Probes sent.
    pub probed: usize,
    /// Entries evicted.
    pub evicted: usize,
}

/// Periodic supervisor of the [`ConnectionRegistry`].
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    period: Duration,
    idle_timeout: Duration,
}

impl LivenessMonitor {
    /// Creates a monitor with the given sweep period and idle threshold.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, period: Duration, idle_timeout: Duration) -> Self {
        Self {
            registry,
            period,
            idle_timeout,
        }
    }

    /// Runs one probe cycle at `now`.
    pub fn probe_cycle(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        self.registry.for_each(|entry| {
            let client_id = entry.id();
            report.inspected += 1;
            match self.registry.arm_probe(client_id, now) {
                ProbeArm::Armed => {
                    if entry.handle().try_send(Outbound::Ping).is_ok() {
                        report.probed += 1;
                    } else if self.registry.unregister_channel(client_id, entry.handle()) {
                        tracing::info!(
                            %client_id,
                            peer = ?entry.peer(),
                            "probe could not be queued, connection closed"
                        );
                        report.evicted += 1;
                    }
                }
                ProbeArm::Unanswered => {
                    if self.registry.unregister_channel(client_id, entry.handle()) {
                        tracing::info!(
                            %client_id,
                            peer = ?entry.peer(),
                            connected_at = %entry.connected_at(),
                            "probe unanswered, connection terminated"
                        );
                        report.evicted += 1;
                    }
                }
                ProbeArm::Gone => {}
            }
        });
        report
    }

    /// Runs one idle sweep at `now`.
    pub fn idle_sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        self.registry.for_each(|entry| {
            report.inspected += 1;
            if self
                .registry
                .evict_if_idle(entry.id(), now, self.idle_timeout)
            {
                tracing::info!(
                    client_id = %entry.id(),
                    peer = ?entry.peer(),
                    idle_ms = u64::try_from(entry.liveness().idle_for(now).as_millis())
                        .unwrap_or(u64::MAX),
                    "idle connection evicted"
                );
                report.evicted += 1;
            }
        });
        report
    }

    /// Spawns both sweeps on the current runtime.
    ///
    /// The first tick of each sweep fires one full period after spawning.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let prober = self.clone();
        let probe = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + prober.period, prober.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let now = ticker.tick().await;
                let report = prober.probe_cycle(now);
                tracing::debug!(
                    connections = report.inspected,
                    probed = report.probed,
                    evicted = report.evicted,
                    "probe cycle"
                );
            }
        });

        let sweeper = self;
        let idle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + sweeper.period, sweeper.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let now = ticker.tick().await;
                let report = sweeper.idle_sweep(now);
                if report.evicted > 0 {
                    tracing::debug!(evicted = report.evicted, "idle sweep");
                }
            }
        });

        MonitorHandle { probe, idle }
    }
}

/// Handle to the two running sweep tasks.
#[derive(Debug)]
pub struct MonitorHandle {
    probe: JoinHandle<()>,
    idle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stops both sweeps.
    pub fn shutdown(self) {
        self.probe.abort();
        self.idle.abort();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{ClientId, ConnectionEntry, ConnectionHandle};
    use tokio::sync::mpsc;

    const PERIOD: Duration = Duration::from_secs(30);

    fn setup() -> (Arc<ConnectionRegistry>, LivenessMonitor) {
        let registry = Arc::new(ConnectionRegistry::new());
        let monitor = LivenessMonitor::new(Arc::clone(&registry), PERIOD, PERIOD * 2);
        (registry, monitor)
    }

    fn register(
        registry: &ConnectionRegistry,
        now: Instant,
    ) -> (ClientId, mpsc::Receiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::channel(8);
        handle.mark_open();
        let id = ClientId::new();
        registry.register(ConnectionEntry::new(id, handle, None, now));
        (id, rx)
    }

    #[test]
    fn silent_connection_is_evicted_on_second_cycle() {
        let (registry, monitor) = setup();
        let t0 = Instant::now();
        let (id, mut rx) = register(&registry, t0);

        let first = monitor.probe_cycle(t0 + PERIOD);
        assert_eq!(first.probed, 1);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));
        assert!(registry.contains(id));

        let second = monitor.probe_cycle(t0 + PERIOD * 2);
        assert_eq!(second.evicted, 1);
        assert!(!registry.contains(id));
    }

    #[test]
    fn responsive_connection_survives_steady_heartbeat() {
        let (registry, monitor) = setup();
        let t0 = Instant::now();
        let (id, mut rx) = register(&registry, t0);

        for cycle in 1..=10u32 {
            let tick = t0 + PERIOD * cycle;
            let report = monitor.probe_cycle(tick);
            assert_eq!(report.evicted, 0);
            assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));
            registry.acknowledge_probe(id, tick + Duration::from_millis(50));
            assert_eq!(monitor.idle_sweep(tick + Duration::from_millis(100)).evicted, 0);
        }
        assert!(registry.contains(id));
    }

    #[test]
    fn idle_connection_is_evicted_even_when_alive() {
        let (registry, monitor) = setup();
        let t0 = Instant::now();
        let (id, _rx) = register(&registry, t0);

        assert_eq!(monitor.idle_sweep(t0 + PERIOD * 2).evicted, 0);
        let Some(entry) = registry.get(id) else {
            panic!("entry vanished");
        };
        assert!(entry.liveness().is_alive());

        let report = monitor.idle_sweep(t0 + PERIOD * 2 + Duration::from_millis(1));
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(id));
    }

    #[test]
    fn sweeps_tolerate_entries_already_gone() {
        let (registry, monitor) = setup();
        let t0 = Instant::now();
        let (a, _rx_a) = register(&registry, t0);
        let (b, _rx_b) = register(&registry, t0);

        monitor.probe_cycle(t0 + PERIOD);
        registry.unregister(a);
        let report = monitor.probe_cycle(t0 + PERIOD * 2);
        assert_eq!(report.inspected, 1);
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(b));
        assert!(!registry.unregister(b));
    }

    #[test]
    fn closed_queue_on_probe_evicts() {
        let (registry, monitor) = setup();
        let t0 = Instant::now();
        let (id, rx) = register(&registry, t0);
        drop(rx);

        let report = monitor.probe_cycle(t0 + PERIOD);
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn spawned_monitor_evicts_silent_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let period = Duration::from_millis(20);
        let handle =
            LivenessMonitor::new(Arc::clone(&registry), period, period * 2).spawn();
        let (id, _rx) = register(&registry, Instant::now());

        tokio::time::sleep(period * 6).await;
        assert!(!registry.contains(id));
        handle.shutdown();
    }
}
