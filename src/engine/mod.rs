//! Connection state reconciliation engine.
//!
//! Three units of work share state here:
//! - the refresh cycle, which owns the live set,
//! - the display cycle, which owns the structure of the displayed set,
//! - the packet correlator, which bumps counters on displayed entries.
//!
//! The displayed set sits behind a single mutex that covers enumeration,
//! insertion/removal and every field write. The live set has its own mutex,
//! taken briefly by the refresh cycle, by hostname write-backs and by the
//! display cycle to copy it.

pub mod correlator;
pub mod display;
pub mod filter;
pub mod ordering;
pub mod refresh;
pub mod scheduler;

use crate::backends::capture::{PacketCallback, PacketSource};
use crate::backends::resolver::HostnameResolver;
use crate::backends::snapshot::ConnectionSource;
use crate::connection::{DisplayedConnection, LiveConnection};
use chrono::{DateTime, Local};
use correlator::PacketCorrelator;
use display::DisplayCycle;
use filter::FilterSettings;
use refresh::RefreshCycle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Displayed connections plus the aggregates published with them
#[derive(Debug, Clone, Default)]
pub struct DisplayedState {
    pub connections: Vec<DisplayedConnection>,
    pub tcp_connections: usize,
    pub udp_connections: usize,
    pub dropped_packets: u64,
    pub memory_mb: f64,
    pub updated_at: Option<DateTime<Local>>,
}

/// What a consumer gets from `Engine::snapshot`
pub type DisplaySnapshot = DisplayedState;

pub type LiveSet = Arc<Mutex<Vec<LiveConnection>>>;
pub type SharedDisplay = Arc<Mutex<DisplayedState>>;
pub type SharedSettings = Arc<RwLock<RuntimeSettings>>;

/// Settings the UI may change while the engine runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub view_pid_zero: bool,
    pub filter: FilterSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineTiming {
    pub refresh_interval: Duration,
    pub display_interval: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(250),
            display_interval: Duration::from_millis(750),
        }
    }
}

/// Lock a mutex, carrying on with the data if another thread panicked
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        log::warn!("Recovering from a poisoned lock");
        poisoned.into_inner()
    })
}

pub struct Engine {
    live: LiveSet,
    display: SharedDisplay,
    settings: SharedSettings,
    correlator: Arc<PacketCorrelator>,
    packet_source: Option<Arc<dyn PacketSource>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Start both cycles and subscribe to packets. Must be called from
    /// inside a tokio runtime.
    pub fn start(
        timing: EngineTiming,
        source: Arc<dyn ConnectionSource>,
        packet_source: Option<Arc<dyn PacketSource>>,
        resolver: Arc<dyn HostnameResolver>,
        settings: RuntimeSettings,
    ) -> Self {
        let live: LiveSet = Arc::new(Mutex::new(Vec::new()));
        let display: SharedDisplay = Arc::new(Mutex::new(DisplayedState::default()));
        let settings: SharedSettings = Arc::new(RwLock::new(settings));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let correlator = Arc::new(PacketCorrelator::new(Arc::clone(&display)));

        if let Some(packets) = &packet_source {
            let correlator = Arc::clone(&correlator);
            let callback: PacketCallback = Arc::new(move |packet| {
                correlator.on_packet(&packet);
            });

            match packets.register(callback) {
                Ok(()) => log::info!("Subscribed to packets from {}", packets.name()),
                Err(e) => log::error!(
                    "Packet capture via {} unavailable, traffic counters disabled: {:#}",
                    packets.name(),
                    e
                ),
            }
        }

        log::info!("Using connection source: {}", source.name());

        let refresh = Arc::new(RefreshCycle::new(
            source,
            resolver,
            Arc::clone(&live),
            Arc::clone(&settings),
            shutdown_rx.clone(),
        ));
        let refresh_task = scheduler::spawn_periodic(
            "refresh",
            timing.refresh_interval,
            shutdown_rx.clone(),
            move || {
                let refresh = Arc::clone(&refresh);
                async move {
                    refresh.run_once().await;
                }
            },
        );

        let display_cycle = Arc::new(DisplayCycle::new(
            Arc::clone(&live),
            Arc::clone(&display),
            Arc::clone(&settings),
        ));
        let display_task = scheduler::spawn_periodic(
            "display",
            timing.display_interval,
            shutdown_rx,
            move || {
                let display_cycle = Arc::clone(&display_cycle);
                async move {
                    if let Err(e) = tokio::task::spawn_blocking(move || display_cycle.run_once()).await
                    {
                        log::error!("Display cycle failed: {}", e);
                    }
                }
            },
        );

        Self {
            live,
            display,
            settings,
            correlator,
            packet_source,
            shutdown,
            tasks: vec![refresh_task, display_task],
        }
    }

    /// Copy of the displayed state, taken under the display lock
    pub fn snapshot(&self) -> DisplaySnapshot {
        lock_or_recover(&self.display).clone()
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply new runtime settings; both cycles pick them up on their next tick
    pub fn update_settings(&self, update: impl FnOnce(&mut RuntimeSettings)) {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut settings);
    }

    pub fn packets_seen(&self) -> u64 {
        self.correlator.packets_seen()
    }

    /// Stop everything. When this returns nothing mutates engine state any
    /// more; a cycle that was already running is allowed to finish.
    pub async fn shutdown(self) {
        {
            // Hostname write-backs check the flag under this lock
            let _live = lock_or_recover(&self.live);
            self.shutdown.send_replace(true);
        }

        if let Some(packets) = &self.packet_source {
            packets.unregister();
            log::info!("Unsubscribed from packets");
        }

        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Cycle task ended abnormally: {}", e);
            }
        }

        log::info!("Engine stopped");
    }
}
