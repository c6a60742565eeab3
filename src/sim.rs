//! Discrete-event harness: one simulated second per bus step.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use asynchronix::model::{Model, Output};
use asynchronix::simulation::{Mailbox, SimInit};
use asynchronix::time::MonotonicTime;
use log::{error, info};
use serde::Serialize;

use crate::error::{Result, SimError};
use crate::interconnect::{InterconnectStats, Soc, StepReport};

pub struct SocModel {
    soc: Soc,
    report: Option<StepReport>,
    pub o_report: Output<StepReport>,
    stats: Arc<Mutex<InterconnectStats>>,
    failure: Arc<Mutex<Option<SimError>>>,
    failed: Arc<AtomicBool>,
}

impl SocModel {
    pub fn new(
        soc: Soc,
        stats: Arc<Mutex<InterconnectStats>>,
        failure: Arc<Mutex<Option<SimError>>>,
    ) -> Self {
        SocModel {
            soc,
            report: None,
            o_report: Output::new(),
            stats,
            failure,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failed(&self) -> Arc<AtomicBool> {
        self.failed.clone()
    }

    pub async fn on_tick(&mut self, _: ()) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        match self.soc.step() {
            Ok(report) => self.report = Some(report),
            Err(e) => {
                error!("simulation stopped: {}", e);
                *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                self.failed.store(true, Ordering::Relaxed);
            }
        }
    }

    pub async fn on_post_tick(&mut self, _: ()) {
        if let Some(report) = self.report.take() {
            let stats = self.soc.interconnect().stats();
            *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats;
            self.o_report.send(report).await;
        }
    }
}

impl Model for SocModel {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub cycles: u64,
    pub busy: u64,
    pub words: u64,
    /// grants changing hands between two different masters
    pub handovers: u64,
}

/// Watches the shared segment through step reports.
pub struct BusMonitor {
    last_owner: Option<usize>,
    stats: Arc<Mutex<MonitorStats>>,
}

impl BusMonitor {
    pub fn new(stats: Arc<Mutex<MonitorStats>>) -> Self {
        BusMonitor { last_owner: None, stats }
    }

    pub async fn on_report(&mut self, report: StepReport) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.cycles += 1;
        if let Some(owner) = report.owner {
            stats.busy += 1;
            if self.last_owner.map_or(false, |last| last != owner) {
                stats.handovers += 1;
            }
            self.last_owner = Some(owner);
        }
        if report.response.ack {
            stats.words += 1;
        }
    }
}

impl Model for BusMonitor {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub monitor: MonitorStats,
    pub interconnect: InterconnectStats,
}

/// Run `soc` for at most `max_cycles` steps, stopping early once every flag
/// in `done` is raised. The first error stops the run and is returned.
pub fn run(soc: Soc, max_cycles: u64, done: &[Arc<AtomicBool>]) -> Result<RunSummary> {
    let bus_stats = Arc::new(Mutex::new(InterconnectStats::default()));
    let monitor_stats = Arc::new(Mutex::new(MonitorStats::default()));
    let failure = Arc::new(Mutex::new(None));

    // create models
    let mut model = SocModel::new(soc, bus_stats.clone(), failure.clone());
    let failed = model.failed();
    let monitor = BusMonitor::new(monitor_stats.clone());

    // create mailboxes
    let soc_mbox = Mailbox::<SocModel>::new();
    let monitor_mbox = Mailbox::<BusMonitor>::new();
    let tick_addr = soc_mbox.address();

    // connect models
    model.o_report.connect(BusMonitor::on_report, &monitor_mbox);

    // initialize simulation
    let mut sim = SimInit::new()
        .add_model(model, soc_mbox)
        .add_model(monitor, monitor_mbox)
        .init(MonotonicTime::EPOCH);

    // run simulation
    for _ in 0..max_cycles {
        if failed.load(Ordering::Relaxed) {
            break;
        }
        if !done.is_empty() && done.iter().all(|d| d.load(Ordering::Relaxed)) {
            break;
        }

        // tick
        sim.send_event(SocModel::on_tick, (), &tick_addr);
        sim.step_by(Duration::from_secs(1));

        // post-tick
        sim.send_event(SocModel::on_post_tick, (), &tick_addr);
    }

    if let Some(e) = failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
        return Err(e);
    }
    let cycles = sim.time().as_secs() as u64;
    info!("finished simulation in {} cycles", cycles);
    let monitor = *monitor_stats.lock().unwrap_or_else(PoisonError::into_inner);
    let interconnect = bus_stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Ok(RunSummary { cycles, monitor, interconnect })
}
