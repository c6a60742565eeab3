use std::f32::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cachesim_wb::cache::CacheFlusher;
use cachesim_wb::delay_line::{DelayLine, Sample};
use cachesim_wb::framebuffer::{FramebufferWindow, Persistence, Pixel, Scanout};
use cachesim_wb::interconnect::{Interconnect, Soc};
use cachesim_wb::raster::{BlendMode, FramebufferPlotter, PlotRequest, PlotterCache};
use cachesim_wb::wishbone::{BusMaster, BusResponse, BusSignals, Op, TrafficGen};
use cachesim_wb::{sim, SystemSpec};
use clap::Parser;
use env_logger::Env;
use log::info;

const FB_BASE: u32 = 0x000;
const FB_WIDTH: u32 = 64;
const FB_HEIGHT: u32 = 32;
const DELAY_BASE: u32 = 0x800;
const TRAFFIC_BASE: u32 = 0xc00;

/// Run every DMA master of the system against one shared PSRAM and report
/// what the bus saw.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON file overriding fields of the default system spec
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of bus cycles to simulate
    #[arg(long, default_value_t = 20_000)]
    cycles: u64,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

/// Feeds a sine into a delay line and drains its taps every step.
struct SineDelay {
    line: DelayLine,
    n: u32,
}

impl BusMaster for SineDelay {
    fn signals(&self) -> BusSignals {
        self.line.signals()
    }

    fn tick(&mut self, resp: &BusResponse) -> cachesim_wb::error::Result<()> {
        let x = 0.8 * (2.0 * PI * self.n as f32 / 64.0).sin();
        if self.line.offer(Sample::from_f32(x)) {
            self.n += 1;
        }
        self.line.tick(resp)?;
        for tap in 0..self.line.taps() {
            self.line.take(tap);
        }
        Ok(())
    }
}

fn build(spec: &SystemSpec) -> Result<Soc> {
    let window = FramebufferWindow::new(FB_BASE, FB_WIDTH, FB_HEIGHT, 1)?;
    let mut soc = Soc::new(Interconnect::new(spec));

    let mut scanout = Scanout::new(window, spec.scanout())?;
    scanout.enable();
    soc.add_master("scanout", Box::new(scanout))?;

    let mut persist = Persistence::new(window, spec.persist())?;
    persist.set_enabled(true);
    soc.add_master("persist", Box::new(persist))?;

    let flusher = CacheFlusher::new(
        window.base,
        window.len_words(),
        spec.burst_len,
        spec.flush_backoff_bits,
    )?;
    let mut plot = PlotterCache::new(spec.cache(), flusher, 1)?;
    let id = plot.add_plotter(FramebufferPlotter::new(window, 64)?)?;
    for i in 0..FB_HEIGHT as i32 {
        let pixel = Pixel::new((i % 16) as u8, 0xf);
        plot.plot(id, PlotRequest { x: 2 * i, y: i, pixel, blend: BlendMode::Additive });
    }
    soc.add_master("plotter", Box::new(plot))?;

    let mut line = DelayLine::new("delay", spec.delay_line(DELAY_BASE))?;
    line.add_tap(Some(spec.delay_max / 2))?;
    line.add_tap(Some(spec.delay_max - 1))?;
    soc.add_master("delay", Box::new(SineDelay { line, n: 0 }))?;

    let ops = (0..64)
        .flat_map(|i| {
            let adr = TRAFFIC_BASE + 8 * i;
            [Op::BurstWrite(adr, vec![i; 4]), Op::Idle(32), Op::BurstRead(adr, 4)]
        })
        .collect();
    soc.add_master("traffic", Box::new(TrafficGen::new("traffic", ops)))?;
    Ok(soc)
}

fn main() -> Result<()> {
    // logging
    let env = Env::default()
        .filter_or("CACHESIM_LOG", "info")
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let spec = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SystemSpec::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SystemSpec::default(),
    };
    info!("system spec: {:?}", spec);

    let soc = build(&spec)?;
    let summary = sim::run(soc, args.cycles, &[])?;

    // print stats
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let bus = &summary.interconnect;
        println!("finished simulation in {} cycles", summary.cycles);
        let handovers = summary.monitor.handovers;
        println!("bus busy {} / {} cycles, {} handovers", bus.busy, bus.cycles, handovers);
        println!(
            "reads {} writes {} (bursts: {} read, {} write)",
            bus.reads, bus.writes, bus.read_bursts, bus.write_bursts
        );
        println!("words per port: {:?}", bus.acks);
    }
    Ok(())
}
