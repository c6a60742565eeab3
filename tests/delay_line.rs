use cachesim_wb::cache::CacheConfig;
use cachesim_wb::delay_line::{Backing, DelayLine, DelayLineConfig, Sample};
use cachesim_wb::error::ConfigError;
use cachesim_wb::interconnect::Interconnect;
use cachesim_wb::wishbone::{BusMaster, BusResponse, CheckerStats};
use cachesim_wb::SystemSpec;
use proptest::prelude::*;

const MAX_DELAY: u32 = 256;
const STEPS: u32 = 40_000;

fn stimulus(n: usize) -> Sample {
    Sample::from_f32(0.8 * (0.2 * n as f32).sin())
}

struct Run {
    inputs: Vec<Sample>,
    outputs: Vec<Vec<Sample>>,
    bus: Option<CheckerStats>,
}

fn psram_backed(cachesize_words: u32, burst_len: u32) -> DelayLineConfig {
    DelayLineConfig {
        max_delay: MAX_DELAY,
        write_triggers_read: true,
        backing: Backing::Psram {
            base: 0,
            cache: CacheConfig { cachesize_words, burst_len, addr_width: 22 },
        },
    }
}

fn run_line(cfg: DelayLineConfig, delays: &[u32]) -> Run {
    let mut line = DelayLine::new("delayln", cfg).unwrap();
    for &d in delays {
        line.add_tap(Some(d)).unwrap();
    }
    let mut ic = match cfg.backing {
        Backing::Psram { .. } => {
            let spec = SystemSpec { psram_words: 512, ..SystemSpec::default() };
            let mut ic = Interconnect::new(&spec);
            ic.add_master("delayln").unwrap();
            Some(ic)
        }
        Backing::Local => None,
    };

    let mut run = Run { inputs: Vec::new(), outputs: vec![Vec::new(); delays.len()], bus: None };
    for _ in 0..STEPS {
        let sample = stimulus(run.inputs.len());
        if line.offer(sample) {
            run.inputs.push(sample);
        }
        match ic.as_mut() {
            Some(ic) => {
                let mut masters: [&mut dyn BusMaster; 1] = [&mut line];
                ic.step(&mut masters).unwrap();
            }
            None => line.tick(&BusResponse::default()).unwrap(),
        }
        for (tap, out) in run.outputs.iter_mut().enumerate() {
            if let Some(s) = line.take(tap) {
                out.push(s);
            }
        }
    }
    run.bus = ic.map(|ic| ic.checker_stats());
    run
}

fn check_taps(run: &Run, delays: &[u32]) {
    for (tap, &delay) in delays.iter().enumerate() {
        let out = &run.outputs[tap];
        for (n, got) in out.iter().enumerate() {
            let want = match n.checked_sub(delay as usize) {
                Some(k) => run.inputs[k],
                None => Sample::ZERO,
            };
            assert_eq!(*got, want, "tap {} (delay {}) output {}", tap, delay, n);
        }
        // the line wrapped at least once
        assert!(out.len() > MAX_DELAY as usize, "tap {} only produced {} samples", tap, out.len());
        assert!(run.inputs.len() - out.len() <= 3);
    }
}

#[test]
fn test_taps_through_cache() {
    for (cachesize, burst_len) in [(64, 4), (16, 4), (256, 8)] {
        for delays in [[1, 3], [150, 220], [0, 255], [255, 0]] {
            let run = run_line(psram_backed(cachesize, burst_len), &delays);
            check_taps(&run, &delays);

            if cachesize > 64 {
                // the whole line fits in the cache, so the store is barely touched
                let bus = run.bus.unwrap();
                let bursts = bus.read_bursts + bus.write_bursts;
                let samples_per_burst = run.inputs.len() as u64 / bursts.max(1);
                assert!(
                    samples_per_burst > 2 * burst_len as u64,
                    "{} samples per burst",
                    samples_per_burst
                );
            }
        }
    }
}

#[test]
fn test_taps_local() {
    let cfg = DelayLineConfig {
        max_delay: MAX_DELAY,
        write_triggers_read: true,
        backing: Backing::Local,
    };
    for delays in [[150, 220], [0, 255]] {
        let run = run_line(cfg, &delays);
        check_taps(&run, &delays);
        assert!(run.bus.is_none());
    }
}

#[test]
fn test_independent_reads() {
    let cfg =
        DelayLineConfig { max_delay: 16, write_triggers_read: false, backing: Backing::Local };
    let mut line = DelayLine::new("delayln", cfg).unwrap();
    let tap = line.add_tap(None).unwrap();
    let idle = BusResponse::default();

    // nothing written yet
    assert_eq!(line.request(tap, 0), Ok(true));
    let mut out = None;
    for _ in 0..10 {
        line.tick(&idle).unwrap();
        out = out.or(line.take(tap));
    }
    assert_eq!(out, Some(Sample::ZERO));

    let inputs: Vec<Sample> = (0..10).map(|i| Sample(100 * i as i16 + 1)).collect();
    let mut next = 0;
    for _ in 0..200 {
        if next < inputs.len() && line.offer(inputs[next]) {
            next += 1;
        }
        line.tick(&idle).unwrap();
    }
    assert_eq!(line.written(), 10);

    for (delay, want) in [(0, inputs[9]), (3, inputs[6]), (9, inputs[0]), (12, Sample::ZERO)] {
        assert_eq!(line.request(tap, delay), Ok(true));
        // a second request while the first is in flight is refused
        assert_eq!(line.request(tap, delay), Ok(false));
        let mut out = None;
        for _ in 0..10 {
            line.tick(&idle).unwrap();
            out = out.or(line.take(tap));
        }
        assert_eq!(out, Some(want), "delay {}", delay);
    }

    let too_long = ConfigError::TapDelayTooLong { delay: 16, max_delay: 16 };
    assert_eq!(line.request(tap, 16), Err(too_long));
    assert_eq!(line.request(5, 1), Err(ConfigError::UnknownTap(5)));
}

#[test]
fn test_tap_configuration() {
    let cfg = psram_backed(64, 4);
    let mut line = DelayLine::new("delayln", cfg).unwrap();
    assert_eq!(line.add_tap(None), Err(ConfigError::MissingTapDelay));
    assert_eq!(
        line.add_tap(Some(MAX_DELAY)),
        Err(ConfigError::TapDelayTooLong { delay: MAX_DELAY, max_delay: MAX_DELAY })
    );
    assert_eq!(line.add_tap(Some(MAX_DELAY - 1)), Ok(0));

    line.tick(&BusResponse::default()).unwrap();
    assert_eq!(line.add_tap(Some(1)), Err(ConfigError::TopologyFrozen { component: "delay line" }));

    let bad = DelayLineConfig { max_delay: 100, ..cfg };
    assert!(matches!(DelayLine::new("delayln", bad), Err(ConfigError::NotPowerOfTwo { .. })));
}

#[test]
fn test_sample_conversion() {
    assert_eq!(Sample::from_f32(0.0), Sample::ZERO);
    assert_eq!(Sample::from_f32(0.5), Sample(16384));
    assert_eq!(Sample::from_f32(-1.0), Sample(-32768));
    assert_eq!(Sample::from_f32(2.0), Sample(32767));
    assert!((Sample::from_f32(0.8).to_f32() - 0.8).abs() < 1e-4);
}

proptest! {
    #[test]
    fn taps_return_delayed_input(
        samples in prop::collection::vec(any::<i16>(), 1..200),
        d0 in 0u32..32,
        d1 in 0u32..32,
    ) {
        let cfg =
            DelayLineConfig { max_delay: 32, write_triggers_read: true, backing: Backing::Local };
        let mut line = DelayLine::new("delayln", cfg).unwrap();
        line.add_tap(Some(d0)).unwrap();
        line.add_tap(Some(d1)).unwrap();

        let mut next = 0;
        let mut outputs = vec![Vec::new(), Vec::new()];
        for _ in 0..20 * samples.len() {
            if next < samples.len() && line.offer(Sample(samples[next])) {
                next += 1;
            }
            line.tick(&BusResponse::default()).unwrap();
            for (tap, out) in outputs.iter_mut().enumerate() {
                if let Some(s) = line.take(tap) {
                    out.push(s);
                }
            }
        }

        for (out, delay) in outputs.iter().zip([d0, d1]) {
            prop_assert_eq!(out.len(), samples.len());
            for (n, got) in out.iter().enumerate() {
                let want =
                    n.checked_sub(delay as usize).map_or(Sample::ZERO, |k| Sample(samples[k]));
                prop_assert_eq!(*got, want, "output {} of delay {}", n, delay);
            }
        }
    }
}
