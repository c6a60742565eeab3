use cachesim_wb::cache::{CacheConfig, CacheFlusher, CacheState, CachedStore, L2Cache};
use cachesim_wb::error::{ConfigError, ProtocolViolation, SimError};
use cachesim_wb::psram::{Psram, PsramConfig};
use cachesim_wb::wishbone::{step_link, BusSlave, Op, TrafficGen};
use cachesim_wb::{timing, SystemSpec};

fn cached_psram(spec: &SystemSpec) -> CachedStore<Psram> {
    let mut psram = Psram::new("psram", spec.psram());
    let pattern: Vec<u32> = (0..spec.psram_words).map(|adr| 0xa5000000 | adr).collect();
    psram.fill(0, &pattern);
    CachedStore::new(spec.cache(), psram).unwrap()
}

fn run(gen: &mut TrafficGen, slave: &mut dyn BusSlave) {
    for _ in 0..10_000 {
        if gen.is_done() {
            return;
        }
        step_link(gen, slave).unwrap();
    }
    panic!("traffic did not finish");
}

#[test]
fn test_write_survives_eviction() {
    // 64 word cache, 4 word lines: 0x100, 0x101 and 0x180 all map to line 0
    let spec = SystemSpec { psram_words: 512, ..SystemSpec::default() };
    let mut store = cached_psram(&spec);
    let mut gen = TrafficGen::new("cpu", vec![
        Op::Read(0x100),
        Op::Read(0x101),
        Op::Write(0x101, 0xdeadbeef),
        Op::Read(0x101),
        Op::Read(0x180),
        Op::Read(0x101),
    ]);
    run(&mut gen, &mut store);

    let data = |i: usize| gen.result(i).unwrap().data.clone();
    assert_eq!(data(0), vec![0xa5000100]);
    assert_eq!(data(1), vec![0xa5000101]);
    assert_eq!(data(3), vec![0xdeadbeef]);
    assert_eq!(data(4), vec![0xa5000180]);
    assert_eq!(data(5), vec![0xdeadbeef]);

    // the dirty line went back to the store when 0x180 evicted it
    assert_eq!(store.store().peek(0x101), 0xdeadbeef);
    assert_eq!(store.store().peek(0x100), 0xa5000100);

    let stats = store.cache().stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.refills, 3);
    // the hit test repeated after a refill is not another access
    assert_eq!(stats.hits + stats.misses, 6);
    let down = store.downstream_stats();
    assert_eq!(down.read_bursts, 3);
    assert_eq!(down.write_bursts, 1);
    assert_eq!(store.cache().state(), CacheState::Idle);
}

#[test]
fn test_latency_bounds() {
    let spec = SystemSpec::default();
    let mut store = cached_psram(&spec);
    let mut gen = TrafficGen::new("cpu", vec![
        Op::Read(0x100),          // clean miss
        Op::Read(0x102),          // hit
        Op::Write(0x103, 7),      // hit, line now dirty
        Op::Read(0x180),          // dirty miss
    ]);
    run(&mut gen, &mut store);

    let steps = |i: usize| gen.result(i).unwrap().steps;
    assert!(steps(0) <= timing::miss_clean(&spec), "clean miss took {}", steps(0));
    assert!(steps(1) <= timing::hit());
    assert!(steps(2) <= timing::hit());
    assert!(steps(3) <= timing::miss_dirty(&spec), "dirty miss took {}", steps(3));
    assert!(steps(1) < steps(0));
    assert!(steps(0) < steps(3));
}

#[test]
fn test_byte_select_merges() {
    let spec = SystemSpec::default();
    let mut store = cached_psram(&spec);
    let mut gen = TrafficGen::new("cpu", vec![
        Op::WriteSel(0x40, 0x0000ee00, 0b0010),
        Op::WriteSel(0x40, 0x11000000, 0b1000),
        Op::Read(0x40),
    ]);
    run(&mut gen, &mut store);
    assert_eq!(gen.result(2).unwrap().data, vec![0x1100ee40]);
    // store keeps the old word until the line is evicted
    assert_eq!(store.store().peek(0x40), 0xa5000040);
    assert_eq!(store.cache().dirty_lines(), 1);
}

#[test]
fn test_lines_across_boundary() {
    let spec = SystemSpec::default();
    let mut store = cached_psram(&spec);
    // burst write straddling two lines, then read it back through the cache
    let mut gen = TrafficGen::new("cpu", vec![
        Op::BurstWrite(0x202, vec![1, 2, 3, 4]),
        Op::BurstRead(0x201, 6),
    ]);
    run(&mut gen, &mut store);
    assert_eq!(gen.result(1).unwrap().data, vec![0xa5000201, 1, 2, 3, 4, 0xa5000206]);
}

#[test]
fn test_invalid_geometry() {
    let cfg = CacheConfig::default();
    assert!(L2Cache::new("l2", cfg).is_ok());
    assert_eq!(
        L2Cache::new("l2", CacheConfig { cachesize_words: 48, ..cfg }).err(),
        Some(ConfigError::NotPowerOfTwo { what: "cache size", value: 48 })
    );
    assert_eq!(
        L2Cache::new("l2", CacheConfig { burst_len: 1, ..cfg }).err(),
        Some(ConfigError::BurstTooShort(1))
    );
    assert_eq!(
        L2Cache::new("l2", CacheConfig { cachesize_words: 2, ..cfg }).err(),
        Some(ConfigError::CacheTooSmall { cache_words: 2, burst_len: 4 })
    );
    assert_eq!(
        L2Cache::new("l2", CacheConfig { addr_width: 4, ..cfg }).err(),
        Some(ConfigError::AddressWidth { width: 4, needed: 6 })
    );
}

#[test]
fn test_store_rejects_sub_word_access() {
    let mut psram = Psram::new("psram", PsramConfig::default());
    let mut gen = TrafficGen::new("cpu", vec![Op::WriteSel(0x10, 0xff, 0b0001)]);
    let err = step_link(&mut gen, &mut psram).unwrap_err();
    assert_eq!(err, SimError::Config(ConfigError::SubWordAccess { adr: 0x10, sel: 0b0001 }));
}

#[test]
fn test_store_rejects_out_of_range() {
    let mut psram = Psram::new("psram", PsramConfig { storage_words: 512, latency_cycles: 4 });
    let mut gen = TrafficGen::new("cpu", vec![Op::Read(600)]);
    match step_link(&mut gen, &mut psram) {
        Err(SimError::Protocol { violation, .. }) => {
            assert_eq!(violation, ProtocolViolation::AddressOutOfRange { adr: 600, limit: 512 })
        }
        other => panic!("expected a protocol error, got {:?}", other),
    }
}

#[test]
fn test_store_burst_pays_latency_once() {
    let cfg = PsramConfig { storage_words: 64, latency_cycles: 4 };
    let mut psram = Psram::new("psram", cfg);
    psram.fill(8, &[10, 11, 12, 13, 14, 15, 16, 17]);
    let mut gen = TrafficGen::new("dma", vec![Op::BurstRead(8, 8), Op::Read(9)]);
    run(&mut gen, &mut psram);
    let burst = gen.result(0).unwrap();
    assert_eq!(burst.data, vec![10, 11, 12, 13, 14, 15, 16, 17]);
    // idle step, latency, then one word per step
    assert_eq!(burst.steps, 1 + 4 + 8);
    assert_eq!(gen.result(1).unwrap().steps, 1 + 4 + 1);
    assert_eq!(psram.stats().bursts, 1);
}

#[test]
fn test_flusher_settings_checked() {
    assert!(CacheFlusher::new(0x300, 16, 4, 31).is_ok());
    assert!(matches!(CacheFlusher::new(0x300, 16, 4, 32), Err(ConfigError::InvalidFlusher(_))));
    assert!(matches!(CacheFlusher::new(0x300, 0, 4, 2), Err(ConfigError::InvalidFlusher(_))));

    // an oversized backoff from a config file is rejected, not wrapped
    let spec = SystemSpec::from_json(r#"{ "flush_backoff_bits": 40 }"#).unwrap();
    let err = CacheFlusher::new(0, 64, spec.burst_len, spec.flush_backoff_bits).err();
    assert_eq!(err, Some(ConfigError::InvalidFlusher("backoff must be below 32 bits")));
}
