//! Many threads sharing one pool

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use memsys_core::hash::{HashAlgorithm, HashWriter};
use memsys_core::pattern::{seeded_size, SeededBytes};
use memsys_core::units::{GIB, KIB};
use memsys_core::PoolConfig;
use memsys_mem::{MemInfo, MemoryPool, StaticProbe};

fn shared_pool(period: Duration, probe: Arc<StaticProbe>) -> Arc<MemoryPool> {
    let pool = MemoryPool::with_probe(PoolConfig::new("concurrent", period, GIB, true), probe);
    pool.init(false).expect("init failed");
    Arc::new(pool)
}

#[test]
fn test_concurrent_sgls_round_trip() {
    let probe = Arc::new(StaticProbe::new(MemInfo {
        total: 16 * GIB,
        available: 8 * GIB,
    }));
    let pool = shared_pool(Duration::from_secs(60), probe);

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..32u64 {
                    let seed = (worker << 32) | i;
                    let size = seeded_size(seed, 1, 512 * KIB);
                    let hint = seeded_size(seed ^ 0x5555, 1, 160 * KIB) as usize;

                    let mut sgl = pool.new_sgl_with_hash(hint, HashAlgorithm::Blake3.accumulator());
                    assert_eq!(sgl.read_from(&mut SeededBytes::new(seed, size)).unwrap(), size);

                    let mut replay = HashWriter::new(HashAlgorithm::Blake3.accumulator());
                    assert_eq!(sgl.drain_into(&mut replay).unwrap(), size);
                    assert_eq!(sgl.compute_hash(), Some(replay.digest()));
                    sgl.free();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker panicked");
    }

    let stats = pool.stats();
    assert_eq!(stats.in_use_buffers, 0);
    assert!(stats.idle_buffers > 0);
    for class in &stats.classes {
        assert_eq!(class.misuse, 0);
        // every allocated buffer is either idle or reclaimed by now
        assert_eq!(class.allocated, class.idle as u64 + class.reclaimed);
    }
}

#[test]
fn test_writers_race_background_reclamation() {
    // Reclaimer ticks every millisecond under constant pressure while writers churn.
    let probe = Arc::new(StaticProbe::new(MemInfo {
        total: 16 * GIB,
        available: 0,
    }));
    let pool = shared_pool(Duration::from_millis(1), probe);

    thread::scope(|scope| {
        for worker in 0..6u8 {
            let pool = &pool;
            scope.spawn(move || {
                let pattern = vec![worker; 70 * KIB as usize];
                for _ in 0..100 {
                    let mut sgl = pool.new_sgl(16 * KIB as usize);
                    sgl.write_all(&pattern).unwrap();
                    thread::yield_now();
                    assert!(sgl.chunks().all(|c| c.iter().all(|&b| b == worker)));
                    assert_eq!(sgl.len(), pattern.len());
                    sgl.free();
                }
            });
        }
    });

    let stats = pool.stats();
    assert_eq!(stats.in_use_buffers, 0);
    pool.shutdown();
    assert_eq!(pool.stats().idle_buffers, 0);
}
