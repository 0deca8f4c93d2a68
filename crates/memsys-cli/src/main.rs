//! memsys CLI: exercise a memory pool from the command line.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};
use memsys_core::config::PoolConfig;
use memsys_core::hash::{HashAlgorithm, HashWriter};
use memsys_core::pattern::{seeded_size, SeededBytes};
use memsys_core::units::{format_size, parse_size};
use memsys_mem::{MemProbe, MemoryPool, ProcMeminfo};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memsys")]
#[command(about = "Slab buffer pool and scatter-gather buffer toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct PoolArgs {
    /// Pool name (overrides MEMSYS_NAME)
    #[arg(long)]
    name: Option<String>,

    /// Reclamation period in milliseconds (overrides MEMSYS_PERIOD_MS)
    #[arg(long)]
    period_ms: Option<u64>,

    /// Free-memory headroom, e.g. 1GiB (overrides MEMSYS_MIN_FREE)
    #[arg(long, value_parser = parse_size_arg)]
    min_free: Option<u64>,

    /// Enable debug invariant checks
    #[arg(long)]
    debug: bool,

    /// Fail instead of falling back to defaults when the memory probe fails
    #[arg(long)]
    strict: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write seeded random bytes through a hashed SGL and verify three-way digest agreement
    Sglhash {
        #[command(flatten)]
        pool: PoolArgs,

        /// Seed for size and content (defaults to the current time)
        #[arg(long)]
        seed: Option<u64>,

        /// Smallest payload size
        #[arg(long, default_value = "1KiB", value_parser = parse_size_arg)]
        min_size: u64,

        /// Payload size upper bound (exclusive)
        #[arg(long, default_value = "64MiB", value_parser = parse_size_arg)]
        max_size: u64,

        /// Hash algorithm: xxh64, blake3 or sha256
        #[arg(long, default_value = "xxh64")]
        algo: HashAlgorithm,
    },

    /// Hammer one pool from many threads and print its stats as JSON
    Stress {
        #[command(flatten)]
        pool: PoolArgs,

        /// Worker threads
        #[arg(long, default_value_t = 8)]
        workers: usize,

        /// SGLs per worker
        #[arg(long, default_value_t = 64)]
        iterations: usize,

        /// Largest payload per SGL
        #[arg(long, default_value = "4MiB", value_parser = parse_size_arg)]
        max_size: u64,

        /// Seed for sizes and content
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Run one reclamation pass before printing stats
        #[arg(long)]
        reclaim: bool,
    },

    /// Print what the environment memory probe reports
    Probe,
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sglhash {
            pool,
            seed,
            min_size,
            max_size,
            algo,
        } => run_sglhash(&pool, seed, min_size, max_size, algo),
        Commands::Stress {
            pool,
            workers,
            iterations,
            max_size,
            seed,
            reclaim,
        } => run_stress(&pool, workers, iterations, max_size, seed, reclaim),
        Commands::Probe => run_probe(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn build_pool(args: &PoolArgs) -> Result<MemoryPool, Box<dyn std::error::Error>> {
    let mut config = PoolConfig::from_env();
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(period) = args.period_ms {
        config.period_ms = period;
    }
    if let Some(min_free) = args.min_free {
        config.min_free_bytes = min_free;
    }
    if args.debug {
        config.debug = true;
    }
    config.validate()?;

    let pool = MemoryPool::new(config);
    pool.init(!args.strict)?;
    Ok(pool)
}

fn run_sglhash(
    args: &PoolArgs,
    seed: Option<u64>,
    min_size: u64,
    max_size: u64,
    algo: HashAlgorithm,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = build_pool(args)?;
    let seed = seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    });
    let size = seeded_size(seed, min_size, max_size);
    let started = Instant::now();

    let mut sgl = pool.new_sgl_with_hash(size as usize, algo.accumulator());
    let class = std::sync::Arc::clone(sgl.size_class());
    let mut buf = class.acquire();

    copy_with(&mut SeededBytes::new(seed, size), &mut sgl, &mut buf)?;
    let written = sgl.compute_hash().ok_or("SGL lost its accumulator")?;

    let mut direct = HashWriter::new(algo.accumulator());
    copy_with(&mut SeededBytes::new(seed, size), &mut direct, &mut buf)?;
    let direct = direct.digest();

    let mut replay = HashWriter::new(algo.accumulator());
    copy_with(&mut sgl, &mut replay, &mut buf)?;
    let replay = replay.digest();

    class.release(buf)?;
    sgl.free();

    println!("seed:    {}", seed);
    println!("size:    {} ({} bytes)", format_size(size), size);
    println!("write:   {}", written);
    println!("direct:  {}", direct);
    println!("replay:  {}", replay);
    println!("elapsed: {}ms", started.elapsed().as_millis());

    if written != direct {
        return Err(format!("same seed, different digests: {} != {}", written, direct).into());
    }
    if written != replay {
        return Err(format!("read-back digest differs: {} != {}", written, replay).into());
    }
    println!("✓ all digests agree");
    pool.shutdown();
    Ok(())
}

/// `io::copy` through a caller-provided buffer.
fn copy_with<R: Read + ?Sized, W: Write + ?Sized>(
    src: &mut R,
    dst: &mut W,
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut total = 0u64;
    loop {
        let n = match src.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
}

fn run_stress(
    args: &PoolArgs,
    workers: usize,
    iterations: usize,
    max_size: u64,
    seed: u64,
    reclaim: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = build_pool(args)?;
    let started = Instant::now();

    let mismatches: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let pool = &pool;
                scope.spawn(move || stress_worker(pool, w as u64, iterations, max_size, seed))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(usize::MAX))
            .fold(0usize, |acc, n| acc.saturating_add(n))
    });

    if reclaim {
        let report = pool.reclaim_now();
        tracing::info!(released = report.released_buffers, "manual reclamation pass");
    }

    println!("{}", pool.stats().to_json()?);
    eprintln!(
        "{} workers x {} SGLs in {:?}",
        workers,
        iterations,
        started.elapsed()
    );
    pool.shutdown();

    if mismatches > 0 {
        return Err(format!("{} SGLs failed verification", mismatches).into());
    }
    Ok(())
}

/// Returns how many SGLs failed round-trip verification.
fn stress_worker(pool: &MemoryPool, worker: u64, iterations: usize, max_size: u64, seed: u64) -> usize {
    let mut failures = 0;
    for i in 0..iterations as u64 {
        let item_seed = seed ^ (worker << 32) ^ i;
        let size = seeded_size(item_seed, 1, max_size.max(2));
        let hint = seeded_size(item_seed.rotate_left(17), 1, 256 * 1024) as usize;

        let mut sgl = pool.new_sgl_with_hash(hint, HashAlgorithm::Blake3.accumulator());
        let ok = match sgl.read_from(&mut SeededBytes::new(item_seed, size)) {
            Ok(n) if n == size => {
                let mut replay = HashWriter::new(HashAlgorithm::Blake3.accumulator());
                sgl.drain_into(&mut replay).is_ok() && sgl.compute_hash() == Some(replay.digest())
            }
            Ok(n) => {
                tracing::error!(worker, expected = size, got = n, "short fill");
                false
            }
            Err(e) => {
                tracing::error!(worker, error = %e, "fill failed");
                false
            }
        };
        if !ok {
            failures += 1;
        }
        sgl.free();
        if i % 16 == 15 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    failures
}

fn run_probe() -> Result<(), Box<dyn std::error::Error>> {
    let info = ProcMeminfo::new().probe()?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    println!(
        "total {} / available {}",
        format_size(info.total),
        format_size(info.available)
    );
    Ok(())
}
