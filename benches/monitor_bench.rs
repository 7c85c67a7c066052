//! Monitor and Boot Parser Benchmarks
//!
//! Run with: cargo bench --bench monitor_bench
//!
//! Compare substrates by building with and without `--features portable-monitors`;
//! both substrates are measured explicitly here as well.

use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use bootvm::boot::{BootParser, SizeSpec, parse_memory_size};
use bootvm::runtime::monitor::{Monitor, Substrate};

// Simple timing macro for benchmarks
macro_rules! bench {
    ($name:expr, $iterations:expr, $code:block) => {{
        let start = Instant::now();
        for _ in 0..$iterations {
            black_box($code);
        }
        let elapsed = start.elapsed();
        let per_iter = elapsed / $iterations;
        println!(
            "{}: {} iterations in {:?} ({:?}/iter, {:.0} ops/sec)",
            $name,
            $iterations,
            elapsed,
            per_iter,
            $iterations as f64 / elapsed.as_secs_f64()
        );
        elapsed
    }};
}

fn bench_uncontended(substrate: Substrate) {
    let monitor = Monitor::new(substrate).unwrap();
    bench!(format!("{substrate:?} enter/exit"), 1_000_000u32, {
        monitor.enter();
        monitor.exit();
    });
    bench!(format!("{substrate:?} enter/broadcast/exit"), 1_000_000u32, {
        monitor.enter();
        monitor.broadcast();
        monitor.exit();
    });
}

fn bench_contended(substrate: Substrate) {
    let monitor = Arc::new(Monitor::new(substrate).unwrap());
    let threads = 4u32;
    let per_thread = 100_000u32;
    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                for _ in 0..per_thread {
                    monitor.enter();
                    black_box(&monitor);
                    monitor.exit();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let elapsed = start.elapsed();
    let total = threads * per_thread;
    println!(
        "{substrate:?} contended ({threads} threads): {:?}/iter ({:.0} ops/sec)",
        elapsed / total,
        total as f64 / elapsed.as_secs_f64()
    );
}

fn bench_memory_size() {
    let spec = SizeSpec {
        name: "initial heap size",
        flag: "ms",
        round_to: 4096,
        page_size: 4096,
    };
    let mut sink = std::io::sink();
    bench!("parse_memory_size(\"64M\")", 1_000_000u32, {
        parse_memory_size(&spec, "-Xms64M", "64M", "bootvm", &mut sink).unwrap()
    });
    bench!("parse_memory_size(\"0x10cafe0\")", 1_000_000u32, {
        parse_memory_size(&spec, "-Xms0x10cafe0", "0x10cafe0", "bootvm", &mut sink).unwrap()
    });
}

fn bench_command_line() {
    let args = [
        "-Xms64M",
        "-Xmx256M",
        "-X:ic=a.img",
        "-X:id=b.img",
        "-X:ir=c.img",
        "-Dfoo=bar",
        "-X:gc:threads=2",
        "MyApp",
        "--flag",
    ];
    bench!("BootParser::parse", 100_000u32, {
        BootParser::new("bootvm", 4096, std::io::sink()).parse(args).unwrap()
    });
}

fn main() {
    println!("\n=== Monitor (uncontended) ===");
    bench_uncontended(Substrate::Pthread);
    bench_uncontended(Substrate::Portable);

    println!("\n=== Monitor (contended) ===");
    bench_contended(Substrate::Pthread);
    bench_contended(Substrate::Portable);

    println!("\n=== Boot parser ===");
    bench_memory_size();
    bench_command_line();

    println!("\nBenchmarks complete.");
}
