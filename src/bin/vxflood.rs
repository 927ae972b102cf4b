use log::{error, info, LevelFilter};
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::thread;
use std::time::{Duration, Instant};
use structopt::StructOpt;

use vxflow::flood::Generator;
use vxflow::signal;

/// Synthetic VXLAN flood tool: batched sends of pre-built datagrams from
/// a pool of worker sockets.
#[derive(Debug, StructOpt)]
struct Opts {
    /// Log level to use
    #[structopt(long = "log", default_value = "Info")]
    log_level: LevelFilter,

    /// Target IPv4 address
    target: Ipv4Addr,

    /// Target UDP port
    port: u16,

    /// Number of sender workers, capped at 64
    workers: usize,

    /// Send duration in seconds
    duration: u64,

    /// Datagram size in bytes, clamped to [64, 9000]
    #[structopt(default_value = "128")]
    pkt_size: usize,

    /// Total number of distinct flows, spread over the workers
    #[structopt(default_value = "100000")]
    total_flows: usize,
}

fn main() {
    let opts = Opts::from_args();

    env_logger::Builder::new().format_timestamp_millis().filter(None, opts.log_level).init();
    signal::install();

    let target = SocketAddr::from((opts.target, opts.port));
    info!(
        "VXLAN flood: target {}, {} workers, {}s, {} byte datagrams, {} flows",
        target, opts.workers, opts.duration, opts.pkt_size, opts.total_flows
    );

    let generator = match Generator::start(target, opts.workers, opts.pkt_size, opts.total_flows) {
        Ok(generator) => generator,
        Err(e) => {
            error!("Failed to start sender pool: {}", e);
            process::exit(1);
        }
    };

    let pkt_bits = (generator.pkt_size() * 8) as f64;
    let start = Instant::now();
    let mut prev_total = 0u64;

    for second in 0..opts.duration {
        if signal::shutdown_requested() {
            break;
        }
        thread::sleep(Duration::from_secs(1));

        let total = generator.total_sent();
        let elapsed = start.elapsed().as_secs_f64();
        let avg_pps = total as f64 / elapsed;
        let inst_pps = (total - prev_total) as f64;
        prev_total = total;

        info!(
            "[{:3}s] total={}  avg={:.0} pps / {:.2} Gbps  inst={:.0} pps / {:.2} Gbps",
            second + 1,
            total,
            avg_pps,
            avg_pps * pkt_bits / 1e9,
            inst_pps,
            inst_pps * pkt_bits / 1e9
        );
    }

    let per_worker = generator.join();
    for (id, count) in per_worker.iter().enumerate() {
        info!("sender-{}: {} datagrams", id, count);
    }

    let total: u64 = per_worker.iter().sum();
    let elapsed = start.elapsed().as_secs_f64();
    let pps = total as f64 / elapsed;
    info!(
        "Total: {} datagrams in {:.1}s ({:.0} pps / {:.2} Gbps)",
        total,
        elapsed,
        pps,
        pps * pkt_bits / 1e9
    );
}
