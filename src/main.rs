use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::channel;
use std::thread;
use structopt::StructOpt;

use vxflow::capture::CaptureContext;
use vxflow::signal;
use vxflow::threads;

#[derive(Debug, StructOpt)]
struct Opts {
    /// Log level to use
    #[structopt(long = "log", default_value = "Info")]
    log_level: LevelFilter,

    /// UDP port to capture VXLAN traffic on
    #[structopt(short = "p", long = "port", default_value = "4789")]
    port: u16,

    /// Socket receive buffer hint, in bytes
    #[structopt(long = "rcvbuf", default_value = "8388608")]
    rcvbuf: usize,

    /// Aggregation window length, in milliseconds
    #[structopt(short = "i", long = "interval", default_value = "1000")]
    interval_ms: u64,

    /// Append snapshot records to this file as raw 32-byte images
    #[structopt(long = "dump", parse(from_os_str))]
    dump: Option<PathBuf>,
}

fn main() {
    let opts = Opts::from_args();

    // init the app logger
    env_logger::Builder::new().format_timestamp_millis().filter(None, opts.log_level).init();

    info!("Starting VXLAN capture on port {}", opts.port);
    signal::install();

    let ctx = match CaptureContext::bind(opts.port, opts.rcvbuf) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to bind capture socket on port {}: {}", opts.port, e);
            process::exit(1);
        }
    };
    match ctx.rcvbuf() {
        Ok(granted) => info!("Receive buffer: {} bytes granted (hint {})", granted, opts.rcvbuf),
        Err(e) => error!("Cannot read receive buffer size: {}", e),
    }

    let (sender, receiver) = channel();
    let interval_ms = opts.interval_ms;
    let dump = opts.dump;

    let mut thread_list = vec![];
    thread_list.push(thread::Builder::new().name("aggregator".to_string()).spawn(move || {
        threads::aggregator::aggregate(ctx, interval_ms, sender, signal::flag());
    }));
    thread_list.push(thread::Builder::new().name("exporter".to_string()).spawn(move || {
        threads::exporter::export(receiver, dump);
    }));

    for t in thread_list {
        t.unwrap().join().unwrap();
    }

    info!("Closing");
}
