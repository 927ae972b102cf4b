use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use crate::capture::CaptureContext;
use crate::threads::exporter::Snapshot;

/// Drive run/flush windows until shutdown is requested, handing each
/// window's snapshot to the exporter. The capture context never leaves
/// this thread; only the flat record copies do.
pub fn aggregate(
    mut ctx: CaptureContext,
    interval_ms: u64,
    sender: mpsc::Sender<Snapshot>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        let received = ctx.run(interval_ms);
        let bytes = ctx.total_bytes();
        let parsed = ctx.total_parsed();
        let flows = ctx.flush();
        debug!("window closed: {} datagrams, {} flows", received, flows);

        let snapshot = Snapshot {
            received,
            bytes,
            parsed,
            records: ctx.flush_buf().to_vec(),
        };
        if sender.send(snapshot).is_err() {
            break;
        }
    }
    info!("aggregator stopped");
}
