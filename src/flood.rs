use log::{error, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::signal;

/// Upper bound on sender workers; also the size of the counter array.
pub const MAX_WORKERS: usize = 64;
/// Datagrams per batched send.
pub const SEND_BATCH: usize = 256;
pub const DEFAULT_PKT_SIZE: usize = 128;
pub const DEFAULT_TOTAL_FLOWS: usize = 100_000;
pub const MIN_PKT_SIZE: usize = 64;
pub const MAX_PKT_SIZE: usize = 9000;
const SEND_BUF_SIZE: usize = 16 * 1024 * 1024;
const VNI: u32 = 12345;

/// Synthesize one VXLAN-encapsulated IPv4 datagram for `flow_id`.
///
/// `buf.len()` is the datagram size; callers clamp it to
/// [`MIN_PKT_SIZE`, `MAX_PKT_SIZE`]. The layout is the one the capture
/// decoder accepts: VXLAN header with the VNI-present flag, zeroed inner
/// MACs, and an options-free IPv4 header whose addresses, protocol and
/// ports are derived from `flow_id`. The port pair is written only when
/// the datagram has room for it.
pub fn build_vxlan_packet(buf: &mut [u8], flow_id: u32) {
    for b in buf.iter_mut() {
        *b = 0;
    }

    // VXLAN header: VNI-present flag, VNI in bytes 4..7
    buf[0] = 0x08;
    buf[4] = ((VNI >> 16) & 0xFF) as u8;
    buf[5] = ((VNI >> 8) & 0xFF) as u8;
    buf[6] = (VNI & 0xFF) as u8;

    // inner Ethernet: zeroed MACs, IPv4 EtherType
    buf[20] = 0x08;
    buf[21] = 0x00;

    // inner IPv4, no options
    let ip_total = (buf.len() - 22) as u16;
    buf[22] = 0x45;
    buf[24..26].copy_from_slice(&ip_total.to_be_bytes());
    buf[30] = 64; // TTL
    buf[31] = if flow_id % 3 == 0 { 17 } else { 6 };

    // src spread across 10.0.0.0/8, dst across 172.16.0.0/12
    buf[34] = 10;
    buf[35] = ((flow_id >> 16) & 0xFF) as u8;
    buf[36] = ((flow_id >> 8) & 0xFF) as u8;
    buf[37] = (flow_id & 0xFF) as u8 | 1;

    buf[38] = 172;
    buf[39] = 16 + ((flow_id >> 16) & 0x0F) as u8;
    buf[40] = ((flow_id >> 8) & 0xFF) as u8;
    buf[41] = (flow_id & 0xFF) as u8 | 1;

    if buf.len() >= 46 {
        let sport = (1024 + flow_id % 60000) as u16;
        let dport = (80 + flow_id % 1000) as u16;
        buf[42..44].copy_from_slice(&sport.to_be_bytes());
        buf[44..46].copy_from_slice(&dport.to_be_bytes());
    }
}

/// Pool of sender workers flooding one target with synthetic VXLAN
/// traffic.
///
/// Each worker owns its socket, its pre-built batch of datagrams and one
/// slot in a fixed counter array; the only cross-thread state is those
/// single-writer counters, the pool stop flag and the process shutdown
/// flag tripped by signal handlers.
pub struct Generator {
    workers: Vec<JoinHandle<()>>,
    counters: Arc<[AtomicU64; MAX_WORKERS]>,
    stop: Arc<AtomicBool>,
    num_workers: usize,
    pkt_size: usize,
}

impl Generator {
    /// Spawn the worker pool and start sending immediately. Worker `w`
    /// owns flow ids `w * flows_per_worker ..`, so workers never produce
    /// overlapping flows.
    pub fn start(
        target: SocketAddr,
        workers: usize,
        pkt_size: usize,
        total_flows: usize,
    ) -> io::Result<Generator> {
        let num_workers = workers.max(1).min(MAX_WORKERS);
        let pkt_size = pkt_size.max(MIN_PKT_SIZE).min(MAX_PKT_SIZE);
        let flows_per_worker = (total_flows / num_workers).max(1);

        const ZERO: AtomicU64 = AtomicU64::new(0);
        let counters: Arc<[AtomicU64; MAX_WORKERS]> = Arc::new([ZERO; MAX_WORKERS]);
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let counters = Arc::clone(&counters);
            let stop = Arc::clone(&stop);
            handles.push(
                thread::Builder::new()
                    .name(format!("sender-{}", id))
                    .spawn(move || {
                        if let Err(e) =
                            send_loop(target, pkt_size, flows_per_worker, id, &counters[id], &stop)
                        {
                            error!("sender-{} stopped: {}", id, e);
                        }
                    })?,
            );
        }

        Ok(Generator {
            workers: handles,
            counters,
            stop,
            num_workers,
            pkt_size,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Datagram size after clamping.
    pub fn pkt_size(&self) -> usize {
        self.pkt_size
    }

    /// Datagrams sent so far, across all workers.
    pub fn total_sent(&self) -> u64 {
        self.counters[..self.num_workers]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Ask the workers to wind down.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop and reap the pool; returns the per-worker sent counts.
    pub fn join(self) -> Vec<u64> {
        let Generator {
            workers,
            counters,
            stop,
            num_workers,
            ..
        } = self;

        stop.store(true, Ordering::Relaxed);
        for handle in workers {
            let _ = handle.join();
        }
        counters[..num_workers]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

fn send_loop(
    target: SocketAddr,
    pkt_size: usize,
    flows: usize,
    id: usize,
    sent: &AtomicU64,
    stop: &AtomicBool,
) -> io::Result<()> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_send_buffer_size(SEND_BUF_SIZE) {
        warn!("sender-{}: send buffer hint not applied: {}", id, e);
    }

    // one datagram per flow this worker owns, capped at the batch width
    let batch = SEND_BATCH.min(flows);
    let mut packets = vec![0u8; batch * pkt_size];
    for (i, pkt) in packets.chunks_mut(pkt_size).enumerate() {
        build_vxlan_packet(pkt, (id * flows + i) as u32);
    }

    let addr = SockAddr::from(target);
    let mut iovecs: Vec<libc::iovec> = Vec::with_capacity(batch);
    for pkt in packets.chunks_mut(pkt_size) {
        iovecs.push(libc::iovec {
            iov_base: pkt.as_mut_ptr() as *mut libc::c_void,
            iov_len: pkt_size,
        });
    }
    let mut msgs: Vec<libc::mmsghdr> = Vec::with_capacity(batch);
    for iov in iovecs.iter_mut() {
        let mut msg: libc::mmsghdr = unsafe { mem::zeroed() };
        msg.msg_hdr.msg_name = addr.as_ptr() as *mut libc::c_void;
        msg.msg_hdr.msg_namelen = addr.len();
        msg.msg_hdr.msg_iov = iov;
        msg.msg_hdr.msg_iovlen = 1;
        msgs.push(msg);
    }

    let fd = socket.as_raw_fd();
    while !stop.load(Ordering::Relaxed) && !signal::shutdown_requested() {
        let n = unsafe { libc::sendmmsg(fd, msgs.as_mut_ptr(), batch as libc::c_uint, 0) };
        if n > 0 {
            sent.fetch_add(n as u64, Ordering::Relaxed);
        } else {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code)
                    if code == libc::ENOBUFS
                        || code == libc::EAGAIN
                        || code == libc::EWOULDBLOCK
                        || code == libc::EINTR =>
                {
                    // kernel send queue is full, give it a moment
                    thread::sleep(Duration::from_micros(1));
                }
                _ => return Err(err),
            }
        }
    }
    Ok(())
}
