use log::{error, warn};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::flow::FlowRecord;
use crate::table::{FlowTable, MAX_FLOWS};
use crate::vxlan;

/// Datagrams requested per batched receive.
pub const BATCH_SIZE: usize = 256;
/// Bytes available to each datagram in a batch; longer ones are truncated.
pub const PKT_BUF_LEN: usize = 2048;
/// Socket receive timeout bounding every blocking call in the loop.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Cloneable cancellation handle for a running capture.
///
/// [`CaptureContext::run`] holds `&mut self`, so this aliasing flag is the
/// only way another thread can end a run before its deadline.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the run to exit at the next batch boundary.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// One VXLAN capture endpoint: socket, batch buffers, flow table and
/// snapshot buffer, all owned for the context's lifetime.
///
/// The core is single-threaded: `run` and `flush` take `&mut self` and are
/// therefore mutually exclusive. Several contexts may bind the same port
/// from different threads; `SO_REUSEPORT` load-balances between them and
/// they share nothing.
pub struct CaptureContext {
    socket: UdpSocket,
    stop: Arc<AtomicBool>,
    table: FlowTable,
    bufs: Box<[[u8; PKT_BUF_LEN]]>,
    snapshot: Vec<FlowRecord>,
    total_pkts: u64,
    total_bytes: u64,
    total_parsed: u64,
}

impl CaptureContext {
    /// Bind a capture socket on the wildcard address.
    ///
    /// `SO_REUSEPORT` is required so multiple contexts can share the
    /// endpoint; its absence is a hard error. The receive buffer hint is
    /// best-effort, the kernel may clamp it; [`CaptureContext::rcvbuf`]
    /// reports what was actually granted.
    pub fn bind(port: u16, rcvbuf_hint: usize) -> io::Result<CaptureContext> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        if let Err(e) = socket.set_recv_buffer_size(rcvbuf_hint) {
            warn!("receive buffer hint of {} bytes not applied: {}", rcvbuf_hint, e);
        }
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;

        Ok(CaptureContext {
            socket: socket.into(),
            stop: Arc::new(AtomicBool::new(false)),
            table: FlowTable::new(),
            bufs: vec![[0u8; PKT_BUF_LEN]; BATCH_SIZE].into_boxed_slice(),
            snapshot: Vec::with_capacity(MAX_FLOWS),
            total_pkts: 0,
            total_bytes: 0,
            total_parsed: 0,
        })
    }

    /// Receive buffer size actually granted by the kernel.
    pub fn rcvbuf(&self) -> io::Result<usize> {
        SockRef::from(&self.socket).recv_buffer_size()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Run the ingest loop for `duration_ms` milliseconds.
    ///
    /// Gross counters are zeroed at the start. Each iteration issues one
    /// batched receive that blocks until at least one datagram is ready
    /// and then drains everything already queued, up to [`BATCH_SIZE`].
    /// Deadline and stop flag are checked at batch boundaries only, so a
    /// batch already received is always fully processed. Returns the
    /// run's received-datagram count.
    pub fn run(&mut self, duration_ms: u64) -> u64 {
        self.stop.store(false, Ordering::Relaxed);
        self.total_pkts = 0;
        self.total_bytes = 0;
        self.total_parsed = 0;

        let deadline = Duration::from_millis(duration_ms);
        let start = Instant::now();
        let fd = self.socket.as_raw_fd();

        let mut iovecs: [libc::iovec; BATCH_SIZE] = unsafe { mem::zeroed() };
        let mut msgs: [libc::mmsghdr; BATCH_SIZE] = unsafe { mem::zeroed() };
        for (i, buf) in self.bufs.iter_mut().enumerate() {
            iovecs[i].iov_base = buf.as_mut_ptr() as *mut libc::c_void;
            msgs[i].msg_hdr.msg_iov = &mut iovecs[i];
            msgs[i].msg_hdr.msg_iovlen = 1;
        }

        while !self.stop.load(Ordering::Relaxed) {
            for iov in iovecs.iter_mut() {
                iov.iov_len = PKT_BUF_LEN;
            }

            let n = unsafe {
                libc::recvmmsg(
                    fd,
                    msgs.as_mut_ptr(),
                    BATCH_SIZE as libc::c_uint,
                    libc::MSG_WAITFORONE,
                    ptr::null_mut(),
                )
            };

            if n > 0 {
                for (msg, buf) in msgs.iter().zip(self.bufs.iter()).take(n as usize) {
                    let len = msg.msg_len as usize;
                    self.total_pkts += 1;
                    self.total_bytes += len as u64;
                    if let Some(inner) = vxlan::parse(&buf[..len]) {
                        self.total_parsed += 1;
                        self.table.record(&inner.key, inner.total_len);
                    }
                }
            } else if n < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(code)
                        if code == libc::EAGAIN
                            || code == libc::EWOULDBLOCK
                            || code == libc::EINTR
                            || code == libc::ETIMEDOUT => {}
                    _ => {
                        error!("batched receive failed: {}", err);
                        break;
                    }
                }
            }

            if start.elapsed() >= deadline {
                break;
            }
        }

        self.total_pkts
    }

    /// Snapshot and reset: drain the table into the context-owned record
    /// buffer and zero it. Returns the record count. Callable only between
    /// runs; the records stay readable via [`CaptureContext::flush_buf`]
    /// until the next flush.
    pub fn flush(&mut self) -> usize {
        self.table.flush_into(&mut self.snapshot)
    }

    /// Records produced by the last [`CaptureContext::flush`].
    pub fn flush_buf(&self) -> &[FlowRecord] {
        &self.snapshot
    }

    /// Datagrams received during the last run, regardless of decode outcome.
    pub fn total_packets(&self) -> u64 {
        self.total_pkts
    }

    /// On-wire bytes received during the last run.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Datagrams decoded into flow updates during the last run. Bumped
    /// before the table call, so packets dropped by the soft cap or the
    /// probe budget still count; the difference against the snapshot's
    /// packet sum is the observable aggregation loss.
    pub fn total_parsed(&self) -> u64 {
        self.total_parsed
    }

    /// Live distinct-flow count in the table.
    pub fn num_flows(&self) -> usize {
        self.table.len()
    }
}
