use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Route SIGINT and SIGTERM to the process-wide shutdown flag so blocking
/// loops can wind down cooperatively.
pub fn install() {
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

// only async-signal-safe work in here
extern "C" fn handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

pub fn flag() -> &'static AtomicBool {
    &SHUTDOWN
}
