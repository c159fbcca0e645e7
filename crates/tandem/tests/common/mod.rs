#![allow(dead_code)]

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tandem::ScriptRuntime;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a non-blocking pipe and return (read_fd, write_fd).
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe {
        libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
        libc::fcntl(fds[1], libc::F_SETFL, libc::O_NONBLOCK);
    }
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

pub fn write_fd(fd: &OwnedFd, data: &[u8]) {
    let ptr = data.as_ptr() as *const libc::c_void;
    let n = unsafe { libc::write(fd.as_raw_fd(), ptr, data.len()) };
    assert_eq!(n, data.len() as isize, "short pipe write");
}

/// Read everything currently available from a non-blocking fd.
pub fn drain_fd(fd: i32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
    out
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Script runtime that tracks context depth and idle notifications.
#[derive(Default)]
pub struct RecordingRuntime {
    depth: AtomicI32,
    idle: AtomicU64,
}

impl RecordingRuntime {
    pub fn depth(&self) -> i32 {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn idle_notifications(&self) -> u64 {
        self.idle.load(Ordering::SeqCst)
    }
}

impl ScriptRuntime for RecordingRuntime {
    fn enter_context(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_context(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn idle_notification(&self) {
        self.idle.fetch_add(1, Ordering::SeqCst);
    }
}
