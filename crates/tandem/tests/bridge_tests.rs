//! End-to-end tests for the poll/pump bridge.
//!
//! Each test drives a real poller thread against a `HostQueue` run on the
//! test thread, which plays the host thread.

mod common;

use std::os::fd::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{drain_fd, init_logging, pipe, wait_until, write_fd, RecordingRuntime};
use tandem::{
    BridgeConfig, BridgeError, BridgeState, HostLoop, HostQueue, LoopBridge, NativeLoop, NullRuntime,
    PumpOutcome, Role, READABLE,
};

type Bridge<R = RecordingRuntime> = LoopBridge<HostQueue, R>;

fn secondary() -> BridgeConfig {
    BridgeConfig::new(Role::Secondary)
}

fn bridge_with(config: BridgeConfig) -> (Bridge, HostQueue, Arc<RecordingRuntime>) {
    init_logging();
    let native = NativeLoop::shared().expect("native loop");
    let host = HostQueue::new();
    let runtime = Arc::new(RecordingRuntime::default());
    let bridge = LoopBridge::new(config, native, host.clone(), runtime.clone());
    (bridge, host, runtime)
}

#[test]
fn timer_wakes_poller_and_runs_in_one_pump() {
    let (mut bridge, host, runtime) = bridge_with(secondary());

    let fired = Arc::new(AtomicUsize::new(0));
    let depth_seen = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        let depth_seen = depth_seen.clone();
        let runtime = runtime.clone();
        bridge.native().lock().unwrap().add_timer(Duration::from_millis(50), None, move |lp| {
            fired.fetch_add(1, Ordering::SeqCst);
            depth_seen.store(runtime.depth() as usize, Ordering::SeqCst);
            lp.stop();
        });
    }

    bridge.prepare_message_loop().unwrap();
    // Nothing is due at startup.
    let first = bridge.run_message_loop().unwrap();
    assert_eq!(first, PumpOutcome::Continue { dispatched: 0 });
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    host.run();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(depth_seen.load(Ordering::SeqCst), 1, "callback ran outside the script context");
    assert_eq!(runtime.depth(), 0);

    bridge.shutdown().unwrap();
    let stats = bridge.stats();
    assert_eq!(stats.stopped, 1);
    assert_eq!(stats.drained, 0);
    // Startup pump plus one pump per poll.
    assert_eq!(stats.pumps_run, stats.polls + 1);
    assert_eq!(stats.pumps_posted, stats.polls);
}

#[test]
fn teardown_unblocks_poller_stuck_in_wait() {
    let (mut bridge, host, _runtime) = bridge_with(secondary());
    bridge.prepare_message_loop().unwrap();
    bridge.run_message_loop().unwrap();

    // Nothing registered: the poller sleeps in an untimed wait.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bridge.stats().polls, 0);

    bridge.shutdown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Destroyed);
    assert!(bridge.is_closed());

    let stats = bridge.stats();
    assert_eq!(stats.polls, 1);
    assert_eq!(stats.pumps_run, 2);

    // The poller is gone: nothing else is ever posted.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(host.pending(), 0);
    assert_eq!(bridge.stats(), stats);
}

#[test]
fn pipe_readiness_is_dispatched_on_host_thread() {
    let (mut bridge, host, _runtime) = bridge_with(secondary());
    let (read_fd, write_fd_) = pipe().unwrap();

    let host_thread = thread::current().id();
    let received = Arc::new(Mutex::new(Vec::new()));
    let in_callback = Arc::new(AtomicBool::new(false));
    {
        let received = received.clone();
        let in_callback = in_callback.clone();
        let raw = read_fd.as_raw_fd();
        let mut native = bridge.native().lock().unwrap();
        unsafe {
            native
                .register(raw, READABLE, move |lp, readiness| {
                    assert!(readiness.readable);
                    assert_eq!(thread::current().id(), host_thread);
                    assert!(!in_callback.swap(true, Ordering::SeqCst), "overlapping callbacks");
                    let mut buf = received.lock().unwrap();
                    buf.extend(drain_fd(raw));
                    if buf.len() >= 9 {
                        lp.stop();
                    }
                    in_callback.store(false, Ordering::SeqCst);
                })
                .unwrap();
        }
    }

    bridge.prepare_message_loop().unwrap();
    bridge.run_message_loop().unwrap();

    let writer = thread::spawn(move || {
        for chunk in [b"abc", b"def", b"ghi"] {
            thread::sleep(Duration::from_millis(10));
            write_fd(&write_fd_, chunk);
        }
        write_fd_
    });

    host.run();
    let _write_fd = writer.join().unwrap();

    assert_eq!(&*received.lock().unwrap(), b"abcdefghi");
    bridge.shutdown().unwrap();
    let stats = bridge.stats();
    assert_eq!(stats.pumps_run, stats.polls + 1);
    drop(read_fd);
}

#[test]
fn second_poll_waits_for_pending_pump() {
    let (mut bridge, host, _runtime) = bridge_with(secondary());
    let (read_fd, write_end) = pipe().unwrap();

    let reads = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    {
        let reads = reads.clone();
        let raw = read_fd.as_raw_fd();
        let mut native = bridge.native().lock().unwrap();
        unsafe {
            native
                .register(raw, READABLE, move |_, _| {
                    reads.lock().unwrap().push(drain_fd(raw));
                })
                .unwrap();
        }
    }

    bridge.prepare_message_loop().unwrap();
    bridge.run_message_loop().unwrap();

    write_fd(&write_end, b"one");
    assert!(wait_until(Duration::from_secs(5), || host.pending() == 1));

    // A second event while the first pump is still queued: the poller is
    // parked on the handoff and must not poll again.
    write_fd(&write_end, b"two");
    thread::sleep(Duration::from_millis(50));
    let stats = bridge.stats();
    assert_eq!(stats.polls, 1);
    assert_eq!(stats.pumps_posted, 1);
    assert_eq!(host.pending(), 1);

    // One pump sees both writes.
    host.run_until_idle();
    assert_eq!(&*reads.lock().unwrap(), &[b"onetwo".to_vec()]);
    assert_eq!(bridge.stats().pumps_run, 2);

    bridge.shutdown().unwrap();
    drop(read_fd);
}

#[test]
fn drained_loop_quits_host_without_keep_alive() {
    let (mut bridge, host, _runtime) = bridge_with(secondary().with_keep_alive(false));
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        bridge.native().lock().unwrap().add_timer(Duration::from_millis(20), None, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    bridge.prepare_message_loop().unwrap();
    assert_eq!(bridge.run_message_loop().unwrap(), PumpOutcome::Continue { dispatched: 0 });
    host.run();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.stats().drained, 1);
    assert_eq!(bridge.stats().stopped, 0);
    bridge.shutdown().unwrap();
}

#[test]
fn keep_alive_wake_handle_holds_loop_open() {
    let (mut bridge, _host, _runtime) = bridge_with(secondary());
    bridge.prepare_message_loop().unwrap();
    assert!(bridge.native().lock().unwrap().is_alive());
    assert_eq!(bridge.run_message_loop().unwrap(), PumpOutcome::Continue { dispatched: 0 });
    bridge.shutdown().unwrap();
}

#[test]
fn idle_timer_fires_periodically_until_teardown() {
    let config = BridgeConfig::new(Role::Primary).with_idle_interval(Duration::from_millis(20));
    let (mut bridge, host, runtime) = bridge_with(config);

    bridge.native().lock().unwrap().add_timer(Duration::from_millis(200), None, |lp| lp.stop());
    bridge.prepare_message_loop().unwrap();
    let idle_id = bridge.idle_timer().expect("primary role runs the idle timer").id();
    bridge.run_message_loop().unwrap();
    host.run();

    let notified = runtime.idle_notifications();
    assert!(notified >= 3, "only {} idle notifications", notified);

    bridge.shutdown().unwrap();
    assert!(!bridge.native().lock().unwrap().has_timer(idle_id));

    let after = runtime.idle_notifications();
    thread::sleep(Duration::from_millis(80));
    assert_eq!(runtime.idle_notifications(), after);
}

#[test]
fn secondary_role_has_no_idle_timer() {
    let config = secondary().with_idle_interval(Duration::from_millis(5));
    let (mut bridge, _host, runtime) = bridge_with(config);
    bridge.prepare_message_loop().unwrap();
    assert!(bridge.idle_timer().is_none());
    bridge.run_message_loop().unwrap();
    thread::sleep(Duration::from_millis(30));
    bridge.shutdown().unwrap();
    assert_eq!(runtime.idle_notifications(), 0);
}

#[test]
fn lifecycle_errors() {
    let (mut bridge, _host, _runtime) = bridge_with(secondary());
    assert!(matches!(
        bridge.run_message_loop(),
        Err(BridgeError::NotPrepared(BridgeState::Created))
    ));

    bridge.prepare_message_loop().unwrap();
    assert!(matches!(
        bridge.prepare_message_loop(),
        Err(BridgeError::AlreadyPrepared(BridgeState::Prepared))
    ));

    // One wake source per native loop.
    let native = bridge.native().clone();
    let mut other = LoopBridge::new(secondary(), native, HostQueue::new(), Arc::new(NullRuntime));
    assert!(matches!(other.prepare_message_loop(), Err(BridgeError::WakeHandleTaken)));
    drop(other);

    // Torn down straight from Prepared; the poller was still on the handoff.
    bridge.shutdown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Destroyed);
    assert_eq!(bridge.stats().polls, 0);

    // Idempotent.
    bridge.shutdown().unwrap();
}

#[test]
fn unprepared_bridge_drops_cleanly() {
    let (bridge, _host, _runtime) = bridge_with(secondary());
    assert_eq!(bridge.state(), BridgeState::Created);
    drop(bridge);
}

#[test]
fn drop_joins_poller() {
    let (mut bridge, host, _runtime) = bridge_with(secondary());
    bridge.prepare_message_loop().unwrap();
    bridge.run_message_loop().unwrap();
    drop(bridge);
    assert_eq!(host.pending(), 0);
}

#[test]
fn panicking_callback_still_releases_handoff() {
    let (mut bridge, host, runtime) = bridge_with(secondary());
    bridge
        .native()
        .lock()
        .unwrap()
        .add_timer(Duration::ZERO, None, |_| panic!("native callback failed"));

    bridge.prepare_message_loop().unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| bridge.run_message_loop()));
    assert!(result.is_err());
    assert_eq!(runtime.depth(), 0, "script context leaked by unwinding pump");

    // If the pump had not released, the poller would never get to wait and
    // the wake below would not produce a pump.
    bridge.wake_handle().signal();
    assert!(wait_until(Duration::from_secs(5), || host.pending() == 1));

    bridge.shutdown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Destroyed);
}

#[test]
fn wake_signal_from_other_thread_produces_a_pump() {
    let (mut bridge, host, _runtime) = bridge_with(secondary());
    bridge.prepare_message_loop().unwrap();
    bridge.run_message_loop().unwrap();

    let wake = bridge.wake_handle();
    for round in 1..=3u64 {
        let remote = wake.clone();
        thread::spawn(move || remote.signal()).join().unwrap();
        assert!(wait_until(Duration::from_secs(5), || host.pending() == 1));
        host.run_until_idle();
        assert_eq!(bridge.stats().pumps_run, round + 1);
        assert!(bridge.stats().polls >= round);
    }

    bridge.shutdown().unwrap();
    let stats = bridge.stats();
    assert_eq!(stats.pumps_run, stats.polls + 1);
}

#[test]
fn with_new_loop_owns_its_loop() {
    init_logging();
    let host = HostQueue::new();
    let mut bridge =
        LoopBridge::with_new_loop(secondary(), host.clone(), Arc::new(NullRuntime)).unwrap();
    bridge.prepare_message_loop().unwrap();
    assert_eq!(bridge.run_message_loop().unwrap(), PumpOutcome::Continue { dispatched: 0 });
    bridge.shutdown().unwrap();
    assert_eq!(Arc::strong_count(bridge.native()), 1);
}

fn lock_native(bridge: &Bridge) -> std::sync::MutexGuard<'_, NativeLoop> {
    // A panicking callback poisons the loop's mutex; its state stays usable.
    bridge.native().lock().unwrap_or_else(|p| p.into_inner())
}

#[test]
fn native_loop_recovers_after_io_callback_panic() {
    let (mut bridge, host, runtime) = bridge_with(secondary());
    let (read_fd, write_end) = pipe().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        let raw = read_fd.as_raw_fd();
        let mut native = bridge.native().lock().unwrap();
        unsafe {
            native
                .register(raw, READABLE, move |_, _| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first read failed");
                    }
                    drain_fd(raw);
                })
                .unwrap();
        }
    }

    bridge.prepare_message_loop().unwrap();
    bridge.run_message_loop().unwrap();

    write_fd(&write_end, b"x");
    assert!(wait_until(Duration::from_secs(5), || host.pending() == 1));
    let result = panic::catch_unwind(AssertUnwindSafe(|| host.run_until_idle()));
    assert!(result.is_err());
    assert_eq!(runtime.depth(), 0);

    // A timer added from the host thread after the panic still wakes the poller.
    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = fired.clone();
        lock_native(&bridge).add_timer(Duration::from_millis(20), None, move |_| {
            fired.store(true, Ordering::SeqCst);
        });
    }
    assert!(wait_until(Duration::from_secs(1), || {
        host.run_until_idle();
        fired.load(Ordering::SeqCst) && calls.load(Ordering::SeqCst) == 2
    }));

    bridge.shutdown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Destroyed);
    drop(read_fd);
}

#[test]
fn teardown_resumes_after_panicking_drain() {
    let config = BridgeConfig::new(Role::Primary).with_idle_interval(Duration::from_millis(10));
    let (mut bridge, host, runtime) = bridge_with(config);
    bridge.prepare_message_loop().unwrap();
    let idle_id = bridge.idle_timer().expect("primary role runs the idle timer").id();
    bridge.run_message_loop().unwrap();

    lock_native(&bridge).add_timer(Duration::ZERO, None, |_| panic!("native callback failed"));
    assert!(wait_until(Duration::from_secs(5), || host.pending() == 1));

    // The drained pump panics inside teardown.
    let first = panic::catch_unwind(AssertUnwindSafe(|| bridge.shutdown()));
    assert!(first.is_err());
    assert_eq!(bridge.state(), BridgeState::Joined);
    assert!(bridge.idle_timer().is_none());
    assert!(!lock_native(&bridge).has_timer(idle_id));

    bridge.shutdown().unwrap();
    assert_eq!(bridge.state(), BridgeState::Destroyed);

    let after = runtime.idle_notifications();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(runtime.idle_notifications(), after);
}

#[test]
fn nul_in_thread_name_is_rejected_before_claiming_wake() {
    let (mut bridge, _host, _runtime) = bridge_with(secondary().with_thread_name("tandem\0poller"));
    assert!(matches!(bridge.prepare_message_loop(), Err(BridgeError::InvalidThreadName(_))));
    assert_eq!(bridge.state(), BridgeState::Created);
    assert!(!bridge.native().lock().unwrap().is_alive());

    // The wake source is still free for another bridge.
    let native = bridge.native().clone();
    let mut other = LoopBridge::new(secondary(), native, HostQueue::new(), Arc::new(NullRuntime));
    other.prepare_message_loop().unwrap();
    other.shutdown().unwrap();
}
