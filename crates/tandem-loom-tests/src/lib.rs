//! Loom tests for the bridge's cross-thread primitives.
//!
//! These check the handoff and the closed flag under all thread
//! interleavings using the loom model checker. With `--cfg loom`, tandem's
//! `sync` module swaps in loom's Mutex, Condvar and atomics, so the real
//! types are checked, not copies.
//!
//! Run with:
//! ```sh
//! RUSTFLAGS="--cfg loom" cargo test -p tandem-loom-tests --release
//! ```
//!
//! For faster iteration with bounded preemptions:
//! ```sh
//! LOOM_MAX_PREEMPTIONS=2 RUSTFLAGS="--cfg loom" cargo test -p tandem-loom-tests --release
//! ```

#[cfg(loom)]
mod tests {
    use loom::sync::atomic::{AtomicUsize, Ordering};
    use loom::sync::Arc;
    use loom::thread;

    use tandem::bridge::{Acquired, CancellationToken, HandoffSignal};

    // =========================================================================
    // Handoff
    // =========================================================================

    #[test]
    fn release_before_acquire_grants_permit() {
        loom::model(|| {
            let signal = Arc::new(HandoffSignal::new());
            let remote = signal.clone();

            let h = thread::spawn(move || remote.acquire());
            signal.release();

            assert_eq!(h.join().unwrap(), Acquired::Permit);
            assert_eq!(signal.pending(), 0);
        });
    }

    /// Pump and poll strictly alternate: the poller never runs two polls
    /// for one release.
    #[test]
    fn pump_and_poll_alternate() {
        loom::model(|| {
            let to_poller = Arc::new(HandoffSignal::new());
            let to_host = Arc::new(HandoffSignal::new());
            let polls = Arc::new(AtomicUsize::new(0));

            let poller = {
                let to_poller = to_poller.clone();
                let to_host = to_host.clone();
                let polls = polls.clone();
                thread::spawn(move || {
                    while to_poller.acquire() == Acquired::Permit {
                        polls.fetch_add(1, Ordering::SeqCst);
                        to_host.release();
                    }
                })
            };

            // Startup pump, then one pump per poll.
            for pump in 1..=2 {
                to_poller.release();
                assert_eq!(to_host.acquire(), Acquired::Permit);
                assert_eq!(polls.load(Ordering::SeqCst), pump);
            }

            to_poller.close();
            poller.join().unwrap();
            assert_eq!(polls.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn close_unblocks_waiter() {
        loom::model(|| {
            let signal = Arc::new(HandoffSignal::new());
            let remote = signal.clone();

            let h = thread::spawn(move || remote.acquire());
            signal.close();

            assert_eq!(h.join().unwrap(), Acquired::Closed);
        });
    }

    /// A release racing with close never lets a permit through after the
    /// close became visible.
    #[test]
    fn close_wins_over_racing_release() {
        loom::model(|| {
            let signal = Arc::new(HandoffSignal::new());

            let releaser = {
                let signal = signal.clone();
                thread::spawn(move || signal.release())
            };
            signal.close();
            releaser.join().unwrap();

            assert!(signal.is_closed());
            assert_eq!(signal.acquire(), Acquired::Closed);
        });
    }

    // =========================================================================
    // Closed flag
    // =========================================================================

    #[test]
    fn cancel_visible_after_handoff_close() {
        loom::model(|| {
            let token = CancellationToken::new();
            let signal = Arc::new(HandoffSignal::new());

            let poller = {
                let token = token.clone();
                let signal = signal.clone();
                thread::spawn(move || {
                    let acquired = signal.acquire();
                    (acquired, token.is_cancelled())
                })
            };

            // Teardown order: flag first, then close.
            assert!(token.cancel());
            signal.close();

            let (acquired, cancelled) = poller.join().unwrap();
            assert_eq!(acquired, Acquired::Closed);
            assert!(cancelled);
            assert!(!token.cancel());
        });
    }
}
