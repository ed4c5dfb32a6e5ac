//! Traits for the collaborators the core consumes but does not implement
//! (spec §6): a clock, and the write side of the backup store's atomic
//! file primitive. Kept here, not in `hub-tree`, so both `hub-backup` and
//! `hub-tree` can depend on the same abstraction without depending on
//! each other for it.

/// Monotonic and wall clock, matching spec §6 "Consumed from collaborators".
///
/// The default `SystemClock` is what `hub-cli` wires up; tests use a fake
/// so that `minPeriod`/backup-cadence behavior is deterministic.
pub trait Clock {
    /// Wall-clock seconds since the Unix epoch.
    fn wall_seconds(&self) -> f64;

    /// Monotonic milliseconds since an arbitrary, process-local origin.
    fn monotonic_millis(&self) -> u64;
}

/// Real clock backed by `std::time`.
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_seconds(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs_f64()
    }

    fn monotonic_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A timer abstraction (spec §6): schedule a one-shot callback after an
/// interval, or cancel it before it fires. The actual fd-monitoring/event
/// loop that drives these callbacks lives outside the core (spec §1
/// "out of scope") — `hub-tree` only needs to track *that* a timer is
/// armed, not run one. `NullTimerDriver` never fires; it exists so
/// `hub-tree`'s backup-cadence bookkeeping has something to hand scheduling
/// intent to when no real event loop is wired up (e.g. in unit tests).
pub trait TimerDriver {
    /// Arm a one-shot timer `delay_ms` from now. Returns an opaque handle
    /// the driver can later `cancel`.
    fn schedule(&mut self, delay_ms: u64) -> u64;

    /// Cancel a previously scheduled timer. A no-op if it already fired.
    fn cancel(&mut self, handle: u64);
}

/// A `TimerDriver` that never fires its timers; callers only use it to
/// track "a timer is pending" bookkeeping without a real reactor attached.
#[derive(Default)]
pub struct NullTimerDriver {
    next_handle: u64,
}

impl TimerDriver for NullTimerDriver {
    fn schedule(&mut self, _delay_ms: u64) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn cancel(&mut self, _handle: u64) {}
}

/// Non-blocking output sink for the streaming JSON buffer reader (spec §6,
/// §4.4 "Streaming JSON reader"). Mirrors a `write(2)`-style contract:
/// `Ok(n)` with `n < buf.len()` means the sink accepted a prefix and the
/// caller should wait for a writable-again notification before resuming.
pub trait OutputSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;
}

/// Deterministic clock for tests, exposed (not `#[cfg(test)]`-gated) so
/// downstream crates' own test suites can depend on it too.
pub mod testing {
    use super::Clock;
    use std::cell::Cell;

    pub struct FakeClock {
        wall: Cell<f64>,
        mono_ms: Cell<u64>,
    }

    impl FakeClock {
        pub fn new(wall: f64, mono_ms: u64) -> Self {
            Self {
                wall: Cell::new(wall),
                mono_ms: Cell::new(mono_ms),
            }
        }

        pub fn set_wall(&self, wall: f64) {
            self.wall.set(wall);
        }

        pub fn advance_millis(&self, delta: u64) {
            self.mono_ms.set(self.mono_ms.get() + delta);
        }
    }

    impl Clock for FakeClock {
        fn wall_seconds(&self) -> f64 {
            self.wall.get()
        }

        fn monotonic_millis(&self) -> u64 {
            self.mono_ms.get()
        }
    }

    /// In-memory `OutputSink` that can be told to block after N accepted
    /// bytes, to exercise the streaming reader's backpressure handling.
    pub struct RecordingSink {
        pub written: Vec<u8>,
        block_after: Option<usize>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                written: Vec::new(),
                block_after: None,
            }
        }

        /// The next `write` call accepts at most `n` more bytes total
        /// (across the lifetime of the sink) before reporting `WouldBlock`.
        pub fn block_after(n: usize) -> Self {
            Self {
                written: Vec::new(),
                block_after: Some(n),
            }
        }

        /// Lift the block so a subsequent `write` can make progress again.
        pub fn unblock(&mut self) {
            self.block_after = None;
        }
    }

    impl Default for RecordingSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl super::OutputSink for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self.block_after {
                Some(0) => Err(std::io::Error::from(std::io::ErrorKind::WouldBlock)),
                Some(limit) => {
                    let n = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    self.block_after = Some(limit - n);
                    Ok(n)
                }
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }
    }
}
