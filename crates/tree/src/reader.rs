//! Streaming JSON buffer reader (spec.md §4.4 "Streaming JSON reader").
//!
//! Renders `[{...},{...},...]` to an [`OutputSink`] a chunk at a time,
//! resuming across "would block" the way the rest of the hub's I/O does
//! (spec.md §5: suspension points are explicit, not hidden inside a
//! general-purpose async runtime — spec.md §9 "Cooperative I/O in the
//! reader").

use hub_core::{DataSample, HubError, HubResult, OutputSink};

use crate::observation::ObsState;

/// Outcome delivered to `onDone` exactly once per reader (spec.md §4.4
/// point 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Ok,
    IoError,
    Canceled,
}

/// Result of a single `resume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStep {
    /// Made progress; call `resume` again to continue.
    Progress,
    /// The sink reported backpressure; wait for a writable-again
    /// notification before calling `resume` again.
    Blocked,
    /// Finished; `finish` has not yet been called on the reader.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Item,
    End,
    Done,
}

/// The `{Start, Sample, Comma, End}` state machine from spec.md §9, merged
/// here into `{Start, Item, End, Done}` — the comma is just a byte this
/// implementation prepends to an item's outbox chunk rather than a
/// separate state, since it never needs to survive a `Blocked` return on
/// its own (it's written atomically with the item bytes that follow it,
/// or not at all if backpressure arrives first).
pub struct BufferReader {
    state: State,
    /// The entry about to be rendered, held with a strong reference so its
    /// eviction from the buffer underneath this reader is observable via
    /// `DataSample::strong_count` (spec.md §4.4 point 3).
    next: Option<DataSample>,
    emitted_any: bool,
    outbox: Vec<u8>,
    outbox_pos: usize,
    canceled: bool,
}

impl BufferReader {
    pub(crate) fn new(next: Option<DataSample>) -> Self {
        Self {
            state: State::Start,
            next,
            emitted_any: false,
            outbox: Vec::new(),
            outbox_pos: 0,
            canceled: false,
        }
    }

    /// Mark the reader canceled; the next `resume` call returns `Done` and
    /// the caller should report `ReadOutcome::Canceled` (spec.md §5
    /// "Cancellation": deleting an observation with active readers
    /// completes each with *canceled*).
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn was_canceled(&self) -> bool {
        self.canceled
    }

    /// Drive the state machine until the sink blocks or the stream ends.
    /// `obs` must be the same observation the reader was created from;
    /// passing a different one is a caller bug (not distinguished from
    /// "observation deleted", handled instead by `cancel`).
    pub fn resume(&mut self, obs: &ObsState, sink: &mut dyn OutputSink) -> HubResult<ReaderStep> {
        if self.canceled {
            self.state = State::Done;
            return Ok(ReaderStep::Done);
        }
        loop {
            if self.outbox_pos < self.outbox.len() {
                match sink.write(&self.outbox[self.outbox_pos..]) {
                    Ok(0) => return Ok(ReaderStep::Blocked),
                    Ok(n) => {
                        self.outbox_pos += n;
                        continue;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        return Ok(ReaderStep::Blocked)
                    }
                    Err(e) => return Err(HubError::Io(e)),
                }
            }
            self.outbox.clear();
            self.outbox_pos = 0;

            match self.state {
                State::Start => {
                    self.outbox.push(b'[');
                    self.state = State::Item;
                }
                State::Item => match self.take_next(obs) {
                    Some(sample) => {
                        if self.emitted_any {
                            self.outbox.push(b',');
                        }
                        self.emitted_any = true;
                        self.outbox.extend(sample.to_json_fragment().into_bytes());
                        self.next = obs.sample_after(&sample);
                    }
                    None => {
                        self.state = State::End;
                    }
                },
                State::End => {
                    self.outbox.push(b']');
                    self.state = State::Done;
                }
                State::Done => return Ok(ReaderStep::Done),
            }
        }
    }

    /// Resolve `self.next`, degrading to the buffer's current oldest entry
    /// if the held candidate was evicted out from under the reader
    /// (spec.md §4.4 point 3).
    fn take_next(&mut self, obs: &ObsState) -> Option<DataSample> {
        let candidate = self.next.take()?;
        if candidate.strong_count() == 1 {
            obs.oldest()
        } else {
            Some(candidate)
        }
    }
}

/// Drive `reader` to completion or blockage, invoking `on_done` at most
/// once if it finishes. Returns the step the caller blocked on (if any) so
/// it can re-invoke `resume` once the sink signals writable-again.
pub fn drive(
    reader: &mut BufferReader,
    obs: &ObsState,
    sink: &mut dyn OutputSink,
    on_done: impl FnOnce(ReadOutcome),
) -> ReaderStep {
    loop {
        match reader.resume(obs, sink) {
            Ok(ReaderStep::Progress) => continue,
            Ok(ReaderStep::Blocked) => return ReaderStep::Blocked,
            Ok(ReaderStep::Done) => {
                let outcome = if reader.canceled {
                    ReadOutcome::Canceled
                } else {
                    ReadOutcome::Ok
                };
                on_done(outcome);
                return ReaderStep::Done;
            }
            Err(_) => {
                on_done(ReadOutcome::IoError);
                return ReaderStep::Done;
            }
        }
    }
}
