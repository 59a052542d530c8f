//! Ordered queue of pending writes.
//!
//! The caller thread appends entries; the worker thread drains them
//! front-to-back when the device reports write readiness. Each entry keeps
//! a partial-progress counter so a pass interrupted by a would-block
//! condition resumes exactly where it stopped.
//!
//! A hard write error is treated as evidence the channel is no longer
//! usable: the failing entry and every entry still queued behind it
//! complete with [`WriteStatus::Failure`] and the queue is left empty.
//!
//! Completion callbacks are collected under the queue lock but invoked
//! after it is released, so a completion may safely enqueue another write.

#[cfg(unix)]
use std::collections::VecDeque;
#[cfg(unix)]
use std::sync::Mutex;

/// Completion code delivered to a write's callback, exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// Every byte of the payload reached the device.
    Success,

    /// The write failed terminally, or the port was closed while the
    /// entry was still queued.
    Failure,

    /// The port was not open when the write was submitted; the entry was
    /// never queued.
    NotOpen,
}

/// Result of one injected write attempt on the front entry.
#[cfg(unix)]
pub(crate) enum WriteAttempt {
    /// The device accepted this many bytes.
    Wrote(usize),

    /// The device cannot accept data right now; re-wait on the multiplexer.
    WouldBlock,

    /// Terminal error; the channel is considered broken.
    Fatal,
}

/// Result of one drain pass.
#[cfg(unix)]
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DrainOutcome {
    /// Every entry completed; write interest can be dropped.
    Drained,

    /// The front entry is blocked mid-payload; keep write interest armed.
    Pending,

    /// A fatal error failed the whole queue; write interest can be dropped.
    Failed,
}

pub(crate) type Completion = Box<dyn FnOnce(WriteStatus) + Send>;

#[cfg(unix)]
struct PendingWrite {
    data: Vec<u8>,
    written: usize,
    completion: Completion,
}

#[cfg(unix)]
pub(crate) struct WriteQueue {
    entries: Mutex<VecDeque<PendingWrite>>,
}

#[cfg(unix)]
impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Appends a pending write to the back of the queue.
    pub(crate) fn push(&self, data: Vec<u8>, completion: Completion) {
        self.entries.lock().unwrap().push_back(PendingWrite {
            data,
            written: 0,
            completion,
        });
    }

    /// Drains the queue front-to-back through `attempt`.
    ///
    /// `attempt` receives the unwritten remainder of the front entry and
    /// reports how the device responded. The single device syscall it makes
    /// runs under the queue lock; completions do not.
    pub(crate) fn drain_with(
        &self,
        mut attempt: impl FnMut(&[u8]) -> WriteAttempt,
    ) -> DrainOutcome {
        let mut finished: Vec<(Completion, WriteStatus)> = Vec::new();

        let outcome = {
            let mut entries = self.entries.lock().unwrap();

            'drain: loop {
                let Some(front) = entries.front_mut() else {
                    break DrainOutcome::Drained;
                };

                while front.written < front.data.len() {
                    match attempt(&front.data[front.written..]) {
                        WriteAttempt::Wrote(n) => front.written += n,
                        WriteAttempt::WouldBlock => break 'drain DrainOutcome::Pending,
                        WriteAttempt::Fatal => {
                            for entry in entries.drain(..) {
                                finished.push((entry.completion, WriteStatus::Failure));
                            }

                            break 'drain DrainOutcome::Failed;
                        }
                    }
                }

                let entry = entries.pop_front().unwrap();
                finished.push((entry.completion, WriteStatus::Success));
            }
        };

        for (completion, status) in finished {
            completion(status);
        }

        outcome
    }

    /// Completes every queued entry with `status` and empties the queue.
    pub(crate) fn fail_all(&self, status: WriteStatus) {
        let drained: Vec<PendingWrite> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain(..).collect()
        };

        for entry in drained {
            (entry.completion)(status);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_completion(
        counter: &Arc<AtomicUsize>,
        expected: WriteStatus,
    ) -> Completion {
        let counter = counter.clone();
        Box::new(move |status| {
            assert_eq!(status, expected);
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn full_write_completes_each_entry_once() {
        let queue = WriteQueue::new();
        let completions = Arc::new(AtomicUsize::new(0));

        queue.push(
            b"abc".to_vec(),
            counting_completion(&completions, WriteStatus::Success),
        );
        queue.push(
            b"defg".to_vec(),
            counting_completion(&completions, WriteStatus::Success),
        );

        let outcome = queue.drain_with(|chunk| WriteAttempt::Wrote(chunk.len()));

        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(completions.load(Ordering::SeqCst), 2);

        // A second pass over the empty queue completes nothing further.
        let outcome = queue.drain_with(|_| WriteAttempt::Wrote(0));
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(completions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn partial_progress_survives_would_block() {
        let queue = WriteQueue::new();
        let completions = Arc::new(AtomicUsize::new(0));

        queue.push(
            b"hello world".to_vec(),
            counting_completion(&completions, WriteStatus::Success),
        );

        // First pass accepts 5 bytes, then blocks.
        let mut first_call = true;
        let outcome = queue.drain_with(|chunk| {
            if first_call {
                first_call = false;
                assert_eq!(chunk, b"hello world");
                WriteAttempt::Wrote(5)
            } else {
                WriteAttempt::WouldBlock
            }
        });
        assert_eq!(outcome, DrainOutcome::Pending);
        assert_eq!(completions.load(Ordering::SeqCst), 0);

        // Next pass sees only the remainder.
        let outcome = queue.drain_with(|chunk| {
            assert_eq!(chunk, b" world");
            WriteAttempt::Wrote(chunk.len())
        });
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fatal_error_fails_current_and_remaining_entries() {
        let queue = WriteQueue::new();
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        queue.push(
            b"first".to_vec(),
            counting_completion(&succeeded, WriteStatus::Success),
        );
        queue.push(
            b"second".to_vec(),
            counting_completion(&failed, WriteStatus::Failure),
        );
        queue.push(
            b"third".to_vec(),
            counting_completion(&failed, WriteStatus::Failure),
        );

        let mut writes = 0;
        let outcome = queue.drain_with(|chunk| {
            writes += 1;
            if writes == 1 {
                WriteAttempt::Wrote(chunk.len())
            } else {
                WriteAttempt::Fatal
            }
        });

        assert_eq!(outcome, DrainOutcome::Failed);
        assert_eq!(succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 2);

        // Queue must be empty afterward.
        let outcome = queue.drain_with(|_| WriteAttempt::Fatal);
        assert_eq!(outcome, DrainOutcome::Drained);
    }

    #[test]
    fn fail_all_completes_every_entry() {
        let queue = WriteQueue::new();
        let completions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            queue.push(
                b"data".to_vec(),
                counting_completion(&completions, WriteStatus::Failure),
            );
        }

        queue.fail_all(WriteStatus::Failure);
        assert_eq!(completions.load(Ordering::SeqCst), 3);

        queue.fail_all(WriteStatus::Failure);
        assert_eq!(completions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn completion_may_enqueue_without_deadlock() {
        let queue = Arc::new(WriteQueue::new());
        let followup_done = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_done = followup_done.clone();
        queue.push(
            b"first".to_vec(),
            Box::new(move |status| {
                assert_eq!(status, WriteStatus::Success);
                let done = inner_done.clone();
                inner_queue.push(
                    b"followup".to_vec(),
                    Box::new(move |status| {
                        assert_eq!(status, WriteStatus::Success);
                        done.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        let outcome = queue.drain_with(|chunk| WriteAttempt::Wrote(chunk.len()));
        assert_eq!(outcome, DrainOutcome::Drained);

        // The follow-up write was queued by the completion and drains next.
        let outcome = queue.drain_with(|chunk| WriteAttempt::Wrote(chunk.len()));
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(followup_done.load(Ordering::SeqCst), 1);
    }
}
