/// Sequencer clock - one repeating timer that advances the step pointer
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::SequencerError;
use crate::sequencer::StepCounter;

/// Ticks the clock may owe before it gives up catching up and re-anchors.
const MAX_CATCH_UP_TICKS: u32 = 4;

struct RunningClock {
    interval: Duration,
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

/// Fires one tick per interval on a dedicated thread.
///
/// Deadlines are computed from a monotonic start instant, so a late tick does
/// not push every following tick back. At most one timer runs per clock.
pub struct SequencerClock {
    counter: StepCounter,
    running: Option<RunningClock>,
}

impl SequencerClock {
    pub fn new(counter: StepCounter) -> Self {
        Self {
            counter,
            running: None,
        }
    }

    pub fn counter(&self) -> &StepCounter {
        &self.counter
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Interval the running timer was started with.
    pub fn interval(&self) -> Option<Duration> {
        self.running.as_ref().map(|r| r.interval)
    }

    /// Start ticking. Each tick advances the counter and hands the new step
    /// to `on_tick`; the next tick waits until the handler returns.
    pub fn start<F>(&mut self, interval: Duration, mut on_tick: F) -> Result<(), SequencerError>
    where
        F: FnMut(usize) + Send + 'static,
    {
        if self.running.is_some() {
            tracing::warn!("clock already running, ignoring start");
            return Err(SequencerError::ClockAlreadyRunning);
        }

        let (cancel, cancelled) = channel::<()>();
        let counter = self.counter.clone();

        let handle = thread::Builder::new()
            .name("drumsqnc-clock".to_string())
            .spawn(move || {
                let Some(mut deadline) = Instant::now().checked_add(interval) else {
                    tracing::error!(?interval, "clock interval out of range");
                    return;
                };
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match cancelled.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            let step = counter.advance();
                            tracing::trace!(step, "tick");
                            on_tick(step);
                            match next_deadline(deadline, interval, Instant::now()) {
                                Some(next) => deadline = next,
                                None => {
                                    tracing::error!(?interval, "clock interval out of range");
                                    break;
                                }
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| SequencerError::ClockSpawn(e.to_string()))?;

        tracing::debug!(interval_ms = interval.as_secs_f64() * 1000.0, "clock started");
        self.running = Some(RunningClock {
            interval,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Cancel the timer. When this returns no further tick will fire.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.cancel.send(());
        if running.handle.thread().id() == thread::current().id() {
            // Stopping from inside a tick: the loop exits once the handler returns.
            tracing::warn!("clock stopped from its own tick handler");
            return;
        }
        if running.handle.join().is_err() {
            tracing::error!("clock thread panicked");
        }
        tracing::debug!("clock stopped");
    }
}

/// Deadline of the tick after `previous`. Stays on the fixed grid unless the
/// clock has fallen more than a few ticks behind (a stall or suspend), in
/// which case it resumes from `now` instead of firing every missed tick.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Option<Instant> {
    let next = previous.checked_add(interval)?;
    let behind = now.saturating_duration_since(next);
    if behind > interval.checked_mul(MAX_CATCH_UP_TICKS)? {
        tracing::debug!(?behind, "clock fell behind, re-anchoring");
        Some(now)
    } else {
        Some(next)
    }
}

impl Drop for SequencerClock {
    fn drop(&mut self) {
        self.stop();
    }
}
