//! Fire-and-forget progress reporting over a bounded channel.
//!
//! Producers call [`ProgressSink::emit`], which never blocks: when the
//! consumer is slow the event is dropped, and when it is gone (or was never
//! attached) emitting is a no-op.

use std::fmt;

use tokio::sync::mpsc;

use launchkit_core::{ArtifactKey, Direction};

use crate::orchestrator::SyncState;

/// A long-running step of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cleaning,
    Hashing,
    Compressing,
    Diffing,
    Uploading,
    Downloading,
    Installing,
    Patching,
    Verifying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Cleaning => "cleaning temp files",
            Stage::Hashing => "calculating hashes",
            Stage::Compressing => "compressing",
            Stage::Diffing => "computing patch",
            Stage::Uploading => "uploading",
            Stage::Downloading => "downloading",
            Stage::Installing => "installing",
            Stage::Patching => "applying patch",
            Stage::Verifying => "verifying files",
        };
        f.write_str(label)
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The orchestrator entered a new state.
    State(SyncState),
    /// A step started that reports no granular progress.
    Step { stage: Stage },
    /// Completion of a step, in `[0, 100]`.
    Percent { stage: Stage, percent: f32 },
    /// Byte progress of artifact `index` (0-based) out of `count`.
    Transfer {
        direction: Direction,
        key: ArtifactKey,
        index: usize,
        count: usize,
        transferred: u64,
        total: u64,
    },
}

impl ProgressEvent {
    /// Overall completion in `[0, 100]` for transfer events: the artifact
    /// position composed with that artifact's own byte progress.
    pub fn overall_percent(&self) -> Option<f32> {
        match self {
            ProgressEvent::Percent { percent, .. } => Some(*percent),
            ProgressEvent::Transfer {
                index,
                count,
                transferred,
                total,
                ..
            } => Some(compose_percent(*index, *count, *transferred, *total)),
            _ => None,
        }
    }
}

/// `((index + transferred/total) / count) * 100`, clamped to `[0, 100]`.
pub fn compose_percent(index: usize, count: usize, transferred: u64, total: u64) -> f32 {
    if count == 0 {
        return 100.0;
    }
    let fraction = if total == 0 {
        0.0
    } else {
        (transferred as f64 / total as f64).min(1.0)
    };
    let overall = (index as f64 + fraction) / count as f64 * 100.0;
    overall.clamp(0.0, 100.0) as f32
}

/// Sending half of the progress channel. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Full or closed: drop the event, never block the producer.
            let _ = tx.try_send(event);
        }
    }

    pub fn state(&self, state: SyncState) {
        self.emit(ProgressEvent::State(state));
    }

    pub fn step(&self, stage: Stage) {
        self.emit(ProgressEvent::Step { stage });
    }

    pub fn percent(&self, stage: Stage, percent: f32) {
        self.emit(ProgressEvent::Percent {
            stage,
            percent: percent.clamp(0.0, 100.0),
        });
    }
}

/// Receiving half of the progress channel.
pub type ProgressReceiver = mpsc::Receiver<ProgressEvent>;

/// Create a bounded progress channel holding at most `capacity` pending events.
pub fn channel(capacity: usize) -> (ProgressSink, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSink { tx: Some(tx) }, rx)
}

/// Turns a raw percent stream into a monotonically non-decreasing one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Monotonic {
    last: f32,
}

impl Monotonic {
    /// Clamp `value` to `[last, 100]` and remember it.
    pub fn next(&mut self, value: f32) -> f32 {
        let value = if value.is_finite() { value } else { self.last };
        self.last = value.clamp(self.last, 100.0);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_without_blocking() {
        let (sink, mut rx) = channel(2);
        for i in 0..10 {
            sink.percent(Stage::Hashing, i as f32);
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[test]
    fn closed_channel_is_silent() {
        let (sink, rx) = channel(4);
        drop(rx);
        sink.step(Stage::Diffing);
        ProgressSink::disabled().step(Stage::Diffing);
    }

    #[test]
    fn percent_is_clamped() {
        let (sink, mut rx) = channel(4);
        sink.percent(Stage::Installing, 140.0);
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Percent {
                stage: Stage::Installing,
                percent: 100.0
            }
        );
    }

    #[test]
    fn compose_percent_spans_artifacts() {
        assert_eq!(compose_percent(0, 4, 0, 100), 0.0);
        assert_eq!(compose_percent(1, 4, 50, 100), 37.5);
        assert_eq!(compose_percent(3, 4, 100, 100), 100.0);
        assert_eq!(compose_percent(2, 4, 10, 0), 50.0);
        assert_eq!(compose_percent(0, 0, 0, 0), 100.0);
    }

    #[test]
    fn monotonic_never_goes_back() {
        let mut m = Monotonic::default();
        assert_eq!(m.next(10.0), 10.0);
        assert_eq!(m.next(4.0), 10.0);
        assert_eq!(m.next(f32::NAN), 10.0);
        assert_eq!(m.next(250.0), 100.0);
    }
}
