use crate::processor::JobOutcome;

use std::collections::VecDeque;
use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Validating,
    Extracting,
    Upscaling,
    Assembling,
    CleaningUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "Validating",
            Stage::Extracting => "Extracting",
            Stage::Upscaling => "Upscaling",
            Stage::Assembling => "Assembling",
            Stage::CleaningUp => "Cleaning up",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub current: u64,
    pub total: u64,
    pub message: String,
}

#[derive(Debug)]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Finished(JobOutcome),
}

/// Worker side of the event queue.
///
/// Periodic updates are dropped when the queue is full; stage boundaries are
/// parked locally and delivered in order ahead of anything that follows, so
/// the worker never waits on the consumer while a stage is running.
pub struct ProgressSink {
    sender: Sender<PipelineEvent>,
    pending: VecDeque<PipelineEvent>,
    stage: Stage,
    current: u64,
    total: u64,
    disconnected: bool,
}

impl ProgressSink {
    pub const CAPACITY: usize = 256;

    pub fn channel() -> (Self, Receiver<PipelineEvent>) {
        Self::with_capacity(Self::CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, Receiver<PipelineEvent>) {
        let (sender, receiver) = bounded(capacity);
        let sink = Self {
            sender,
            pending: VecDeque::new(),
            stage: Stage::Validating,
            current: 0,
            total: 0,
            disconnected: false,
        };
        (sink, receiver)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn begin(&mut self, stage: Stage, total: u64, message: impl Into<String>) {
        self.stage = stage;
        self.current = 0;
        self.total = total;
        tracing::info!(%stage, total, "stage started");
        self.milestone(0, message.into());
    }

    /// Re-announces the current stage once its real size is known.
    pub fn set_total(&mut self, total: u64, message: impl Into<String>) {
        self.total = total;
        self.current = self.current.min(total);
        tracing::debug!(stage = %self.stage, total, "stage size known");
        self.milestone(self.current, message.into());
    }

    /// Lossy in-stage update; never goes backwards and never exceeds the stage total.
    pub fn update(&mut self, current: u64, message: impl Into<String>) {
        let current = current.min(self.total);
        if current <= self.current {
            return;
        }
        self.current = current;
        let event = self.event(current, message.into());
        if !self.pending.is_empty() {
            self.flush_pending();
            if !self.pending.is_empty() {
                return;
            }
        }
        self.deliver(event);
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.current = self.total;
        self.milestone(self.total, message.into());
    }

    /// Hands the terminal outcome over; the job is over, so this may wait for the consumer.
    pub fn finish(mut self, outcome: JobOutcome) {
        self.pending.push_back(PipelineEvent::Finished(outcome));
        while let Some(event) = self.pending.pop_front() {
            if self.sender.send(event).is_err() {
                tracing::debug!("event receiver dropped before the job finished");
                break;
            }
        }
    }

    fn event(&self, current: u64, message: String) -> PipelineEvent {
        PipelineEvent::Progress(ProgressEvent {
            stage: self.stage,
            current,
            total: self.total,
            message,
        })
    }

    fn milestone(&mut self, current: u64, message: String) {
        let event = self.event(current, message);
        self.pending.push_back(event);
        self.flush_pending();
    }

    fn flush_pending(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            match self.sender.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.pending.push_front(event);
                    return;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.mark_disconnected();
                    self.pending.clear();
                    return;
                }
            }
        }
    }

    fn deliver(&mut self, event: PipelineEvent) {
        if let Err(TrySendError::Disconnected(_)) = self.sender.try_send(event) {
            self.mark_disconnected();
        }
    }

    fn mark_disconnected(&mut self) {
        if !self.disconnected {
            self.disconnected = true;
            tracing::debug!("event receiver dropped, progress is no longer reported");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(receiver: &Receiver<PipelineEvent>) -> Vec<ProgressEvent> {
        receiver.try_iter()
            .filter_map(|event| match event {
                PipelineEvent::Progress(progress) => Some(progress),
                PipelineEvent::Finished(_) => None,
            })
            .collect()
    }

    #[test]
    fn updates_are_monotonic_and_clamped() {
        let (mut sink, receiver) = ProgressSink::channel();
        sink.begin(Stage::Extracting, 10, "start");
        sink.update(4, "a");
        sink.update(2, "backwards");
        sink.update(4, "same");
        sink.update(25, "overshoot");
        sink.complete("done");

        let currents: Vec<u64> = drain(&receiver).iter().map(|e| e.current).collect();
        assert_eq!(currents, vec![0, 4, 10, 10]);
    }

    #[test]
    fn total_can_be_announced_after_the_stage_starts() {
        let (mut sink, receiver) = ProgressSink::channel();
        sink.begin(Stage::Extracting, 0, "probing");
        sink.update(3, "ignored before the size is known");
        sink.set_total(300, "extracting");
        sink.update(150, "half");

        let events: Vec<(u64, u64)> = drain(&receiver).iter().map(|e| (e.current, e.total)).collect();
        assert_eq!(events, vec![(0, 0), (0, 300), (150, 300)]);
        assert_eq!(sink.total(), 300);
    }

    #[test]
    fn stage_boundaries_survive_a_full_queue_in_order() {
        let (mut sink, receiver) = ProgressSink::with_capacity(2);
        sink.begin(Stage::Extracting, 100, "extract");
        for current in 1..=50 {
            sink.update(current, "tick");
        }
        sink.complete("extracted");
        sink.begin(Stage::Upscaling, 100, "upscale");

        let first = drain(&receiver);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].stage, Stage::Extracting);
        assert_eq!(first[0].current, 0);

        sink.update(60, "queue refills with the parked boundaries first");
        let rest: Vec<(Stage, u64)> = drain(&receiver).iter().map(|e| (e.stage, e.current)).collect();
        assert_eq!(rest, vec![(Stage::Extracting, 100), (Stage::Upscaling, 0)]);

        sink.finish(JobOutcome::Cancelled);
        assert!(matches!(receiver.try_recv(), Ok(PipelineEvent::Finished(JobOutcome::Cancelled))));
    }

    #[test]
    fn dropped_receiver_does_not_block_the_worker() {
        let (mut sink, receiver) = ProgressSink::with_capacity(1);
        drop(receiver);
        sink.begin(Stage::Assembling, 3, "assemble");
        sink.update(1, "one");
        sink.complete("done");
        sink.finish(JobOutcome::Cancelled);
    }
}
