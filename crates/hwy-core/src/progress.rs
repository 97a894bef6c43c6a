//! Advisory progress reporting for long classification runs.

/// Coarse progress of one state's feature pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { total: usize },
    Advanced { processed: usize, retained: usize },
    Finished { processed: usize, retained: usize },
}

/// Receiver for [`ProgressEvent`]s. Implemented for any `FnMut(ProgressEvent)`,
/// so callers can forward into a channel or a logger.
pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent),
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}
