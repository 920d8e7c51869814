//! Recording observer.

use parking_lot::Mutex;

use fieldlink_core::{ExtractionEvent, ExtractionObserver};

/// Buffers every event it receives. Used by tests and `--events` output.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ExtractionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events so far.
    pub fn events(&self) -> Vec<ExtractionEvent> {
        self.events.lock().clone()
    }

    /// Remove and return the buffered events.
    pub fn drain(&self) -> Vec<ExtractionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ExtractionObserver for RecordingObserver {
    fn on_event(&self, event: &ExtractionEvent) {
        tracing::trace!(?event, "Recorded extraction event");
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_drains() {
        let observer = RecordingObserver::new();
        observer.on_event(&ExtractionEvent::SurplusCandidates {
            expected: 1,
            received: 3,
        });
        assert_eq!(observer.len(), 1);

        let drained = observer.drain();
        assert_eq!(drained.len(), 1);
        assert!(observer.is_empty());
    }
}
