//! Outward notifications from the engine to whatever drives redraws.
//!
//! The engine and its components only ever send; observers subscribe with
//! [`EventSink::listen`] and drain at their own pace. Sends never block: when
//! nobody drains and the queue is full, the oldest event is dropped so the
//! queue always ends with the current state.

use crossbeam_channel::{Receiver, Sender, TrySendError};

const QUEUE_DEPTH: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The visible result changed; schedule a frame.
    RedrawRequested,
    /// Surface pixels changed; the composite must be recombined before reading.
    CompositeInvalidated,
    /// Instance mode moved on to the next shade after a commit.
    InstanceAdvanced { label: usize, instance: usize },
    /// Undo/redo availability changed.
    HistoryChanged { can_undo: bool, can_redo: bool },
    /// A refinement call failed; the staged stroke was discarded.
    PostProcessFailed(String),
}

/// Sending half shared by everything that emits events.
#[derive(Clone, Debug)]
pub struct EventSink {
    send: Sender<EngineEvent>,
    recv: Receiver<EngineEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (send, recv) = crossbeam_channel::bounded(QUEUE_DEPTH);
        Self { send, recv }
    }

    pub fn emit(&self, mut event: EngineEvent) {
        loop {
            match self.send.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(stale) = self.recv.try_recv() {
                        log::trace!("event queue full, dropping {:?}", stale);
                    }
                    event = back;
                }
            }
        }
    }

    /// A receiver for observers. All receivers share one queue.
    pub fn listen(&self) -> Receiver<EngineEvent> {
        self.recv.clone()
    }

    /// Drain everything queued so far.
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.recv.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let sink = EventSink::new();
        let rx = sink.listen();
        sink.emit(EngineEvent::CompositeInvalidated);
        sink.emit(EngineEvent::RedrawRequested);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::CompositeInvalidated);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::RedrawRequested);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_oldest_instead_of_blocking() {
        let sink = EventSink::new();
        for instance in 0..QUEUE_DEPTH + 10 {
            sink.emit(EngineEvent::InstanceAdvanced { label: 0, instance });
        }
        let queued = sink.drain();
        assert_eq!(queued.len(), QUEUE_DEPTH);
        assert_eq!(queued[0], EngineEvent::InstanceAdvanced { label: 0, instance: 10 });
        assert_eq!(
            queued[QUEUE_DEPTH - 1],
            EngineEvent::InstanceAdvanced {
                label: 0,
                instance: QUEUE_DEPTH + 9
            }
        );
    }

    #[test]
    fn late_listener_sees_latest_history_state() {
        let sink = EventSink::new();
        for _ in 0..QUEUE_DEPTH {
            sink.emit(EngineEvent::RedrawRequested);
        }
        sink.emit(EngineEvent::HistoryChanged {
            can_undo: true,
            can_redo: false,
        });
        let rx = sink.listen();
        assert_eq!(
            rx.try_iter().last(),
            Some(EngineEvent::HistoryChanged {
                can_undo: true,
                can_redo: false
            })
        );
    }
}
