use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::WatchEvent;

/// One subscriber's view of a broadcaster.
///
/// The replay batch is delivered in full before the first live event.
/// Dropping or closing the subscription unregisters it; events still
/// queued are discarded.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    replay: VecDeque<WatchEvent>,
    receiver: mpsc::Receiver<WatchEvent>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(id: u64, replay: Vec<WatchEvent>, receiver: mpsc::Receiver<WatchEvent>) -> Self {
        Self {
            id,
            replay: replay.into(),
            receiver,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Replay events not yet consumed.
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Next event, or `None` once the subscription is closed or the
    /// broadcaster disconnected it.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        if self.closed {
            return None;
        }
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        self.receiver.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        if self.closed {
            return None;
        }
        self.replay
            .pop_front()
            .or_else(|| self.receiver.try_recv().ok())
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.replay.clear();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Stream for Subscription {
    type Item = WatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        if let Some(event) = this.replay.pop_front() {
            return Poll::Ready(Some(event));
        }
        this.receiver.poll_recv(cx)
    }
}
