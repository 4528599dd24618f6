//! Multicast observation channels.
//!
//! A [`Subject`] is owned by the component that produces its events. Each
//! [`Subject::subscribe`] call returns an independent unbounded receiver;
//! [`Subject::publish`] clones the event to every live subscriber. There is
//! no replay: a subscriber only sees events published after it subscribed.
//! Dropped receivers are pruned on the next publish.

use std::fmt;
use tokio::sync::mpsc;

pub struct Subject<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

impl<T: Clone> Subject<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Attach a new subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&mut self, event: T) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Complete the stream: subscribers drain what is queued, then see the end.
    pub fn close(&mut self) {
        self.subscribers.clear();
    }

    /// Number of subscribers still attached as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Clone> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
