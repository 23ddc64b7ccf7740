//! Advisory control mailbox shared between a running sequence and its stages.
//!
//! The engine owns the `Inbox`; stage actions and external observers hold
//! `InboxHandle`s. Skip and Stop are advisory: nothing is preempted, a
//! running action has to poll or await the mailbox to react. Every message
//! is multicast, so independent listeners each observe every message, and a
//! latched flag per message kind records arrivals for pollers that were not
//! waiting at the time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::errors::InboxError;

/// Broadcast capacity for control messages. Senders never block; a receiver
/// that falls this far behind skips ahead.
const MESSAGE_CAPACITY: usize = 16;

/// The two advisory control messages a sequence understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Skip,
    Stop,
}

#[derive(Debug)]
struct Shared {
    messages: broadcast::Sender<Message>,
    closed: watch::Sender<bool>,
    skip: AtomicBool,
    stop: AtomicBool,
}

impl Shared {
    fn send(&self, message: Message) -> Result<(), InboxError> {
        if *self.closed.borrow() {
            return Err(InboxError::Closed);
        }
        match message {
            Message::Skip => self.skip.store(true, Ordering::SeqCst),
            Message::Stop => self.stop.store(true, Ordering::SeqCst),
        }
        // No live receivers is fine; the latched flag still records the
        // request for later pollers.
        let _ = self.messages.send(message);
        Ok(())
    }

    fn take_latch(&self, message: Message) -> bool {
        match message {
            Message::Skip => self.skip.swap(false, Ordering::SeqCst),
            Message::Stop => self.stop.swap(false, Ordering::SeqCst),
        }
    }

    fn read_latch(&self, message: Message) -> bool {
        match message {
            Message::Skip => self.skip.load(Ordering::SeqCst),
            Message::Stop => self.stop.load(Ordering::SeqCst),
        }
    }
}

/// The owning side of the mailbox. Created with the engine, closed exactly
/// once when the run ends; sends are invalid afterwards.
#[derive(Debug)]
pub struct Inbox {
    shared: Arc<Shared>,
}

impl Inbox {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                messages,
                closed,
                skip: AtomicBool::new(false),
                stop: AtomicBool::new(false),
            }),
        }
    }

    /// An observe-only handle for stage actions and external listeners.
    pub fn handle(&self) -> InboxHandle {
        InboxHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Deliver a message to every listener and latch its flag.
    pub fn send(&self, message: Message) -> Result<(), InboxError> {
        self.shared.send(message)
    }

    /// Close the mailbox, waking all blocked waiters. Idempotent.
    pub fn close(&self) {
        // `send_replace` updates the value even when no receivers are live;
        // plain `send` would drop the update (and the closed flag) whenever
        // nothing is currently subscribed.
        self.shared.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Relay every message arriving on `upstream` into this inbox, until
    /// either mailbox closes. The relay subscribes before returning, so no
    /// message sent after this call is lost.
    pub fn forward_from(&self, upstream: &InboxHandle) {
        let shared = Arc::clone(&self.shared);
        let mut messages = upstream.subscribe();
        let mut upstream_closed = upstream.shared.closed.subscribe();
        tokio::spawn(async move {
            let mut local_closed = shared.closed.subscribe();
            loop {
                tokio::select! {
                    received = messages.recv() => match received {
                        Ok(message) => {
                            if shared.send(message).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "inbox relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = upstream_closed.changed() => {
                        if *upstream_closed.borrow() {
                            break;
                        }
                    }
                    _ = local_closed.changed() => {
                        if *local_closed.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Observe-only view of an [`Inbox`]: latched-flag polls, blocking waits,
/// and raw subscription. Cloning shares the same mailbox.
#[derive(Debug, Clone)]
pub struct InboxHandle {
    shared: Arc<Shared>,
}

impl InboxHandle {
    /// Whether a Skip arrived since the flag was last cleared. With `reset`
    /// the flag is cleared by this read.
    pub fn check_skip(&self, reset: bool) -> bool {
        self.check(Message::Skip, reset)
    }

    /// Whether a Stop arrived since the flag was last cleared. With `reset`
    /// the flag is cleared by this read.
    pub fn check_stop(&self, reset: bool) -> bool {
        self.check(Message::Stop, reset)
    }

    fn check(&self, message: Message, reset: bool) -> bool {
        if reset {
            self.shared.take_latch(message)
        } else {
            self.shared.read_latch(message)
        }
    }

    /// Wait until a Skip is observed. Returns `false` if the inbox closes
    /// first. Consumes the latch: exactly one observation per message.
    pub async fn wait_for_skip(&self) -> bool {
        self.wait_for(Message::Skip).await
    }

    /// Wait until a Stop is observed. Returns `false` if the inbox closes
    /// first. Consumes the latch: exactly one observation per message.
    pub async fn wait_for_stop(&self) -> bool {
        self.wait_for(Message::Stop).await
    }

    async fn wait_for(&self, want: Message) -> bool {
        // Subscribe before inspecting the latch so a message is never both
        // missed by the latch check and unseen by the subscription.
        let mut messages = self.shared.messages.subscribe();
        let mut closed = self.shared.closed.subscribe();
        if self.shared.take_latch(want) {
            return true;
        }
        if *closed.borrow() {
            return false;
        }
        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Ok(message) if message == want => {
                        self.shared.take_latch(want);
                        return true;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return false,
                },
                _ = closed.changed() => {
                    if *closed.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait for the next message of any kind. `None` once the inbox closes.
    pub async fn next_message(&self) -> Option<Message> {
        let mut messages = self.shared.messages.subscribe();
        let mut closed = self.shared.closed.subscribe();
        if *closed.borrow() {
            return None;
        }
        loop {
            tokio::select! {
                received = messages.recv() => match received {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = closed.changed() => {
                    if *closed.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    /// Raw subscription for arbitrary listeners. Messages sent before the
    /// subscription are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.shared.messages.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }
}
