use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct Slot {
    frame: Option<Bytes>,
    closed: bool,
}

/// Single-slot latest-frame mailbox for one streaming connection.
///
/// Holds at most one pending frame. Depositing while a frame is pending
/// overwrites it; the replaced frame is never processed. This is a
/// latest-value cell, not a queue: a producer outrunning the consumer loses
/// intermediate frames instead of building a backlog.
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            notify: Notify::new(),
        }
    }

    /// Stores `frame` as the pending frame, replacing any previous one.
    /// Returns `true` when a pending frame was dropped. No-op once closed.
    pub fn deposit(&self, frame: Bytes) -> bool {
        let replaced = {
            let mut slot = self.slot.lock();
            if slot.closed {
                return false;
            }
            slot.frame.replace(frame).is_some()
        };
        self.notify.notify_one();
        replaced
    }

    /// Waits until a frame is pending and takes it, emptying the slot.
    /// Returns `None` once the mailbox has been closed; a frame still pending
    /// at close time is discarded.
    pub async fn take(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            {
                let mut slot = self.slot.lock();
                if slot.closed {
                    return None;
                }
                if let Some(frame) = slot.frame.take() {
                    return Some(frame);
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.frame = None;
        }
        self.notify.notify_one();
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}
