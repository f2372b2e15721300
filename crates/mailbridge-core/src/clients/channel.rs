//! The bridge-wide auth event channel.

use mailbridge_api::{AuthSender, ClientAuth};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Single channel carrying [`ClientAuth`] events from every handle to the
/// auth worker.
///
/// The queue is unbounded: emitters never block and no event is dropped.
#[derive(Debug)]
pub struct AuthChannel {
    sender: AuthSender,
    receiver: Mutex<Option<UnboundedReceiver<ClientAuth>>>,
}

impl AuthChannel {
    /// Creates the channel.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Returns a sender for the channel. Every call refers to the same channel.
    #[must_use]
    pub fn sender(&self) -> AuthSender {
        self.sender.clone()
    }

    /// Hands out the receiving half. Only the first call gets it.
    pub fn take_receiver(&self) -> Option<UnboundedReceiver<ClientAuth>> {
        self.receiver.lock().take()
    }
}

impl Default for AuthChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_senders_share_one_channel() {
        let channel = AuthChannel::new();
        let a = channel.sender();
        let b = channel.sender();
        assert!(a.same_channel(&b));

        a.send(ClientAuth::revoked("u1")).unwrap();
        b.send(ClientAuth::revoked("u2")).unwrap();

        let mut rx = channel.take_receiver().unwrap();
        assert_eq!(rx.try_recv().unwrap().user_id, "u1");
        assert_eq!(rx.try_recv().unwrap().user_id, "u2");
    }

    #[test]
    fn test_receiver_taken_once() {
        let channel = AuthChannel::new();
        assert!(channel.take_receiver().is_some());
        assert!(channel.take_receiver().is_none());
    }

    #[test]
    fn test_send_never_blocks() {
        let channel = AuthChannel::new();
        let sender = channel.sender();
        for i in 0..10_000 {
            sender.send(ClientAuth::revoked(format!("u{i}"))).unwrap();
        }
        let mut rx = channel.take_receiver().unwrap();
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 10_000);
    }
}
