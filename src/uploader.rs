use thiserror::Error;
use tokio::sync::mpsc;

// ─── Uploader boundary ───────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HandoffError {
    /// The uploader is gone (channel closed, backend shut down). The
    /// rotator keeps the session queued under the retention policy.
    #[error("uploader unavailable")]
    Unavailable,
}

/// Takes ownership of a serialized payload. A successful `submit` is
/// the hand-off point: from then on, delivery, retry, and backoff are
/// the uploader's problem, not the core's.
pub trait Uploader: Send + Sync {
    fn submit(&self, payload: Vec<u8>) -> Result<(), HandoffError>;
}

/// Uploader that hands payloads to an async consumer task over an
/// unbounded channel. `submit` is a non-blocking send, so it is safe
/// to call from the rotation path.
pub struct ChannelUploader {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelUploader {
    /// The uploader plus the receiving end the transport task reads.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Uploader for ChannelUploader {
    fn submit(&self, payload: Vec<u8>) -> Result<(), HandoffError> {
        self.tx.send(payload).map_err(|_| HandoffError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_delivers_to_the_receiver() {
        let (uploader, mut rx) = ChannelUploader::pair();
        uploader.submit(vec![1, 2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn submit_fails_once_the_receiver_is_gone() {
        let (uploader, rx) = ChannelUploader::pair();
        drop(rx);
        assert!(matches!(
            uploader.submit(vec![0]),
            Err(HandoffError::Unavailable)
        ));
    }
}
