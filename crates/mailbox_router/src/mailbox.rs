use crate::{Generation, MailboxError};
use common::domain::{DeviceId, DirectiveMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receive side of one device's directive queue, owned by its session.
///
/// The queue is unbounded; the owning session drains it every poll cycle.
pub struct Mailbox {
    device_id: DeviceId,
    generation: Generation,
    rx: mpsc::UnboundedReceiver<DirectiveMessage>,
    closed: CancellationToken,
}

/// Send side of a mailbox, held by the registry
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    generation: Generation,
    tx: mpsc::UnboundedSender<DirectiveMessage>,
    closed: CancellationToken,
}

impl Mailbox {
    pub(crate) fn open(device_id: DeviceId, generation: Generation) -> (Self, MailboxHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let mailbox = Self {
            device_id,
            generation,
            rx,
            closed: closed.clone(),
        };
        let handle = MailboxHandle {
            generation,
            tx,
            closed,
        };
        (mailbox, handle)
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the mailbox has been closed, locally or by eviction
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Pop the next directive, waiting at most `wait`.
    ///
    /// `Ok(None)` means the wait elapsed. A closed mailbox answers
    /// `Err(MailboxError::Closed)` immediately, and a close during the wait
    /// wakes the receiver with the same error.
    pub async fn receive(
        &mut self,
        wait: Duration,
    ) -> Result<Option<DirectiveMessage>, MailboxError> {
        if self.closed.is_cancelled() {
            return Err(MailboxError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(MailboxError::Closed),
            received = tokio::time::timeout(wait, self.rx.recv()) => match received {
                Ok(Some(directive)) => Ok(Some(directive)),
                Ok(None) => Err(MailboxError::Closed),
                Err(_) => Ok(None),
            },
        }
    }

    /// Mark the mailbox non-receivable and discard anything still queued
    pub fn close(&mut self) -> usize {
        self.closed.cancel();
        self.rx.close();

        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(device_id = %self.device_id, dropped, "discarded queued directives on close");
        }
        dropped
    }
}

impl MailboxHandle {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Enqueue a directive, handing it back if the mailbox is gone
    pub fn deliver(&self, directive: DirectiveMessage) -> Result<(), DirectiveMessage> {
        if self.closed.is_cancelled() {
            return Err(directive);
        }
        self.tx.send(directive).map_err(|e| e.0)
    }

    /// Close from the send side; the owning session observes `Closed`
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn open() -> (Mailbox, MailboxHandle) {
        Mailbox::open(DeviceId::parse("D1").unwrap(), Generation::new())
    }

    fn directive(n: u32) -> DirectiveMessage {
        DirectiveMessage::new(json!({ "seq": n }))
    }

    #[tokio::test]
    async fn test_receive_times_out_with_none() {
        let (mut mailbox, _handle) = open();

        let result = mailbox.receive(Duration::from_millis(20)).await;

        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (mut mailbox, handle) = open();
        for n in 0..5 {
            handle.deliver(directive(n)).unwrap();
        }

        for n in 0..5 {
            let received = mailbox.receive(Duration::from_millis(50)).await.unwrap();
            assert_eq!(received, Some(directive(n)));
        }
    }

    #[tokio::test]
    async fn test_closed_mailbox_answers_immediately() {
        let (mut mailbox, handle) = open();
        handle.deliver(directive(1)).unwrap();

        assert_eq!(mailbox.close(), 1);

        let started = Instant::now();
        let result = mailbox.receive(Duration::from_secs(5)).await;
        assert_eq!(result, Err(MailboxError::Closed));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(handle.deliver(directive(2)).is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_receiver() {
        let (mut mailbox, handle) = open();

        let waiter = tokio::spawn(async move { mailbox.receive(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(MailboxError::Closed));
    }

    #[tokio::test]
    async fn test_handle_reports_dropped_mailbox_closed() {
        let (mailbox, handle) = open();
        drop(mailbox);

        assert!(handle.is_closed());
        assert!(handle.deliver(directive(1)).is_err());
    }
}
