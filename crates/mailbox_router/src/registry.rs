use crate::{Generation, Mailbox, MailboxHandle};
use common::domain::{DeviceId, DirectiveMessage};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Process-local map from device to its mailbox.
///
/// Sharded, so operations on different devices never contend.
#[derive(Default)]
pub struct MailboxRegistry {
    mailboxes: DashMap<DeviceId, MailboxHandle>,
}

/// A freshly registered mailbox plus the one it replaced, if any
pub struct Registered {
    pub mailbox: Mailbox,
    pub displaced: Option<MailboxHandle>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new mailbox for `device_id`.
    ///
    /// A live mailbox already present is returned as the error unless
    /// `replace` is set, in which case it is closed and reported as displaced.
    /// Closed leftovers are always replaced.
    pub fn register(
        &self,
        device_id: &DeviceId,
        generation: Generation,
        replace: bool,
    ) -> Result<Registered, MailboxHandle> {
        match self.mailboxes.entry(device_id.clone()) {
            Entry::Occupied(mut entry) => {
                if !replace && !entry.get().is_closed() {
                    return Err(entry.get().clone());
                }
                let (mailbox, handle) = Mailbox::open(device_id.clone(), generation);
                let old = entry.insert(handle);
                old.close();
                Ok(Registered {
                    mailbox,
                    displaced: Some(old),
                })
            }
            Entry::Vacant(entry) => {
                let (mailbox, handle) = Mailbox::open(device_id.clone(), generation);
                entry.insert(handle);
                Ok(Registered {
                    mailbox,
                    displaced: None,
                })
            }
        }
    }

    /// The live mailbox for `device_id`, if this node holds one
    pub fn lookup(&self, device_id: &DeviceId) -> Option<MailboxHandle> {
        self.mailboxes
            .get(device_id)
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.clone())
    }

    pub fn is_current(&self, device_id: &DeviceId, generation: Generation) -> bool {
        self.lookup(device_id)
            .is_some_and(|handle| handle.generation() == generation)
    }

    /// Enqueue locally, handing the directive back if no live mailbox exists
    pub fn deliver(
        &self,
        device_id: &DeviceId,
        directive: DirectiveMessage,
    ) -> Result<(), DirectiveMessage> {
        match self.mailboxes.get(device_id) {
            Some(handle) => handle.deliver(directive),
            None => Err(directive),
        }
    }

    /// Remove and close the mailbox only if it is still `generation`
    pub fn remove(&self, device_id: &DeviceId, generation: Generation) -> Option<MailboxHandle> {
        let (_, handle) = self
            .mailboxes
            .remove_if(device_id, |_, handle| handle.generation() == generation)?;
        handle.close();
        Some(handle)
    }

    /// Remove and close whatever mailbox the device has here
    pub fn remove_any(&self, device_id: &DeviceId) -> Option<MailboxHandle> {
        let (_, handle) = self.mailboxes.remove(device_id)?;
        handle.close();
        Some(handle)
    }

    pub fn snapshot(&self) -> Vec<(DeviceId, Generation)> {
        self.mailboxes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().generation()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MailboxError;
    use serde_json::json;
    use std::time::Duration;

    fn device(id: &str) -> DeviceId {
        DeviceId::parse(id).unwrap()
    }

    #[test]
    fn test_register_rejects_live_duplicate() {
        let registry = MailboxRegistry::new();
        let first = registry.register(&device("D1"), Generation::new(), false).unwrap();

        let existing = registry
            .register(&device("D1"), Generation::new(), false)
            .err()
            .unwrap();

        assert_eq!(existing.generation(), first.mailbox.generation());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_register_replace_closes_previous() {
        let registry = MailboxRegistry::new();
        let mut first = registry
            .register(&device("D1"), Generation::new(), false)
            .unwrap()
            .mailbox;

        let second = registry.register(&device("D1"), Generation::new(), true).unwrap();

        assert_eq!(
            second.displaced.map(|h| h.generation()),
            Some(first.generation())
        );
        assert_eq!(
            first.receive(Duration::from_secs(1)).await,
            Err(MailboxError::Closed)
        );
        assert!(registry.is_current(&device("D1"), second.mailbox.generation()));
    }

    #[test]
    fn test_closed_leftover_is_replaced() {
        let registry = MailboxRegistry::new();
        let mut first = registry
            .register(&device("D1"), Generation::new(), false)
            .unwrap()
            .mailbox;
        first.close();

        assert!(registry.lookup(&device("D1")).is_none());
        assert!(registry.register(&device("D1"), Generation::new(), false).is_ok());
    }

    #[test]
    fn test_remove_checks_generation() {
        let registry = MailboxRegistry::new();
        let registered = registry.register(&device("D1"), Generation::new(), false).unwrap();

        assert!(registry.remove(&device("D1"), Generation::new()).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry
            .remove(&device("D1"), registered.mailbox.generation())
            .is_some());
        assert!(registry.is_empty());
        assert!(registered.mailbox.is_closed());
    }

    #[test]
    fn test_deliver_without_mailbox_hands_back() {
        let registry = MailboxRegistry::new();
        let directive = DirectiveMessage::new(json!({"cmd": "reboot"}));

        let returned = registry.deliver(&device("D9"), directive.clone());

        assert_eq!(returned, Err(directive));
        assert!(registry.is_empty());
    }
}
