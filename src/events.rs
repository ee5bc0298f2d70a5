use std::cell::RefCell;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Cross-component notifications on identifier sets. `ImagesInvalidated`
/// is broadcast before the owning rows disappear so open detail views can
/// release their image handles first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    CollectionsChanged { names: Vec<String> },
    ItemsChanged { ids: Vec<String> },
    ImagesInvalidated { item_ids: Vec<String> },
}

/// Single-threaded publish/subscribe bus. Subscribers that dropped their
/// receiver are pruned on the next publish.
#[derive(Debug, Default)]
pub struct ChangeBus {
    subscribers: RefCell<Vec<Sender<ChangeEvent>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn publish(&self, event: &ChangeEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}
