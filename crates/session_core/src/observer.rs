/// Returned by [`ObserverList::subscribe`]; the only way to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Synchronous observers notified in subscription order.
pub struct ObserverList<E> {
    next_id: u64,
    observers: Vec<(ObserverId, Observer<E>)>,
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            observers: Vec::new(),
        }
    }
}

impl<E> ObserverList<E> {
    pub fn subscribe(&mut self, observer: impl Fn(&E) + Send + Sync + 'static) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    pub fn notify(&self, event: &E) {
        for (_, observer) in &self.observers {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/observer_tests.rs"]
mod tests;
