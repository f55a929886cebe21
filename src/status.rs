use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::fields::Field;

/// Last known raw value of every field the appliance has reported. A missing field is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStatus(BTreeMap<Field, i64>);

impl RawStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<i64> {
        self.0.get(&field).copied()
    }

    /// Overwrites only the supplied fields, last applied wins.
    pub fn merge(&mut self, updates: impl IntoIterator<Item = (Field, i64)>) {
        self.0.extend(updates);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, i64)> + '_ {
        self.0.iter().map(|(f, v)| (*f, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Field, i64)> for RawStatus {
    fn from_iter<T: IntoIterator<Item = (Field, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub type Observer = Box<dyn Fn(&RawStatus) + Send + Sync>;

/// Single-writer store. Observers run synchronously after every merge and a snapshot is
/// published for readers living on other tasks.
pub struct StatusStore {
    status: RawStatus,
    observers: Vec<Observer>,
    tx: watch::Sender<RawStatus>,
}

impl StatusStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RawStatus::new());
        Self {
            status: RawStatus::new(),
            observers: Vec::new(),
            tx,
        }
    }

    pub fn status(&self) -> &RawStatus {
        &self.status
    }

    pub fn subscribe(&self) -> watch::Receiver<RawStatus> {
        self.tx.subscribe()
    }

    pub fn add_observer(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub fn merge(&mut self, updates: impl IntoIterator<Item = (Field, i64)>) {
        self.status.merge(updates);
        tracing::trace!(status = ?self.status, "Status merged");
        self.tx.send_replace(self.status.clone());
        self.notify();
    }

    /// Runs the observers without changing anything, for values the appliance won't echo back.
    pub fn notify(&self) {
        for observer in &self.observers {
            observer(&self.status);
        }
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_merge_keeps_other_fields() {
        let mut status = RawStatus::new();
        status.merge([(Field::Power, 1), (Field::Mode, 1)]);
        status.merge([(Field::Temperature, 26)]);
        status.merge([(Field::Mode, 4)]);

        assert_eq!(status.get(Field::Power), Some(1));
        assert_eq!(status.get(Field::Mode), Some(4));
        assert_eq!(status.get(Field::Temperature), Some(26));
        assert_eq!(status.get(Field::Speed), None);
    }

    #[test]
    fn test_observers_and_snapshots() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = StatusStore::new();
        let rx = store.subscribe();

        let counter = calls.clone();
        store.add_observer(Box::new(move |status| {
            assert!(status.get(Field::Power).is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.merge([(Field::Power, 1)]);
        store.merge([(Field::Power, 0)]);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(rx.borrow().get(Field::Power), Some(0));
    }
}
