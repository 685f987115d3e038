//! Synchronous fan-out of rule table changes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::rule::Rule;

/// Handle returned by [`ChangeNotifier::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Removed => write!(f, "removed"),
        }
    }
}

/// A single table change, carrying the full rule as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvent {
    pub kind: ChangeKind,
    pub rule: Rule,
    /// Storage key of the rule
    pub key: u32,
}

/// Receives rule table changes.
///
/// Called on the mutating thread while that thread still owns the table's
/// writer flag; any table mutation from inside `on_change` is rejected with
/// `ConcurrentWriteRejected`.
pub trait RuleObserver: Send + Sync {
    fn on_change(&self, event: &RuleEvent);
}

impl<F> RuleObserver for F
where
    F: Fn(&RuleEvent) + Send + Sync,
{
    fn on_change(&self, event: &RuleEvent) {
        self(event)
    }
}

/// Registration-ordered list of observers.
#[derive(Default)]
pub struct ChangeNotifier {
    observers: RwLock<Vec<(ObserverId, Arc<dyn RuleObserver>)>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn RuleObserver>) -> ObserverId {
        let id = ObserverId::new();
        let mut observers = self.observers.write();
        observers.push((id, observer));
        debug!(observer_id = %id, observer_count = observers.len(), "Observer registered");
        id
    }

    /// Removes an observer. Returns false if the id is unknown.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        let removed = observers.len() != before;
        if removed {
            debug!(observer_id = %id, observer_count = observers.len(), "Observer unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Delivers `event` to every observer in registration order.
    ///
    /// The list is copied before delivery, so observers may register or
    /// unregister from inside the callback.
    pub fn notify(&self, event: &RuleEvent) {
        let observers: Vec<Arc<dyn RuleObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        trace!(
            kind = %event.kind,
            rule_id = event.rule.id,
            observers = observers.len(),
            "Delivering rule event"
        );

        for observer in observers {
            observer.on_change(event);
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use spm_core::types::ClassifierType;

    fn create_test_event(kind: ChangeKind) -> RuleEvent {
        RuleEvent {
            kind,
            rule: Rule::new(9, ClassifierType::Scs),
            key: 9,
        }
    }

    #[test]
    fn test_registration_order() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            notifier.register(Arc::new(move |e: &RuleEvent| {
                seen.lock().push((tag, e.kind));
            }));
        }

        notifier.notify(&create_test_event(ChangeKind::Added));
        assert_eq!(
            *seen.lock(),
            vec![
                ("first", ChangeKind::Added),
                ("second", ChangeKind::Added),
                ("third", ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn test_unregister() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = notifier.register(Arc::new(move |_: &RuleEvent| *counter.lock() += 1));

        notifier.notify(&create_test_event(ChangeKind::Modified));
        assert!(notifier.unregister(id));
        assert!(!notifier.unregister(id));
        notifier.notify(&create_test_event(ChangeKind::Removed));

        assert_eq!(*count.lock(), 1);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_observer_may_unregister_itself() {
        let notifier = Arc::new(ChangeNotifier::new());
        let slot: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&notifier);
        let own_id = Arc::clone(&slot);
        let id = notifier.register(Arc::new(move |_: &RuleEvent| {
            if let Some(id) = *own_id.lock() {
                inner.unregister(id);
            }
        }));
        *slot.lock() = Some(id);

        notifier.notify(&create_test_event(ChangeKind::Added));
        assert_eq!(notifier.len(), 0);
    }
}
