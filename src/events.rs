//! Id lifecycle events and their tiered dispatch.
//!
//! Subscribers register at a [`Tier`]. Every dispatch runs all
//! [`Tier::Index`] subscribers to completion before any
//! [`Tier::Application`] subscriber sees the event, so generic indexes are
//! always up to date by the time application code reacts.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use crate::id::IntId;

/// Opaque handle to the lifecycle event that caused an id event.
///
/// Passed through unmodified; the registry never inspects it.
pub type OriginalEvent = Arc<dyn Any + Send + Sync>;

/// Dispatch tier of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Generic indexing (catalogs, container indexes). Runs first.
    Index,
    /// Application reactions. Runs after every index subscriber.
    Application,
}

/// Whether a mutating registry call should dispatch events.
#[derive(Clone, Default)]
pub enum Notify {
    /// Dispatch, optionally carrying the original lifecycle event.
    Emit(Option<OriginalEvent>),
    /// Dispatch with no original event.
    #[default]
    Plain,
    /// Do not dispatch.
    Silent,
}

impl Notify {
    /// Returns the original event to attach, or `None` when silent.
    pub(crate) fn into_original(self) -> Option<Option<OriginalEvent>> {
        match self {
            Self::Emit(original) => Some(original),
            Self::Plain => Some(None),
            Self::Silent => None,
        }
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emit(original) => write!(f, "Emit(original: {})", original.is_some()),
            Self::Plain => write!(f, "Plain"),
            Self::Silent => write!(f, "Silent"),
        }
    }
}

/// Fired after an object received an id, once the id is stored.
#[derive(Clone)]
pub struct IdAddedEvent<O> {
    /// The (unwrapped) object.
    pub object: O,
    /// Registry attribute name -> id assigned by that registry.
    pub idmap: BTreeMap<String, IntId>,
    /// The lifecycle event that triggered registration, if any.
    pub original: Option<OriginalEvent>,
}

impl<O: fmt::Debug> fmt::Debug for IdAddedEvent<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAddedEvent")
            .field("object", &self.object)
            .field("idmap", &self.idmap)
            .field("original", &self.original.is_some())
            .finish()
    }
}

/// Fired before an object's id is removed, while the id still resolves.
#[derive(Clone)]
pub struct IdRemovedEvent<O> {
    /// The (unwrapped) object.
    pub object: O,
    /// The lifecycle event that triggered removal, if any.
    pub original: Option<OriginalEvent>,
}

impl<O: fmt::Debug> fmt::Debug for IdRemovedEvent<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdRemovedEvent")
            .field("object", &self.object)
            .field("original", &self.original.is_some())
            .finish()
    }
}

/// Receives id lifecycle events.
pub trait IdSubscriber<O>: Send + Sync {
    /// Subscriber name (for debugging).
    fn name(&self) -> &str;

    /// Called after an id was assigned.
    fn id_added(&self, _event: &IdAddedEvent<O>) {}

    /// Called before an id is removed.
    fn id_removed(&self, _event: &IdRemovedEvent<O>) {}
}

/// Subscription handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

struct Subscription<O> {
    id: SubscriberId,
    tier: Tier,
    subscriber: Arc<dyn IdSubscriber<O>>,
}

impl<O> Clone for Subscription<O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tier: self.tier,
            subscriber: Arc::clone(&self.subscriber),
        }
    }
}

/// Tiered, synchronous event dispatcher.
///
/// Dispatch iterates a snapshot of the subscriber list taken without holding
/// the lock during callbacks, so subscribers may subscribe or unsubscribe
/// from inside a handler.
pub struct EventDispatcher<O> {
    subscriptions: RwLock<Vec<Subscription<O>>>,
    next_id: AtomicU64,
}

impl<O> Default for EventDispatcher<O> {
    fn default() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<O> fmt::Debug for EventDispatcher<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .snapshot()
            .iter()
            .map(|s| format!("{:?}:{}", s.tier, s.subscriber.name()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("subscribers", &names)
            .finish()
    }
}

impl<O> EventDispatcher<O> {
    /// Create a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber at the given tier.
    pub fn subscribe(&self, tier: Tier, subscriber: Arc<dyn IdSubscriber<O>>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = match self.subscriptions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        trace!(subscriber = subscriber.name(), ?tier, %id, "subscribed");
        subs.push(Subscription {
            id,
            tier,
            subscriber,
        });
        // Stable sort keeps subscription order within a tier.
        subs.sort_by_key(|s| s.tier);
        id
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = match self.subscriptions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of subscribers across both tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch an add event: index tier first, then application tier.
    pub fn notify_added(&self, event: &IdAddedEvent<O>) {
        for sub in self.snapshot() {
            trace!(subscriber = sub.subscriber.name(), tier = ?sub.tier, "dispatch id_added");
            sub.subscriber.id_added(event);
        }
    }

    /// Dispatch a removal event: index tier first, then application tier.
    pub fn notify_removed(&self, event: &IdRemovedEvent<O>) {
        for sub in self.snapshot() {
            trace!(subscriber = sub.subscriber.name(), tier = ?sub.tier, "dispatch id_removed");
            sub.subscriber.id_removed(event);
        }
    }

    fn snapshot(&self) -> Vec<Subscription<O>> {
        match self.subscriptions.read() {
            Ok(subs) => subs.clone(),
            Err(poisoned) => {
                warn!("event dispatcher lock poisoned; dispatching to recovered list");
                poisoned.into_inner().clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl IdSubscriber<u32> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn id_added(&self, event: &IdAddedEvent<u32>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}+{}", self.name, event.object));
        }

        fn id_removed(&self, event: &IdRemovedEvent<u32>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}-{}", self.name, event.object));
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
        })
    }

    #[test]
    fn index_tier_runs_before_application_tier() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        // Subscribe application first to prove ordering is by tier, not by time.
        dispatcher.subscribe(Tier::Application, recorder("app1", &log));
        dispatcher.subscribe(Tier::Index, recorder("idx1", &log));
        dispatcher.subscribe(Tier::Application, recorder("app2", &log));
        dispatcher.subscribe(Tier::Index, recorder("idx2", &log));

        dispatcher.notify_added(&IdAddedEvent {
            object: 7,
            idmap: BTreeMap::new(),
            original: None,
        });
        dispatcher.notify_removed(&IdRemovedEvent {
            object: 7,
            original: None,
        });

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "idx1+7", "idx2+7", "app1+7", "app2+7", "idx1-7", "idx2-7", "app1-7", "app2-7"
            ]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        let id = dispatcher.subscribe(Tier::Index, recorder("idx", &log));
        assert_eq!(dispatcher.len(), 1);

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));
        assert!(dispatcher.is_empty());

        dispatcher.notify_removed(&IdRemovedEvent {
            object: 1,
            original: None,
        });
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn original_event_is_passed_through() {
        struct Check;
        impl IdSubscriber<u32> for Check {
            fn name(&self) -> &str {
                "check"
            }
            fn id_added(&self, event: &IdAddedEvent<u32>) {
                let original = event.original.as_ref().unwrap();
                assert_eq!(original.downcast_ref::<&str>(), Some(&"ObjectAdded"));
            }
        }

        let dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Tier::Application, Arc::new(Check));
        let original: OriginalEvent = Arc::new("ObjectAdded");
        dispatcher.notify_added(&IdAddedEvent {
            object: 1,
            idmap: BTreeMap::new(),
            original: Some(original),
        });
    }

    #[test]
    fn notify_variants_map_to_original() {
        assert!(Notify::Silent.into_original().is_none());
        assert!(matches!(Notify::Plain.into_original(), Some(None)));
        let original: OriginalEvent = Arc::new(1_u8);
        assert!(matches!(
            Notify::Emit(Some(original)).into_original(),
            Some(Some(_))
        ));
    }
}
