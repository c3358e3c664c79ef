//! Observable value cells ("subjects") consumed by the UI layer.
//!
//! A [`Subject`] is a cheap, cloneable handle to a shared cell. Writes that
//! do not change the stored value are suppressed; every other write notifies
//! the registered listeners synchronously, in registration order, on the
//! calling thread. The engine only writes subjects from the UI thread, so
//! listeners observe a batch of writes issued by one UI task atomically.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Global switch for `subject`-target trace logging (`HELIX_DEBUG_SUBJECTS`).
static DEBUG_SUBJECTS: AtomicBool = AtomicBool::new(false);

/// Enable or disable trace logging of every subject value change.
pub fn set_debug_subjects(enabled: bool) {
    DEBUG_SUBJECTS.store(enabled, Ordering::Relaxed);
}

/// Returns `true` when subject tracing is enabled.
pub fn debug_subjects() -> bool {
    DEBUG_SUBJECTS.load(Ordering::Relaxed)
}

/// Handle returned by [`Subject::subscribe`]; pass to [`Subject::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubjectInner<T> {
    name: String,
    value: Mutex<T>,
    listeners: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: AtomicU64,
}

/// Shared observable cell.
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

/// Integer subject (enum tags, indices, 0/1 flags, packed colours).
pub type IntSubject = Subject<i32>;

/// String subject (detail and label text).
pub type StringSubject = Subject<String>;

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Subject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("name", &self.inner.name)
            .field("value", &*lock(&self.inner.value))
            .finish()
    }
}

fn lock<V>(m: &Mutex<V>) -> MutexGuard<'_, V> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Subject<T>
where
    T: Clone + PartialEq + Debug,
{
    /// Create a subject with a diagnostic `name` and an initial value.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                name: name.into(),
                value: Mutex::new(initial),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Name used for registration and trace output.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current value (cloned).
    pub fn get(&self) -> T {
        lock(&self.inner.value).clone()
    }

    /// Store `value` and notify listeners.
    ///
    /// Returns `false` (and notifies nobody) when `value` equals the stored
    /// value.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = lock(&self.inner.value);
            if *current == value {
                return false;
            }
            if debug_subjects() {
                tracing::trace!(
                    target: "subject",
                    name = %self.inner.name,
                    old = ?*current,
                    new = ?value,
                    "subject changed"
                );
            }
            *current = value.clone();
        }

        // Listeners run without any lock held so they may read this or any
        // other subject.
        let listeners: Vec<Listener<T>> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&value);
        }
        true
    }

    /// Register `listener`; it is called after every effective write.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

impl IntSubject {
    /// Write a boolean as `0` / `1`.
    pub fn set_bool(&self, value: bool) -> bool {
        self.set(i32::from(value))
    }

    /// Increment by one and notify. Used for revision counters, which
    /// never wrap; a counter at `i32::MAX` stays there.
    pub fn bump(&self) -> i32 {
        let next = self.get().saturating_add(1);
        self.set(next);
        next
    }
}
