//! Observable values
//!
//! Watch-backed values with multi-subscriber change notification. Every
//! piece of Action state that a UI wants to follow without polling
//! (lifecycle state, progress, status text, prerequisite gates) is held in
//! an `Observable`.
//!
//! Subscribers always see the latest value; intermediate values may be
//! coalesced if a subscriber falls behind. Consumers that need every edge
//! use the Action's broadcast event stream instead.
//!
//! # Example
//!
//! ```rust,ignore
//! let ready = Observable::new("shutter_open", false);
//!
//! let mut rx = ready.subscribe();
//! tokio::spawn(async move {
//!     while rx.changed().await.is_ok() {
//!         println!("shutter open: {}", *rx.borrow());
//!     }
//! });
//!
//! ready.set(true);
//! ```

use std::fmt::Debug;
use tokio::sync::watch;

/// A thread-safe, observable value with change notifications.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    name: String,
}

impl<T: Clone + Send + Sync + Debug + 'static> Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.name)
            .field("value", &*self.sender.borrow())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(), // shares the same watch channel
            name: self.name.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            name: name.into(),
        }
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Get the observable's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overwrite the value unconditionally, notifying all subscribers.
    pub fn replace(&self, value: T) -> T {
        self.sender.send_replace(value)
    }

    /// Mutate the value in place. Subscribers are notified only when `f`
    /// returns true.
    pub fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.sender.send_if_modified(f)
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Set a new value. Subscribers are notified only if it differs from the
    /// current one. Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}
