use std::sync::Mutex;

type Callback<T> = Box<dyn FnOnce(T) + Send>;

/// A callback that runs at most once, whichever caller gets there first.
pub(crate) struct FireOnce<T> {
    slot: Mutex<Option<Callback<T>>>,
}

impl<T> FireOnce<T> {
    pub(crate) fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            slot: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Runs the callback if it has not run yet. Returns whether it ran.
    pub(crate) fn fire(&self, value: T) -> bool {
        let callback = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match callback {
            Some(cb) => {
                cb(value);
                true
            }
            None => false,
        }
    }
}
