//! One-shot completion callbacks.
//!
//! A [`OnceCallback`] runs at most once. When it is created with a default
//! value it also runs when dropped without having been invoked, so a
//! subsystem that is torn down mid-flight (or a task that panics or is
//! aborted) still releases whatever join slot the callback represents.

use std::fmt;

type BoxedFn<T> = Box<dyn FnOnce(T) + Send + 'static>;

pub struct OnceCallback<T: Send + 'static> {
    callback: Option<BoxedFn<T>>,
    default: Option<T>,
}

/// Callback that carries no result.
pub type OnceClosure = OnceCallback<()>;

impl<T: Send + 'static> OnceCallback<T> {
    /// A callback that is silently discarded if dropped without running.
    pub fn new(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            default: None,
        }
    }

    /// A callback that runs with `default` if dropped without running.
    pub fn with_default_on_drop(callback: impl FnOnce(T) + Send + 'static, default: T) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            default: Some(default),
        }
    }

    pub fn run(mut self, value: T) {
        self.default = None;
        if let Some(callback) = self.callback.take() {
            callback(value);
        }
    }

    /// Wrap so that the result is discarded and `()` is produced instead.
    pub fn ignore_result<U: Send + 'static>(self) -> OnceCallback<U>
    where
        T: Default,
    {
        let inner = self;
        OnceCallback::new(move |_| inner.run(T::default()))
    }
}

impl OnceClosure {
    /// A closure that runs on drop if it was never run explicitly.
    pub fn run_on_drop(callback: impl FnOnce() + Send + 'static) -> Self {
        Self::with_default_on_drop(move |()| callback(), ())
    }

    pub fn closure(callback: impl FnOnce() + Send + 'static) -> Self {
        Self::new(move |()| callback())
    }

    pub fn done(self) {
        self.run(())
    }
}

impl<T: Send + 'static> Drop for OnceCallback<T> {
    fn drop(&mut self) {
        if let (Some(callback), Some(default)) = (self.callback.take(), self.default.take()) {
            callback(default);
        }
    }
}

impl<T: Send + 'static> fmt::Debug for OnceCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceCallback")
            .field("pending", &self.callback.is_some())
            .field("default_on_drop", &self.default.is_some())
            .finish()
    }
}
