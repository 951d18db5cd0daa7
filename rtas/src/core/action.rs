//! Opaque invocables carried by task units.
//!
//! Actions are never run by this crate's builders; the external runner
//! invokes them. Every action resolves to a JSON value so remote calls can
//! hand their return value to the outcome log.

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::ActionError;

/// Result of running an action.
pub type ActionResult = Result<serde_json::Value, ActionError>;

/// Boxed future returned by [`Action::invoke`].
pub type ActionFuture = BoxFuture<'static, ActionResult>;

type ActionFn = dyn Fn() -> ActionFuture + Send + Sync;

/// A named, cheaply clonable invocable.
#[derive(Clone)]
pub struct Action {
    name: String,
    func: Arc<ActionFn>,
}

impl Action {
    /// Creates an action from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move || func().boxed()),
        }
    }

    /// Creates an action from a synchronous local callable.
    ///
    /// The callable runs when the action is invoked, not when the returned
    /// future is first polled.
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, move || {
            future::ready(
                func()
                    .map(|()| serde_json::Value::Null)
                    .map_err(ActionError::from),
            )
        })
    }

    /// An action that succeeds without doing anything.
    #[must_use]
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, || future::ready(Ok(serde_json::Value::Null)))
    }

    /// Returns the action's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the action.
    #[must_use]
    pub fn invoke(&self) -> ActionFuture {
        (self.func)()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}
