//! Dual-backed identity holder.
//!
//! Two stores with different lifetimes back the current identity:
//!
//! 1. **Request scope**: a tokio task-local that exists only while a request
//!    is being handled (`RequestScope::run` / `RequestScope::scope`).
//! 2. **Thread store**: a thread-local that lives as long as the thread. Pool
//!    workers receive identities here through [`crate::ContextTask`].
//!
//! Reads consult the request scope when one is active and the thread store
//! otherwise. When neither holds a value the system identity is reported.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;

use crate::identity::ExecutionContext;

/// Ambient per-call attributes (locale, correlation id, ...).
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct RequestState {
    identity: Option<ExecutionContext>,
    attributes: Attributes,
}

tokio::task_local! {
    static REQUEST: RefCell<RequestState>;
}

thread_local! {
    static THREAD_IDENTITY: RefCell<Option<ExecutionContext>> = const { RefCell::new(None) };
    static THREAD_ATTRIBUTES: RefCell<Attributes> = const { RefCell::new(BTreeMap::new()) };
}

/// Per-request scope for the identity holder.
///
/// ```ignore
/// RequestScope::new()
///     .with_identity(ExecutionContext::new("alice", 42))
///     .with_attribute("locale", "de")
///     .run(|| handle_request());
/// ```
#[derive(Debug, Default)]
pub struct RequestScope {
    state: RequestState,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: ExecutionContext) -> Self {
        self.state.identity = Some(identity);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.state.attributes.insert(key.into(), value.into());
        self
    }

    /// Run synchronous request handling inside this scope.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        REQUEST.sync_scope(RefCell::new(self.state), f)
    }

    /// Run an async request handler inside this scope.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        REQUEST.scope(RefCell::new(self.state), future).await
    }

    /// Whether a request scope is active for the current task.
    pub fn is_active() -> bool {
        REQUEST.try_with(|_| ()).is_ok()
    }
}

/// Read/write access to the current identity.
///
/// Every method is infallible: a missing scope, a missing thread value or a
/// re-entrant borrow all degrade to the next store and finally to
/// [`ExecutionContext::system`].
#[derive(Debug, Clone, Copy)]
pub struct ContextHolder;

impl ContextHolder {
    /// The identity the current code runs on behalf of.
    pub fn current() -> ExecutionContext {
        Self::explicit().unwrap_or_else(ExecutionContext::system)
    }

    /// The identity held by the authoritative store, if it holds one.
    pub fn explicit() -> Option<ExecutionContext> {
        if RequestScope::is_active() {
            Self::scoped_identity()
        } else {
            Self::thread_identity()
        }
    }

    /// Set the identity in the authoritative store.
    pub fn set(identity: ExecutionContext) {
        let mut pending = Some(identity);
        let _ = REQUEST.try_with(|cell| {
            if let Ok(mut state) = cell.try_borrow_mut() {
                state.identity = pending.take();
            }
        });
        if let Some(identity) = pending {
            Self::set_thread_identity(Some(identity));
        }
    }

    /// Remove the identity from both stores.
    pub fn clear() {
        let _ = REQUEST.try_with(|cell| {
            if let Ok(mut state) = cell.try_borrow_mut() {
                state.identity = None;
            }
        });
        Self::set_thread_identity(None);
    }

    /// Read an ambient attribute from the authoritative store.
    pub fn attribute(key: &str) -> Option<String> {
        if RequestScope::is_active() {
            REQUEST
                .try_with(|cell| {
                    cell.try_borrow()
                        .ok()
                        .and_then(|state| state.attributes.get(key).cloned())
                })
                .ok()
                .flatten()
        } else {
            THREAD_ATTRIBUTES
                .try_with(|cell| cell.try_borrow().ok().and_then(|attrs| attrs.get(key).cloned()))
                .ok()
                .flatten()
        }
    }

    /// Set an ambient attribute in the authoritative store.
    pub fn set_attribute(key: impl Into<String>, value: impl Into<String>) {
        let mut pending = Some((key.into(), value.into()));
        let _ = REQUEST.try_with(|cell| {
            if let Ok(mut state) = cell.try_borrow_mut() {
                if let Some((k, v)) = pending.take() {
                    state.attributes.insert(k, v);
                }
            }
        });
        if let Some((k, v)) = pending {
            let _ = THREAD_ATTRIBUTES.try_with(|cell| {
                if let Ok(mut attrs) = cell.try_borrow_mut() {
                    attrs.insert(k, v);
                }
            });
        }
    }

    /// Identity and attributes of the authoritative store.
    pub(crate) fn capture() -> (Option<ExecutionContext>, Attributes) {
        if RequestScope::is_active() {
            REQUEST
                .try_with(|cell| {
                    cell.try_borrow()
                        .map(|state| (state.identity.clone(), state.attributes.clone()))
                        .unwrap_or_default()
                })
                .unwrap_or_default()
        } else {
            (Self::thread_identity(), Self::thread_attributes())
        }
    }

    fn scoped_identity() -> Option<ExecutionContext> {
        REQUEST
            .try_with(|cell| cell.try_borrow().ok().and_then(|state| state.identity.clone()))
            .ok()
            .flatten()
    }

    pub(crate) fn thread_identity() -> Option<ExecutionContext> {
        THREAD_IDENTITY
            .try_with(|cell| cell.try_borrow().ok().and_then(|slot| slot.clone()))
            .ok()
            .flatten()
    }

    /// Replace the thread store, returning what it held.
    pub(crate) fn set_thread_identity(identity: Option<ExecutionContext>) -> Option<ExecutionContext> {
        THREAD_IDENTITY
            .try_with(|cell| {
                cell.try_borrow_mut()
                    .map(|mut slot| std::mem::replace(&mut *slot, identity))
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub(crate) fn thread_attributes() -> Attributes {
        THREAD_ATTRIBUTES
            .try_with(|cell| cell.try_borrow().map(|attrs| attrs.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Replace the thread's ambient attributes, returning what it held.
    pub(crate) fn set_thread_attributes(attributes: Attributes) -> Attributes {
        THREAD_ATTRIBUTES
            .try_with(|cell| {
                cell.try_borrow_mut()
                    .map(|mut attrs| std::mem::replace(&mut *attrs, attributes))
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ExecutionContext {
        ExecutionContext::new("alice", 42)
    }

    #[test]
    fn defaults_to_system_without_any_store() {
        std::thread::spawn(|| {
            assert!(!RequestScope::is_active());
            assert_eq!(ContextHolder::current(), ExecutionContext::system());
            assert_eq!(ContextHolder::explicit(), None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn scope_is_preferred_over_thread_store() {
        std::thread::spawn(|| {
            ContextHolder::set(ExecutionContext::new("thread", 7));

            RequestScope::new().with_identity(alice()).run(|| {
                assert!(RequestScope::is_active());
                assert_eq!(ContextHolder::current(), alice());
            });

            assert_eq!(ContextHolder::current(), ExecutionContext::new("thread", 7));
            ContextHolder::clear();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn active_scope_without_identity_reports_system() {
        std::thread::spawn(|| {
            ContextHolder::set(ExecutionContext::new("stale", 9));

            RequestScope::new().run(|| {
                assert_eq!(ContextHolder::current(), ExecutionContext::system());
            });

            ContextHolder::clear();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn set_inside_scope_does_not_touch_thread_store() {
        std::thread::spawn(|| {
            RequestScope::new().run(|| {
                ContextHolder::set(alice());
                ContextHolder::set_attribute("locale", "de");
                assert_eq!(ContextHolder::current(), alice());
                assert_eq!(ContextHolder::attribute("locale").as_deref(), Some("de"));
            });

            assert_eq!(ContextHolder::explicit(), None);
            assert_eq!(ContextHolder::attribute("locale"), None);
        })
        .join()
        .unwrap();
    }

    #[tokio::test]
    async fn async_scope_carries_identity_across_awaits() {
        let seen = RequestScope::new()
            .with_identity(alice())
            .with_attribute("correlation_id", "req-1")
            .scope(async {
                tokio::task::yield_now().await;
                (ContextHolder::current(), ContextHolder::attribute("correlation_id"))
            })
            .await;

        assert_eq!(seen, (alice(), Some("req-1".to_string())));
        assert!(!RequestScope::is_active());
    }
}
