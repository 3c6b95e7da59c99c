//! Capture-then-restore wrapper for work that crosses a thread boundary.

use crate::holder::{Attributes, ContextHolder};
use crate::identity::ExecutionContext;

/// Identity and ambient attributes captured on the submitting thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    identity: Option<ExecutionContext>,
    attributes: Attributes,
}

impl ContextSnapshot {
    /// Capture the authoritative identity and attributes of the calling code.
    pub fn capture() -> Self {
        let (identity, attributes) = ContextHolder::capture();
        Self {
            identity,
            attributes,
        }
    }

    /// A snapshot carrying no identity; work run under it observes the system identity.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&ExecutionContext> {
        self.identity.as_ref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Run `f` on the current thread with this snapshot installed.
    ///
    /// The thread store and ambient attributes are put back to what they held
    /// before the call on every exit path, unwinding included. Pool threads
    /// hold nothing between tasks, so for them this clears both stores.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = InstallGuard::install(self);
        f()
    }
}

struct InstallGuard {
    previous_identity: Option<ExecutionContext>,
    previous_attributes: Attributes,
}

impl InstallGuard {
    fn install(snapshot: &ContextSnapshot) -> Self {
        let previous_attributes = ContextHolder::set_thread_attributes(snapshot.attributes.clone());
        let previous_identity = ContextHolder::set_thread_identity(snapshot.identity.clone());
        Self {
            previous_identity,
            previous_attributes,
        }
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        ContextHolder::set_thread_attributes(std::mem::take(&mut self.previous_attributes));
        ContextHolder::set_thread_identity(self.previous_identity.take());
    }
}

/// A unit of work bound to the context of the code that created it.
///
/// The only way to build one is [`wrap`], so anything accepting a
/// `ContextTask` knows the identity was captured at submission time.
pub struct ContextTask {
    snapshot: ContextSnapshot,
    task: Box<dyn FnOnce() + Send + 'static>,
}

impl ContextTask {
    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }

    /// Install the captured context, run the task, then remove the context.
    pub fn run(self) {
        let Self { snapshot, task } = self;
        snapshot.run(task);
    }
}

impl core::fmt::Debug for ContextTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContextTask")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}

/// Capture the caller's context now and bind it to `task`.
pub fn wrap<F>(task: F) -> ContextTask
where
    F: FnOnce() + Send + 'static,
{
    ContextTask {
        snapshot: ContextSnapshot::capture(),
        task: Box::new(task),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::holder::RequestScope;

    fn carol() -> ExecutionContext {
        ExecutionContext::new("carol", 3)
    }

    #[test]
    fn wrapped_task_observes_submitter_identity_on_another_thread() {
        let (task, rx) = RequestScope::new()
            .with_identity(ExecutionContext::new("alice", 42))
            .with_attribute("locale", "fr")
            .run(|| {
                let (tx, rx) = mpsc::channel();
                let task = wrap(move || {
                    let _ = tx.send((ContextHolder::current(), ContextHolder::attribute("locale")));
                });
                (task, rx)
            });

        thread::spawn(move || task.run()).join().unwrap();

        let (identity, locale) = rx.recv().unwrap();
        assert_eq!(identity, ExecutionContext::new("alice", 42));
        assert_eq!(locale.as_deref(), Some("fr"));
    }

    #[test]
    fn thread_is_clean_after_task_even_when_it_panics() {
        thread::spawn(|| {
            let task = RequestScope::new().with_identity(carol()).run(|| {
                wrap(|| {
                    assert_eq!(ContextHolder::current(), carol());
                    panic!("boom");
                })
            });

            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run()));
            assert!(outcome.is_err());
            assert_eq!(ContextHolder::explicit(), None);
            assert!(ContextHolder::thread_attributes().is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn running_on_submitter_thread_restores_its_own_identity() {
        thread::spawn(|| {
            ContextHolder::set(ExecutionContext::new("worker", 5));

            let task = RequestScope::new()
                .with_identity(carol())
                .run(|| wrap(|| assert_eq!(ContextHolder::current(), carol())));
            task.run();

            assert_eq!(ContextHolder::current(), ExecutionContext::new("worker", 5));
            ContextHolder::clear();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn capture_outside_scope_uses_thread_store() {
        thread::spawn(|| {
            assert_eq!(ContextSnapshot::capture(), ContextSnapshot::empty());

            ContextHolder::set(carol());
            let snapshot = ContextSnapshot::capture();
            assert_eq!(snapshot.identity(), Some(&carol()));
            ContextHolder::clear();
        })
        .join()
        .unwrap();
    }
}
