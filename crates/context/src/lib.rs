//! Execution-context propagation.
//!
//! Code handling a request sees the caller's identity through a request
//! scope. Work that leaves that scope (pooled background tasks, periodic
//! jobs) must go through [`wrap`] so the identity is captured on the
//! submitting thread and installed on the executing one, then removed again
//! once the work finishes.
//!
//! ## Components
//!
//! - `ExecutionContext`: display name + numeric identity
//! - `RequestScope` / `ContextHolder`: dual-backed identity holder
//! - `ContextSnapshot` / `ContextTask`: capture-then-restore wrapper
//! - `BackgroundPool`: bounded worker pool with caller-runs backpressure

pub mod carrier;
pub mod holder;
pub mod identity;
pub mod pool;

pub use carrier::{wrap, ContextSnapshot, ContextTask};
pub use holder::{Attributes, ContextHolder, RequestScope};
pub use identity::{ExecutionContext, SYSTEM_USER_ID, SYSTEM_USER_NAME};
pub use pool::{BackgroundPool, PoolConfig, PoolError, PoolStats};
