//! Operation handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::handlers::HandlerError;
use super::types::{Operation, OutboxEntry};

/// Executes one kind of outbox operation.
pub trait OperationHandler: Send + Sync {
    /// The operation this handler is responsible for.
    fn supports(&self) -> Operation;

    /// Perform the operation. Returning normally means the entry is done.
    fn handle(&self, entry: &OutboxEntry) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("more than one handler registered for operation {0}")]
    DuplicateHandler(Operation),
}

/// Map from operation to its single handler, built once at startup.
#[derive(Clone, Default)]
pub struct OperationHandlerRegistry {
    handlers: HashMap<Operation, Arc<dyn OperationHandler>>,
}

impl OperationHandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn OperationHandler>>) -> Result<Self, RegistryError> {
        let mut map: HashMap<Operation, Arc<dyn OperationHandler>> = HashMap::with_capacity(handlers.len());
        for handler in handlers {
            let operation = handler.supports();
            if map.insert(operation, handler).is_some() {
                return Err(RegistryError::DuplicateHandler(operation));
            }
        }
        Ok(Self { handlers: map })
    }

    pub fn lookup(&self, operation: Operation) -> Option<&Arc<dyn OperationHandler>> {
        self.handlers.get(&operation)
    }

    /// Registered operations, sorted.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<_> = self.handlers.keys().copied().collect();
        ops.sort();
        ops
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for OperationHandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OperationHandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}
