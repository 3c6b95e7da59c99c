use serde::{Deserialize, Serialize};

/// Name reported when no caller identity is known.
pub const SYSTEM_USER_NAME: &str = "system";

/// Numeric identity reported when no caller identity is known.
pub const SYSTEM_USER_ID: i64 = 0;

/// Identity of the logical caller a unit of work runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub name: String,
    pub user_id: i64,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>, user_id: i64) -> Self {
        Self {
            name: name.into(),
            user_id,
        }
    }

    /// The well-known identity used by scheduled and otherwise unattributed work.
    pub fn system() -> Self {
        Self::new(SYSTEM_USER_NAME, SYSTEM_USER_ID)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::system()
    }
}

impl core::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.name, self.user_id)
    }
}
