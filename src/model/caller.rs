use serde::{Deserialize, Serialize};

/// Caller identity and the authorization collaborator's verdict, taken from request headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: String,
    /// Caller may update or delete released operations
    pub allow_released_changes: bool,
}

impl CallerContext {
    pub fn with_released_changes(user_id: String, allow_released_changes: bool) -> Self {
        Self {
            user_id,
            allow_released_changes,
        }
    }

    /// Context used when no identity headers are present (development only)
    pub fn anonymous() -> Self {
        Self::with_released_changes("anonymous".to_string(), false)
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
