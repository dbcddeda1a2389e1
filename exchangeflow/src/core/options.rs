//! Execution options and their local-override-else-global resolution.

use serde::{Deserialize, Serialize};

/// Effective options governing failure handling for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Keep dispatching siblings after a child fails.
    pub continue_on_failure: bool,
    /// Record a node fault and then propagate it to the caller.
    pub throw_on_error: bool,
}

impl ExecutionOptions {
    /// Strict options: stop on the first failure, capture faults.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            continue_on_failure: false,
            throw_on_error: false,
        }
    }

    /// Lenient options: run every child, capture faults.
    #[must_use]
    pub const fn lenient() -> Self {
        Self {
            continue_on_failure: true,
            throw_on_error: false,
        }
    }

    /// Sets `continue_on_failure`.
    #[must_use]
    pub const fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    /// Sets `throw_on_error`.
    #[must_use]
    pub const fn with_throw_on_error(mut self, value: bool) -> Self {
        self.throw_on_error = value;
        self
    }
}

/// Per-node overrides. Unset fields fall back to the global options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeOptions {
    /// Local override for `continue_on_failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_failure: Option<bool>,
    /// Local override for `throw_on_error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_on_error: Option<bool>,
}

impl NodeOptions {
    /// No overrides.
    #[must_use]
    pub const fn inherit() -> Self {
        Self {
            continue_on_failure: None,
            throw_on_error: None,
        }
    }

    /// Overrides `continue_on_failure`.
    #[must_use]
    pub const fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = Some(value);
        self
    }

    /// Overrides `throw_on_error`.
    #[must_use]
    pub const fn throw_on_error(mut self, value: bool) -> Self {
        self.throw_on_error = Some(value);
        self
    }

    /// Resolves the effective options against the global defaults.
    #[must_use]
    pub fn resolve(&self, global: ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            continue_on_failure: self
                .continue_on_failure
                .unwrap_or(global.continue_on_failure),
            throw_on_error: self.throw_on_error.unwrap_or(global.throw_on_error),
        }
    }
}
