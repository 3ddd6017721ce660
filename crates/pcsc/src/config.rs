//! Configuration options for PC/SC clients

use std::time::Duration;

use crate::types::{MAX_BUFFER_LEN, MAX_READERS};

/// Scope of the PC/SC resource manager context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextScope {
    /// Operations are performed in the domain of the user (default)
    #[default]
    User,
    /// Operations are performed in the domain of the system
    System,
}

impl From<ContextScope> for pcsc::Scope {
    fn from(scope: ContextScope) -> Self {
        match scope {
            ContextScope::User => Self::User,
            ContextScope::System => Self::System,
        }
    }
}

/// Configuration options for a [`Client`](crate::Client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Scope of the PC/SC contexts established by the client
    pub scope: ContextScope,

    /// How long the monitor waits for a status change before re-listing readers.
    ///
    /// `None` waits until cancelled, which relies on the service's plug-and-play
    /// notification to pick up newly attached readers.
    pub monitor_timeout: Option<Duration>,

    /// Maximum number of readers monitored at once
    pub max_readers: usize,

    /// Response buffer size used when a call does not specify one
    pub default_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scope: ContextScope::User,
            monitor_timeout: Some(Duration::from_secs(1)),
            max_readers: MAX_READERS,
            default_capacity: MAX_BUFFER_LEN,
        }
    }
}

impl ClientConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context scope
    pub const fn with_scope(mut self, scope: ContextScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the monitor wait timeout
    pub const fn with_monitor_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.monitor_timeout = timeout;
        self
    }

    /// Set the maximum number of monitored readers
    pub const fn with_max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers;
        self
    }

    /// Set the default response buffer size
    pub const fn with_default_capacity(mut self, capacity: usize) -> Self {
        self.default_capacity = capacity;
        self
    }
}
