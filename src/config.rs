// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client-wide tunables.

use std::time::Duration;

/// Default bound on every blocking command exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default size of the session pool. Ids run `1..=DEFAULT_MAX_SESSIONS`.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// Largest pool the token layout can address (session id lives in 8 bits).
pub const MAX_SESSIONS_LIMIT: usize = 0xFF;

/// How a session moves audio data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Ring-driven: the session owns buffer rings and tracks ownership.
    #[default]
    Sync,
    /// Caller-driven: every read/write names its own physical buffer.
    Async,
}

/// Configuration for an [`AsmClient`](crate::AsmClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on command acknowledgements and map/unmap exchanges.
    pub command_timeout: Duration,
    /// Number of session slots.
    pub max_sessions: usize,
    /// Io mode a fresh session starts in.
    pub default_io_mode: IoMode,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            default_io_mode: IoMode::Sync,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Clamped to `1..=MAX_SESSIONS_LIMIT`.
    pub fn with_max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = n.clamp(1, MAX_SESSIONS_LIMIT);
        self
    }

    pub fn with_default_io_mode(mut self, mode: IoMode) -> Self {
        self.default_io_mode = mode;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
