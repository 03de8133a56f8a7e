//! Channel-level connection options.

/// How much of the client's identity the server may assume.
///
/// Only meaningful for named pipes; other transports ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpersonationLevel {
    /// The server cannot identify the client.
    Anonymous,
    /// The server can identify the client but not impersonate it.
    Identification,
    /// The server can impersonate the client on the local machine.
    Impersonation,
    /// The server can impersonate the client on remote machines.
    Delegation,
}

impl ImpersonationLevel {
    /// The `SECURITY_*` quality-of-service flag for this level.
    pub fn security_qos_flags(self) -> u32 {
        match self {
            ImpersonationLevel::Anonymous => 0,
            ImpersonationLevel::Identification => 1 << 16,
            ImpersonationLevel::Impersonation => 2 << 16,
            ImpersonationLevel::Delegation => 3 << 16,
        }
    }
}

/// Options applied when a connector opens a connection.
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    impersonation_level: Option<ImpersonationLevel>,
}

impl ChannelOptions {
    /// Create default channel options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the impersonation level requested from the server.
    pub fn impersonation_level(mut self, level: ImpersonationLevel) -> Self {
        self.impersonation_level = Some(level);
        self
    }

    /// Get the requested impersonation level, if any.
    pub fn get_impersonation_level(&self) -> Option<ImpersonationLevel> {
        self.impersonation_level
    }
}
