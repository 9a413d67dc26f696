//! Request metadata carried into handlers so that log lines from one
//! request can be joined up.

use std::net::IpAddr;

use uuid::Uuid;

/// Who asked, and under which correlation id
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub correlation_id: Uuid,
    /// Best-effort client address from proxy headers
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    /// Context with a fresh correlation id, for work not started by a request
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            client_ip: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
