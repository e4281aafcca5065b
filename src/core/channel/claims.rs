//! Process-wide table of port identifiers held by open channels

use super::ChannelError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn claimed() -> &'static Mutex<HashSet<String>> {
    static CLAIMED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive hold on a port identifier, released on drop
#[derive(Debug)]
pub(crate) struct PortClaim {
    port: String,
}

impl PortClaim {
    pub(crate) fn acquire(port: &str) -> Result<Self, ChannelError> {
        if !claimed().lock().insert(port.to_string()) {
            return Err(ChannelError::Connection {
                port: port.to_string(),
                reason: "port is already held by another channel".to_string(),
            });
        }
        Ok(Self {
            port: port.to_string(),
        })
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        claimed().lock().remove(&self.port);
    }
}
