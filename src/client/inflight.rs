//! Rejects a second mutation of a target while the first is still running.

use dashmap::DashSet;

use super::error::ClientError;

#[derive(Debug, Default)]
pub struct InFlight {
    active: DashSet<String>,
}

/// Releases the target when dropped
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    active: &'a DashSet<String>,
    key: String,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: impl Into<String>) -> Result<InFlightGuard<'_>, ClientError> {
        let key = key.into();
        if !self.active.insert(key.clone()) {
            return Err(ClientError::validation(
                "request",
                "This action is already in progress",
            ));
        }
        Ok(InFlightGuard {
            active: &self.active,
            key,
        })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains(key)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}
