//! Event handler registry populated by the bundle's top level.

use std::collections::BTreeMap;

/// Why a registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    /// The top level already finished; the registry is sealed.
    Closed,
}

/// Ordered handler exports per event name.
///
/// Handlers are registered while the top level runs and the registry is
/// sealed right after, so the set of handlers is fixed for the lifetime of
/// an artifact.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Vec<String>>,
    sealed: bool,
}

impl HandlerRegistry {
    /// An empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `export` to the handlers of `event`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Closed`] once the registry is sealed.
    pub fn register(&mut self, event: &str, export: &str) -> Result<(), RegistrationError> {
        if self.sealed {
            return Err(RegistrationError::Closed);
        }
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(export.to_string());
        Ok(())
    }

    /// Refuse further registrations.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns `true` once the registry is sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Handler exports for `event`, in registration order.
    pub fn handlers(&self, event: &str) -> &[String] {
        self.handlers.get(event).map_or(&[], Vec::as_slice)
    }

    /// Every event with at least one handler.
    pub fn events(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Every registered export, deduplicated.
    pub fn exports(&self) -> Vec<String> {
        let mut exports: Vec<String> = self.handlers.values().flatten().cloned().collect();
        exports.sort();
        exports.dedup();
        exports
    }
}
