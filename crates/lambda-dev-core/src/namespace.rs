//! The set of import namespaces a sandbox may reach, and the import gate.

use std::collections::BTreeSet;

use tracing::warn;
use wasmtime::Module;

use lambda_dev_common::LambdaError;

use crate::intrinsics::{EDGE, ENV, RESPONSE};

/// Namespace of the injected HTTP client.
pub const FETCH: &str = "fetch";

/// Namespaces every sandbox may import.
pub const STATIC_ALLOW_LIST: [&str; 4] = [EDGE, ENV, RESPONSE, FETCH];

/// What a sandbox may import.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    capabilities: Vec<&'static str>,
    builtins: Vec<String>,
    external: Vec<String>,
}

impl Namespace {
    /// A namespace with the static allow-list and the given extras.
    pub fn new(capabilities: Vec<&'static str>, builtins: Vec<String>, external: Vec<String>) -> Self {
        Self {
            capabilities,
            builtins,
            external,
        }
    }

    /// Bound capability namespaces.
    pub fn capabilities(&self) -> &[&'static str] {
        &self.capabilities
    }

    /// Allowed built-in facilities.
    pub fn builtins(&self) -> &[String] {
        &self.builtins
    }

    /// Allowed external modules.
    pub fn external(&self) -> &[String] {
        &self.external
    }

    /// Returns `true` if `builtin` was allowed.
    pub fn allows_builtin(&self, builtin: &str) -> bool {
        self.builtins.iter().any(|b| b == builtin)
    }

    /// Returns `true` if `module` is an allowed external module.
    pub fn is_external(&self, module: &str) -> bool {
        self.external.iter().any(|m| m == module)
    }

    /// Returns `true` if a bundle may import from `module`.
    pub fn allows(&self, module: &str) -> bool {
        STATIC_ALLOW_LIST.contains(&module)
            || self.capabilities.contains(&module)
            || self.allows_builtin(module)
            || self.is_external(module)
    }

    /// Refuse `module` if it imports anything outside this namespace.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::ImportDenied`] naming the first offending import.
    pub fn check(&self, module: &Module) -> Result<(), LambdaError> {
        for import in module.imports() {
            if !self.allows(import.module()) {
                warn!(
                    module = import.module(),
                    name = import.name(),
                    "Import denied"
                );
                return Err(LambdaError::import_denied(import.module(), import.name()));
            }
        }
        Ok(())
    }

    /// External modules imported by `module`, in first-use order.
    pub fn external_imports(&self, module: &Module) -> Vec<String> {
        let mut seen = BTreeSet::new();
        module
            .imports()
            .map(|import| import.module())
            .filter(|name| self.is_external(name) && seen.insert(name.to_string()))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use lambda_dev_common::EngineConfig;

    fn compile(wat: &str) -> Module {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        Module::new(engine.inner(), wat).unwrap()
    }

    #[test]
    fn test_static_allow_list() {
        let namespace = Namespace::default();
        assert!(namespace.allows("edge"));
        assert!(namespace.allows("env"));
        assert!(namespace.allows("response"));
        assert!(namespace.allows("fetch"));
        assert!(!namespace.allows("kv"));
        assert!(!namespace.allows("clock"));
    }

    #[test]
    fn test_extras_are_allowed() {
        let namespace = Namespace::new(vec!["kv"], vec!["clock".into()], vec!["helpers".into()]);
        assert!(namespace.allows("kv"));
        assert!(namespace.allows("clock"));
        assert!(namespace.allows("helpers"));
        assert!(!namespace.allows("blob"));
    }

    #[test]
    fn test_gate_denies_unknown_import() {
        let module = compile(
            r#"(module
                (import "edge" "read_result" (func (param i32) (result i32)))
                (import "kv" "get" (func (param i32 i32) (result i32))))"#,
        );

        let err = Namespace::default().check(&module).unwrap_err();
        assert!(
            matches!(err, LambdaError::ImportDenied { ref module, ref name } if module == "kv" && name == "get")
        );
    }

    #[test]
    fn test_gate_accepts_allowed_imports() {
        let module = compile(
            r#"(module
                (import "helpers" "double" (func (param i32) (result i32)))
                (import "env" "get" (func (param i32 i32) (result i32))))"#,
        );

        let namespace = Namespace::new(Vec::new(), Vec::new(), vec!["helpers".into()]);
        assert!(namespace.check(&module).is_ok());
        assert_eq!(namespace.external_imports(&module), vec!["helpers"]);
    }
}
