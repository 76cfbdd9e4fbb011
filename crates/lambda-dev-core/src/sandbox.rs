//! Sandbox construction.
//!
//! [`SandboxLoader::load`] turns the bundle on disk into a running
//! [`CompiledArtifact`]:
//!
//! 1. Read the bundle (fails fast with `BundleNotFound`)
//! 2. Bind the enabled capabilities
//! 3. Compile and run the import gate
//! 4. Link intrinsics, host bindings and allowed external modules
//! 5. Instantiate and run the top level exactly once
//! 6. Seal the handler registry and start the artifact worker

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Linker, Module, Store, Trap};

use lambda_dev_common::{CapabilitiesConfig, LambdaConfig, LambdaError};

use crate::WasmEngine;
use crate::artifact::{ArtifactInfo, CompiledArtifact};
use crate::bundle::Bundle;
use crate::capability::CapabilityBinder;
use crate::intrinsics;
use crate::invocation::PendingTable;
use crate::namespace::Namespace;
use crate::store::{SandboxContext, create_store};

/// Export run once after instantiation, in addition to any start section.
pub const TOP_LEVEL_EXPORT: &str = "_start";

/// Host-provided bindings linked into every sandbox.
///
/// The broker links the intrinsic namespaces itself; everything backed by
/// the outside world (HTTP, capability clients, built-ins) comes through this
/// trait.
pub trait HostFunctions: Send + Sync {
    /// Built-in facilities this host can provide.
    fn builtins(&self) -> &[&'static str] {
        &[]
    }

    /// Register the host bindings allowed by `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if function registration fails.
    fn register(
        &self,
        linker: &mut Linker<SandboxContext>,
        namespace: &Namespace,
    ) -> Result<(), LambdaError>;
}

/// A host that links nothing beyond the intrinsics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHostFunctions;

impl HostFunctions for NoHostFunctions {
    fn register(
        &self,
        _linker: &mut Linker<SandboxContext>,
        _namespace: &Namespace,
    ) -> Result<(), LambdaError> {
        Ok(())
    }
}

/// Construction-time sandbox settings.
///
/// Read once when an artifact is built; a cached artifact keeps the values
/// it was built with until the next rebuild.
#[derive(Debug, Clone, Default)]
pub struct SandboxSettings {
    /// Environment snapshot exposed through `env`.
    pub env: BTreeMap<String, String>,
    /// External modules the bundle may import.
    pub allowed_modules: Vec<String>,
    /// Built-in facilities the bundle may import.
    pub builtins: Vec<String>,
    /// Capability configuration.
    pub capabilities: CapabilitiesConfig,
}

impl SandboxSettings {
    /// Settings taken from the session configuration.
    pub fn from_config(config: &LambdaConfig) -> Self {
        Self {
            env: config.env.clone(),
            allowed_modules: config.allowed_require.clone(),
            builtins: config.effective_builtins(),
            capabilities: config.capabilities.clone(),
        }
    }
}

/// Where the bundle and its external modules live.
#[derive(Debug, Clone)]
pub struct BundleSource {
    /// Bundle path.
    pub bundle: PathBuf,
    /// Directory of `<name>.wat` external modules.
    pub modules_dir: Option<PathBuf>,
}

impl BundleSource {
    /// A bundle with no external module directory.
    pub fn new(bundle: impl Into<PathBuf>) -> Self {
        Self {
            bundle: bundle.into(),
            modules_dir: None,
        }
    }

    /// Set the external module directory.
    #[must_use]
    pub fn with_modules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.modules_dir = Some(dir.into());
        self
    }
}

/// Builds sandboxes from the bundle on disk.
pub struct SandboxLoader {
    engine: WasmEngine,
    binder: CapabilityBinder,
    host: Arc<dyn HostFunctions>,
}

impl SandboxLoader {
    /// Create a loader.
    pub fn new(engine: WasmEngine, binder: CapabilityBinder, host: Arc<dyn HostFunctions>) -> Self {
        Self {
            engine,
            binder,
            host,
        }
    }

    /// The engine sandboxes are compiled with.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Construct an artifact for `generation`.
    ///
    /// # Errors
    ///
    /// - [`LambdaError::BundleNotFound`] if the bundle file is missing
    /// - [`LambdaError::ImportDenied`] if an import is outside the namespace
    /// - [`LambdaError::Compilation`] if compiling or linking fails
    /// - [`LambdaError::Sandbox`] if the top level traps
    /// - [`LambdaError::Config`] if an enabled capability has no factory
    #[instrument(skip(self, source, settings), fields(bundle = %source.bundle.display()))]
    pub async fn load(
        &self,
        source: &BundleSource,
        settings: &SandboxSettings,
        generation: u64,
    ) -> Result<CompiledArtifact, LambdaError> {
        let start = Instant::now();

        let bundle = Bundle::read(&source.bundle).await?;
        let bindings = self.binder.bind(&settings.capabilities)?;
        let namespace = Namespace::new(
            bindings.names(),
            self.supported_builtins(&settings.builtins),
            settings.allowed_modules.clone(),
        );

        let module = bundle.compile(self.engine.inner())?;
        namespace.check(&module)?;

        let mut externals = Vec::new();
        for name in namespace.external_imports(&module) {
            let external = self.load_external(source.modules_dir.as_deref(), &name).await?;
            namespace.check(&external)?;
            externals.push((name, external));
        }

        let binding_names = bindings.names();
        let context = SandboxContext::new(settings.env.clone(), bindings, PendingTable::new());
        let mut store = create_store(&self.engine, context);

        let mut linker = Linker::new(self.engine.inner());
        intrinsics::register(&mut linker)?;
        self.host.register(&mut linker, &namespace)?;

        for (name, external) in externals {
            let instance = linker
                .instantiate_async(&mut store, &external)
                .await
                .map_err(|e| instantiation_error(&name, &e))?;
            linker
                .instance(&mut store, &name, instance)
                .map_err(|e| LambdaError::compilation(format!("{name}: {e}")))?;
            debug!(module = %name, "External module linked");
        }

        let instance = linker
            .instantiate_async(&mut store, &module)
            .await
            .map_err(|e| instantiation_error("bundle", &e))?;

        if let Some(top_level) = instance.get_func(&mut store, TOP_LEVEL_EXPORT) {
            let top_level = top_level
                .typed::<(), ()>(&store)
                .map_err(|e| LambdaError::compilation(format!("{TOP_LEVEL_EXPORT}: {e}")))?;
            top_level
                .call_async(&mut store, ())
                .await
                .map_err(|e| LambdaError::sandbox(format!("top level failed: {}", e.root_cause())))?;
        }

        store.data_mut().registry_mut().seal();
        validate_handlers(&mut store, &instance)?;

        let events = store.data().registry().events();
        if events.is_empty() {
            warn!("Bundle registered no event listeners");
        }

        info!(
            generation,
            content_hash = %bundle.content_hash(),
            bindings = ?binding_names,
            events = ?events,
            duration_ms = start.elapsed().as_millis(),
            "Function constructed"
        );

        let info = ArtifactInfo {
            generation,
            content_hash: bundle.content_hash().to_string(),
            bundle_path: bundle.path().to_path_buf(),
            bindings: binding_names,
        };
        Ok(CompiledArtifact::spawn(info, store, instance))
    }

    fn supported_builtins(&self, requested: &[String]) -> Vec<String> {
        let supported = self.host.builtins();
        requested
            .iter()
            .filter(|name| {
                let known = supported.contains(&name.as_str());
                if !known {
                    warn!(builtin = %name, "Built-in facility is not provided by this host");
                }
                known
            })
            .cloned()
            .collect()
    }

    async fn load_external(&self, dir: Option<&Path>, name: &str) -> Result<Module, LambdaError> {
        let dir = dir.ok_or_else(|| {
            LambdaError::compilation(format!(
                "external module '{name}' is allowed but no modules directory is configured"
            ))
        })?;

        let path = dir.join(format!("{name}.wat"));
        let bundle = Bundle::read(&path).await.map_err(|e| match e {
            LambdaError::BundleNotFound { path } => LambdaError::compilation(format!(
                "cannot find external module '{name}' at {}",
                path.display()
            )),
            other => other,
        })?;

        bundle.compile(self.engine.inner())
    }
}

impl std::fmt::Debug for SandboxLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLoader")
            .field("engine", &self.engine)
            .field("binder", &self.binder)
            .finish_non_exhaustive()
    }
}

/// Every registered handler must be an `(i64, i32) -> ()` export.
fn validate_handlers(
    store: &mut Store<SandboxContext>,
    instance: &wasmtime::Instance,
) -> Result<(), LambdaError> {
    let exports = store.data().registry().exports();
    for export in exports {
        instance
            .get_typed_func::<(i64, i32), ()>(&mut *store, &export)
            .map_err(|e| {
                LambdaError::compilation(format!("handler '{export}' has the wrong signature: {e}"))
            })?;
    }
    Ok(())
}

fn instantiation_error(what: &str, e: &wasmtime::Error) -> LambdaError {
    if e.downcast_ref::<Trap>().is_some() {
        LambdaError::sandbox(format!("{what} trapped during instantiation: {}", e.root_cause()))
    } else {
        LambdaError::compilation(format!("{what}: {e}"))
    }
}
