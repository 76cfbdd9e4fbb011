//! Execution broker for lambda-dev.
//!
//! This crate turns one bundle on disk into a sandbox and bridges requests
//! into it:
//! - [`WasmEngine`]: Shared Wasmtime engine with epoch-based yielding
//! - [`SandboxLoader`]: Compiles, gates, links and initializes a sandbox
//! - [`CapabilityBinder`]: Binds only the capabilities that are enabled
//! - [`ArtifactCache`]: Single-slot cache keyed by build generation
//! - [`RequestBridge`]: Dispatches a request and waits with a deadline
//! - [`RebuildListener`]: Evicts the artifact when the bundle is rebuilt
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    RequestBridge                        │
//! │  - request envelope (context, deadline, settings)       │
//! │  - Pending -> Completed | TimedOut | Failed             │
//! └─────────────────────────────────────────────────────────┘
//!                            │ lookup / construct
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ArtifactCache                        │
//! │  (one slot, evicted by RebuildListener)                 │
//! └─────────────────────────────────────────────────────────┘
//!                            │ miss
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         SandboxLoader + CapabilityBinder                │
//! │  - import gate                                          │
//! │  - edge / env / response + host bindings                │
//! │  - top level runs once, registry sealed                 │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │       CompiledArtifact (worker owning the store)        │
//! │  - mailbox of dispatched events                         │
//! │  - pending invocations with oneshot completions         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod bridge;
pub mod bundle;
pub mod cache;
pub mod capability;
pub mod context;
pub mod engine;
pub mod guest;
pub mod intrinsics;
pub mod invocation;
pub mod lifecycle;
pub mod namespace;
pub mod registry;
pub mod response;
pub mod sandbox;
pub mod store;

pub use artifact::{CompiledArtifact, REQUEST_EVENT};
pub use bridge::{InvocationState, RequestBridge, RequestEnvelope};
pub use bundle::Bundle;
pub use cache::ArtifactCache;
pub use capability::{
    BlobStore, Bindings, BoundClient, CapabilityBinder, CapabilityFactory, CapabilityKind,
    FileSystem, KeyValue, LogLevel, LogSink,
};
pub use context::ContextSnapshot;
pub use engine::WasmEngine;
pub use invocation::{Invocation, Outcome, PendingTable};
pub use lifecycle::{BuildEvent, RebuildListener};
pub use namespace::Namespace;
pub use response::{OuterResponse, ResponseBody, ResponseDescriptor};
pub use sandbox::{BundleSource, HostFunctions, NoHostFunctions, SandboxLoader, SandboxSettings};
pub use store::{RESULT_ABSENT, RESULT_ERROR, SandboxContext};
