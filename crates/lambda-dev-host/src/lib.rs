//! Host bindings and capability backends for lambda-dev.
//!
//! The broker in `lambda-dev-core` only links its intrinsic namespaces
//! (`edge`, `env`, `response`). Everything that reaches outside the sandbox
//! lives here:
//!
//! - [`linker`]: [`HostBindings`], the [`lambda_dev_core::HostFunctions`] implementation
//! - [`fetch`]: Outbound HTTP for the `fetch` binding
//! - [`policy`]: Host allow-list, private address blocking and request budget
//! - [`capabilities`]: KV, blob, filesystem and log backends
//! - [`builtins`]: `clock`, `random` and `console`
//!
//! # Isolation
//!
//! A capability namespace is linked only when the capability is enabled and
//! bound, so a bundle importing a disabled capability is refused by the import
//! gate before any of this code runs.

pub mod builtins;
pub mod capabilities;
pub mod fetch;
pub mod linker;
pub mod policy;

pub use capabilities::binder;
pub use fetch::{FetchError, FetchHost, FetchRequest, FetchResponse};
pub use linker::HostBindings;
pub use policy::{FetchPolicy, FetchPolicyBuilder};
