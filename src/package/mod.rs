//! Dependency backends
//!
//! Backends form an ordered [`FallbackChain`]. The registry walks the chain
//! until one backend fetches an artifact that matches the manifest's
//! integrity digest. A digest mismatch stops the walk.

mod backend;
mod integrity;
mod kind;
mod manifest;
mod registry;

pub use backend::{FetchPlan, FetchStep, CPM_SCRIPT_NAME};
pub use integrity::{Algorithm, Integrity};
pub use kind::{FallbackChain, PackageManagerDescriptor, PackageManagerKind};
pub use manifest::{DependencyManifest, DependencySpec};
pub use registry::{PackageManagerRegistry, ResolvedDependency};
