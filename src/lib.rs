//! Host-side kernel dispatch for GPU proof-of-work search.
//!
//! Resolves user-facing algorithm names to compiled-in descriptors, binds
//! each algorithm's kernel arguments in the positional layout its kernels
//! expect, and manages the shared light caches and per-device datasets of
//! the DAG families.

pub mod algorithm;
pub mod backend;
pub mod binder;
pub mod dag;
pub mod device;
pub mod error;
pub mod session;
pub mod work;

pub use algorithm::{AlgorithmConfig, AlgorithmDescriptor, Family};
pub use backend::{ComputeBackend, DeviceStatus, KernelArg};
pub use binder::{BindOutcome, BinderKind};
pub use dag::DagCacheManager;
pub use device::{DeviceContext, DeviceLayout};
pub use error::{DispatchError, Result};
pub use session::MiningSession;
pub use work::{BlockContext, DagWork, WorkItem};
