//! Per-algorithm kernel argument binding.
//!
//! A binder uploads the (possibly transformed) header to the device input
//! buffer with a blocking write and then sets the positional arguments of
//! every kernel stage the algorithm runs. Rejected `set_kernel_arg` calls are
//! collected rather than short-circuited, so a failed bind reports every slot
//! the runtime refused. The caller must not enqueue after a failed bind.

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{ComputeBackend, KernelArg, KernelId};
use crate::device::DeviceContext;
use crate::error::{BindFailure, DispatchError, Result};
use crate::session::MiningSession;
use crate::work::{TargetValue, WorkItem};

mod chained;
mod dag;
mod simple;
mod whirlpoolx;

pub use whirlpoolx::whirlpool_midblock;

/// Which argument layout an algorithm uses. Several algorithms share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinderKind {
    Scrypt,
    Neoscrypt,
    Pluck,
    Credits,
    Decred,
    Yescrypt,
    YescryptMulti,
    Sph,
    Maxcoin,
    DarkcoinMod,
    Sibcoin,
    Skein2,
    Skunk,
    Tribus,
    Veltor,
    MarucoinMod,
    MarucoinModOld,
    X14,
    X14Old,
    Bitblock,
    BitblockOld,
    TalkcoinMod,
    Fresh,
    Lyra2re,
    Lyra2rev2,
    Whirlcoin,
    Whirlpoolx,
    Blake,
    Ethash,
    Nightcap,
}

impl BinderKind {
    fn binder(self) -> &'static dyn KernelBinder {
        match self {
            Self::Scrypt => &simple::Scrypt,
            Self::Neoscrypt => &simple::NEOSCRYPT,
            Self::Pluck => &simple::PLUCK,
            Self::Credits => &simple::Credits,
            Self::Decred => &simple::Decred,
            Self::Yescrypt => &simple::Yescrypt,
            Self::Sph => &simple::SPH,
            Self::Maxcoin => &simple::MAXCOIN,
            Self::Blake => &simple::Blake,
            Self::YescryptMulti => &chained::YescryptMulti,
            Self::DarkcoinMod => &chained::X11,
            Self::Sibcoin => &chained::SIBCOIN,
            Self::Skein2 => &chained::SKEIN2,
            Self::Skunk => &chained::SKUNK,
            Self::Tribus => &chained::Tribus,
            Self::Veltor => &chained::VELTOR,
            Self::MarucoinMod => &chained::X13,
            Self::MarucoinModOld => &chained::X13_OLD,
            Self::X14 => &chained::X14,
            Self::X14Old => &chained::X14_OLD,
            Self::Bitblock => &chained::X15,
            Self::BitblockOld => &chained::X15_OLD,
            Self::TalkcoinMod => &chained::NIST5,
            Self::Fresh => &chained::FRESH,
            Self::Whirlcoin => &chained::WHIRLCOIN,
            Self::Lyra2re => &chained::Lyra2re,
            Self::Lyra2rev2 => &chained::Lyra2rev2,
            Self::Whirlpoolx => &whirlpoolx::Whirlpoolx,
            Self::Ethash => &dag::Ethash,
            Self::Nightcap => &dag::Nightcap,
        }
    }

    /// Kernel stages in launch order; the first is the main kernel.
    pub fn stage_names(self) -> &'static [&'static str] {
        self.binder().stages()
    }

    /// Auxiliary device buffers the layout references besides the scratch pad.
    pub fn aux_buffers(self) -> usize {
        match self {
            Self::Yescrypt => 2,
            Self::YescryptMulti => 3,
            Self::Lyra2rev2 => 1,
            _ => 0,
        }
    }

    /// Validates the work item against the layout, then binds.
    pub fn bind(
        self,
        ctx: &mut DeviceContext,
        session: &MiningSession,
        work: &WorkItem,
        threads: u32,
    ) -> Result<BindOutcome> {
        let binder = self.binder();
        binder.shape().validate(ctx.algorithm_name(), work)?;
        let outcome = binder.bind(ctx, session, work, threads)?;
        debug!(
            device = ctx.name(),
            algorithm = ctx.algorithm_name(),
            stages = outcome.stages,
            threads,
            "kernel arguments bound"
        );
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindOutcome {
    /// Kernel stages whose arguments were set.
    pub stages: usize,
    /// Start nonce handed to the kernel, for layouts that take one.
    pub start_nonce: Option<u64>,
}

impl BindOutcome {
    fn stages(stages: usize) -> Self {
        Self {
            stages,
            start_nonce: None,
        }
    }
}

/// Binding logic for one argument layout.
pub(crate) trait KernelBinder: Sync {
    fn stages(&self) -> &'static [&'static str];

    fn shape(&self) -> WorkShape;

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        session: &MiningSession,
        work: &WorkItem,
        threads: u32,
    ) -> Result<BindOutcome>;
}

/// What a layout needs from a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkShape {
    header: usize,
    midstate: usize,
    block_context: bool,
    dag: bool,
}

impl WorkShape {
    pub(crate) const fn header(header: usize) -> Self {
        Self {
            header,
            midstate: 0,
            block_context: false,
            dag: false,
        }
    }

    pub(crate) const fn midstate(mut self, bytes: usize) -> Self {
        self.midstate = bytes;
        self
    }

    pub(crate) const fn block_context(mut self) -> Self {
        self.block_context = true;
        self
    }

    pub(crate) const fn dag(mut self) -> Self {
        self.dag = true;
        self
    }

    pub(crate) fn validate(&self, algorithm: &str, work: &WorkItem) -> Result<()> {
        if work.data.len() < self.header {
            return Err(DispatchError::mismatch(
                algorithm,
                format!(
                    "header is {} bytes, layout reads {}",
                    work.data.len(),
                    self.header
                ),
            ));
        }
        if self.midstate > 0 {
            let have = work.midstate.as_ref().map_or(0, Vec::len);
            if have < self.midstate {
                return Err(DispatchError::mismatch(
                    algorithm,
                    format!("midstate is {have} bytes, layout reads {}", self.midstate),
                ));
            }
        }
        if self.block_context && work.block_context.is_none() {
            return Err(DispatchError::mismatch(
                algorithm,
                "missing precomputed block context",
            ));
        }
        if self.dag && work.dag.is_none() {
            return Err(DispatchError::mismatch(algorithm, "missing DAG epoch and seed"));
        }
        Ok(())
    }
}

impl From<TargetValue> for KernelArg {
    fn from(value: TargetValue) -> Self {
        match value {
            TargetValue::U32(word) => Self::U32(word),
            TargetValue::U64(word) => Self::U64(word),
        }
    }
}

/// Positional argument setter shared by all layouts.
///
/// `kernel` switches to the next stage and restarts the index at zero;
/// `arg` sets the next slot. A rejected slot is recorded and binding goes on.
pub(crate) struct ArgBinder<'a> {
    backend: &'a mut dyn ComputeBackend,
    stage: &'static str,
    kernel: KernelId,
    next: u32,
    failures: Vec<BindFailure>,
}

impl<'a> ArgBinder<'a> {
    pub(crate) fn new(backend: &'a mut dyn ComputeBackend) -> Self {
        Self {
            backend,
            stage: "",
            kernel: KernelId(0),
            next: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn kernel(&mut self, stage: &'static str, kernel: KernelId) -> &mut Self {
        self.stage = stage;
        self.kernel = kernel;
        self.next = 0;
        self
    }

    pub(crate) fn arg(&mut self, arg: impl Into<KernelArg>) -> &mut Self {
        let arg = arg.into();
        let index = self.next;
        self.next += 1;
        if let Err(status) = self.backend.set_kernel_arg(self.kernel, index, &arg) {
            warn!(
                stage = self.stage,
                kernel = self.kernel.0,
                index,
                %status,
                "kernel argument rejected"
            );
            self.failures.push(BindFailure {
                stage: self.stage,
                kernel: self.kernel,
                index,
                status,
            });
        }
        self
    }

    pub(crate) fn words(&mut self, words: &[u32]) -> &mut Self {
        for word in words {
            self.arg(*word);
        }
        self
    }

    pub(crate) fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::BindFailed {
                failures: self.failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::registry;
    use crate::backend::host::{CallKind, HostBackend};
    use crate::backend::DeviceStatus;

    #[test]
    fn every_kind_names_its_stages() {
        for descriptor in registry() {
            let kind = descriptor.capabilities.queue_kernel;
            assert!(!kind.stage_names().is_empty(), "{kind:?} has no stages");
        }
    }

    #[test]
    fn arg_binder_collects_every_failure() {
        let mut backend = HostBackend::new("host0");
        let handle = backend.handle();
        let main = backend.load_kernel("search").expect("kernel should load");
        let extra = backend.load_kernel("search1").expect("kernel should load");
        handle.fail_call(CallKind::SetArg, 1, DeviceStatus::INVALID_ARG_SIZE);

        let mut args = ArgBinder::new(&mut backend);
        args.kernel("first", main).arg(1u32).arg(2u32);
        args.kernel("second", extra).arg(3u64);
        let err = args.finish().expect_err("one rejected slot fails the bind");

        match err {
            DispatchError::BindFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].stage, "first");
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(handle.count(CallKind::SetArg), 3);
        assert_eq!(handle.kernel_args(extra), vec![(0, KernelArg::U64(3))]);
    }

    #[test]
    fn shape_rejects_short_header_and_missing_context() {
        let work = WorkItem::new(vec![0u8; 40], [0u8; 32]);
        let err = WorkShape::header(80)
            .validate("sph", &work)
            .expect_err("short header should be rejected");
        assert!(matches!(err, DispatchError::ProtocolMismatch { .. }));

        let work = WorkItem::new(vec![0u8; 80], [0u8; 32]);
        assert!(WorkShape::header(80).block_context().validate("blake", &work).is_err());
        assert!(WorkShape::header(80).midstate(32).validate("scrypt", &work).is_err());
        assert!(WorkShape::header(32).dag().validate("ethash", &work).is_err());
        assert!(WorkShape::header(80).validate("sph", &work).is_ok());
    }
}
