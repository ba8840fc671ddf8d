//! Single-kernel layouts.

use super::{ArgBinder, BindOutcome, KernelBinder, WorkShape};
use crate::backend::KernelArg;
use crate::device::DeviceContext;
use crate::error::{DispatchError, Result};
use crate::session::MiningSession;
use crate::work::{flip80, BlockContext, TargetWord, WorkItem, BLOCK_HEADER_LEN};

const MAIN: &[&str] = &["search"];
const CREDITS_HEADER_LEN: usize = 168;

fn midstate<'w>(ctx: &DeviceContext, work: &'w WorkItem, len: usize) -> Result<&'w [u8]> {
    work.midstate
        .as_deref()
        .and_then(|midstate| midstate.get(..len))
        .ok_or_else(|| DispatchError::mismatch(ctx.algorithm_name(), "missing midstate"))
}

pub(super) fn block_context(ctx: &DeviceContext, work: &WorkItem) -> Result<BlockContext> {
    work.block_context.ok_or_else(|| {
        DispatchError::mismatch(ctx.algorithm_name(), "missing precomputed block context")
    })
}

pub(crate) struct Scrypt;

impl KernelBinder for Scrypt {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN).midstate(32)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let midstate = midstate(ctx, work, 32)?.to_vec();
        let target = TargetWord::U32At28.extract(&work.target);
        ctx.upload_header(&work.data[..BLOCK_HEADER_LEN])?;

        let buffers = ctx.buffers();
        let scratch = buffers.scratch()?;
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.input)
            .arg(buffers.output)
            .arg(scratch)
            .arg(KernelArg::Bytes(midstate[..16].to_vec()))
            .arg(KernelArg::Bytes(midstate[16..32].to_vec()))
            .arg(target);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

/// Raw or flipped header, then (input, output, scratch, u32 target).
pub(crate) struct ScratchSearch {
    flip: bool,
}

pub(crate) const NEOSCRYPT: ScratchSearch = ScratchSearch { flip: false };
pub(crate) const PLUCK: ScratchSearch = ScratchSearch { flip: true };

impl KernelBinder for ScratchSearch {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let target = TargetWord::U32At28.extract(&work.target);
        if self.flip {
            ctx.upload_header(&flip80(&work.data))?;
        } else {
            ctx.upload_header(&work.data[..BLOCK_HEADER_LEN])?;
        }

        let buffers = ctx.buffers();
        let scratch = buffers.scratch()?;
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.input)
            .arg(buffers.output)
            .arg(scratch)
            .arg(target);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

pub(crate) struct Credits;

impl KernelBinder for Credits {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(CREDITS_HEADER_LEN).midstate(32)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let midstate = midstate(ctx, work, 32)?.to_vec();
        let target = TargetWord::U64At24.extract(&work.target);
        ctx.upload_header(&work.data[..CREDITS_HEADER_LEN])?;

        let buffers = ctx.buffers();
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.input)
            .arg(buffers.output)
            .arg(target)
            .arg(KernelArg::Bytes(midstate));
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

pub(crate) struct Yescrypt;

impl KernelBinder for Yescrypt {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let target = TargetWord::U32At28.extract(&work.target);
        ctx.upload_header(&flip80(&work.data))?;

        let buffers = ctx.buffers();
        let (scratch, buffer1, buffer2) = (buffers.scratch()?, buffers.aux(0)?, buffers.aux(1)?);
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.input)
            .arg(buffers.output)
            .arg(scratch)
            .arg(buffer1)
            .arg(buffer2)
            .arg(target);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

/// Flipped header, then (input, output) plus an optional u64 target.
pub(crate) struct FlippedSearch {
    target: Option<TargetWord>,
}

/// Generic single-kernel hash chains compiled into one kernel.
pub(crate) const SPH: FlippedSearch = FlippedSearch {
    target: Some(TargetWord::U64At24),
};
/// The keccak kernel compares against a compile-time target.
pub(crate) const MAXCOIN: FlippedSearch = FlippedSearch { target: None };

impl KernelBinder for FlippedSearch {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        ctx.upload_header(&flip80(&work.data))?;

        let buffers = ctx.buffers();
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.input)
            .arg(buffers.output);
        if let Some(word) = self.target {
            args.arg(word.extract(&work.target));
        }
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

pub(crate) struct Blake;

impl KernelBinder for Blake {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN).block_context()
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let block = block_context(ctx, work)?;
        ctx.upload_header(&flip80(&work.data))?;

        let buffers = ctx.buffers();
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.output)
            .words(&block.ctx)
            .words(&block.cty[..3]);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}

/// Reads everything from the precomputed context; nothing is uploaded.
pub(crate) struct Decred;

impl KernelBinder for Decred {
    fn stages(&self) -> &'static [&'static str] {
        MAIN
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(0).block_context()
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let block = block_context(ctx, work)?;

        let buffers = ctx.buffers();
        let kernels = ctx.stage_kernels(MAIN.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(MAIN[0], kernels[0])
            .arg(buffers.output)
            .words(&block.ctx)
            .words(&block.cty);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}
