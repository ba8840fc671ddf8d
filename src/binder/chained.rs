//! Multi-stage layouts. Stages hand intermediate hashes to each other
//! through the scratch pad (or the auxiliary buffers), and only the last
//! stage sees the output buffer and the target.

use super::simple::block_context;
use super::{ArgBinder, BindOutcome, KernelBinder, WorkShape};
use crate::backend::{BufferId, KernelId};
use crate::device::DeviceContext;
use crate::error::Result;
use crate::session::MiningSession;
use crate::work::{flip80, swab32, TargetValue, TargetWord, WorkItem, BLOCK_HEADER_LEN};

const X11_STAGES: [&str; 11] = [
    "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite", "simd",
    "echo",
];

/// Flipped header, then `(input, scratch)`, `(scratch)` for every middle
/// stage and `(scratch, output, u64 target)` for the last one.
pub(crate) struct ScratchChain {
    stages: &'static [&'static str],
}

pub(crate) const X11: ScratchChain = ScratchChain {
    stages: &X11_STAGES,
};
pub(crate) const SIBCOIN: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "gost", "luffa", "cubehash",
        "shavite", "simd", "echo",
    ],
};
pub(crate) const SKEIN2: ScratchChain = ScratchChain {
    stages: &["skein80", "skein64"],
};
pub(crate) const SKUNK: ScratchChain = ScratchChain {
    stages: &["skein", "cubehash", "fugue", "streebog"],
};
pub(crate) const VELTOR: ScratchChain = ScratchChain {
    stages: &["skein", "shavite", "shabal", "streebog"],
};
pub(crate) const X13: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite",
        "simd", "echo", "hamsi", "fugue",
    ],
};
pub(crate) const X13_OLD: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite",
        "simd", "echo-hamsi-fugue",
    ],
};
pub(crate) const X14: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite",
        "simd", "echo", "hamsi", "fugue", "shabal",
    ],
};
pub(crate) const X14_OLD: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite",
        "simd", "echo-hamsi-fugue-shabal",
    ],
};
pub(crate) const X15: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite",
        "simd", "echo", "hamsi", "fugue", "shabal", "whirlpool",
    ],
};
pub(crate) const X15_OLD: ScratchChain = ScratchChain {
    stages: &[
        "blake", "bmw", "groestl", "skein", "jh", "keccak", "luffa", "cubehash", "shavite",
        "simd", "echo-hamsi-fugue-shabal-whirlpool",
    ],
};
pub(crate) const NIST5: ScratchChain = ScratchChain {
    stages: &["blake", "groestl", "jh", "keccak", "skein"],
};
pub(crate) const FRESH: ScratchChain = ScratchChain {
    stages: &["shavite", "simd", "shavite", "simd", "echo"],
};
pub(crate) const WHIRLCOIN: ScratchChain = ScratchChain {
    stages: &["whirlpool80", "whirlpool", "whirlpool", "whirlpool"],
};

impl KernelBinder for ScratchChain {
    fn stages(&self) -> &'static [&'static str] {
        self.stages
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
        let target = TargetWord::U64At24.extract(&work.target);
        ctx.upload_header(&flip80(&work.data))?;

        let buffers = ctx.buffers();
        let scratch = buffers.scratch()?;
        let kernels = ctx.stage_kernels(self.stages.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(self.stages[0], kernels[0])
            .arg(buffers.input)
            .arg(scratch);
        bind_tail(&mut args, self.stages, &kernels, scratch, buffers.output, target);
        args.finish()?;
        Ok(BindOutcome::stages(self.stages.len()))
    }
}

/// Stages after the first: scratch only, with the output and target on the
/// last one.
fn bind_tail(
    args: &mut ArgBinder<'_>,
    stages: &'static [&'static str],
    kernels: &[KernelId],
    scratch: BufferId,
    output: BufferId,
    target: TargetValue,
) {
    let last = stages.len() - 1;
    for (idx, (stage, kernel)) in stages.iter().zip(kernels).enumerate().skip(1) {
        args.kernel(*stage, *kernel).arg(scratch);
        if idx == last {
            args.arg(output).arg(target);
        }
    }
}

/// Header midstate plus the byte-swapped tail words, as one 144-byte upload.
pub(crate) struct Tribus;

const TRIBUS_STAGES: &[&str] = &["jh80-keccak", "echo"];
const TRIBUS_MIDSTATE_LEN: usize = 128;

pub(crate) fn tribus_upload(midstate: &[u8], data: &[u8]) -> Vec<u8> {
    let mut upload = Vec::with_capacity(TRIBUS_MIDSTATE_LEN + 16);
    upload.extend_from_slice(&midstate[..TRIBUS_MIDSTATE_LEN]);
    for word in data[64..76].chunks_exact(4) {
        let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        upload.extend_from_slice(&swab32(word).to_le_bytes());
    }
    // The nonce word is filled in by the kernel.
    upload.extend_from_slice(&[0u8; 4]);
    upload
}

impl KernelBinder for Tribus {
    fn stages(&self) -> &'static [&'static str] {
        TRIBUS_STAGES
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN).midstate(TRIBUS_MIDSTATE_LEN)
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        _session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let midstate = work.midstate.as_deref().unwrap_or_default();
        let target = TargetWord::U64At24.extract(&work.target);
        ctx.upload_header(&tribus_upload(midstate, &work.data))?;

        let buffers = ctx.buffers();
        let scratch = buffers.scratch()?;
        let kernels = ctx.stage_kernels(TRIBUS_STAGES.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(TRIBUS_STAGES[0], kernels[0])
            .arg(buffers.input)
            .arg(scratch);
        bind_tail(&mut args, TRIBUS_STAGES, &kernels, scratch, buffers.output, target);
        args.finish()?;
        Ok(BindOutcome::stages(TRIBUS_STAGES.len()))
    }
}

/// Blake precompute in the main kernel, then a scratch chain.
pub(crate) struct Lyra2re;

const LYRA2RE_STAGES: &[&str] = &["blake", "keccak", "lyra2", "skein", "groestl"];

impl KernelBinder for Lyra2re {
    fn stages(&self) -> &'static [&'static str] {
        LYRA2RE_STAGES
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
        let target = TargetWord::U64At24.extract(&work.target);
        ctx.upload_header(&flip80(&work.data))?;

        let buffers = ctx.buffers();
        let scratch = buffers.scratch()?;
        let kernels = ctx.stage_kernels(LYRA2RE_STAGES.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(LYRA2RE_STAGES[0], kernels[0])
            .arg(scratch)
            .words(&block.ctx)
            .words(&block.cty[..3]);
        bind_tail(&mut args, LYRA2RE_STAGES, &kernels, scratch, buffers.output, target);
        args.finish()?;
        Ok(BindOutcome::stages(LYRA2RE_STAGES.len()))
    }
}

/// Like lyra2re, but hashes travel through `buffer1`; only the lyra2 stage
/// touches the scratch pad.
pub(crate) struct Lyra2rev2;

const LYRA2REV2_STAGES: &[&str] = &[
    "blake", "keccak", "cubehash", "lyra2", "skein", "cubehash", "bmw",
];

impl KernelBinder for Lyra2rev2 {
    fn stages(&self) -> &'static [&'static str] {
        LYRA2REV2_STAGES
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
        let target = TargetWord::U64At24.extract(&work.target);
        ctx.upload_header(&flip80(&work.data))?;

        let buffers = ctx.buffers();
        let (scratch, buffer1) = (buffers.scratch()?, buffers.aux(0)?);
        let kernels = ctx.stage_kernels(LYRA2REV2_STAGES.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(LYRA2REV2_STAGES[0], kernels[0])
            .arg(buffer1)
            .words(&block.ctx)
            .words(&block.cty[..3]);
        let last = LYRA2REV2_STAGES.len() - 1;
        for (idx, (stage, kernel)) in LYRA2REV2_STAGES.iter().zip(&kernels).enumerate().skip(1) {
            args.kernel(*stage, *kernel).arg(buffer1);
            match idx {
                3 => {
                    args.arg(scratch);
                }
                _ if idx == last => {
                    args.arg(buffers.output).arg(target);
                }
                _ => {}
            }
        }
        args.finish()?;
        Ok(BindOutcome::stages(LYRA2REV2_STAGES.len()))
    }
}

/// Seven-kernel yescrypt split. The mixing stages share the three
/// auxiliary buffers; the first and last see the header and the output.
pub(crate) struct YescryptMulti;

const YESCRYPT_MULTI_STAGES: &[&str] = &[
    "pbkdf-init",
    "blockmix-1",
    "mix2-1",
    "blockmix-2",
    "mix2-2",
    "blockmix-3",
    "pbkdf-final",
];

impl KernelBinder for YescryptMulti {
    fn stages(&self) -> &'static [&'static str] {
        YESCRYPT_MULTI_STAGES
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
        ctx.upload_header(&work.data[..BLOCK_HEADER_LEN])?;

        let buffers = ctx.buffers();
        let pad = buffers.scratch()?;
        let (buffer1, buffer2, buffer3) = (buffers.aux(0)?, buffers.aux(1)?, buffers.aux(2)?);
        let kernels = ctx.stage_kernels(YESCRYPT_MULTI_STAGES.len())?;
        let stages = YESCRYPT_MULTI_STAGES;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(stages[0], kernels[0])
            .arg(buffers.input)
            .arg(buffers.output)
            .arg(pad)
            .arg(buffer1)
            .arg(buffer2)
            .arg(buffer3)
            .arg(target);
        for idx in 1..6 {
            args.kernel(stages[idx], kernels[idx]);
            if idx % 2 == 0 {
                args.arg(pad);
            }
            args.arg(buffer1).arg(buffer2);
        }
        args.kernel(stages[6], kernels[6])
            .arg(buffers.input)
            .arg(buffers.output)
            .arg(buffer2)
            .arg(buffer3)
            .arg(target);
        args.finish()?;
        Ok(BindOutcome::stages(stages.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmConfig;
    use crate::backend::host::{CallKind, HostBackend, HostCall, HostHandle};
    use crate::backend::{DeviceStatus, KernelArg};
    use crate::device::DeviceLayout;
    use crate::error::DispatchError;
    use crate::work::BlockContext;

    fn open(algorithm: &str) -> (DeviceContext, HostHandle) {
        let backend = HostBackend::new("host0");
        let handle = backend.handle();
        let layout = DeviceLayout {
            device_scratch_bytes: 1024,
            scratch_limit: Some(1024),
            aux_buffer_bytes: 256,
        };
        let ctx = DeviceContext::open(
            Box::new(backend),
            &AlgorithmConfig::from_name(algorithm),
            &layout,
        )
        .expect("device should open");
        handle.clear_calls();
        (ctx, handle)
    }

    fn bind(ctx: &mut DeviceContext, work: &WorkItem) -> Result<BindOutcome> {
        let kind = ctx.algorithm().binder();
        kind.bind(ctx, &MiningSession::new(), work, 1024)
    }

    fn args(handle: &HostHandle, entry: &str) -> Vec<KernelArg> {
        let kernel = handle.find_kernel(entry).expect("kernel should exist");
        handle
            .kernel_args(kernel)
            .into_iter()
            .map(|(_, arg)| arg)
            .collect()
    }

    fn target() -> [u8; 32] {
        let mut target = [0u8; 32];
        target[24..32].copy_from_slice(&[0xff, 0, 0, 0, 0, 0, 0, 0x01]);
        target
    }

    #[test]
    fn x11_binds_eleven_stages_through_scratch() {
        let (mut ctx, handle) = open("x11");
        let outcome = bind(&mut ctx, &WorkItem::new(vec![0u8; 80], target()))
            .expect("bind should succeed");
        assert_eq!(outcome.stages, 11);

        let buffers = ctx.buffers();
        let scratch = KernelArg::Buffer(buffers.scratch().expect("scratch"));
        assert_eq!(
            args(&handle, "search"),
            vec![KernelArg::Buffer(buffers.input), scratch.clone()]
        );
        for idx in 1..10 {
            assert_eq!(args(&handle, &format!("search{idx}")), vec![scratch.clone()]);
        }
        assert_eq!(
            args(&handle, "search10"),
            vec![
                scratch,
                KernelArg::Buffer(buffers.output),
                KernelArg::U64(0x0100_0000_0000_00ff),
            ]
        );
    }

    #[test]
    fn sibcoin_mod_has_twelve_stages() {
        let (mut ctx, handle) = open("sib");
        assert_eq!(ctx.algorithm_name(), "sibcoin-mod");
        let outcome = bind(&mut ctx, &WorkItem::new(vec![0u8; 80], target()))
            .expect("bind should succeed");
        assert_eq!(outcome.stages, 12);
        assert_eq!(args(&handle, "search11").len(), 3);
    }

    #[test]
    fn failures_in_several_stages_are_all_reported() {
        let (mut ctx, handle) = open("skunk");
        handle.fail_call(CallKind::SetArg, 1, DeviceStatus::INVALID_MEM_OBJECT);
        handle.fail_call(CallKind::SetArg, 3, DeviceStatus::INVALID_ARG_SIZE);
        let err = bind(&mut ctx, &WorkItem::new(vec![0u8; 80], target()))
            .expect_err("two rejected slots");

        let DispatchError::BindFailed { failures } = err else {
            panic!("expected BindFailed");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!((failures[0].stage, failures[0].index), ("skein", 1));
        assert_eq!(failures[1].status, DeviceStatus::INVALID_ARG_SIZE);
        // every slot was still attempted
        assert_eq!(handle.count(CallKind::SetArg), 2 + 1 + 1 + 3);
        assert_eq!(handle.count(CallKind::Enqueue), 0);
    }

    #[test]
    fn tribus_uploads_midstate_and_swapped_tail() {
        let (mut ctx, handle) = open("tribus");
        let data: Vec<u8> = (0..80).collect();
        let work = WorkItem::new(data, target()).with_midstate(vec![0xaa; 128]);
        bind(&mut ctx, &work).expect("bind should succeed");

        assert!(matches!(
            handle.calls()[0],
            HostCall::WriteBuffer { len: 144, .. }
        ));
        let input = handle
            .buffer_contents(ctx.buffers().input)
            .expect("input exists");
        assert_eq!(&input[..128], &[0xaa; 128][..]);
        assert_eq!(&input[128..132], &[67, 66, 65, 64]);
        assert_eq!(&input[136..140], &[75, 74, 73, 72]);
        assert_eq!(args(&handle, "search1").len(), 3);
    }

    #[test]
    fn tribus_without_midstate_is_rejected() {
        let (mut ctx, handle) = open("tribus");
        let err = bind(&mut ctx, &WorkItem::new(vec![0u8; 80], target()))
            .expect_err("tribus needs the 128-byte midstate");
        assert!(matches!(err, DispatchError::ProtocolMismatch { .. }));
        assert_eq!(handle.count(CallKind::WriteBuffer), 0);
    }

    #[test]
    fn lyra2rev2_routes_through_buffer1() {
        let (mut ctx, handle) = open("lyra2rev2");
        let work = WorkItem::new(vec![0u8; 80], target()).with_block_context(BlockContext {
            ctx: [1; 8],
            cty: [2; 12],
        });
        let outcome = bind(&mut ctx, &work).expect("bind should succeed");
        assert_eq!(outcome.stages, 7);

        let buffers = ctx.buffers();
        let buffer1 = KernelArg::Buffer(buffers.aux(0).expect("buffer1"));
        let main = args(&handle, "search");
        assert_eq!(main.len(), 12);
        assert_eq!(main[0], buffer1);
        assert_eq!(
            args(&handle, "search3"),
            vec![
                buffer1.clone(),
                KernelArg::Buffer(buffers.scratch().expect("scratch"))
            ]
        );
        assert_eq!(args(&handle, "search6").len(), 3);
        assert_eq!(args(&handle, "search2"), vec![buffer1]);
    }

    #[test]
    fn yescrypt_multi_mixing_stages_alternate_pad() {
        let (mut ctx, handle) = open("yescrypt-multi");
        bind(&mut ctx, &WorkItem::new(vec![0u8; 80], target())).expect("bind should succeed");

        assert_eq!(args(&handle, "search").len(), 7);
        assert_eq!(args(&handle, "search1").len(), 2);
        assert_eq!(args(&handle, "search2").len(), 3);
        assert_eq!(args(&handle, "search3").len(), 2);
        assert_eq!(args(&handle, "search4").len(), 3);
        assert_eq!(args(&handle, "search5").len(), 2);
        let last = args(&handle, "search6");
        assert_eq!(last.len(), 5);
        assert_eq!(last[4], KernelArg::U32(0x0100_0000));
    }
}
