//! DAG family layouts: upload the header, make sure the device DAG matches
//! the work epoch, then bind the search kernel against it.

use super::{ArgBinder, BindOutcome, KernelBinder, WorkShape};
use crate::dag::DagAlgorithm;
use crate::device::DeviceContext;
use crate::error::{DispatchError, Result};
use crate::session::MiningSession;
use crate::work::{DagWork, TargetWord, WorkItem, BLOCK_HEADER_LEN};

const STAGES: &[&str] = &["search"];
const ETHASH_HEADER_LEN: usize = 32;

fn dag_work(ctx: &DeviceContext, work: &WorkItem) -> Result<DagWork> {
    work.dag
        .ok_or_else(|| DispatchError::mismatch(ctx.algorithm_name(), "missing DAG epoch and seed"))
}

fn dag_algorithm(ctx: &DeviceContext, session: &MiningSession) -> Result<DagAlgorithm> {
    session
        .dag()
        .algorithm(ctx.algorithm().family())
        .ok_or_else(|| DispatchError::mismatch(ctx.algorithm_name(), "not a DAG family"))
}

/// `items >> 1` as the 32-bit argument the search kernel takes.
fn items_arg(ctx: &DeviceContext, items: u64) -> Result<u32> {
    u32::try_from(items >> 1).map_err(|_| {
        DispatchError::mismatch(ctx.algorithm_name(), "dataset too large for a 32-bit item count")
    })
}

pub(crate) struct Ethash;

impl KernelBinder for Ethash {
    fn stages(&self) -> &'static [&'static str] {
        STAGES
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(ETHASH_HEADER_LEN).dag()
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let dag_work = dag_work(ctx, work)?;
        let algorithm = dag_algorithm(ctx, session)?;
        let target = TargetWord::U64At24.extract(&work.target);

        // The header goes up unflipped.
        ctx.upload_header(&work.data[..ETHASH_HEADER_LEN])?;
        let dataset = session.dag().ensure_dataset(ctx, &algorithm, &dag_work)?;
        let start_nonce = u64::from(session.dag().next_high_nonce()?) << 32;
        let items = items_arg(ctx, dataset.items)?;

        let buffers = ctx.buffers();
        let dag = ctx.dataset_buffer()?;
        let kernels = ctx.stage_kernels(STAGES.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(STAGES[0], kernels[0])
            .arg(buffers.output)
            .arg(buffers.input)
            .arg(dag)
            .arg(items)
            .arg(start_nonce)
            .arg(target);
        if let Some(isolate) = algorithm.isolate {
            args.arg(isolate);
        }
        args.finish()?;
        Ok(BindOutcome {
            stages: 1,
            start_nonce: Some(start_nonce),
        })
    }
}

pub(crate) struct Nightcap;

impl KernelBinder for Nightcap {
    fn stages(&self) -> &'static [&'static str] {
        STAGES
    }

    fn shape(&self) -> WorkShape {
        WorkShape::header(BLOCK_HEADER_LEN).dag()
    }

    fn bind(
        &self,
        ctx: &mut DeviceContext,
        session: &MiningSession,
        work: &WorkItem,
        _threads: u32,
    ) -> Result<BindOutcome> {
        let dag_work = dag_work(ctx, work)?;
        let algorithm = dag_algorithm(ctx, session)?;
        let target = TargetWord::U32At28.extract(&work.target);

        ctx.upload_header(&work.data[..BLOCK_HEADER_LEN])?;
        let dataset = session.dag().ensure_dataset(ctx, &algorithm, &dag_work)?;
        let items = items_arg(ctx, dataset.items)?;

        let buffers = ctx.buffers();
        let dag = ctx.dataset_buffer()?;
        let kernels = ctx.stage_kernels(STAGES.len())?;
        let mut args = ArgBinder::new(ctx.backend_mut());
        args.kernel(STAGES[0], kernels[0])
            .arg(buffers.output)
            .arg(buffers.input)
            .arg(dag)
            .arg(items)
            .arg(target);
        args.finish()?;
        Ok(BindOutcome::stages(1))
    }
}
