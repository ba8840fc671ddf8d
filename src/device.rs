//! Per-device state: the backend, the buffers and kernels one algorithm
//! needs, and the resident DAG for dataset families.

use tracing::{debug, info};

use crate::algorithm::AlgorithmConfig;
use crate::backend::{
    BufferAccess, BufferId, ComputeBackend, DeviceResult, DeviceStatus, KernelId,
};
use crate::error::{DispatchError, Result};

/// Largest header any layout uploads (credits).
pub const INPUT_BUFFER_BYTES: u64 = 168;
const OUTPUT_SLOT_BYTES: u64 = 4;
const MAX_AUX_BUFFERS: usize = 3;

pub const MAIN_KERNEL: &str = "search";
pub const GENERATE_DAG_KERNEL: &str = "GenerateDAG";

/// Buffer sizing inputs that depend on the device rather than the algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    /// Scratch size for algorithms that leave it to the device.
    pub device_scratch_bytes: u64,
    /// Upper bound on any scratch allocation, if set.
    pub scratch_limit: Option<u64>,
    pub aux_buffer_bytes: u64,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            device_scratch_bytes: 128 * 1024 * 1024,
            scratch_limit: None,
            aux_buffer_bytes: 32 * 1024 * 1024,
        }
    }
}

impl DeviceLayout {
    fn scratch_bytes(&self, rw_buffer_size: i64) -> u64 {
        let bytes = match rw_buffer_size {
            0 => 0,
            n if n > 0 => n.unsigned_abs(),
            _ => self.device_scratch_bytes,
        };
        self.scratch_limit.map_or(bytes, |limit| bytes.min(limit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffers {
    pub input: BufferId,
    pub output: BufferId,
    scratch: Option<BufferId>,
    aux: [Option<BufferId>; MAX_AUX_BUFFERS],
}

impl DeviceBuffers {
    pub fn scratch(&self) -> Result<BufferId> {
        self.scratch
            .ok_or(DispatchError::device("scratch buffer", DeviceStatus::INVALID_MEM_OBJECT))
    }

    pub fn aux(&self, index: usize) -> Result<BufferId> {
        self.aux
            .get(index)
            .copied()
            .flatten()
            .ok_or(DispatchError::device("auxiliary buffer", DeviceStatus::INVALID_MEM_OBJECT))
    }

    fn all(&self) -> impl Iterator<Item = BufferId> + '_ {
        [Some(self.input), Some(self.output), self.scratch]
            .into_iter()
            .chain(self.aux)
            .flatten()
    }
}

/// Device-resident dataset of a DAG family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DatasetState {
    /// Epoch the DAG buffer holds. Cleared before regeneration starts and set
    /// only once every chunk has completed.
    pub(crate) epoch: Option<u64>,
    pub(crate) dag: Option<BufferId>,
    pub(crate) cache: Option<BufferId>,
    pub(crate) dag_bytes: u64,
}

pub struct DeviceContext {
    backend: Box<dyn ComputeBackend>,
    algorithm: AlgorithmConfig,
    buffers: DeviceBuffers,
    main: KernelId,
    extra: Vec<KernelId>,
    generate_dag: Option<KernelId>,
    pub(crate) dataset: DatasetState,
}

impl DeviceContext {
    /// Loads the algorithm's kernels and allocates its buffers. On failure
    /// every buffer allocated so far is released.
    pub fn open(
        mut backend: Box<dyn ComputeBackend>,
        algorithm: &AlgorithmConfig,
        layout: &DeviceLayout,
    ) -> Result<Self> {
        let descriptor = algorithm.descriptor();
        let mut allocated = Vec::new();
        let result = allocate(backend.as_mut(), algorithm, layout, &mut allocated);
        let (buffers, main, extra, generate_dag) = match result {
            Ok(parts) => parts,
            Err(err) => {
                for buffer in allocated {
                    backend.release_buffer(buffer);
                }
                return Err(err);
            }
        };

        info!(
            device = backend.name(),
            algorithm = descriptor.name,
            family = %descriptor.family,
            stages = extra.len() + 1,
            "device initialised"
        );
        Ok(Self {
            backend,
            algorithm: algorithm.clone(),
            buffers,
            main,
            extra,
            generate_dag,
            dataset: DatasetState::default(),
        })
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn algorithm(&self) -> &AlgorithmConfig {
        &self.algorithm
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    pub fn buffers(&self) -> DeviceBuffers {
        self.buffers
    }

    pub fn backend_mut(&mut self) -> &mut dyn ComputeBackend {
        self.backend.as_mut()
    }

    /// Main kernel followed by the extra stages, `count` in total.
    pub fn stage_kernels(&self, count: usize) -> Result<Vec<KernelId>> {
        if count != self.extra.len() + 1 {
            return Err(DispatchError::device(
                "stage kernel lookup",
                DeviceStatus::INVALID_KERNEL,
            ));
        }
        Ok(std::iter::once(self.main).chain(self.extra.iter().copied()).collect())
    }

    pub fn generate_dag_kernel(&self) -> Result<KernelId> {
        self.generate_dag.ok_or(DispatchError::device(
            "GenerateDAG lookup",
            DeviceStatus::INVALID_KERNEL,
        ))
    }

    /// Epoch of the resident DAG, if a complete one is loaded.
    pub fn dataset_epoch(&self) -> Option<u64> {
        self.dataset.epoch
    }

    /// Size of the allocated DAG buffer, zero if none.
    pub fn dataset_bytes(&self) -> u64 {
        self.dataset.dag_bytes
    }

    pub fn dataset_buffer(&self) -> Result<BufferId> {
        self.dataset
            .dag
            .ok_or(DispatchError::device("DAG buffer", DeviceStatus::INVALID_MEM_OBJECT))
    }

    /// Blocking write of `bytes` to the start of the input buffer.
    pub fn upload_header(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > INPUT_BUFFER_BYTES {
            return Err(DispatchError::device("header upload", DeviceStatus::INVALID_VALUE));
        }
        let input = self.buffers.input;
        self.backend
            .write_buffer(input, 0, bytes)
            .map_err(|status| DispatchError::device("header upload", status))
    }

    /// Drops the DAG and light-cache buffers and forgets their epoch.
    pub(crate) fn release_dataset(&mut self) {
        self.dataset.epoch = None;
        for buffer in [self.dataset.dag.take(), self.dataset.cache.take()]
            .into_iter()
            .flatten()
        {
            self.backend.release_buffer(buffer);
        }
        self.dataset.dag_bytes = 0;
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.release_dataset();
        for buffer in self.buffers.all().collect::<Vec<_>>() {
            self.backend.release_buffer(buffer);
        }
    }
}

type Allocation = (DeviceBuffers, KernelId, Vec<KernelId>, Option<KernelId>);

fn allocate(
    backend: &mut dyn ComputeBackend,
    algorithm: &AlgorithmConfig,
    layout: &DeviceLayout,
    allocated: &mut Vec<BufferId>,
) -> Result<Allocation> {
    let descriptor = algorithm.descriptor();

    let main = load(backend, MAIN_KERNEL)?;
    let extra = (1..=descriptor.n_extra_kernels)
        .map(|idx| load(backend, &format!("{MAIN_KERNEL}{idx}")))
        .collect::<Result<Vec<_>>>()?;
    let generate_dag = if descriptor.family.uses_dag() {
        Some(load(backend, GENERATE_DAG_KERNEL)?)
    } else {
        None
    };

    let mut create = |what: &'static str, access: BufferAccess, bytes: u64| -> Result<BufferId> {
        let buffer = backend
            .create_buffer(access, bytes)
            .map_err(|status| DispatchError::ResourceExhausted { what, bytes, status })?;
        allocated.push(buffer);
        debug!(what, bytes, "buffer allocated");
        Ok(buffer)
    };

    let input = create("input buffer", BufferAccess::ReadOnly, INPUT_BUFFER_BYTES)?;
    let output = create(
        "output buffer",
        BufferAccess::WriteOnly,
        u64::from(descriptor.output_slots()) * OUTPUT_SLOT_BYTES,
    )?;
    let scratch_bytes = layout.scratch_bytes(descriptor.rw_buffer_size);
    let scratch = if scratch_bytes > 0 {
        Some(create("scratch buffer", BufferAccess::ReadWrite, scratch_bytes)?)
    } else {
        None
    };
    let mut aux = [None; MAX_AUX_BUFFERS];
    for slot in aux.iter_mut().take(algorithm.binder().aux_buffers()) {
        *slot = Some(create(
            "auxiliary buffer",
            BufferAccess::ReadWrite,
            layout.aux_buffer_bytes,
        )?);
    }

    Ok((
        DeviceBuffers {
            input,
            output,
            scratch,
            aux,
        },
        main,
        extra,
        generate_dag,
    ))
}

fn load(backend: &mut dyn ComputeBackend, entry: &str) -> Result<KernelId> {
    let kernel: DeviceResult<KernelId> = backend.load_kernel(entry);
    kernel.map_err(|status| DispatchError::device("kernel load", status))
}
