//! CUDA adapter for [`ComputeBackend`].
//!
//! Kernels come from one prebuilt PTX module. Arguments are staged per
//! kernel by position and pushed through the launch builder when the kernel
//! is enqueued; `wait` synchronizes the stream.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, DeviceRepr, DriverError,
    LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::Ptx;
use tracing::{debug, info};

use super::{
    BufferAccess, BufferId, ComputeBackend, DeviceResult, DeviceStatus, EventId, KernelArg,
    KernelId,
};

/// By-value kernel parameter of a fixed byte width (uint4, ulong8 and so on).
#[repr(C)]
#[derive(Clone, Copy)]
struct Blob<const N: usize>([u8; N]);

unsafe impl<const N: usize> DeviceRepr for Blob<N> {}

enum StagedArg<'a> {
    Buffer(&'a CudaSlice<u8>),
    U32(u32),
    U64(u64),
    Blob16(Blob<16>),
    Blob32(Blob<32>),
    Blob64(Blob<64>),
}

fn blob<const N: usize>(bytes: &[u8]) -> DeviceResult<Blob<N>> {
    let mut out = [0u8; N];
    if bytes.len() != N {
        return Err(DeviceStatus::INVALID_ARG_SIZE);
    }
    out.copy_from_slice(bytes);
    Ok(Blob(out))
}

fn stage_bytes(bytes: &[u8]) -> DeviceResult<StagedArg<'static>> {
    match bytes.len() {
        16 => blob::<16>(bytes).map(StagedArg::Blob16),
        32 => blob::<32>(bytes).map(StagedArg::Blob32),
        64 => blob::<64>(bytes).map(StagedArg::Blob64),
        _ => Err(DeviceStatus::INVALID_ARG_SIZE),
    }
}

fn driver_status(err: DriverError) -> DeviceStatus {
    DeviceStatus(-(err.0 as i32))
}

struct StagedKernel {
    entry: String,
    function: CudaFunction,
    args: BTreeMap<u32, KernelArg>,
}

pub struct CudaBackend {
    name: String,
    stream: Arc<CudaStream>,
    module: Arc<CudaModule>,
    kernels: Vec<StagedKernel>,
    buffers: HashMap<BufferId, CudaSlice<u8>>,
    next_buffer: u64,
    next_event: u64,
}

impl CudaBackend {
    pub fn open(device_index: usize, ptx_path: &Path) -> DeviceResult<Self> {
        let ctx = CudaContext::new(device_index).map_err(driver_status)?;
        let stream = ctx.default_stream();
        let module = ctx
            .load_module(Ptx::from_file(ptx_path))
            .map_err(driver_status)?;
        info!(
            device = device_index,
            module = %ptx_path.display(),
            "CUDA module loaded"
        );
        Ok(Self {
            name: format!("cuda{device_index}"),
            stream,
            module,
            kernels: Vec::new(),
            buffers: HashMap::new(),
            next_buffer: 1,
            next_event: 1,
        })
    }

    fn kernel(&self, kernel: KernelId) -> DeviceResult<&StagedKernel> {
        self.kernels
            .get(kernel.0 as usize)
            .ok_or(DeviceStatus::INVALID_KERNEL)
    }

    fn buffer(&self, buffer: BufferId) -> DeviceResult<&CudaSlice<u8>> {
        self.buffers
            .get(&buffer)
            .ok_or(DeviceStatus::INVALID_MEM_OBJECT)
    }

    fn range(offset: u64, len: usize) -> DeviceResult<std::ops::Range<usize>> {
        let start = usize::try_from(offset).map_err(|_| DeviceStatus::INVALID_VALUE)?;
        let end = start.checked_add(len).ok_or(DeviceStatus::INVALID_VALUE)?;
        Ok(start..end)
    }
}

impl ComputeBackend for CudaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_kernel(&mut self, entry: &str) -> DeviceResult<KernelId> {
        let function = self
            .module
            .load_function(entry)
            .map_err(|_| DeviceStatus::INVALID_KERNEL)?;
        let kernel = KernelId(
            u32::try_from(self.kernels.len()).map_err(|_| DeviceStatus::OUT_OF_RESOURCES)?,
        );
        self.kernels.push(StagedKernel {
            entry: entry.to_string(),
            function,
            args: BTreeMap::new(),
        });
        Ok(kernel)
    }

    fn create_buffer(&mut self, _access: BufferAccess, bytes: u64) -> DeviceResult<BufferId> {
        let len = usize::try_from(bytes).map_err(|_| DeviceStatus::OUT_OF_RESOURCES)?;
        let slice = self
            .stream
            .alloc_zeros::<u8>(len.max(1))
            .map_err(|_| DeviceStatus::OUT_OF_RESOURCES)?;
        let buffer = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(buffer, slice);
        debug!(buffer = buffer.0, bytes, "CUDA buffer allocated");
        Ok(buffer)
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()> {
        let range = Self::range(offset, data.len())?;
        let slice = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceStatus::INVALID_MEM_OBJECT)?;
        let mut view = slice
            .try_slice_mut(range)
            .ok_or(DeviceStatus::INVALID_VALUE)?;
        self.stream
            .memcpy_htod(data, &mut view)
            .map_err(driver_status)?;
        self.stream.synchronize().map_err(driver_status)
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, out: &mut [u8]) -> DeviceResult<()> {
        let range = Self::range(offset, out.len())?;
        let view = self
            .buffer(buffer)?
            .try_slice(range)
            .ok_or(DeviceStatus::INVALID_VALUE)?;
        self.stream.memcpy_dtoh(&view, out).map_err(driver_status)?;
        self.stream.synchronize().map_err(driver_status)
    }

    fn set_kernel_arg(
        &mut self,
        kernel: KernelId,
        index: u32,
        arg: &KernelArg,
    ) -> DeviceResult<()> {
        match arg {
            KernelArg::Buffer(buffer) => {
                self.buffer(*buffer)?;
            }
            KernelArg::Bytes(bytes) => {
                stage_bytes(bytes)?;
            }
            KernelArg::U32(_) | KernelArg::U64(_) => {}
        }
        self.kernels
            .get_mut(kernel.0 as usize)
            .ok_or(DeviceStatus::INVALID_KERNEL)?
            .args
            .insert(index, arg.clone());
        Ok(())
    }

    fn enqueue_kernel(&mut self, kernel: KernelId, global_size: u64) -> DeviceResult<EventId> {
        let staged_kernel = self.kernel(kernel)?;
        let mut staged = Vec::with_capacity(staged_kernel.args.len());
        for (position, (index, arg)) in staged_kernel.args.iter().enumerate() {
            // Positions must be contiguous from zero.
            if *index as usize != position {
                return Err(DeviceStatus::INVALID_ARG_INDEX);
            }
            staged.push(match arg {
                KernelArg::Buffer(buffer) => StagedArg::Buffer(self.buffer(*buffer)?),
                KernelArg::U32(value) => StagedArg::U32(*value),
                KernelArg::U64(value) => StagedArg::U64(*value),
                KernelArg::Bytes(bytes) => stage_bytes(bytes)?,
            });
        }

        let threads = u32::try_from(global_size).map_err(|_| DeviceStatus::INVALID_VALUE)?;
        let cfg = LaunchConfig::for_num_elems(threads);
        let mut launch = self.stream.launch_builder(&staged_kernel.function);
        for arg in &staged {
            match arg {
                StagedArg::Buffer(slice) => launch.arg(*slice),
                StagedArg::U32(value) => launch.arg(value),
                StagedArg::U64(value) => launch.arg(value),
                StagedArg::Blob16(value) => launch.arg(value),
                StagedArg::Blob32(value) => launch.arg(value),
                StagedArg::Blob64(value) => launch.arg(value),
            };
        }
        unsafe { launch.launch(cfg) }.map_err(driver_status)?;
        debug!(entry = %staged_kernel.entry, threads, "CUDA kernel launched");

        let event = EventId(self.next_event);
        self.next_event += 1;
        Ok(event)
    }

    fn wait(&mut self, _event: EventId) -> DeviceResult<()> {
        self.stream.synchronize().map_err(driver_status)
    }
}
