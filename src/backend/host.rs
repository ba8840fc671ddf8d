//! In-memory compute backend.
//!
//! Buffers are host byte vectors and kernels are either inert (arguments are
//! recorded, launches do nothing) or backed by a registered host function.
//! Every call is appended to a log that callers can inspect through a
//! [`HostHandle`], and individual call kinds can be made to fail, which is
//! what the binder and DAG tests are built on.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    BufferAccess, BufferId, ComputeBackend, DeviceResult, DeviceStatus, EventId, KernelArg,
    KernelId,
};

const MAX_KERNEL_ARGS: u32 = 32;

pub type HostKernelFn = Arc<dyn Fn(&mut HostLaunch<'_>) -> DeviceResult<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    LoadKernel {
        entry: String,
        kernel: KernelId,
    },
    CreateBuffer {
        buffer: BufferId,
        access: BufferAccess,
        bytes: u64,
    },
    ReleaseBuffer {
        buffer: BufferId,
    },
    WriteBuffer {
        buffer: BufferId,
        offset: u64,
        len: usize,
    },
    ReadBuffer {
        buffer: BufferId,
        offset: u64,
        len: usize,
    },
    SetArg {
        kernel: KernelId,
        index: u32,
        arg: KernelArg,
    },
    Enqueue {
        kernel: KernelId,
        global_size: u64,
    },
    Wait {
        event: EventId,
    },
}

impl HostCall {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::LoadKernel { .. } => CallKind::LoadKernel,
            Self::CreateBuffer { .. } => CallKind::CreateBuffer,
            Self::ReleaseBuffer { .. } => CallKind::ReleaseBuffer,
            Self::WriteBuffer { .. } => CallKind::WriteBuffer,
            Self::ReadBuffer { .. } => CallKind::ReadBuffer,
            Self::SetArg { .. } => CallKind::SetArg,
            Self::Enqueue { .. } => CallKind::Enqueue,
            Self::Wait { .. } => CallKind::Wait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    LoadKernel,
    CreateBuffer,
    ReleaseBuffer,
    WriteBuffer,
    ReadBuffer,
    SetArg,
    Enqueue,
    Wait,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: CallKind,
    skip: usize,
    status: DeviceStatus,
}

struct HostKernel {
    entry: String,
    args: BTreeMap<u32, KernelArg>,
}

struct HostState {
    kernels: Vec<HostKernel>,
    functions: HashMap<String, HostKernelFn>,
    buffers: HashMap<BufferId, Vec<u8>>,
    next_buffer: u64,
    next_event: u64,
    allocated_bytes: u64,
    memory_limit: Option<u64>,
    calls: Vec<HostCall>,
    faults: Vec<Fault>,
}

impl HostState {
    fn new() -> Self {
        Self {
            kernels: Vec::new(),
            functions: HashMap::new(),
            buffers: HashMap::new(),
            next_buffer: 1,
            next_event: 1,
            allocated_bytes: 0,
            memory_limit: None,
            calls: Vec::new(),
            faults: Vec::new(),
        }
    }

    fn record(&mut self, call: HostCall) -> DeviceResult<()> {
        let kind = call.kind();
        self.calls.push(call);
        let Some(pos) = self.faults.iter().position(|fault| fault.kind == kind) else {
            return Ok(());
        };
        if self.faults[pos].skip > 0 {
            self.faults[pos].skip -= 1;
            return Ok(());
        }
        Err(self.faults.remove(pos).status)
    }

    fn kernel_mut(&mut self, kernel: KernelId) -> DeviceResult<&mut HostKernel> {
        self.kernels
            .get_mut(kernel.0 as usize)
            .ok_or(DeviceStatus::INVALID_KERNEL)
    }

    fn buffer_range(&self, buffer: BufferId, offset: u64, len: usize) -> DeviceResult<(usize, usize)> {
        let data = self
            .buffers
            .get(&buffer)
            .ok_or(DeviceStatus::INVALID_MEM_OBJECT)?;
        let start = usize::try_from(offset).map_err(|_| DeviceStatus::INVALID_VALUE)?;
        let end = start.checked_add(len).ok_or(DeviceStatus::INVALID_VALUE)?;
        if end > data.len() {
            return Err(DeviceStatus::INVALID_VALUE);
        }
        Ok((start, end))
    }
}

/// Reference backend that keeps everything in host memory.
pub struct HostBackend {
    name: String,
    shared: Arc<Mutex<HostState>>,
}

/// Inspection and control handle onto a [`HostBackend`] that stays usable
/// after the backend has been moved into a device context.
#[derive(Clone)]
pub struct HostHandle {
    shared: Arc<Mutex<HostState>>,
}

impl HostBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Mutex::new(HostState::new())),
        }
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        lock(&self.shared)
    }
}

fn lock(shared: &Mutex<HostState>) -> MutexGuard<'_, HostState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HostHandle {
    /// Backs every kernel loaded under `entry` with `func`.
    pub fn register_kernel(&self, entry: &str, func: HostKernelFn) {
        lock(&self.shared).functions.insert(entry.to_string(), func);
    }

    /// Makes the next call of `kind` after `skip` successful ones fail with `status`.
    pub fn fail_call(&self, kind: CallKind, skip: usize, status: DeviceStatus) {
        lock(&self.shared).faults.push(Fault { kind, skip, status });
    }

    pub fn set_memory_limit(&self, bytes: Option<u64>) {
        lock(&self.shared).memory_limit = bytes;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        lock(&self.shared).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }

    pub fn count(&self, kind: CallKind) -> usize {
        lock(&self.shared)
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    pub fn find_kernel(&self, entry: &str) -> Option<KernelId> {
        lock(&self.shared)
            .kernels
            .iter()
            .rposition(|kernel| kernel.entry == entry)
            .map(|idx| KernelId(idx as u32))
    }

    pub fn kernel_entry(&self, kernel: KernelId) -> Option<String> {
        lock(&self.shared)
            .kernels
            .get(kernel.0 as usize)
            .map(|kernel| kernel.entry.clone())
    }

    /// Arguments currently bound to `kernel`, by position.
    pub fn kernel_args(&self, kernel: KernelId) -> Vec<(u32, KernelArg)> {
        lock(&self.shared)
            .kernels
            .get(kernel.0 as usize)
            .map(|kernel| {
                kernel
                    .args
                    .iter()
                    .map(|(idx, arg)| (*idx, arg.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        lock(&self.shared).buffers.get(&buffer).cloned()
    }

    pub fn live_buffers(&self) -> usize {
        lock(&self.shared).buffers.len()
    }

    pub fn allocated_bytes(&self) -> u64 {
        lock(&self.shared).allocated_bytes
    }
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_kernel(&mut self, entry: &str) -> DeviceResult<KernelId> {
        let mut state = self.state();
        let kernel = KernelId(state.kernels.len() as u32);
        state.record(HostCall::LoadKernel {
            entry: entry.to_string(),
            kernel,
        })?;
        state.kernels.push(HostKernel {
            entry: entry.to_string(),
            args: BTreeMap::new(),
        });
        Ok(kernel)
    }

    fn create_buffer(&mut self, access: BufferAccess, bytes: u64) -> DeviceResult<BufferId> {
        let mut state = self.state();
        let buffer = BufferId(state.next_buffer);
        state.record(HostCall::CreateBuffer {
            buffer,
            access,
            bytes,
        })?;
        if let Some(limit) = state.memory_limit {
            if state.allocated_bytes.saturating_add(bytes) > limit {
                return Err(DeviceStatus::OUT_OF_RESOURCES);
            }
        }
        let len = usize::try_from(bytes).map_err(|_| DeviceStatus::OUT_OF_RESOURCES)?;
        state.next_buffer += 1;
        state.allocated_bytes += bytes;
        state.buffers.insert(buffer, vec![0u8; len]);
        Ok(buffer)
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        let mut state = self.state();
        let _ = state.record(HostCall::ReleaseBuffer { buffer });
        if let Some(data) = state.buffers.remove(&buffer) {
            state.allocated_bytes = state.allocated_bytes.saturating_sub(data.len() as u64);
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()> {
        let mut state = self.state();
        state.record(HostCall::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        })?;
        let (start, end) = state.buffer_range(buffer, offset, data.len())?;
        if let Some(target) = state.buffers.get_mut(&buffer) {
            target[start..end].copy_from_slice(data);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, out: &mut [u8]) -> DeviceResult<()> {
        let mut state = self.state();
        state.record(HostCall::ReadBuffer {
            buffer,
            offset,
            len: out.len(),
        })?;
        let (start, end) = state.buffer_range(buffer, offset, out.len())?;
        if let Some(source) = state.buffers.get(&buffer) {
            out.copy_from_slice(&source[start..end]);
        }
        Ok(())
    }

    fn set_kernel_arg(
        &mut self,
        kernel: KernelId,
        index: u32,
        arg: &KernelArg,
    ) -> DeviceResult<()> {
        let mut state = self.state();
        state.record(HostCall::SetArg {
            kernel,
            index,
            arg: arg.clone(),
        })?;
        if index >= MAX_KERNEL_ARGS {
            return Err(DeviceStatus::INVALID_ARG_INDEX);
        }
        if let KernelArg::Buffer(buffer) = arg {
            if !state.buffers.contains_key(buffer) {
                return Err(DeviceStatus::INVALID_MEM_OBJECT);
            }
        }
        if arg.size() == 0 {
            return Err(DeviceStatus::INVALID_ARG_SIZE);
        }
        state.kernel_mut(kernel)?.args.insert(index, arg.clone());
        Ok(())
    }

    fn enqueue_kernel(&mut self, kernel: KernelId, global_size: u64) -> DeviceResult<EventId> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.record(HostCall::Enqueue {
            kernel,
            global_size,
        })?;
        let entry = state.kernel_mut(kernel)?.entry.clone();
        if let Some(func) = state.functions.get(&entry).cloned() {
            let args = state.kernels[kernel.0 as usize].args.clone();
            let mut launch = HostLaunch {
                global_size,
                args: &args,
                buffers: &mut state.buffers,
            };
            func(&mut launch)?;
        }
        let event = EventId(state.next_event);
        state.next_event += 1;
        Ok(event)
    }

    fn wait(&mut self, event: EventId) -> DeviceResult<()> {
        self.state().record(HostCall::Wait { event })
    }
}

/// View a host kernel function gets of one launch.
pub struct HostLaunch<'a> {
    pub global_size: u64,
    args: &'a BTreeMap<u32, KernelArg>,
    buffers: &'a mut HashMap<BufferId, Vec<u8>>,
}

impl HostLaunch<'_> {
    pub fn arg(&self, index: u32) -> DeviceResult<&KernelArg> {
        self.args.get(&index).ok_or(DeviceStatus::INVALID_ARG_INDEX)
    }

    pub fn u32_arg(&self, index: u32) -> DeviceResult<u32> {
        match self.arg(index)? {
            KernelArg::U32(value) => Ok(*value),
            _ => Err(DeviceStatus::INVALID_ARG_SIZE),
        }
    }

    pub fn buffer_arg(&self, index: u32) -> DeviceResult<BufferId> {
        match self.arg(index)? {
            KernelArg::Buffer(buffer) => Ok(*buffer),
            _ => Err(DeviceStatus::INVALID_MEM_OBJECT),
        }
    }

    /// Runs `f` with `read` borrowed shared and `write` borrowed exclusively.
    pub fn with_buffers<R>(
        &mut self,
        read: BufferId,
        write: BufferId,
        f: impl FnOnce(&[u8], &mut [u8]) -> R,
    ) -> DeviceResult<R> {
        if read == write {
            return Err(DeviceStatus::INVALID_MEM_OBJECT);
        }
        let mut output = self
            .buffers
            .remove(&write)
            .ok_or(DeviceStatus::INVALID_MEM_OBJECT)?;
        let result = match self.buffers.get(&read) {
            Some(input) => Ok(f(input, &mut output)),
            None => Err(DeviceStatus::INVALID_MEM_OBJECT),
        };
        self.buffers.insert(write, output);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_with_offset() {
        let mut backend = HostBackend::new("host0");
        let buffer = backend
            .create_buffer(BufferAccess::ReadWrite, 16)
            .expect("buffer should allocate");
        backend
            .write_buffer(buffer, 4, &[1, 2, 3, 4])
            .expect("write should fit");
        let mut out = [0u8; 6];
        backend
            .read_buffer(buffer, 3, &mut out)
            .expect("read should fit");
        assert_eq!(out, [0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let mut backend = HostBackend::new("host0");
        let buffer = backend
            .create_buffer(BufferAccess::ReadWrite, 8)
            .expect("buffer should allocate");
        let err = backend
            .write_buffer(buffer, 6, &[0u8; 4])
            .expect_err("write past the end should fail");
        assert_eq!(err, DeviceStatus::INVALID_VALUE);
    }

    #[test]
    fn injected_fault_skips_then_fails_once() {
        let mut backend = HostBackend::new("host0");
        let handle = backend.handle();
        let kernel = backend.load_kernel("search").expect("kernel should load");
        handle.fail_call(CallKind::SetArg, 1, DeviceStatus(-99));

        assert!(backend.set_kernel_arg(kernel, 0, &KernelArg::U32(1)).is_ok());
        assert_eq!(
            backend.set_kernel_arg(kernel, 1, &KernelArg::U32(2)),
            Err(DeviceStatus(-99))
        );
        assert!(backend.set_kernel_arg(kernel, 2, &KernelArg::U32(3)).is_ok());
        assert_eq!(handle.count(CallKind::SetArg), 3);
        assert_eq!(
            handle.kernel_args(kernel),
            vec![(0, KernelArg::U32(1)), (2, KernelArg::U32(3))]
        );
    }

    #[test]
    fn memory_limit_rejects_oversized_allocation() {
        let mut backend = HostBackend::new("host0");
        let handle = backend.handle();
        handle.set_memory_limit(Some(100));
        backend
            .create_buffer(BufferAccess::ReadWrite, 60)
            .expect("first buffer fits");
        assert_eq!(
            backend.create_buffer(BufferAccess::ReadWrite, 60),
            Err(DeviceStatus::OUT_OF_RESOURCES)
        );
        assert_eq!(handle.allocated_bytes(), 60);
    }

    #[test]
    fn registered_kernel_runs_on_enqueue() {
        let mut backend = HostBackend::new("host0");
        let handle = backend.handle();
        handle.register_kernel(
            "fill",
            Arc::new(|launch: &mut HostLaunch<'_>| {
                let value = launch.u32_arg(0)? as u8;
                let src = launch.buffer_arg(1)?;
                let dst = launch.buffer_arg(2)?;
                let count = launch.global_size as usize;
                launch.with_buffers(src, dst, |input, output| {
                    for idx in 0..count {
                        output[idx] = input[idx].wrapping_add(value);
                    }
                })
            }),
        );
        let kernel = backend.load_kernel("fill").expect("kernel should load");
        let src = backend
            .create_buffer(BufferAccess::ReadOnly, 4)
            .expect("src should allocate");
        let dst = backend
            .create_buffer(BufferAccess::ReadWrite, 4)
            .expect("dst should allocate");
        backend
            .write_buffer(src, 0, &[1, 2, 3, 4])
            .expect("src write should succeed");
        for (idx, arg) in [KernelArg::U32(10), src.into(), dst.into()]
            .iter()
            .enumerate()
        {
            backend
                .set_kernel_arg(kernel, idx as u32, arg)
                .expect("arg should bind");
        }
        let event = backend
            .enqueue_kernel(kernel, 3)
            .expect("launch should succeed");
        backend.wait(event).expect("wait should succeed");
        assert_eq!(handle.buffer_contents(dst), Some(vec![11, 12, 13, 0]));
    }
}
