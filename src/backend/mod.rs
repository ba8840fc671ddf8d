use std::fmt;

pub mod host;
#[cfg(feature = "cuda")]
pub mod nvidia;

/// Non-zero status reported by a compute runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceStatus(pub i32);

impl DeviceStatus {
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    pub const INVALID_KERNEL: Self = Self(-48);
    pub const INVALID_ARG_INDEX: Self = Self(-49);
    pub const INVALID_ARG_SIZE: Self = Self(-51);
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.0)
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Value bound to one kernel parameter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    Buffer(BufferId),
    U32(u32),
    U64(u64),
    /// Fixed-size by-value parameter (vector types, midstate blocks).
    Bytes(Vec<u8>),
}

impl KernelArg {
    pub fn size(&self) -> usize {
        match self {
            Self::Buffer(_) => std::mem::size_of::<u64>(),
            Self::U32(_) => 4,
            Self::U64(_) => 8,
            Self::Bytes(bytes) => bytes.len(),
        }
    }
}

impl From<BufferId> for KernelArg {
    fn from(buffer: BufferId) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<u32> for KernelArg {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<u64> for KernelArg {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

/// The narrow slice of a compute runtime this crate drives.
///
/// Buffer writes are blocking: when `write_buffer` returns, the bytes are on
/// the device and may be referenced by subsequent kernel arguments.
/// `enqueue_kernel` may return before the launch completes; `wait` blocks
/// until the launch identified by the event has finished.
pub trait ComputeBackend: Send {
    fn name(&self) -> &str;

    fn load_kernel(&mut self, entry: &str) -> DeviceResult<KernelId>;

    fn create_buffer(&mut self, access: BufferAccess, bytes: u64) -> DeviceResult<BufferId>;

    fn release_buffer(&mut self, buffer: BufferId);

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> DeviceResult<()>;

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, out: &mut [u8]) -> DeviceResult<()>;

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: &KernelArg)
        -> DeviceResult<()>;

    fn enqueue_kernel(&mut self, kernel: KernelId, global_size: u64) -> DeviceResult<EventId>;

    fn wait(&mut self, event: EventId) -> DeviceResult<()>;
}
