#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use kernel_dispatch::backend::host::{HostBackend, HostHandle, HostLaunch};
use kernel_dispatch::backend::DeviceStatus;
use kernel_dispatch::dag::DagSizing;
use kernel_dispatch::device::GENERATE_DAG_KERNEL;
use kernel_dispatch::{
    AlgorithmConfig, DagWork, DeviceContext, DeviceLayout, Family, MiningSession, WorkItem,
};

pub const CHUNK_ITEMS: u64 = 16;
pub const CACHE_BYTES: u64 = 1024;

/// 100 + epoch dataset items of 64 bytes; ethash sees that many items,
/// nightcap (32-byte nodes) twice as many.
pub fn tiny_sizing() -> DagSizing {
    DagSizing {
        cache_bytes: |_| CACHE_BYTES,
        dataset_bytes: |work| (100 + work.epoch) * 64,
    }
}

pub fn session() -> MiningSession {
    MiningSession::builder()
        .dag_chunk_items(CHUNK_ITEMS)
        .dag_sizing(Family::Ethash, tiny_sizing())
        .dag_sizing(Family::Nightcap, tiny_sizing())
        .build()
}

pub fn layout() -> DeviceLayout {
    DeviceLayout {
        device_scratch_bytes: 4096,
        scratch_limit: Some(64 * 1024),
        aux_buffer_bytes: 1024,
    }
}

/// `(start item, item count)` of every GenerateDAG launch, in order.
pub type Launches = Arc<Mutex<Vec<(u64, u64)>>>;

/// Host GenerateDAG: fills each item's node with `item % 251 + 1`.
pub fn register_generate_dag(handle: &HostHandle, node_bytes: usize) -> Launches {
    let launches: Launches = Arc::default();
    let recorded = Arc::clone(&launches);
    handle.register_kernel(
        GENERATE_DAG_KERNEL,
        Arc::new(move |launch: &mut HostLaunch<'_>| {
            let start = u64::from(launch.u32_arg(0)?);
            let cache = launch.buffer_arg(1)?;
            let dag = launch.buffer_arg(2)?;
            let count = launch.global_size;
            recorded
                .lock()
                .map_err(|_| DeviceStatus(-1))?
                .push((start, count));
            launch.with_buffers(cache, dag, |_, dag| {
                for item in start..start + count {
                    let offset = item as usize * node_bytes;
                    dag[offset..offset + node_bytes].fill(item_marker(item));
                }
            })
        }),
    );
    launches
}

pub fn item_marker(item: u64) -> u8 {
    (item % 251 + 1) as u8
}

pub struct Device {
    pub ctx: DeviceContext,
    pub handle: HostHandle,
    pub launches: Launches,
}

pub fn open(name: &str, algorithm: &str) -> Device {
    let config = AlgorithmConfig::from_name(algorithm);
    let backend = HostBackend::new(name);
    let handle = backend.handle();
    let node_bytes = match config.family() {
        Family::Nightcap => 32,
        _ => 64,
    };
    let launches = register_generate_dag(&handle, node_bytes);
    let ctx = DeviceContext::open(Box::new(backend), &config, &layout())
        .expect("device context should open");
    Device {
        ctx,
        handle,
        launches,
    }
}

pub fn dag_work(epoch: u64) -> DagWork {
    DagWork {
        epoch,
        height: epoch * dag_spec::ETHASH_EPOCH_LENGTH,
        seed_hash: [epoch as u8; 32],
    }
}

pub fn target() -> [u8; 32] {
    let mut target = [0xffu8; 32];
    target[28..32].copy_from_slice(&0x0000_ffffu32.to_le_bytes());
    target
}

pub fn header_work(len: usize) -> WorkItem {
    WorkItem::new((0..len).map(|idx| idx as u8).collect(), target())
}

pub fn dag_item(epoch: u64) -> WorkItem {
    header_work(80).with_dag(dag_work(epoch))
}
