//! Shared light caches and per-device DAG datasets for the DAG families.
//!
//! The host keeps two light-cache slots for the whole session, indexed by
//! epoch parity so a device still on the previous epoch can keep reading its
//! cache while another device prepares the next one. Each device builds its
//! own DAG from the light cache in fixed-size chunks, waiting for each chunk
//! before launching the next.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use crate::algorithm::Family;
use crate::backend::{BufferAccess, DeviceStatus};
use crate::binder::ArgBinder;
use crate::device::DeviceContext;
use crate::error::{DispatchError, Result};
use crate::work::DagWork;

mod light;
mod slot;

pub use light::LightCacheGenerator;
pub use slot::{CacheSlot, CacheTag, NonceAllocator};

/// Isolate mask passed to ethash kernels.
pub const ETHASH_ISOLATE: u32 = 0xFFFF_FFFF;

/// Byte sizes of the light cache and dataset for a work item.
#[derive(Clone, Copy)]
pub struct DagSizing {
    pub cache_bytes: fn(&DagWork) -> u64,
    pub dataset_bytes: fn(&DagWork) -> u64,
}

impl fmt::Debug for DagSizing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagSizing").finish_non_exhaustive()
    }
}

/// Everything that differs between the DAG families.
#[derive(Debug, Clone, Copy)]
pub struct DagAlgorithm {
    pub name: &'static str,
    /// Dataset item size; the search kernel addresses pairs of items.
    pub node_bytes: u64,
    pub isolate: Option<u32>,
    pub sizing: DagSizing,
    pub generator: LightCacheGenerator,
}

pub const ETHASH: DagAlgorithm = DagAlgorithm {
    name: "ethash",
    node_bytes: dag_spec::ETHASH_HASH_BYTES,
    isolate: Some(ETHASH_ISOLATE),
    sizing: DagSizing {
        cache_bytes: |work| dag_spec::ethash_cache_size(work.epoch),
        dataset_bytes: |work| dag_spec::ethash_dataset_size(work.epoch),
    },
    generator: LightCacheGenerator::EthashKeccak {
        rounds: dag_spec::ETHASH_CACHE_ROUNDS,
    },
};

pub const NIGHTCAP: DagAlgorithm = DagAlgorithm {
    name: "nightcap",
    node_bytes: dag_spec::NIGHTCAP_NODE_BYTES,
    isolate: None,
    sizing: DagSizing {
        cache_bytes: |work| dag_spec::nightcap_cache_size(work.height),
        dataset_bytes: |work| dag_spec::nightcap_dataset_size(work.height),
    },
    generator: LightCacheGenerator::NightcapBlake2b {
        rounds: dag_spec::NIGHTCAP_CACHE_ROUNDS,
    },
};

impl DagAlgorithm {
    pub fn for_family(family: Family) -> Option<Self> {
        match family {
            Family::Ethash => Some(ETHASH),
            Family::Nightcap => Some(NIGHTCAP),
            _ => None,
        }
    }

    pub fn with_sizing(mut self, sizing: DagSizing) -> Self {
        self.sizing = sizing;
        self
    }
}

/// Device DAG that was found resident or just built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetInfo {
    pub epoch: u64,
    pub dataset_bytes: u64,
    pub items: u64,
    pub regenerated: bool,
}

/// Session-owned DAG state: the two light-cache slots, the nonce counter and
/// the generation chunk size.
#[derive(Debug)]
pub struct DagCacheManager {
    slots: [CacheSlot; 2],
    nonces: NonceAllocator,
    chunk_items: u64,
    sizing: Vec<(Family, DagSizing)>,
}

impl Default for DagCacheManager {
    fn default() -> Self {
        Self::new(dag_spec::DAG_CHUNK_ITEMS)
    }
}

impl DagCacheManager {
    pub fn new(chunk_items: u64) -> Self {
        Self {
            slots: [CacheSlot::default(), CacheSlot::default()],
            nonces: NonceAllocator::default(),
            chunk_items: chunk_items.max(1),
            sizing: Vec::new(),
        }
    }

    /// Replaces the epoch sizing rules of `family`; used for small test
    /// geometries.
    pub fn override_sizing(&mut self, family: Family, sizing: DagSizing) {
        self.sizing.retain(|(existing, _)| *existing != family);
        self.sizing.push((family, sizing));
    }

    pub fn chunk_items(&self) -> u64 {
        self.chunk_items
    }

    /// Algorithm parameters for `family`, with any sizing override applied.
    pub fn algorithm(&self, family: Family) -> Option<DagAlgorithm> {
        let algorithm = DagAlgorithm::for_family(family)?;
        Some(
            match self.sizing.iter().find(|(existing, _)| *existing == family) {
                Some((_, sizing)) => algorithm.with_sizing(*sizing),
                None => algorithm,
            },
        )
    }

    pub fn slot(&self, epoch: u64) -> &CacheSlot {
        &self.slots[(epoch % 2) as usize]
    }

    /// Light caches generated so far, over both slots.
    pub fn regenerations(&self) -> u64 {
        self.slots.iter().map(CacheSlot::regenerations).sum()
    }

    /// Allocates the high 32 bits of the next search start nonce.
    pub fn next_high_nonce(&self) -> Result<u32> {
        self.nonces.next_high()
    }

    /// Host light cache for `work`, generated at most once per epoch change.
    pub fn light_cache(&self, algorithm: &DagAlgorithm, work: &DagWork) -> Result<Arc<[u8]>> {
        let tag = CacheTag {
            algorithm: algorithm.name,
            epoch: work.epoch,
        };
        let cache_bytes = (algorithm.sizing.cache_bytes)(work);
        self.slot(work.epoch).get_or_generate(tag, || {
            let len = usize::try_from(cache_bytes).map_err(|_| {
                DispatchError::ResourceExhausted {
                    what: "light cache",
                    bytes: cache_bytes,
                    status: DeviceStatus::OUT_OF_RESOURCES,
                }
            })?;
            let mut cache = vec![0u8; len];
            algorithm.generator.generate(&work.seed_hash, &mut cache);
            info!(
                algorithm = algorithm.name,
                epoch = work.epoch,
                bytes = cache_bytes,
                "light cache generated"
            );
            Ok(cache)
        })
    }

    /// Makes sure the device holds the DAG for `work.epoch`, rebuilding it
    /// from the shared light cache if not.
    ///
    /// The device epoch marker is cleared before anything is released and
    /// only set again after the last chunk has completed, so a failure at any
    /// step leaves the device marked as holding no DAG.
    pub fn ensure_dataset(
        &self,
        ctx: &mut DeviceContext,
        algorithm: &DagAlgorithm,
        work: &DagWork,
    ) -> Result<DatasetInfo> {
        let dataset_bytes = (algorithm.sizing.dataset_bytes)(work);
        let items = dataset_bytes / algorithm.node_bytes;
        if ctx.dataset.epoch == Some(work.epoch) && ctx.dataset.dag.is_some() {
            return Ok(DatasetInfo {
                epoch: work.epoch,
                dataset_bytes,
                items,
                regenerated: false,
            });
        }

        info!(device = ctx.name(), epoch = work.epoch, "DAG being regenerated");
        ctx.release_dataset();

        let dag = ctx
            .backend_mut()
            .create_buffer(BufferAccess::ReadWrite, dataset_bytes)
            .map_err(|status| {
                error!(device = ctx.name(), %status, "creating the DAG buffer failed");
                DispatchError::ResourceExhausted {
                    what: "DAG",
                    bytes: dataset_bytes,
                    status,
                }
            })?;
        ctx.dataset.dag = Some(dag);
        ctx.dataset.dag_bytes = dataset_bytes;

        let cache_bytes = (algorithm.sizing.cache_bytes)(work);
        let cache = ctx
            .backend_mut()
            .create_buffer(BufferAccess::ReadOnly, cache_bytes)
            .map_err(|status| DispatchError::ResourceExhausted {
                what: "light cache buffer",
                bytes: cache_bytes,
                status,
            })?;
        ctx.dataset.cache = Some(cache);

        let light = self.light_cache(algorithm, work)?;
        ctx.backend_mut()
            .write_buffer(cache, 0, &light)
            .map_err(|status| {
                error!(device = ctx.name(), %status, "writing the light cache failed");
                DispatchError::device("light cache upload", status)
            })?;
        drop(light);

        let generate = ctx.generate_dag_kernel()?;
        let cache_nodes = u32::try_from(cache_bytes / algorithm.node_bytes)
            .map_err(|_| DispatchError::device("cache node count", DeviceStatus::INVALID_VALUE))?;
        for (start, count) in dag_spec::dag_chunks(items, self.chunk_items) {
            let start_item = u32::try_from(start)
                .map_err(|_| DispatchError::device("DAG start item", DeviceStatus::INVALID_VALUE))?;
            let mut args = ArgBinder::new(ctx.backend_mut());
            args.kernel("GenerateDAG", generate)
                .arg(start_item)
                .arg(cache)
                .arg(dag)
                .arg(cache_nodes);
            if let Some(isolate) = algorithm.isolate {
                args.arg(isolate);
            }
            args.finish()?;

            let backend = ctx.backend_mut();
            backend
                .enqueue_kernel(generate, count)
                .and_then(|event| backend.wait(event))
                .map_err(|status| {
                    error!(%status, start, count, "DAG generation chunk failed");
                    DispatchError::device("DAG generation", status)
                })?;
            info!(
                device = ctx.name(),
                "Generating DAG {:.0}%",
                (start + count) as f64 / items as f64 * 100.0
            );
        }

        ctx.dataset.epoch = Some(work.epoch);
        info!(
            device = ctx.name(),
            epoch = work.epoch,
            "DAG ready ({} MB)",
            dataset_bytes >> 20
        );
        Ok(DatasetInfo {
            epoch: work.epoch,
            dataset_bytes,
            items,
            regenerated: true,
        })
    }
}
