mod cli;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Sender};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use tracing_subscriber::EnvFilter;

use cli::config::Settings;
use cli::ui;
use kernel_dispatch::algorithm::resolve;
use kernel_dispatch::backend::host::{HostBackend, HostHandle, HostLaunch};
use kernel_dispatch::backend::{DeviceResult, DeviceStatus};
use kernel_dispatch::dag::DagSizing;
use kernel_dispatch::device::GENERATE_DAG_KERNEL;
use kernel_dispatch::{
    AlgorithmConfig, BlockContext, DagWork, DeviceContext, DeviceLayout, DispatchError, Family,
    MiningSession, WorkItem,
};

const DEMO_THREADS: u32 = 1 << 10;
const DEMO_NODE_BYTES: u64 = 64;

struct DeviceReport {
    device: String,
    stages: usize,
    start_nonce: Option<u64>,
    dataset_epoch: Option<u64>,
    dataset_bytes: u64,
    elapsed: Duration,
}

enum DeviceEvent {
    Bound(DeviceReport),
    Failed { device: String, error: DispatchError },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let settings = Settings::load()?;
    init_tracing(settings.log_level.as_deref())?;

    let config = algorithm_config(&settings);
    if settings.json {
        let json = serde_json::to_string_pretty(config.descriptor())
            .context("failed to encode descriptor")?;
        println!("{json}");
        return Ok(());
    }

    let resolution = resolve(&settings.algorithm);
    let mut lines = vec![
        ("requested", settings.algorithm.clone()),
        ("resolved", resolution.canonical.to_string()),
        ("algorithm", config.name().to_string()),
        ("kernel", config.kernel_source().to_string()),
        (
            "nfactor",
            format!("{} (N = {})", config.nfactor(), config.n()),
        ),
        ("devices", settings.devices.to_string()),
    ];
    lines.extend(ui::descriptor_lines(config.descriptor()));
    ui::startup_banner("kdispatch", "kernel argument dispatch", &lines);

    if !config.name().eq_ignore_ascii_case(resolution.canonical) {
        ui::warn(
            "algo",
            format!(
                "'{}' is not a known algorithm; using '{}'",
                settings.algorithm,
                config.name()
            ),
        );
    }

    let session = Arc::new(build_session(&settings));
    let dag_work = dag_work(&settings, config.family());
    if let Some(work) = &dag_work {
        ui::info(
            "dag",
            format!(
                "epoch {} at height {} (chunk {} items)",
                work.epoch,
                work.height,
                session.dag().chunk_items()
            ),
        );
    }

    let failures = run_devices(&settings, &config, &session, dag_work)?;

    if dag_work.is_some() {
        ui::info(
            "dag",
            format!(
                "light cache generated {} time(s) across {} device(s)",
                session.dag().regenerations(),
                settings.devices
            ),
        );
    }
    if failures > 0 {
        return Err(anyhow!("{failures} device(s) failed to bind"));
    }
    Ok(())
}

fn init_tracing(directive: Option<&str>) -> Result<()> {
    let filter = match directive {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log level '{directive}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

fn algorithm_config(settings: &Settings) -> AlgorithmConfig {
    let mut config = AlgorithmConfig::default();
    if let Some(nfactor) = settings.nfactor {
        config.set_nfactor(nfactor);
    }
    if let Some(kernel_file) = &settings.kernel_file {
        config.set_kernelfile(kernel_file.as_str());
    }
    config.select(&settings.algorithm);
    config
}

/// Small dataset geometry so the demo builds its DAGs in milliseconds.
fn demo_cache_bytes(work: &DagWork) -> u64 {
    (512 + (work.epoch % 16) * 64) * DEMO_NODE_BYTES
}

fn demo_dataset_bytes(work: &DagWork) -> u64 {
    (16_384 + (work.epoch % 16) * 1_024 + 7) * DEMO_NODE_BYTES
}

fn build_session(settings: &Settings) -> MiningSession {
    let sizing = DagSizing {
        cache_bytes: demo_cache_bytes,
        dataset_bytes: demo_dataset_bytes,
    };
    MiningSession::builder()
        .dag_chunk_items(settings.dag_chunk_items)
        .dag_sizing(Family::Ethash, sizing)
        .dag_sizing(Family::Nightcap, sizing)
        .build()
}

/// Ethash seed chain: 32 zero bytes, Keccak-256 applied once per epoch.
fn seed_hash(epoch: u64) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        let digest = Keccak256::digest(seed);
        seed.copy_from_slice(&digest);
    }
    seed
}

fn dag_work(settings: &Settings, family: Family) -> Option<DagWork> {
    let epoch = match family {
        Family::Ethash => settings
            .epoch
            .unwrap_or_else(|| dag_spec::ethash_epoch(settings.height)),
        Family::Nightcap => settings
            .epoch
            .unwrap_or_else(|| dag_spec::nightcap_epoch(settings.height)),
        _ => return None,
    };
    Some(DagWork {
        epoch,
        height: settings.height,
        seed_hash: seed_hash(epoch),
    })
}

fn synthetic_work(family: Family, device: usize, dag: Option<DagWork>) -> WorkItem {
    let len: usize = if family == Family::Credits { 168 } else { 80 };
    let data: Vec<u8> = (0..len)
        .map(|idx| (idx as u8).wrapping_mul(31).wrapping_add(device as u8))
        .collect();

    let mut target = [0xffu8; 32];
    target[30] = 0;
    target[31] = 0;

    let midstate: Vec<u8> = data
        .chunks(32)
        .take(4)
        .flat_map(|chunk| Sha256::digest(chunk).to_vec())
        .collect();
    let block_context = BlockContext {
        ctx: std::array::from_fn(|idx| 0x6a09_e667u32.rotate_left(idx as u32)),
        cty: std::array::from_fn(|idx| u32::from_le_bytes([data[idx * 4], 0, 0, 0])),
    };

    let work = WorkItem::new(data, target)
        .with_midstate(midstate)
        .with_block_context(block_context);
    match dag {
        Some(dag) => work.with_dag(dag),
        None => work,
    }
}

fn demo_layout() -> DeviceLayout {
    DeviceLayout {
        device_scratch_bytes: 1 << 20,
        scratch_limit: Some(8 << 20),
        aux_buffer_bytes: 1 << 16,
    }
}

/// Host stand-in for the dataset build kernel: item `i` is cache node
/// `i mod cache_nodes` with its bytes xored by the low byte of `i`.
fn register_generate_dag(handle: &HostHandle, node_bytes: usize) {
    handle.register_kernel(
        GENERATE_DAG_KERNEL,
        Arc::new(move |launch: &mut HostLaunch<'_>| {
            let start = u64::from(launch.u32_arg(0)?);
            let cache = launch.buffer_arg(1)?;
            let dag = launch.buffer_arg(2)?;
            let cache_nodes = u64::from(launch.u32_arg(3)?.max(1));
            let count = launch.global_size;
            launch.with_buffers(cache, dag, |cache, dag| {
                fill_items(cache, dag, node_bytes, cache_nodes, start..start + count)
            })?
        }),
    );
}

fn fill_items(
    cache: &[u8],
    dag: &mut [u8],
    node_bytes: usize,
    cache_nodes: u64,
    items: std::ops::Range<u64>,
) -> DeviceResult<()> {
    for item in items {
        let src = (item % cache_nodes) as usize * node_bytes;
        let dst = item as usize * node_bytes;
        let (Some(node), Some(out)) = (
            cache.get(src..src + node_bytes),
            dag.get_mut(dst..dst + node_bytes),
        ) else {
            return Err(DeviceStatus::INVALID_VALUE);
        };
        for (out, byte) in out.iter_mut().zip(node) {
            *out = byte ^ item as u8;
        }
    }
    Ok(())
}

fn run_device(
    index: usize,
    config: &AlgorithmConfig,
    session: &MiningSession,
    work: &WorkItem,
) -> Result<DeviceReport, DispatchError> {
    let started = Instant::now();
    let backend = HostBackend::new(format!("host{index}"));
    if let Some(algorithm) = session.dag().algorithm(config.family()) {
        register_generate_dag(&backend.handle(), algorithm.node_bytes as usize);
    }

    let mut ctx = DeviceContext::open(Box::new(backend), config, &demo_layout())?;
    let outcome = config.binder().bind(&mut ctx, session, work, DEMO_THREADS)?;
    Ok(DeviceReport {
        device: ctx.name().to_string(),
        stages: outcome.stages,
        start_nonce: outcome.start_nonce,
        dataset_epoch: ctx.dataset_epoch(),
        dataset_bytes: ctx.dataset_bytes(),
        elapsed: started.elapsed(),
    })
}

fn spawn_device(
    index: usize,
    config: AlgorithmConfig,
    session: Arc<MiningSession>,
    work: WorkItem,
    events: Sender<DeviceEvent>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("device-{index}"))
        .spawn(move || {
            let event = match run_device(index, &config, &session, &work) {
                Ok(report) => DeviceEvent::Bound(report),
                Err(error) => DeviceEvent::Failed {
                    device: format!("host{index}"),
                    error,
                },
            };
            let _ = events.send(event);
        })
        .with_context(|| format!("failed to spawn device thread {index}"))
}

/// Runs one control thread per device and reports as binds complete.
/// Returns the number of devices that failed.
fn run_devices(
    settings: &Settings,
    config: &AlgorithmConfig,
    session: &Arc<MiningSession>,
    dag: Option<DagWork>,
) -> Result<usize> {
    let (events_tx, events_rx) = unbounded();
    let mut workers = Vec::with_capacity(settings.devices);
    for index in 0..settings.devices {
        workers.push(spawn_device(
            index,
            config.clone(),
            Arc::clone(session),
            synthetic_work(config.family(), index, dag),
            events_tx.clone(),
        )?);
    }
    drop(events_tx);

    let mut failures = 0;
    for event in events_rx.iter() {
        match event {
            DeviceEvent::Bound(report) => report_device(&report),
            DeviceEvent::Failed { device, error } => {
                failures += 1;
                ui::error(&device, format!("bind failed: {error}"));
            }
        }
    }

    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("device thread panicked"))?;
    }
    Ok(failures)
}

fn report_device(report: &DeviceReport) {
    let mut message = format!(
        "bound {} stage(s) in {:.1}ms",
        report.stages,
        report.elapsed.as_secs_f64() * 1000.0
    );
    if let Some(nonce) = report.start_nonce {
        message.push_str(&format!(" | start nonce {nonce:#018x}"));
    }
    if let Some(epoch) = report.dataset_epoch {
        message.push_str(&format!(
            " | DAG epoch {epoch} ({} KiB)",
            report.dataset_bytes >> 10
        ));
    }
    ui::success(&report.device, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_chain_starts_at_zero() {
        assert_eq!(seed_hash(0), [0u8; 32]);
        let once = Keccak256::digest([0u8; 32]);
        let twice = Keccak256::digest(once);
        assert_eq!(seed_hash(2).as_slice(), twice.as_slice());
    }

    #[test]
    fn demo_dataset_is_not_a_chunk_multiple() {
        let work = DagWork {
            epoch: 3,
            height: 0,
            seed_hash: [0; 32],
        };
        let items = demo_dataset_bytes(&work) / DEMO_NODE_BYTES;
        assert_ne!(items % 1024, 0);
        assert_eq!(demo_cache_bytes(&work) % DEMO_NODE_BYTES, 0);
    }

    #[test]
    fn fill_items_rejects_out_of_range_items() {
        let cache = vec![1u8; 4 * 8];
        let mut dag = vec![0u8; 2 * 8];
        fill_items(&cache, &mut dag, 8, 4, 0..2).expect("two items fit");
        assert_eq!(&dag[8..16], &[0u8; 8]);
        assert_eq!(
            fill_items(&cache, &mut dag, 8, 4, 1..3),
            Err(DeviceStatus::INVALID_VALUE)
        );
    }

    #[test]
    fn credits_work_carries_full_header() {
        assert_eq!(synthetic_work(Family::Credits, 0, None).data.len(), 168);
        let work = synthetic_work(Family::X11, 1, None);
        assert_eq!(work.data.len(), 80);
        assert_eq!(work.midstate.map(|midstate| midstate.len()), Some(128));
    }
}
