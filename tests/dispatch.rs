mod common;

use kernel_dispatch::algorithm::registry;
use kernel_dispatch::backend::host::{CallKind, HostCall};
use kernel_dispatch::backend::{DeviceStatus, KernelArg};
use kernel_dispatch::dag::ETHASH_ISOLATE;
use kernel_dispatch::{AlgorithmConfig, BinderKind, DispatchError, Family};

use common::{dag_item, header_work, open, session};

#[test]
fn x11_alias_selects_darkcoin_mod_with_ten_extra_stages() {
    let config = AlgorithmConfig::from_name("x11");
    assert_eq!(config.name(), "darkcoin-mod");
    assert_eq!(config.descriptor().n_extra_kernels, 10);
    assert_eq!(config.binder(), BinderKind::DarkcoinMod);

    let session = session();
    let mut device = open("host0", "x11");
    let kernels = device
        .ctx
        .stage_kernels(11)
        .expect("main kernel plus ten extras");
    assert_eq!(
        device.handle.kernel_entry(kernels[10]).as_deref(),
        Some("search10")
    );

    let outcome = config
        .binder()
        .bind(&mut device.ctx, &session, &header_work(80), 256)
        .expect("x11 bind should succeed");
    assert_eq!(outcome.stages, 11);
    assert_eq!(outcome.start_nonce, None);
    // Middle stages only see the scratch buffer.
    assert_eq!(device.handle.kernel_args(kernels[5]).len(), 1);
    assert_eq!(device.handle.count(CallKind::Enqueue), 0);
}

#[test]
fn unknown_algorithm_falls_back_to_first_entry() {
    let config = AlgorithmConfig::from_name("totallybogus");
    assert_eq!(config.name(), registry()[0].name);
    assert_eq!(config.name(), "ckolivas");
    assert_eq!(config.family(), Family::Scrypt);
    assert_eq!(config.nfactor(), 10);
}

#[test]
fn ethash_uploads_header_before_binding_search() {
    let session = session();
    let mut device = open("host0", "ethash");
    let input = device.ctx.buffers().input;
    let search = device.ctx.stage_kernels(1).expect("single stage")[0];

    BinderKind::Ethash
        .bind(&mut device.ctx, &session, &dag_item(0), 256)
        .expect("ethash bind should succeed");

    let calls = device.handle.calls();
    let upload = calls
        .iter()
        .position(|call| {
            matches!(call, HostCall::WriteBuffer { buffer, offset: 0, len: 32 } if *buffer == input)
        })
        .expect("the 32-byte header is uploaded");
    let first_search_arg = calls
        .iter()
        .position(|call| matches!(call, HostCall::SetArg { kernel, .. } if *kernel == search))
        .expect("search arguments are bound");
    assert!(upload < first_search_arg);
    assert_eq!(
        device
            .handle
            .buffer_contents(input)
            .map(|bytes| bytes[..32].to_vec()),
        Some((0..32).collect::<Vec<u8>>())
    );
}

#[test]
fn ethash_search_arguments_carry_nonce_and_isolate() {
    let session = session();
    session
        .dag()
        .next_high_nonce()
        .expect("nonce counter is healthy");
    let mut device = open("host0", "ethash");
    let search = device.ctx.stage_kernels(1).expect("single stage")[0];

    let outcome = BinderKind::Ethash
        .bind(&mut device.ctx, &session, &dag_item(0), 256)
        .expect("ethash bind should succeed");
    assert_eq!(outcome.start_nonce, Some(1 << 32));

    let buffers = device.ctx.buffers();
    let dag = device.ctx.dataset_buffer().expect("DAG is resident");
    let args: Vec<KernelArg> = device
        .handle
        .kernel_args(search)
        .into_iter()
        .map(|(_, arg)| arg)
        .collect();
    assert_eq!(
        args,
        vec![
            KernelArg::Buffer(buffers.output),
            KernelArg::Buffer(buffers.input),
            KernelArg::Buffer(dag),
            KernelArg::U32(50),
            KernelArg::U64(1 << 32),
            KernelArg::U64(0x0000_ffff_ffff_ffff),
            KernelArg::U32(ETHASH_ISOLATE),
        ]
    );
}

#[test]
fn nightcap_search_has_no_nonce_argument() {
    let session = session();
    let mut device = open("host0", "nightcap");
    let search = device.ctx.stage_kernels(1).expect("single stage")[0];

    let outcome = BinderKind::Nightcap
        .bind(&mut device.ctx, &session, &dag_item(0), 256)
        .expect("nightcap bind should succeed");
    assert_eq!(outcome.start_nonce, None);

    let args = device.handle.kernel_args(search);
    assert_eq!(args.len(), 5);
    // 6400 bytes of 32-byte nodes, halved.
    assert_eq!(args[3].1, KernelArg::U32(100));
    assert_eq!(args[4].1, KernelArg::U32(0x0000_ffff));
    assert_eq!(
        session
            .dag()
            .next_high_nonce()
            .expect("nonce counter is healthy"),
        0
    );
}

#[test]
fn dag_family_without_epoch_is_rejected_before_device_calls() {
    let session = session();
    let mut device = open("host0", "ethash");
    device.handle.clear_calls();

    let err = BinderKind::Ethash
        .bind(&mut device.ctx, &session, &header_work(80), 256)
        .expect_err("work without DAG coordinates");
    assert!(matches!(err, DispatchError::ProtocolMismatch { .. }));
    assert!(device.handle.calls().is_empty());
}

#[test]
fn every_failed_argument_is_reported() {
    let session = session();
    let mut device = open("host0", "x11");
    device
        .handle
        .fail_call(CallKind::SetArg, 0, DeviceStatus::INVALID_ARG_SIZE);
    device
        .handle
        .fail_call(CallKind::SetArg, 3, DeviceStatus::INVALID_MEM_OBJECT);

    let err = BinderKind::DarkcoinMod
        .bind(&mut device.ctx, &session, &header_work(80), 256)
        .expect_err("two binds fail");
    let failures = match err {
        DispatchError::BindFailed { failures } => failures,
        other => panic!("expected BindFailed, got {other:?}"),
    };
    let statuses: Vec<DeviceStatus> = failures.iter().map(|failure| failure.status).collect();
    assert_eq!(
        statuses,
        vec![DeviceStatus::INVALID_ARG_SIZE, DeviceStatus::INVALID_MEM_OBJECT]
    );
    // Binding carried on past both failures.
    assert_eq!(device.handle.count(CallKind::SetArg), 14);
}

#[test]
fn header_upload_failure_is_a_device_error() {
    let session = session();
    let mut device = open("host0", "x11");
    device
        .handle
        .fail_call(CallKind::WriteBuffer, 0, DeviceStatus(-36));

    let err = BinderKind::DarkcoinMod
        .bind(&mut device.ctx, &session, &header_work(80), 256)
        .expect_err("upload fails");
    assert!(matches!(
        err,
        DispatchError::Device {
            call: "header upload",
            ..
        }
    ));
    assert_eq!(err.status(), Some(DeviceStatus(-36)));
    assert_eq!(device.handle.count(CallKind::SetArg), 0);
}
