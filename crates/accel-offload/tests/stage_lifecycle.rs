//! Integration tests for the offload stage lifecycle
//!
//! Drive the full setup → reshape → forward → teardown cycle against the simulated
//! device and check what reached the hardware side.

use accel_backends::{regs, SimFault, SimOp, SimulatedDriver};
use accel_offload::{
    Blob, Error, ErrorKind, OffloadConfig, OffloadStage, OutputAddressPolicy, PollConfig, SessionState,
    ShapeMismatch,
};

fn mlp_config() -> OffloadConfig {
    OffloadConfig::new(vec![1, 4], vec![1, 2], "fpga-load /opt/bitfiles/mlp.bit").with_poll(PollConfig {
        interval_us: 0,
        timeout_ms: None,
    })
}

#[test]
fn test_end_to_end_forward() {
    accel_tracing::init_test_tracing();

    let driver = SimulatedDriver::new();
    let probe = driver.probe();
    let mut stage = OffloadStage::setup(&mlp_config(), driver).unwrap();

    let bottom = Blob::new(vec![1, 4], vec![3.0f32, 1.0, 4.0, 1.0]).unwrap();
    let mut top = Blob::zeros(vec![1, 1]).unwrap();

    stage.reshape(&bottom, &mut top).unwrap();
    assert_eq!(top.shape(), &[1, 2]);

    stage.forward(&bottom, &mut top).unwrap();
    assert_eq!(top.numel(), 2);
    assert_eq!(probe.executions(), 1);

    // Default policy: both address slots carry the input buffer
    let input = stage.session().input_buffer().unwrap();
    assert_eq!(probe.register(regs::INPUT_ADDR), Some(input.address()));
    assert_eq!(probe.register(regs::OUTPUT_ADDR), Some(input.address()));
    assert_eq!(probe.register(regs::IMAGE_COUNT), Some(1));

    drop(stage);
    assert_eq!(probe.alloc_count(), 2);
    assert_eq!(probe.free_count(), 2);
    assert_eq!(probe.attached_image(), None);
}

#[test]
fn test_output_buffer_policy_returns_device_results() {
    let config = mlp_config().with_output_address(OutputAddressPolicy::OutputBuffer);
    let mut stage = OffloadStage::setup(&config, SimulatedDriver::new()).unwrap();

    let bottom = Blob::new(vec![1, 4], vec![3.0f32, 1.0, 4.0, 1.0]).unwrap();
    let mut top = Blob::zeros(vec![1, 2]).unwrap();
    stage.forward(&bottom, &mut top).unwrap();

    assert_eq!(top.data(), &[7.0, 2.0]);
}

#[test]
fn test_custom_kernel_sees_wire_words() {
    let driver = SimulatedDriver::new().with_kernel(|input: &[u64], output: &mut [u64]| {
        output[0] = input.iter().copied().max().unwrap_or(0);
        output[1] = input.len() as u64;
    });
    let config = mlp_config().with_output_address(OutputAddressPolicy::OutputBuffer);
    let mut stage = OffloadStage::setup(&config, driver).unwrap();

    let bottom = Blob::new(vec![1, 4], vec![2i32, 9, 5, 1]).unwrap();
    let mut top = Blob::zeros(vec![1, 2]).unwrap();
    stage.forward(&bottom, &mut top).unwrap();

    assert_eq!(top.data(), &[9, 4]);
}

#[test]
fn test_invocation_is_strictly_sequential() {
    let driver = SimulatedDriver::new().with_completion_latency(4);
    let probe = driver.probe();
    let mut stage = OffloadStage::setup(&mlp_config(), driver).unwrap();
    let setup_ops = probe.ops().len();

    let bottom = Blob::new(vec![1, 4], vec![1.0f64; 4]).unwrap();
    let mut top = Blob::zeros(vec![1, 2]).unwrap();
    let stats = stage.forward(&bottom, &mut top).unwrap();

    let ops = probe.ops().split_off(setup_ops);
    let kinds: Vec<&str> = ops
        .iter()
        .map(|op| match op {
            SimOp::CopyToDevice { .. } => "copy_in",
            SimOp::WriteRegister { addr, .. } if *addr == regs::CONTROL => "start",
            SimOp::ReadRegister { addr, .. } if *addr == regs::CONTROL => "poll",
            SimOp::CopyFromDevice { .. } => "copy_out",
            _ => "other",
        })
        .collect();

    assert_eq!(kinds, vec!["copy_in", "start", "poll", "poll", "poll", "poll", "poll", "copy_out"]);
    assert_eq!(stats.polls, 5);
    assert_eq!(probe.status_reads(), 5);
}

#[test]
fn test_repeated_forward_reuses_session() {
    let driver = SimulatedDriver::new();
    let probe = driver.probe();
    let mut stage = OffloadStage::setup(&mlp_config(), driver).unwrap();
    let bottom = Blob::new(vec![1, 4], vec![1u64, 2, 3, 4]).unwrap();
    let mut top = Blob::zeros(vec![1, 2]).unwrap();

    for _ in 0..10 {
        stage.forward(&bottom, &mut top).unwrap();
    }

    assert_eq!(probe.executions(), 10);
    assert_eq!(probe.alloc_count(), 2);
    assert_eq!(stage.executor().invocations(), 10);
}

#[test]
fn test_shape_mismatch_leaves_device_untouched() {
    let driver = SimulatedDriver::new();
    let probe = driver.probe();
    let mut stage = OffloadStage::setup(&mlp_config(), driver).unwrap();
    let setup_ops = probe.ops().len();

    let bottom = Blob::new(vec![1, 5], vec![1.0f32; 5]).unwrap();
    let mut top = Blob::zeros(vec![1, 2]).unwrap();
    let err = stage.forward(&bottom, &mut top).unwrap_err();

    assert!(matches!(
        err,
        Error::ShapeMismatch(ShapeMismatch::Dim {
            axis: 1,
            expected: 4,
            actual: 5
        })
    ));
    assert_eq!(probe.ops().len(), setup_ops);
    assert_eq!(probe.executions(), 0);
}

#[test]
fn test_backward_is_not_implemented() {
    let mut stage = OffloadStage::setup(&mlp_config(), SimulatedDriver::new()).unwrap();
    let top = Blob::zeros(vec![1, 2]).unwrap();
    let mut bottom = Blob::<f32>::zeros(vec![1, 4]).unwrap();

    for propagate in [[true], [false]] {
        let err = stage.backward(&top, &propagate, &mut bottom).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
    }
}

#[test]
fn test_device_io_faults_propagate() {
    for (fault, op) in [
        (SimFault::CopyToDevice, "host-to-device copy"),
        (SimFault::WriteRegister(regs::CONTROL), "start"),
        (SimFault::ReadRegister(regs::CONTROL), "status poll"),
        (SimFault::CopyFromDevice, "device-to-host copy"),
    ] {
        let mut stage = OffloadStage::setup(&mlp_config(), SimulatedDriver::new().with_fault(fault)).unwrap();
        let bottom = Blob::new(vec![1, 4], vec![1.0f32; 4]).unwrap();
        let mut top = Blob::zeros(vec![1, 2]).unwrap();

        match stage.forward(&bottom, &mut top) {
            Err(Error::DeviceIo { op: failed, .. }) => assert_eq!(failed, op, "fault {fault:?}"),
            other => panic!("fault {fault:?}: expected DeviceIo, got {other:?}"),
        }
    }
}

#[test]
fn test_configured_timeout_bounds_stuck_device() {
    let config = mlp_config().with_poll(PollConfig {
        interval_us: 10,
        timeout_ms: Some(5),
    });
    let mut stage = OffloadStage::setup(&config, SimulatedDriver::new().never_completes()).unwrap();
    let bottom = Blob::new(vec![1, 4], vec![1.0f32; 4]).unwrap();
    let mut top = Blob::zeros(vec![1, 2]).unwrap();

    let err = stage.forward(&bottom, &mut top).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(matches!(err, Error::DeviceTimeout { polls, .. } if polls >= 1));
}

#[test]
fn test_setup_failure_releases_partial_resources() {
    let driver = SimulatedDriver::new().with_fault(SimFault::WriteRegister(regs::INPUT_ADDR));
    let probe = driver.probe();

    let err = OffloadStage::<_, f32>::setup(&mlp_config(), driver).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(probe.alloc_count(), 2);
    assert_eq!(probe.free_count(), 2);
    assert_eq!(probe.attached_image(), None);
}

#[test]
fn test_config_from_json_drives_stage() {
    let json = r#"{
        "input_shape": [2, 2],
        "output_shape": [2],
        "bitfile_load_cmd": "fpga-load mlp.bit",
        "poll": { "interval_us": 0 },
        "output_address": "output_buffer"
    }"#;
    let config = OffloadConfig::from_json_str(json).unwrap();
    let mut stage = OffloadStage::setup(&config, SimulatedDriver::new()).unwrap();

    let bottom = Blob::new(vec![2, 2], vec![1u32, 2, 3, 4]).unwrap();
    let mut top = Blob::zeros(vec![]).unwrap();
    stage.forward(&bottom, &mut top).unwrap();

    assert_eq!(top.shape(), &[2]);
    assert_eq!(top.data(), &[4, 6]);
}

#[test]
fn test_explicit_teardown_is_idempotent() {
    let driver = SimulatedDriver::new();
    let probe = driver.probe();
    let mut stage = OffloadStage::<_, f32>::setup(&mlp_config(), driver).unwrap();

    stage.teardown().unwrap();
    stage.teardown().unwrap();
    assert_eq!(stage.session().state(), SessionState::TornDown);
    drop(stage);

    assert_eq!(probe.free_count(), 2);
    assert_eq!(probe.ops().iter().filter(|op| **op == SimOp::Detach).count(), 1);
}
