//! End-to-end engine scenarios against the reference runtime.

use std::sync::Arc;

use strix_core::{DataType, DeviceRuntime, EngineError, ErrorKind, Tensor, TensorFormat};
use strix_engine::{EngineConfig, GearKind, InferenceEngine, ModelSource, ShapeMode};
use strix_runtime::{HostRuntime, ModelManifest};

fn runtime() -> (Arc<HostRuntime>, Arc<dyn DeviceRuntime>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let host = Arc::new(HostRuntime::new());
    let dyn_rt: Arc<dyn DeviceRuntime> = Arc::clone(&host) as Arc<dyn DeviceRuntime>;
    (host, dyn_rt)
}

fn f32_tensor(dims: &[i64], seed: u8) -> Arc<Tensor> {
    let len = dims.iter().product::<i64>() as usize * 4;
    let data: Vec<u8> = (0..len).map(|i| seed.wrapping_add(i as u8)).collect();
    Arc::new(Tensor::create_with_data(dims, DataType::Float32, TensorFormat::Nchw, data).unwrap())
}

fn static_blob() -> Vec<u8> {
    ModelManifest::new("static-io")
        .input("x", DataType::Float32, TensorFormat::Nchw, &[1, 3, 4, 4])
        .output("y", DataType::Float32, TensorFormat::Nchw, &[1, 3, 4, 4])
        .to_blob()
}

#[test]
fn static_model_binds_runs_and_publishes_outputs() {
    let (_, rt) = runtime();
    let mut engine = InferenceEngine::new(
        rt,
        ModelSource::Memory(static_blob()),
        EngineConfig::for_device(0),
    )
    .unwrap();
    assert!(engine.is_loaded());
    assert_eq!(engine.shape_mode(), ShapeMode::Static);
    assert!(!engine.is_dynamic_output());

    let input = f32_tensor(&[1, 3, 4, 4], 11);
    let outputs = engine
        .infer(&[("x".to_string(), Arc::clone(&input))])
        .unwrap();
    assert_eq!(outputs.len(), 1);
    let (name, tensor) = &outputs[0];
    assert_eq!(name, "y");
    assert_eq!(tensor.dims(), &[1, 3, 4, 4]);
    assert_eq!(
        tensor.host_to_vec().unwrap(),
        input.host_to_vec().unwrap()
    );

    // A second run reuses the published output tensor.
    engine.run().unwrap();
    let again = engine.output_tensors().unwrap();
    assert_eq!(again[0].1.dims(), &[1, 3, 4, 4]);
}

#[test]
fn invalid_device_id_is_rejected() {
    let (_, rt) = runtime();
    let err = InferenceEngine::new(
        rt,
        ModelSource::Memory(static_blob()),
        EngineConfig::for_device(7),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidDeviceId { .. }));
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn empty_model_buffer_is_rejected() {
    let (_, rt) = runtime();
    let err = InferenceEngine::new(
        rt,
        ModelSource::Memory(Vec::new()),
        EngineConfig::for_device(0),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn model_blob_loads_from_file() {
    let path = std::env::temp_dir().join(format!(
        "strix-blob-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::write(&path, static_blob()).unwrap();

    let (_, rt) = runtime();
    let engine = InferenceEngine::new(
        rt,
        ModelSource::File(path.clone()),
        EngineConfig::for_device(0),
    )
    .unwrap();
    assert!(engine.is_loaded());

    std::fs::remove_file(&path).ok();
}

#[test]
fn input_coverage_is_validated() {
    let (_, rt) = runtime();
    let mut engine = InferenceEngine::new(
        rt,
        ModelSource::Memory(static_blob()),
        EngineConfig::for_device(0),
    )
    .unwrap();

    // Wrong name.
    let err = engine
        .set_input_tensors(&[("bogus".to_string(), f32_tensor(&[1, 3, 4, 4], 0))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);

    // Wrong count.
    let err = engine.set_input_tensors(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);

    // Running without bound inputs fails on the missing slot.
    let err = engine.run().unwrap_err();
    assert!(matches!(err, EngineError::MissingInput(_)));
}

#[test]
fn static_resize_is_noop_or_rejected() {
    let (_, rt) = runtime();
    let mut engine = InferenceEngine::new(
        rt,
        ModelSource::Memory(static_blob()),
        EngineConfig::for_device(0),
    )
    .unwrap();

    // Matching shapes succeed without touching anything.
    engine.resize(&[vec![1, 3, 4, 4]]).unwrap();

    let err = engine.resize(&[vec![2, 3, 4, 4]]).unwrap_err();
    assert!(matches!(err, EngineError::StaticResize));

    let err = engine.resize(&[vec![1, 3, -1, 4]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[test]
fn discrete_batch_gears_validate_and_apply() {
    let blob = ModelManifest::new("gears")
        .input("x", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 2, 2])
        .output("y", DataType::Float32, TensorFormat::Nchw, &[-1, 3, 2, 2])
        .batch_gears(&[1, 2, 4])
        .to_blob();
    let (_, rt) = runtime();
    let mut engine =
        InferenceEngine::new(rt, ModelSource::Memory(blob), EngineConfig::for_device(0)).unwrap();
    assert_eq!(engine.shape_mode(), ShapeMode::DiscreteGears(GearKind::Batch));
    assert!(!engine.is_dynamic_output());

    // Batch 3 is not a gear; slot metadata must stay untouched.
    let err = engine.resize(&[vec![3, 3, 2, 2]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
    assert_eq!(engine.input_tensor_infos()[0].dims, vec![-1, 3, 2, 2]);

    // Batch 4 is a gear; every slot re-derives from the current views.
    engine.resize(&[vec![4, 3, 2, 2]]).unwrap();
    assert_eq!(engine.input_tensor_infos()[0].dims, vec![4, 3, 2, 2]);
    let out_info = &engine.output_tensor_infos()[0];
    assert_eq!(out_info.dims[0], 4);
    assert_eq!(out_info.size, 4 * 3 * 2 * 2 * 4);

    // And the engine runs at the selected gear.
    let input = f32_tensor(&[4, 3, 2, 2], 3);
    let outputs = engine.infer(&[("x".to_string(), input)]).unwrap();
    assert_eq!(outputs[0].1.dims(), &[4, 3, 2, 2]);
}

#[test]
fn fully_dynamic_grows_reallocate_and_shrinks_do_not() {
    let blob = ModelManifest::new("dyn")
        .input("x", DataType::Float32, TensorFormat::Nchw, &[-1, 4])
        .output("y", DataType::Float32, TensorFormat::Nchw, &[-1, 4])
        .to_blob();
    let (host, rt) = runtime();
    let mut engine =
        InferenceEngine::new(rt, ModelSource::Memory(blob), EngineConfig::for_device(0)).unwrap();
    assert_eq!(engine.shape_mode(), ShapeMode::FullyDynamicInput);
    assert!(engine.is_dynamic_output());

    // Growth rebuilds the input buffers.
    let before = host.alloc_count();
    engine.resize(&[vec![2, 4]]).unwrap();
    assert_eq!(host.alloc_count(), before + 1);
    assert_eq!(engine.input_tensor_infos()[0].size, 32);

    // Shrinking updates the bookkeeping without reallocating.
    let before = host.alloc_count();
    engine.resize(&[vec![1, 4]]).unwrap();
    assert_eq!(host.alloc_count(), before);
    assert_eq!(engine.input_tensor_infos()[0].size, 16);
    assert_eq!(engine.input_tensor_infos()[0].dims, vec![1, 4]);

    // Dynamic outputs are sized by the runtime at execution and released
    // once copied back to the host.
    let input = f32_tensor(&[1, 4], 42);
    let frees = host.free_count();
    let outputs = engine.infer(&[("x".to_string(), Arc::clone(&input))]).unwrap();
    assert_eq!(outputs[0].1.dims(), &[1, 4]);
    assert_eq!(
        outputs[0].1.host_to_vec().unwrap(),
        input.host_to_vec().unwrap()
    );
    assert_eq!(host.free_count(), frees + 1);
}

#[test]
fn fully_dynamic_regrow_within_allocation_keeps_buffers() {
    let blob = ModelManifest::new("dyn")
        .input("x", DataType::Float32, TensorFormat::Nchw, &[-1, 4])
        .output("y", DataType::Float32, TensorFormat::Nchw, &[-1, 4])
        .to_blob();
    let (host, rt) = runtime();
    let mut engine =
        InferenceEngine::new(rt, ModelSource::Memory(blob), EngineConfig::for_device(0)).unwrap();

    // Grow to 64 bytes, shrink to 16.
    engine.resize(&[vec![4, 4]]).unwrap();
    engine.resize(&[vec![1, 4]]).unwrap();

    // Regrowing within the 64-byte allocation is bookkeeping only.
    let (allocs, frees) = (host.alloc_count(), host.free_count());
    engine.resize(&[vec![2, 4]]).unwrap();
    assert_eq!(host.alloc_count(), allocs);
    assert_eq!(host.free_count(), frees);
    assert_eq!(engine.input_tensor_infos()[0].dims, vec![2, 4]);
    assert_eq!(engine.input_tensor_infos()[0].size, 32);

    // Exceeding it still rebuilds.
    engine.resize(&[vec![8, 4]]).unwrap();
    assert_eq!(host.alloc_count(), allocs + 1);
    assert_eq!(host.free_count(), frees + 1);
}

#[test]
fn engine_drop_releases_every_resource() {
    let (host, rt) = runtime();
    let engine = InferenceEngine::new(
        rt,
        ModelSource::Memory(static_blob()),
        EngineConfig::for_device(0),
    )
    .unwrap();
    assert!(host.live_allocations() > 0);
    drop(engine);
    assert_eq!(host.live_allocations(), 0);
    assert_eq!(host.alloc_count(), host.free_count());
}

#[test]
fn bounded_range_updates_in_place_and_enforces_max() {
    let blob = ModelManifest::new("range")
        .input_with_max(
            "x",
            DataType::Float32,
            TensorFormat::Nchw,
            &[-1, 4],
            64,
        )
        .output("y", DataType::Float32, TensorFormat::Nchw, &[4, 4])
        .to_blob();
    let (host, rt) = runtime();
    let mut engine =
        InferenceEngine::new(rt, ModelSource::Memory(blob), EngineConfig::for_device(0)).unwrap();
    assert_eq!(engine.shape_mode(), ShapeMode::BoundedRange);

    // Within the advertised maximum: descriptor update, no reallocation.
    let before = host.alloc_count();
    engine.resize(&[vec![2, 4]]).unwrap();
    assert_eq!(host.alloc_count(), before);
    assert_eq!(engine.input_tensor_infos()[0].size, 32);

    // Beyond it: rejected.
    let err = engine.resize(&[vec![5, 4]]).unwrap_err();
    assert!(matches!(err, EngineError::ExceedsMaxSize { .. }));
    assert_eq!(err.kind(), ErrorKind::Shape);
    assert_eq!(engine.input_tensor_infos()[0].size, 32);

    // Execution cycles the staged bytes into the fixed-size output.
    let outputs = engine.infer(&[("x".to_string(), f32_tensor(&[2, 4], 7))]).unwrap();
    assert_eq!(outputs[0].1.dims(), &[4, 4]);
    assert_eq!(outputs[0].1.host_len().unwrap(), 64);
}
