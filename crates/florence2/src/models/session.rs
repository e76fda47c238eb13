// ONNX Runtime session construction
//
// Every graph is loaded the same way: existence check, Level3 graph
// optimization, configured intra-op threads, execution provider by `Device`.
// Failures are reported as ModelLoadError naming the graph.

use crate::config::Device;
use crate::error::{Florence2Error, Result};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
        Device::Cuda(device_id) => vec![
            CUDAExecutionProvider::default()
                .with_device_id(device_id as i32)
                .build(),
            CPUExecutionProvider::default().build(),
        ],
        Device::CoreMl => vec![
            CoreMLExecutionProvider::default().with_subgraphs(true).build(),
            CPUExecutionProvider::default().build(),
        ],
    }
}

/// Load one graph into a session
///
/// # Errors
///
/// [`Florence2Error::ModelLoadError`] if the file is missing or ONNX Runtime
/// rejects it.
pub fn load_session(
    model_name: &str,
    model_path: &Path,
    device: Device,
    intra_threads: usize,
) -> Result<Session> {
    if !model_path.exists() {
        return Err(Florence2Error::model_load(
            model_name,
            format!("Model file not found: {}", model_path.display()),
        ));
    }

    let map_err = |e: ort::Error| Florence2Error::model_load(model_name, e);

    let session = Session::builder()
        .map_err(map_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(map_err)?
        .with_intra_threads(intra_threads)
        .map_err(map_err)?
        .with_execution_providers(execution_providers(device))
        .map_err(map_err)?
        .commit_from_file(model_path)
        .map_err(map_err)?;

    log::debug!(
        "Loaded {} model from: {} (device: {}, threads: {})",
        model_name,
        model_path.display(),
        device,
        intra_threads
    );

    Ok(session)
}

/// Input names of a loaded session
#[must_use = "returns the session's input names"]
pub fn input_names(session: &Session) -> Vec<String> {
    session.inputs.iter().map(|input| input.name.clone()).collect()
}
