//! Moving f32 data in and out of OpenVINO tensors

use anyhow::{Context, Result};
use ndarray::{Array, Dimension};
use openvino::{ElementType, InferRequest, Shape, Tensor};

use super::pool::SafeCompiledModel;

/// A model output copied out of OpenVINO memory
#[derive(Debug, Clone)]
pub struct OutputTensor {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

/// Run a single-input model and return the finished request
pub fn infer<D: Dimension>(model: &SafeCompiledModel, input: &Array<f32, D>) -> Result<InferRequest> {
    let contiguous = input.as_standard_layout();
    let data = contiguous
        .as_slice()
        .context("Input tensor is not contiguous")?;

    let mut request = model.create_infer_request()?;

    let shape_dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let input_shape = Shape::new(&shape_dims)?;
    let mut tensor = Tensor::new(ElementType::F32, &input_shape)?;

    unsafe {
        let tensor_data = tensor.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
        std::ptr::copy_nonoverlapping(data.as_ptr(), tensor_data, data.len());
    }

    request.set_input_tensor(&tensor)?;
    request.infer().context("Inference failed")?;

    Ok(request)
}

/// Copy output `index` of a finished request
pub fn output(request: &InferRequest, index: usize) -> Result<OutputTensor> {
    let tensor = request
        .get_output_tensor_by_index(index)
        .with_context(|| format!("Model has no output {}", index))?;
    read_tensor_f32(&tensor)
}

/// Number of outputs a finished request exposes
pub fn output_count(request: &InferRequest) -> usize {
    (0..32)
        .take_while(|&i| request.get_output_tensor_by_index(i).is_ok())
        .count()
}

fn read_tensor_f32(tensor: &Tensor) -> Result<OutputTensor> {
    let shape = tensor.get_shape()?;
    let dims: Vec<usize> = shape.get_dimensions().iter().map(|&d| d as usize).collect();
    let total_elements: usize = dims.iter().product();

    let data: Vec<f32> = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, total_elements).to_vec()
    };

    Ok(OutputTensor { dims, data })
}
