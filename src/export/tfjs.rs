//! TensorFlow.js layers-model writer
//!
//! The browser runtime expects a Keras `Sequential` topology in channels-last
//! layout plus one binary shard of little-endian f32 weights. Burn stores
//! the same network channels-first, so two weights need re-ordering:
//!
//! - conv kernels `[out, in, kh, kw]` become `[kh, kw, in, out]`
//! - rows of the first dense kernel follow the flatten order, which is
//!   `c·H·W + h·W + w` in Burn and `h·W·C + w·C + c` in Keras
//!
//! Dense kernels are already `[in, out]` in both and biases never change.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::{
    module::Param,
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::model::cnn::{EmotionCnn, EmotionCnnConfig};
use crate::utils::error::{EmotionError, Result, ResultExt};

pub const MODEL_FILE: &str = "model.json";
pub const SHARD_FILE: &str = "group1-shard1of1.bin";

/// One named weight in Keras layout
#[derive(Debug, Clone)]
pub struct WeightTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightSpec>,
}

/// Contents of `model.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelJson {
    pub format: String,
    pub generated_by: String,
    pub converted_by: String,
    pub model_topology: Value,
    pub weights_manifest: Vec<WeightGroup>,
}

/// Files written by an export
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub model_json: PathBuf,
    pub weights_bin: PathBuf,
    pub num_tensors: usize,
    pub num_params: usize,
    pub bytes: usize,
}

/// `[out, in, kh, kw]` to `[kh, kw, in, out]`
pub fn conv_kernel_to_hwio(data: &[f32], shape: [usize; 4]) -> Vec<f32> {
    let [out_c, in_c, kh, kw] = shape;
    let mut hwio = vec![0.0; data.len()];
    for o in 0..out_c {
        for i in 0..in_c {
            for h in 0..kh {
                for w in 0..kw {
                    let src = ((o * in_c + i) * kh + h) * kw + w;
                    let dst = ((h * kw + w) * in_c + i) * out_c + o;
                    hwio[dst] = data[src];
                }
            }
        }
    }
    hwio
}

/// Re-order the rows of a `[C·H·W, units]` kernel from channels-first to
/// channels-last flatten order
pub fn dense_rows_chw_to_hwc(
    data: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    units: usize,
) -> Vec<f32> {
    let mut out = vec![0.0; data.len()];
    for c in 0..channels {
        for h in 0..height {
            for w in 0..width {
                let src_row = (c * height + h) * width + w;
                let dst_row = (h * width + w) * channels + c;
                out[dst_row * units..(dst_row + 1) * units]
                    .copy_from_slice(&data[src_row * units..(src_row + 1) * units]);
            }
        }
    }
    out
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<(Vec<usize>, Vec<f32>)> {
    let shape = tensor.dims().to_vec();
    let data = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| EmotionError::Export(format!("{:?}", e)))?;
    Ok((shape, data))
}

fn bias_values<B: Backend>(bias: &Option<Param<Tensor<B, 1>>>, layer: &str) -> Result<Vec<f32>> {
    let bias = bias
        .as_ref()
        .ok_or_else(|| EmotionError::Export(format!("{} has no bias", layer)))?;
    Ok(tensor_values(bias.val())?.1)
}

/// Keras layer names in creation order
const CONV_NAMES: [&str; 4] = ["conv2d", "conv2d_1", "conv2d_2", "conv2d_3"];
const DENSE_NAMES: [&str; 2] = ["dense", "dense_1"];

/// All weights in manifest order, converted to Keras layout
pub fn extract_weights<B: Backend>(
    model: &EmotionCnn<B>,
    config: &EmotionCnnConfig,
) -> Result<Vec<WeightTensor>> {
    let mut weights = Vec::with_capacity(12);

    let convs = [&model.conv1, &model.conv2, &model.conv3, &model.conv4];
    for (conv, name) in convs.into_iter().zip(CONV_NAMES) {
        let (shape, data) = tensor_values(conv.weight.val())?;
        let [o, i, kh, kw]: [usize; 4] = shape
            .as_slice()
            .try_into()
            .with_context(|| format!("{} kernel has shape {:?}", name, shape))?;
        weights.push(WeightTensor {
            name: format!("{}/kernel", name),
            shape: vec![kh, kw, i, o],
            data: conv_kernel_to_hwio(&data, [o, i, kh, kw]),
        });
        weights.push(WeightTensor {
            name: format!("{}/bias", name),
            shape: vec![o],
            data: bias_values(&conv.bias, name)?,
        });
    }

    let side = config.feature_size();
    let channels = config.conv_filters()[3];
    for (idx, (linear, name)) in [&model.fc1, &model.fc2].into_iter().zip(DENSE_NAMES).enumerate() {
        let (shape, data) = tensor_values(linear.weight.val())?;
        let (rows, units) = (shape[0], shape[1]);
        let data = if idx == 0 {
            if rows != channels * side * side {
                return Err(EmotionError::Export(format!(
                    "{} expects {} inputs, got {}",
                    name,
                    channels * side * side,
                    rows
                )));
            }
            dense_rows_chw_to_hwc(&data, channels, side, side, units)
        } else {
            data
        };
        weights.push(WeightTensor {
            name: format!("{}/kernel", name),
            shape: vec![rows, units],
            data,
        });
        weights.push(WeightTensor {
            name: format!("{}/bias", name),
            shape: vec![units],
            data: bias_values(&linear.bias, name)?,
        });
    }

    Ok(weights)
}

fn initializers() -> (Value, Value) {
    (
        json!({"class_name": "GlorotUniform", "config": {"seed": null}}),
        json!({"class_name": "Zeros", "config": {}}),
    )
}

fn conv_layer(name: &str, filters: usize) -> Value {
    let (kernel_init, bias_init) = initializers();
    json!({
        "class_name": "Conv2D",
        "config": {
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "filters": filters,
            "kernel_size": [3, 3],
            "strides": [1, 1],
            "padding": "same",
            "data_format": "channels_last",
            "dilation_rate": [1, 1],
            "groups": 1,
            "activation": "relu",
            "use_bias": true,
            "kernel_initializer": kernel_init,
            "bias_initializer": bias_init,
            "kernel_regularizer": null,
            "bias_regularizer": null,
            "activity_regularizer": null,
            "kernel_constraint": null,
            "bias_constraint": null
        }
    })
}

fn pool_layer(name: &str) -> Value {
    json!({
        "class_name": "MaxPooling2D",
        "config": {
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "pool_size": [2, 2],
            "padding": "valid",
            "strides": [2, 2],
            "data_format": "channels_last"
        }
    })
}

fn dropout_layer(name: &str, rate: f64) -> Value {
    json!({
        "class_name": "Dropout",
        "config": {"name": name, "trainable": true, "dtype": "float32", "rate": rate, "noise_shape": null, "seed": null}
    })
}

fn dense_layer(name: &str, units: usize, activation: &str) -> Value {
    let (kernel_init, bias_init) = initializers();
    json!({
        "class_name": "Dense",
        "config": {
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "units": units,
            "activation": activation,
            "use_bias": true,
            "kernel_initializer": kernel_init,
            "bias_initializer": bias_init,
            "kernel_regularizer": null,
            "bias_regularizer": null,
            "activity_regularizer": null,
            "kernel_constraint": null,
            "bias_constraint": null
        }
    })
}

/// Keras `Sequential` description of the network, channels-last
pub fn model_topology(config: &EmotionCnnConfig) -> Value {
    let [f1, f2, f3, f4] = config.conv_filters();
    let size = config.input_size;
    let layers = vec![
        json!({
            "class_name": "InputLayer",
            "config": {
                "batch_input_shape": [null, size, size, config.in_channels],
                "dtype": "float32",
                "sparse": false,
                "ragged": false,
                "name": "conv2d_input"
            }
        }),
        conv_layer(CONV_NAMES[0], f1),
        conv_layer(CONV_NAMES[1], f2),
        pool_layer("max_pooling2d"),
        dropout_layer("dropout", config.conv_dropout),
        conv_layer(CONV_NAMES[2], f3),
        pool_layer("max_pooling2d_1"),
        dropout_layer("dropout_1", config.conv_dropout),
        conv_layer(CONV_NAMES[3], f4),
        pool_layer("max_pooling2d_2"),
        dropout_layer("dropout_2", config.conv_dropout),
        json!({
            "class_name": "Flatten",
            "config": {"name": "flatten", "trainable": true, "dtype": "float32", "data_format": "channels_last"}
        }),
        dense_layer(DENSE_NAMES[0], config.dense_units, "relu"),
        dropout_layer("dropout_3", config.dense_dropout),
        dense_layer(DENSE_NAMES[1], config.num_classes, "softmax"),
    ];

    json!({
        "class_name": "Sequential",
        "config": {"name": "sequential", "layers": layers},
        "keras_version": "2.15.0",
        "backend": "tensorflow"
    })
}

/// Write `model.json` and the weight shard into `out_dir`
pub fn export_tfjs<B: Backend>(
    model: &EmotionCnn<B>,
    config: &EmotionCnnConfig,
    out_dir: &Path,
) -> Result<ExportSummary> {
    config.validate().map_err(EmotionError::Export)?;
    std::fs::create_dir_all(out_dir)?;

    let weights = extract_weights(model, config)?;

    let weights_bin = out_dir.join(SHARD_FILE);
    let mut writer = BufWriter::new(File::create(&weights_bin)?);
    let mut num_params = 0usize;
    for w in &weights {
        let expected: usize = w.shape.iter().product();
        if expected != w.data.len() {
            return Err(EmotionError::Export(format!(
                "{} has {} values for shape {:?}",
                w.name,
                w.data.len(),
                w.shape
            )));
        }
        for v in &w.data {
            writer.write_all(&v.to_le_bytes())?;
        }
        num_params += w.data.len();
    }
    writer.flush()?;

    let generated_by = format!("fer_emotion {}", crate::VERSION);
    let manifest = ModelJson {
        format: "layers-model".to_string(),
        generated_by: generated_by.clone(),
        converted_by: generated_by,
        model_topology: model_topology(config),
        weights_manifest: vec![WeightGroup {
            paths: vec![SHARD_FILE.to_string()],
            weights: weights
                .iter()
                .map(|w| WeightSpec {
                    name: w.name.clone(),
                    shape: w.shape.clone(),
                    dtype: "float32".to_string(),
                })
                .collect(),
        }],
    };
    let model_json = out_dir.join(MODEL_FILE);
    std::fs::write(&model_json, serde_json::to_string(&manifest)?)?;

    info!(
        "Exported {} tensors ({} parameters) to {:?}",
        weights.len(),
        num_params,
        out_dir
    );

    Ok(ExportSummary {
        model_json,
        weights_bin,
        num_tensors: weights.len(),
        num_params,
        bytes: num_params * 4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;
    use burn::module::Module;

    type TestBackend = InferenceBackend;

    fn small_config() -> EmotionCnnConfig {
        EmotionCnnConfig::new()
            .with_input_size(16)
            .with_base_filters(2)
            .with_dense_units(4)
    }

    #[test]
    fn test_conv_kernel_layout() {
        // out = 2, in = 1, 1x2 kernel
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(conv_kernel_to_hwio(&data, [2, 1, 1, 2]), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_dense_row_permutation() {
        // C = 2, H = 1, W = 2, one unit
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(dense_rows_chw_to_hwc(&data, 2, 1, 2, 1), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_dense_permutation_preserves_dot_products() {
        let (c, h, w, units) = (3, 2, 2, 2);
        let rows = c * h * w;
        let kernel: Vec<f32> = (0..rows * units).map(|v| (v as f32 * 0.37).sin()).collect();
        let features_chw: Vec<f32> = (0..rows).map(|v| (v as f32 * 1.3).cos()).collect();

        let mut features_hwc = vec![0.0; rows];
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    features_hwc[(hi * w + wi) * c + ci] = features_chw[(ci * h + hi) * w + wi];
                }
            }
        }

        let converted = dense_rows_chw_to_hwc(&kernel, c, h, w, units);
        for u in 0..units {
            let a: f32 = (0..rows).map(|r| features_chw[r] * kernel[r * units + u]).sum();
            let b: f32 = (0..rows).map(|r| features_hwc[r] * converted[r * units + u]).sum();
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_topology_layers() {
        let topology = model_topology(&EmotionCnnConfig::new());
        let layers = topology["config"]["layers"].as_array().unwrap();
        assert_eq!(layers.len(), 15);
        assert_eq!(layers[0]["config"]["batch_input_shape"], json!([null, 48, 48, 1]));
        assert_eq!(layers[14]["config"]["activation"], "softmax");
        assert_eq!(layers[14]["config"]["units"], 7);
        assert_eq!(layers[12]["config"]["units"], 512);
    }

    #[test]
    fn test_export_writes_consistent_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("web_model");
        let config = small_config();
        let device = Default::default();
        let model = EmotionCnn::<TestBackend>::new(&config, &device);

        let summary = export_tfjs(&model, &config, &out).unwrap();
        assert_eq!(summary.num_tensors, 12);
        assert_eq!(summary.num_params, model.num_params());

        let manifest: ModelJson =
            serde_json::from_str(&std::fs::read_to_string(&summary.model_json).unwrap()).unwrap();
        assert_eq!(manifest.format, "layers-model");
        let specs = &manifest.weights_manifest[0].weights;
        assert_eq!(specs[0].name, "conv2d/kernel");
        assert_eq!(specs[0].shape, vec![3, 3, 1, 2]);
        assert_eq!(specs[8].name, "dense/kernel");
        assert_eq!(specs[8].shape, vec![16 * 2 * 2, 4]);

        let values: usize = specs.iter().map(|s| s.shape.iter().product::<usize>()).sum();
        let bin = std::fs::read(&summary.weights_bin).unwrap();
        assert_eq!(bin.len(), values * 4);
        assert_eq!(bin.len(), summary.bytes);
    }

    #[test]
    fn test_bias_values_follow_model() {
        let config = small_config();
        let device = Default::default();
        let model = EmotionCnn::<TestBackend>::new(&config, &device);
        let weights = extract_weights(&model, &config).unwrap();

        let fc2_bias = tensor_values(model.fc2.bias.as_ref().unwrap().val()).unwrap().1;
        let exported = weights.iter().find(|w| w.name == "dense_1/bias").unwrap();
        assert_eq!(exported.data, fc2_bias);
    }
}
