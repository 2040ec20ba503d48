//! Emotion CNN
//!
//! Three convolutional stages followed by a dense classifier head:
//!
//! ```text
//! [B,1,48,48]
//!   conv 3x3 32 + relu, conv 3x3 64 + relu, maxpool 2, dropout   -> [B,64,24,24]
//!   conv 3x3 128 + relu, maxpool 2, dropout                      -> [B,128,12,12]
//!   conv 3x3 256 + relu, maxpool 2, dropout                      -> [B,256,6,6]
//!   flatten -> dense 512 + relu -> dropout -> dense num_classes
//! ```
//!
//! All convolutions use "same" padding, so only pooling shrinks the feature map.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Number of 2x2 pooling stages
pub const POOL_STAGES: u32 = 3;

#[derive(Config, Debug)]
pub struct EmotionCnnConfig {
    #[config(default = "7")]
    pub num_classes: usize,

    /// Square input side; must be divisible by 8
    #[config(default = "48")]
    pub input_size: usize,

    #[config(default = "1")]
    pub in_channels: usize,

    /// Filters of the first convolution; later stages use 2x, 4x and 8x
    #[config(default = "32")]
    pub base_filters: usize,

    #[config(default = "512")]
    pub dense_units: usize,

    /// Dropout after each pooling stage
    #[config(default = "0.25")]
    pub conv_dropout: f64,

    /// Dropout between the dense layers
    #[config(default = "0.5")]
    pub dense_dropout: f64,
}

impl EmotionCnnConfig {
    /// Side length of the final feature map
    pub fn feature_size(&self) -> usize {
        self.input_size >> POOL_STAGES
    }

    /// Channel counts of the four convolutions
    pub fn conv_filters(&self) -> [usize; 4] {
        let b = self.base_filters;
        [b, b * 2, b * 4, b * 8]
    }

    /// Width of the flattened feature vector
    pub fn flat_features(&self) -> usize {
        let side = self.feature_size();
        self.conv_filters()[3] * side * side
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes < 2 {
            return Err("num_classes must be at least 2".into());
        }
        if self.input_size == 0 || self.input_size % (1 << POOL_STAGES) != 0 {
            return Err(format!(
                "input_size must be a positive multiple of {}",
                1 << POOL_STAGES
            ));
        }
        if self.in_channels == 0 || self.base_filters == 0 || self.dense_units == 0 {
            return Err("channel and unit counts must be positive".into());
        }
        for (name, p) in [("conv_dropout", self.conv_dropout), ("dense_dropout", self.dense_dropout)] {
            if !(0.0..1.0).contains(&p) {
                return Err(format!("{} must be in [0, 1)", name));
            }
        }
        Ok(())
    }
}

#[derive(Module, Debug)]
pub struct EmotionCnn<B: Backend> {
    // Public for weight export
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub conv3: Conv2d<B>,
    pub conv4: Conv2d<B>,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,

    pool: MaxPool2d,
    conv_dropout: Dropout,
    dense_dropout: Dropout,
    activation: Relu,

    num_classes: usize,
}

fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

impl<B: Backend> EmotionCnn<B> {
    pub fn new(config: &EmotionCnnConfig, device: &B::Device) -> Self {
        let [f1, f2, f3, f4] = config.conv_filters();

        Self {
            conv1: conv3x3(config.in_channels, f1, device),
            conv2: conv3x3(f1, f2, device),
            conv3: conv3x3(f2, f3, device),
            conv4: conv3x3(f3, f4, device),
            fc1: LinearConfig::new(config.flat_features(), config.dense_units).init(device),
            fc2: LinearConfig::new(config.dense_units, config.num_classes).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv_dropout: DropoutConfig::new(config.conv_dropout).init(),
            dense_dropout: DropoutConfig::new(config.dense_dropout).init(),
            activation: Relu::new(),
            num_classes: config.num_classes,
        }
    }

    /// Logits of shape `[batch_size, num_classes]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(x));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.conv_dropout.forward(self.pool.forward(x));

        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.conv_dropout.forward(self.pool.forward(x));

        let x = self.activation.forward(self.conv4.forward(x));
        let x = self.conv_dropout.forward(self.pool.forward(x));

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dense_dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;

    type TestBackend = InferenceBackend;

    #[test]
    fn test_default_config() {
        let config = EmotionCnnConfig::new();
        assert_eq!(config.num_classes, 7);
        assert_eq!(config.feature_size(), 6);
        assert_eq!(config.conv_filters(), [32, 64, 128, 256]);
        assert_eq!(config.flat_features(), 9216);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(EmotionCnnConfig::new().with_input_size(50).validate().is_err());
        assert!(EmotionCnnConfig::new().with_num_classes(1).validate().is_err());
        assert!(EmotionCnnConfig::new().with_dense_dropout(1.0).validate().is_err());
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = EmotionCnn::<TestBackend>::new(&EmotionCnnConfig::new(), &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 1, 48, 48], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 7]);
        assert_eq!(model.num_classes(), 7);
    }

    #[test]
    fn test_parameter_count() {
        let device = Default::default();
        let model = EmotionCnn::<TestBackend>::new(&EmotionCnnConfig::new(), &device);
        // 320 + 18_496 + 73_856 + 295_168 + 4_719_104 + 3_591
        assert_eq!(model.num_params(), 5_110_535);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let config = EmotionCnnConfig::new().with_input_size(16).with_base_filters(4).with_dense_units(8);
        let model = EmotionCnn::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::ones([3, 1, 16, 16], &device);
        let probs = model.forward_softmax(input);
        let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert_eq!(sums.len(), 3);
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }
}
