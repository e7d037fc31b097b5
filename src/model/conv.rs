use burn::{
    config::Config,
    module::{Ignored, Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::activation::Activation;
use crate::ModelError;

/// A Conv2d -> BatchNorm -> activation block.
///
/// Normalization and activation are both optional, which lets the same block
/// serve as a stem, as the inner layers of a residual block and as a 1x1
/// projection shortcut.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
    activation: Ignored<Option<Activation>>,
    stride: usize,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.bn {
            Some(bn) => bn.forward(x),
            None => x,
        };

        match self.activation.0 {
            Some(activation) => activation.forward(x),
            None => x,
        }
    }

    /// Number of output channels.
    pub fn filters(&self) -> usize {
        let [filters, _, _, _] = self.conv.weight.dims();
        filters
    }

    pub fn kernel_size(&self) -> usize {
        let [_, _, kernel_size, _] = self.conv.weight.dims();
        kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn activation(&self) -> Option<Activation> {
        self.activation.0
    }

    pub fn has_batch_norm(&self) -> bool {
        self.bn.is_some()
    }
}

/// [Convolution block](ConvBlock) configuration.
#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of convolution filters (output channels).
    #[config(default = 64)]
    pub filters: usize,

    /// Square kernel size. Must be odd for same padding.
    #[config(default = 3)]
    pub kernel_size: usize,

    #[config(default = 1)]
    pub stride: usize,

    #[config(default = "Some(Activation::Relu)")]
    pub activation: Option<Activation>,

    #[config(default = true)]
    pub batch_norm: bool,

    #[config(default = true)]
    pub bias: bool,
}

impl ConvBlockConfig {
    /// Check that the hyperparameters describe a valid same-padded convolution.
    pub fn validate(&self) -> crate::Result<()> {
        if self.filters == 0 {
            return Err(ModelError::ZeroFilters);
        }
        if self.stride == 0 {
            return Err(ModelError::ZeroStride);
        }
        if self.kernel_size % 2 == 0 {
            return Err(ModelError::EvenKernel(self.kernel_size));
        }
        Ok(())
    }

    /// Spatial size of the output for an input of size `input_size`.
    ///
    /// Same padding keeps `ceil(input_size / stride)`.
    pub fn output_size(&self, input_size: usize) -> usize {
        input_size.div_ceil(self.stride)
    }

    /// Initialize a new [convolution block](ConvBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> crate::Result<ConvBlock<B>> {
        self.validate()?;

        // Same padding
        let pad = (self.kernel_size - 1) / 2;

        let mut conv = Conv2dConfig::new(
            [self.in_channels, self.filters],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(self.bias)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device);
        conv.bias = conv.bias.map(zero_bias);

        let bn = self.batch_norm.then(|| {
            BatchNormConfig::new(self.filters)
                .with_epsilon(1e-3)
                .with_momentum(0.01)
                .init(device)
        });

        Ok(ConvBlock {
            conv,
            bn,
            activation: Ignored(self.activation),
            stride: self.stride,
        })
    }
}

/// Replace an initialized bias with zeros of the same shape.
pub(crate) fn zero_bias<B: Backend>(bias: Param<Tensor<B, 1>>) -> Param<Tensor<B, 1>> {
    Param::from_tensor(bias.val().zeros_like())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn defaults() {
        let config = ConvBlockConfig::new(3);

        assert_eq!(config.filters, 64);
        assert_eq!(config.kernel_size, 3);
        assert_eq!(config.stride, 1);
        assert_eq!(config.activation, Some(Activation::Relu));
        assert!(config.batch_norm);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ConvBlockConfig::new(3)
            .with_kernel_size(1)
            .with_stride(2)
            .with_activation(None);
        let json = config.to_string();

        let loaded = ConvBlockConfig::load_binary(json.as_bytes()).unwrap();

        assert_eq!(loaded.in_channels, 3);
        assert_eq!(loaded.kernel_size, 1);
        assert_eq!(loaded.stride, 2);
        assert_eq!(loaded.activation, None);
        assert!(loaded.bias);
    }

    #[test]
    fn bias_starts_at_zero() {
        let device = Default::default();
        let block = ConvBlockConfig::new(3)
            .with_filters(8)
            .init::<TestBackend>(&device)
            .unwrap();

        let bias = block.conv.bias.as_ref().map(|bias| bias.val()).unwrap();
        assert_eq!(bias.dims(), [8]);
        let total: f32 = bias.abs().sum().into_scalar();
        assert_eq!(total, 0.0);

        let weight: f32 = block.conv.weight.val().abs().sum().into_scalar();
        assert!(weight > 0.0);
    }

    #[test]
    fn same_padding_keeps_spatial_size() {
        let device = Default::default();
        let block = ConvBlockConfig::new(3)
            .with_filters(8)
            .with_kernel_size(7)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::<TestBackend, 4>::random([2, 3, 15, 15], Distribution::Default, &device);
        let out = block.forward(x);

        assert_eq!(out.dims(), [2, 8, 15, 15]);
    }

    #[test]
    fn stride_two_halves_rounding_up() {
        let device = Default::default();
        let config = ConvBlockConfig::new(4).with_filters(6).with_stride(2);
        let block = config.init::<TestBackend>(&device).unwrap();

        let x = Tensor::<TestBackend, 4>::random([1, 4, 9, 10], Distribution::Default, &device);
        let out = block.forward(x);

        assert_eq!(out.dims(), [1, 6, 5, 5]);
        assert_eq!(config.output_size(9), 5);
        assert_eq!(block.stride(), 2);
    }

    #[test]
    fn projection_block_is_linear() {
        let device = Default::default();
        let block = ConvBlockConfig::new(4)
            .with_filters(8)
            .with_kernel_size(1)
            .with_stride(2)
            .with_activation(None)
            .init::<TestBackend>(&device)
            .unwrap();

        assert_eq!(block.kernel_size(), 1);
        assert_eq!(block.filters(), 8);
        assert_eq!(block.activation(), None);
        assert!(block.has_batch_norm());

        // Without an activation some outputs stay negative
        let x = Tensor::<TestBackend, 4>::random([2, 4, 6, 6], Distribution::Default, &device);
        let min: f32 = block.forward(x).min().into_scalar();
        assert!(min < 0.0);
    }

    #[test]
    fn relu_output_is_non_negative() {
        let device = Default::default();
        let block = ConvBlockConfig::new(2)
            .with_filters(4)
            .with_batch_norm(false)
            .init::<TestBackend>(&device)
            .unwrap();

        assert!(!block.has_batch_norm());

        let x = Tensor::<TestBackend, 4>::random([1, 2, 5, 5], Distribution::Default, &device);
        let min: f32 = block.forward(x).min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn rejects_invalid_hyperparameters() {
        let device = Default::default();

        let err = ConvBlockConfig::new(3)
            .with_kernel_size(4)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert_eq!(err, ModelError::EvenKernel(4));

        let err = ConvBlockConfig::new(3).with_stride(0).validate().unwrap_err();
        assert_eq!(err, ModelError::ZeroStride);

        let err = ConvBlockConfig::new(3).with_filters(0).validate().unwrap_err();
        assert_eq!(err, ModelError::ZeroFilters);
    }
}
