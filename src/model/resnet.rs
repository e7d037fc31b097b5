use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Initializer, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::softmax, backend::Backend, Device, Int, Tensor},
};
use serde::{Deserialize, Serialize};

use super::{
    block::{LayerBlock, LayerBlockConfig},
    conv::{zero_bias, ConvBlock, ConvBlockConfig},
};
use crate::ModelError;

/// Residual blocks per stage.
const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// Filters of the stem and the first stage, doubled at every following stage.
const BASE_FILTERS: usize = 64;

/// Shape of a single input image, channels last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.height == 0 || self.width == 0 || self.channels == 0 {
            return Err(ModelError::EmptyInputShape {
                height: self.height,
                width: self.width,
                channels: self.channels,
            });
        }
        Ok(())
    }
}

/// ResNet-34 from [`Deep Residual Learning for Image Recognition`](https://arxiv.org/abs/1512.03385),
/// with a stride 1 stem and a softmax classification head.
#[derive(Module, Debug)]
pub struct ResNet34<B: Backend> {
    stem: ConvBlock<B>,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
    layer4: LayerBlock<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    input_height: usize,
    input_width: usize,
}

impl<B: Backend> ResNet34<B> {
    /// Class probabilities for a batch of images of shape `[B, C, H, W]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(input), 1)
    }

    /// Unnormalized class scores, the input of the final softmax.
    pub fn forward_logits(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let [_, _, height, width] = input.dims();
        debug_assert_eq!(
            [height, width],
            [self.input_height, self.input_width],
            "input spatial size differs from the configured input shape"
        );

        // Stem
        let out = self.stem.forward(input);
        let out = self.maxpool.forward(out);

        // Residual blocks
        let out = self.layer1.forward(out);
        let out = self.layer2.forward(out);
        let out = self.layer3.forward(out);
        let out = self.layer4.forward(out);

        let out = self.avgpool.forward(out);
        // Reshape [B, C, 1, 1] -> [B, C]
        let out = out.flatten(1, 3);

        self.fc.forward(out)
    }

    /// Same as [forward](Self::forward) for images laid out as `[B, H, W, C]`.
    pub fn forward_channels_last(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(input.permute([0, 3, 1, 2]))
    }

    /// Most probable class index for each image in the batch.
    pub fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 1, Int> {
        self.forward_logits(input).argmax(1).flatten(0, 1)
    }

    pub fn num_classes(&self) -> usize {
        let [_d_input, d_output] = self.fc.weight.dims();
        d_output
    }

    /// Output shape for a batch of `batch_size` images.
    pub fn output_shape(&self, batch_size: usize) -> [usize; 2] {
        [batch_size, self.num_classes()]
    }

    /// Spatial size `[H, W]` of the last feature map for the configured input shape,
    /// before global pooling.
    pub fn feature_map_size(&self) -> [usize; 2] {
        let factor = 1 << self.num_downsamples();
        [
            self.input_height.div_ceil(factor),
            self.input_width.div_ceil(factor),
        ]
    }

    pub fn stages(&self) -> [&LayerBlock<B>; 4] {
        [&self.layer1, &self.layer2, &self.layer3, &self.layer4]
    }

    pub fn stage_filters(&self) -> [usize; 4] {
        self.stages().map(LayerBlock::filters)
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.stages().iter().map(|stage| stage.blocks().len()).sum()
    }

    /// Convolution blocks stacked along the main path: the stem and two per
    /// residual block. Projection shortcuts are not counted.
    pub fn num_conv_blocks(&self) -> usize {
        1 + 2 * self.num_residual_blocks()
    }

    /// Number of residual blocks whose shortcut is a 1x1 projection.
    pub fn num_projections(&self) -> usize {
        self.stages()
            .iter()
            .flat_map(|stage| stage.blocks())
            .filter(|block| block.has_projection())
            .count()
    }

    /// Number of stride 2 operations along the main path, max pooling included.
    pub fn num_downsamples(&self) -> usize {
        let stem = usize::from(self.stem.stride() > 1);
        let stages = self
            .stages()
            .iter()
            .filter(|stage| stage.stride() > 1)
            .count();

        // Max pooling always halves the resolution
        stem + 1 + stages
    }

    /// Re-initialize the last layer with the specified number of output classes.
    pub fn with_classes(mut self, num_classes: usize) -> crate::Result<Self> {
        if num_classes == 0 {
            return Err(ModelError::ZeroClasses);
        }
        let [d_input, _d_output] = self.fc.weight.dims();
        self.fc = classifier(d_input, num_classes, &self.fc.weight.device());
        Ok(self)
    }
}

/// Build the residual stage at `index` (0-based) of the network.
fn stage<B: Backend>(
    index: usize,
    in_channels: usize,
    device: &Device<B>,
) -> crate::Result<LayerBlock<B>> {
    let num_blocks = RESNET34_BLOCKS[index];
    let out_channels = BASE_FILTERS << index;
    let stride = if index == 0 { 1 } else { 2 };
    tracing::debug!(index, num_blocks, out_channels, stride, "building stage");

    LayerBlockConfig::new(num_blocks, in_channels, out_channels, stride).init(device)
}

fn classifier<B: Backend>(
    d_input: usize,
    num_classes: usize,
    device: &Device<B>,
) -> Linear<B> {
    let mut fc = LinearConfig::new(d_input, num_classes)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device);
    fc.bias = fc.bias.map(zero_bias);
    fc
}

/// [ResNet-34](ResNet34) configuration.
#[derive(Config, Debug)]
pub struct ResNet34Config {
    /// Shape of a single input image.
    pub input_shape: InputShape,
    /// Number of output classes.
    pub num_classes: usize,
}

impl ResNet34Config {
    /// Initialize a new [ResNet-34](ResNet34) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> crate::Result<ResNet34<B>> {
        self.input_shape.validate()?;
        if self.num_classes == 0 {
            return Err(ModelError::ZeroClasses);
        }

        // 7x7 conv, 64
        let stem = ConvBlockConfig::new(self.input_shape.channels)
            .with_filters(BASE_FILTERS)
            .with_kernel_size(7)
            .init(device)?;

        // 3x3 maxpool, /2
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // Residual blocks, filters double and resolution halves after the first stage
        let layer1 = stage(0, BASE_FILTERS, device)?;
        let layer2 = stage(1, layer1.filters(), device)?;
        let layer3 = stage(2, layer2.filters(), device)?;
        let layer4 = stage(3, layer3.filters(), device)?;

        // Average pooling [B, 512, H, W] -> [B, 512, 1, 1]
        let avgpool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        // Output layer
        let fc = classifier(layer4.filters(), self.num_classes, device);

        let model = ResNet34 {
            stem,
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool,
            fc,
            input_height: self.input_shape.height,
            input_width: self.input_shape.width,
        };

        tracing::info!(
            num_classes = self.num_classes,
            height = self.input_shape.height,
            width = self.input_shape.width,
            channels = self.input_shape.channels,
            feature_map = ?model.feature_map_size(),
            "initialized ResNet-34"
        );

        Ok(model)
    }
}
