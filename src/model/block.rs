use alloc::vec::Vec;

use burn::{
    module::Module,
    nn::Relu,
    tensor::{backend::Backend, Device, Tensor},
};

use super::conv::{ConvBlock, ConvBlockConfig};
use crate::Result;

/// ResNet basic residual block implementation.
///
/// Two stacked 3x3 convolution blocks whose output is added to the block
/// input (or its 1x1 projection when the shape changes), followed by ReLU.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    shortcut: Option<ConvBlock<B>>,
    relu: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        // Conv block, activation of the second conv is deferred to after the merge
        let out = self.conv1.forward(input);
        let out = self.conv2.forward(out);

        // Skip connection
        let out = match &self.shortcut {
            Some(shortcut) => out + shortcut.forward(identity),
            None => out + identity,
        };

        self.relu.forward(out)
    }

    /// Whether the skip connection goes through a 1x1 projection.
    pub fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }

    pub fn stride(&self) -> usize {
        self.conv1.stride()
    }

    pub fn filters(&self) -> usize {
        self.conv2.filters()
    }
}

/// [Residual block](ResidualBlock) configuration.
pub struct ResidualBlockConfig {
    conv1: ConvBlockConfig,
    conv2: ConvBlockConfig,
    shortcut: Option<ConvBlockConfig>,
}

impl ResidualBlockConfig {
    /// Create a new instance of the residual block [config](ResidualBlockConfig).
    pub fn new(in_channels: usize, out_channels: usize, stride: usize) -> Self {
        // conv3x3
        let conv1 = ConvBlockConfig::new(in_channels)
            .with_filters(out_channels)
            .with_stride(stride);
        // conv3x3, no activation
        let conv2 = ConvBlockConfig::new(out_channels)
            .with_filters(out_channels)
            .with_activation(None);

        // conv1x1 to match the residual path when it changes resolution or width
        let shortcut = (stride != 1 || in_channels != out_channels).then(|| {
            ConvBlockConfig::new(in_channels)
                .with_filters(out_channels)
                .with_kernel_size(1)
                .with_stride(stride)
                .with_activation(None)
        });

        Self {
            conv1,
            conv2,
            shortcut,
        }
    }

    /// Initialize a new [residual block](ResidualBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<ResidualBlock<B>> {
        let shortcut = match &self.shortcut {
            Some(config) => Some(config.init(device)?),
            None => None,
        };

        Ok(ResidualBlock {
            conv1: self.conv1.init(device)?,
            conv2: self.conv2.init(device)?,
            shortcut,
            relu: Relu::new(),
        })
    }
}

/// Collection of sequential residual blocks sharing a filter count.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = input;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    pub fn blocks(&self) -> &[ResidualBlock<B>] {
        &self.blocks
    }

    /// Stride of the stage, carried by its first block.
    pub fn stride(&self) -> usize {
        self.blocks.first().map_or(1, ResidualBlock::stride)
    }

    pub fn filters(&self) -> usize {
        self.blocks.last().map_or(0, ResidualBlock::filters)
    }
}

/// [Layer block](LayerBlock) configuration.
pub struct LayerBlockConfig {
    num_blocks: usize,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
}

impl LayerBlockConfig {
    /// Create a new instance of the layer block [config](LayerBlockConfig).
    pub fn new(num_blocks: usize, in_channels: usize, out_channels: usize, stride: usize) -> Self {
        Self {
            num_blocks,
            in_channels,
            out_channels,
            stride,
        }
    }

    /// Initialize a new [layer block](LayerBlock) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Result<LayerBlock<B>> {
        let blocks = (0..self.num_blocks)
            .map(|b| {
                if b == 0 {
                    // First block uses the specified stride
                    ResidualBlockConfig::new(self.in_channels, self.out_channels, self.stride)
                } else {
                    // Other blocks use a stride of 1
                    ResidualBlockConfig::new(self.out_channels, self.out_channels, 1)
                }
            })
            .map(|config| config.init(device))
            .collect::<Result<Vec<_>>>()?;

        Ok(LayerBlock { blocks })
    }
}
