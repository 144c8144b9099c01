use burn::{
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    prelude::*,
};

use crate::{
    module::{
        classifier::{Classifier, ClassifierConfig},
        conv_block::{ConvBlock, ConvBlockConfig},
    },
    transform::CHANNEL_COUNT,
};

/// Plain stacked-convolution breed classifier.
///
/// Each block doubles the channel count and halves the spatial size; global
/// average pooling makes the head independent of the input resolution.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    avg_pool: AdaptiveAvgPool2d,
    classifier: Classifier<B>,
}

impl<B: Backend> ConvNet<B> {
    /// `[batch, 3, h, w]` images to `[batch, classes]` logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(images, |x, block| block.forward(x));

        let x = self.avg_pool.forward(x);
        let x = x.flatten(1, 3);

        self.classifier.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvNetConfig {
    pub classes: usize,

    #[config(default = 2)]
    pub layers: usize,

    #[config(default = 256)]
    pub base_channels: usize,

    #[config(default = 512)]
    pub hidden: usize,

    #[config(default = 0.5)]
    pub dropout: f64,
}

impl ConvNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        let mut channels = CHANNEL_COUNT;
        let mut blocks = Vec::with_capacity(self.layers);

        for layer in 0..self.layers {
            let out = self.base_channels << layer;
            blocks.push(ConvBlockConfig::new([channels, out]).init(device));
            channels = out;
        }

        ConvNet {
            blocks,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: ClassifierConfig::new(channels, self.hidden, self.classes)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}
