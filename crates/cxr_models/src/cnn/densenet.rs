//! DenseNet architecture for chest X-ray classification.
//!
//! Follows the torchvision DenseNet layout so that the output of the last
//! convolutional block (after the final BatchNorm) is addressable on its own.
//! The classification head is kept separate from the feature extractor: the
//! explainer instruments the boundary between the two.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

/// Configuration for the DenseNet classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseNetConfig {
    /// Number of output classes (width of the classification head).
    pub n_classes: usize,
    /// Channels added by each dense layer.
    pub growth_rate: usize,
    /// Number of dense layers in each block.
    pub block_config: Vec<usize>,
    /// Channels produced by the stem convolution.
    pub num_init_features: usize,
    /// Bottleneck width multiplier for the 1x1 convolution in each layer.
    pub bn_size: usize,
}

impl Default for DenseNetConfig {
    fn default() -> Self {
        Self::densenet121(5)
    }
}

impl DenseNetConfig {
    /// DenseNet-121 with a head of `n_classes` outputs.
    pub fn densenet121(n_classes: usize) -> Self {
        Self {
            n_classes,
            growth_rate: 32,
            block_config: vec![6, 12, 24, 16],
            num_init_features: 64,
            bn_size: 4,
        }
    }

    /// A very small DenseNet, for smoke tests and benchmarks.
    pub fn tiny(n_classes: usize) -> Self {
        Self {
            n_classes,
            growth_rate: 4,
            block_config: vec![2, 2],
            num_init_features: 8,
            bn_size: 2,
        }
    }

    /// Set the number of classes.
    #[must_use]
    pub fn with_n_classes(mut self, n_classes: usize) -> Self {
        self.n_classes = n_classes;
        self
    }

    /// Channels of the last convolutional block's output.
    pub fn feature_channels(&self) -> usize {
        let mut channels = self.num_init_features;
        for (i, &n_layers) in self.block_config.iter().enumerate() {
            channels += n_layers * self.growth_rate;
            if i + 1 != self.block_config.len() {
                channels /= 2;
            }
        }
        channels
    }

    /// Architecture name recorded in checkpoint metadata.
    pub fn arch_name(&self) -> String {
        let blocks: Vec<String> = self.block_config.iter().map(ToString::to_string).collect();
        format!(
            "densenet-g{}-b{}-i{}",
            self.growth_rate,
            blocks.join("."),
            self.num_init_features
        )
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> XrayDenseNet<B> {
        XrayDenseNet::new(self, device)
    }
}

/// BN-ReLU-Conv1x1-BN-ReLU-Conv3x3 layer producing `growth_rate` new channels.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
}

impl<B: Backend> DenseLayer<B> {
    /// Create a new dense layer.
    pub fn new(in_channels: usize, growth_rate: usize, bn_size: usize, device: &B::Device) -> Self {
        let bottleneck = bn_size * growth_rate;

        let norm1 = BatchNormConfig::new(in_channels).init(device);
        let conv1 = Conv2dConfig::new([in_channels, bottleneck], [1, 1])
            .with_bias(false)
            .init(device);
        let norm2 = BatchNormConfig::new(bottleneck).init(device);
        let conv2 = Conv2dConfig::new([bottleneck, growth_rate], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        Self {
            norm1,
            conv1,
            norm2,
            conv2,
        }
    }

    /// Forward pass, returning only the new feature maps.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let relu = Relu::new();

        let out = self.norm1.forward(x);
        let out = relu.forward(out);
        let out = self.conv1.forward(out);

        let out = self.norm2.forward(out);
        let out = relu.forward(out);
        self.conv2.forward(out)
    }
}

/// Stack of dense layers whose outputs are concatenated along channels.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    /// Create a new dense block.
    pub fn new(
        n_layers: usize,
        in_channels: usize,
        growth_rate: usize,
        bn_size: usize,
        device: &B::Device,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|i| DenseLayer::new(in_channels + i * growth_rate, growth_rate, bn_size, device))
            .collect();
        Self { layers }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut features = x;
        for layer in &self.layers {
            let new_features = layer.forward(features.clone());
            features = Tensor::cat(vec![features, new_features], 1);
        }
        features
    }
}

/// BN-ReLU-Conv1x1-AvgPool2x2 between dense blocks, halving channels.
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> Transition<B> {
    /// Create a new transition layer.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_channels).init(device),
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.norm.forward(x);
        let out = Relu::new().forward(out);
        let out = self.conv.forward(out);
        self.pool.forward(out)
    }
}

/// Convolutional feature extractor: stem, dense blocks, transitions, final norm.
#[derive(Module, Debug)]
pub struct DenseNetFeatures<B: Backend> {
    conv0: Conv2d<B>,
    norm0: BatchNorm<B, 2>,
    pool0: MaxPool2d,
    blocks: Vec<DenseBlock<B>>,
    transitions: Vec<Transition<B>>,
    norm5: BatchNorm<B, 2>,
}

impl<B: Backend> DenseNetFeatures<B> {
    /// Create the feature extractor.
    pub fn new(config: &DenseNetConfig, device: &B::Device) -> Self {
        let conv0 = Conv2dConfig::new([3, config.num_init_features], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let norm0 = BatchNormConfig::new(config.num_init_features).init(device);
        let pool0 = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::with_capacity(config.block_config.len());
        let mut transitions = Vec::new();
        let mut channels = config.num_init_features;

        for (i, &n_layers) in config.block_config.iter().enumerate() {
            blocks.push(DenseBlock::new(
                n_layers,
                channels,
                config.growth_rate,
                config.bn_size,
                device,
            ));
            channels += n_layers * config.growth_rate;

            if i + 1 != config.block_config.len() {
                transitions.push(Transition::new(channels, channels / 2, device));
                channels /= 2;
            }
        }

        let norm5 = BatchNormConfig::new(channels).init(device);

        Self {
            conv0,
            norm0,
            pool0,
            blocks,
            transitions,
            norm5,
        }
    }

    /// Forward pass to the output of the last convolutional block.
    ///
    /// Input `(batch, 3, H, W)`, output `(batch, C, H/32, W/32)` for four blocks.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv0.forward(x);
        let out = self.norm0.forward(out);
        let out = Relu::new().forward(out);
        let mut out = self.pool0.forward(out);

        for (i, block) in self.blocks.iter().enumerate() {
            out = block.forward(out);
            if let Some(transition) = self.transitions.get(i) {
                out = transition.forward(out);
            }
        }

        self.norm5.forward(out)
    }
}

/// ReLU, global average pool and a linear layer with one output per class.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    /// Final linear layer, weight shape `(channels, n_classes)`.
    pub fc: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Create a new head.
    pub fn new(in_features: usize, n_classes: usize, device: &B::Device) -> Self {
        Self {
            fc: LinearConfig::new(in_features, n_classes).init(device),
        }
    }

    /// Number of outputs.
    pub fn n_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// Number of input channels.
    pub fn in_features(&self) -> usize {
        self.fc.weight.dims()[0]
    }

    /// Forward pass returning logits.
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(global_pool(features))
    }

    /// Forward pass on the autodiff backend, so gradients flow back into
    /// `features`. The head's own parameters are used as constants.
    pub fn forward_tracked<AD>(&self, features: Tensor<AD, 4>) -> Tensor<AD, 2>
    where
        AD: AutodiffBackend<InnerBackend = B>,
    {
        let pooled = global_pool(features);
        let weight = Tensor::<AD, 2>::from_inner(self.fc.weight.val());
        let logits = pooled.matmul(weight);

        match &self.fc.bias {
            Some(bias) => logits + Tensor::<AD, 1>::from_inner(bias.val()).unsqueeze::<2>(),
            None => logits,
        }
    }
}

/// `(batch, C, H, W)` -> `(batch, C)`: ReLU then spatial mean.
fn global_pool<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, _, _] = features.dims();
    relu(features)
        .mean_dim(3)
        .mean_dim(2)
        .reshape([batch, channels])
}

/// DenseNet chest X-ray classifier.
#[derive(Module, Debug)]
pub struct XrayDenseNet<B: Backend> {
    /// Convolutional feature extractor.
    pub features: DenseNetFeatures<B>,
    /// Classification head.
    pub head: ClassifierHead<B>,
}

impl<B: Backend> XrayDenseNet<B> {
    /// Create a new model.
    pub fn new(config: &DenseNetConfig, device: &B::Device) -> Self {
        Self {
            features: DenseNetFeatures::new(config, device),
            head: ClassifierHead::new(config.feature_channels(), config.n_classes, device),
        }
    }

    /// Forward pass returning logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.features.forward(x))
    }

    /// Forward pass returning independent per-class sigmoid scores.
    pub fn forward_probs(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(x))
    }
}
