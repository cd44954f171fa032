use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

/// Input image height expected by the network.
pub const IMG_HEIGHT: usize = 64;
/// Input image width expected by the network.
pub const IMG_WIDTH: usize = 200;
/// Number of characters the network predicts per image.
pub const CAPTCHA_LENGTH: usize = 5;

/// Recognition alphabet, index-aligned with the network's class outputs.
/// Mixed case: the target site's input is case-sensitive.
pub const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const NUM_CLASSES: usize = CHARSET.len();
const POOL_WIDTH: usize = 10;

/// Conv + BatchNorm + ReLU + MaxPool stage.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    /// Build a 3x3 conv stage that halves spatial resolution.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            activation: Relu::new(),
            pool,
        }
    }

    /// Forward pass.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = self.bn.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

/// Fixed-length CAPTCHA recognition network.
///
/// A compact VGG-style stack followed by a per-position classification head:
/// the final linear layer emits `CAPTCHA_LENGTH * NUM_CLASSES` logits that
/// are reshaped to one class distribution per character position.
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    fc: Linear<B>,
}

impl<B: Backend> Model<B> {
    /// Initialize the network structure on the given device.
    pub fn new(device: &B::Device) -> Self {
        let block1 = ConvBlock::new(1, 32, device);
        let block2 = ConvBlock::new(32, 64, device);
        let block3 = ConvBlock::new(64, 128, device);

        // Pooling -> [B, 128, 1, POOL_WIDTH]
        let pool = AdaptiveAvgPool2dConfig::new([1, POOL_WIDTH]).init();
        let dropout = DropoutConfig::new(0.3).init();
        let fc = LinearConfig::new(128 * POOL_WIDTH, CAPTCHA_LENGTH * NUM_CLASSES).init(device);

        Self {
            block1,
            block2,
            block3,
            pool,
            dropout,
            fc,
        }
    }

    /// Forward pass: `[B, 1, H, W]` -> `[B, CAPTCHA_LENGTH, NUM_CLASSES]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 3> {
        let batch_size = input.dims()[0];

        let x = self.block1.forward(input);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        let x = self.pool.forward(x);
        let x = x.reshape([batch_size, 128 * POOL_WIDTH]);

        let x = self.dropout.forward(x);
        let x = self.fc.forward(x);

        x.reshape([batch_size, CAPTCHA_LENGTH, NUM_CLASSES])
    }
}

/// Map a class index to its charset character, if in range.
pub fn class_to_char(index: usize) -> Option<char> {
    CHARSET.get(index).map(|b| *b as char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_has_distinct_mixed_case_entries() {
        assert_eq!(NUM_CLASSES, 62);
        assert_eq!(class_to_char(0), Some('0'));
        assert_eq!(class_to_char(10), Some('A'));
        assert_eq!(class_to_char(36), Some('a'));
        assert_eq!(class_to_char(NUM_CLASSES), None);
    }
}
