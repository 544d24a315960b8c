use crate::config::{GridConfig, NetworkConfig};
use crate::error::{HybridError, HybridResult};
use crate::field::FIELD_CHANNELS;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{Initializer, PaddingConfig2d, Relu};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// ネットワークの入力チャネル数（正規化した場 4 チャネル + 励起条件 1 チャネル）。
pub const INPUT_CHANNELS: usize = FIELD_CHANNELS + 1;

/// 3x3 畳み込み 2 層と ReLU からなるブロック。
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    fn new(channels_in: usize, channels_out: usize, device: &B::Device) -> Self {
        let conv = |c_in: usize| {
            Conv2dConfig::new([c_in, channels_out], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        Self {
            conv1: conv(channels_in),
            conv2: conv(channels_out),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv1.forward(x));
        self.activation.forward(self.conv2.forward(x))
    }
}

/// 物理ステップの出力に足し込む補正量を予測する U-Net。
///
/// 入力は `[batch, 5, H, W]`（正規化済みの T, Yf, ux, uy と励起条件）、
/// 出力は `[batch, 4, H, W]` の正規化された補正量です。出力層に活性化関数はありません。
#[derive(Module, Debug)]
pub struct CorrectionNetwork<B: Backend> {
    encoders: Vec<ConvBlock<B>>,
    pool: AvgPool2d,
    bottleneck: ConvBlock<B>,
    /// 深い段から順に並ぶ
    upsamplers: Vec<ConvTranspose2d<B>>,
    /// 深い段から順に並ぶ
    decoders: Vec<ConvBlock<B>>,
    pub(crate) head: Conv2d<B>,
    height: usize,
    width: usize,
}

impl<B: Backend> CorrectionNetwork<B> {
    /// 新しいネットワークを初期化します。`grid` 以外の解像度の入力は受け付けません。
    pub fn new(config: &NetworkConfig, grid: &GridConfig, device: &B::Device) -> Self {
        let channels = |level: usize| config.base_channels << level;

        let mut encoders = Vec::with_capacity(config.depth);
        let mut c_in = INPUT_CHANNELS;
        for level in 0..config.depth {
            encoders.push(ConvBlock::new(c_in, channels(level), device));
            c_in = channels(level);
        }
        let bottleneck = ConvBlock::new(c_in, channels(config.depth), device);

        let mut upsamplers = Vec::with_capacity(config.depth);
        let mut decoders = Vec::with_capacity(config.depth);
        for level in (0..config.depth).rev() {
            upsamplers.push(
                ConvTranspose2dConfig::new([channels(level + 1), channels(level)], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            decoders.push(ConvBlock::new(2 * channels(level), channels(level), device));
        }

        let mut head = Conv2dConfig::new([channels(0), FIELD_CHANNELS], [1, 1]);
        if config.zero_init_head {
            head = head.with_initializer(Initializer::Zeros);
        }

        Self {
            encoders,
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            upsamplers,
            decoders,
            head: head.init(device),
            height: grid.height,
            width: grid.width,
        }
    }

    /// 構築時のグリッド `[H, W]`。
    pub fn grid(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// 順伝播。入力のチャネル数やグリッドが構築時と異なる場合はエラーを返します。
    pub fn forward(&self, input: Tensor<B, 4>) -> HybridResult<Tensor<B, 4>> {
        let [batch, channels, h, w] = input.dims();
        let expected = [batch, INPUT_CHANNELS, self.height, self.width];
        if [batch, channels, h, w] != expected {
            return Err(HybridError::shape_mismatch(expected, [batch, channels, h, w]));
        }

        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = input;
        for encoder in &self.encoders {
            x = encoder.forward(x);
            skips.push(x.clone());
            x = self.pool.forward(x);
        }
        x = self.bottleneck.forward(x);

        for ((upsample, decoder), skip) in self
            .upsamplers
            .iter()
            .zip(&self.decoders)
            .zip(skips.into_iter().rev())
        {
            x = upsample.forward(x);
            x = decoder.forward(Tensor::cat(vec![x, skip], 1));
        }
        Ok(self.head.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::tensor_to_vec;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn grid(h: usize, w: usize) -> GridConfig {
        GridConfig { height: h, width: w }
    }

    #[test]
    fn output_matches_field_shape() {
        let device = Default::default();
        let config = NetworkConfig {
            base_channels: 4,
            depth: 2,
            zero_init_head: false,
        };
        let model = CorrectionNetwork::<TestBackend>::new(&config, &grid(8, 16), &device);
        let input = Tensor::<TestBackend, 4>::random([3, INPUT_CHANNELS, 8, 16], Distribution::Normal(0.0, 1.0), &device);
        let output = model.forward(input).unwrap();
        assert_eq!(output.dims(), [3, FIELD_CHANNELS, 8, 16]);
    }

    #[test]
    fn wrong_grid_is_rejected() {
        let device = Default::default();
        let model = CorrectionNetwork::<TestBackend>::new(&NetworkConfig::default(), &grid(8, 8), &device);
        let input = Tensor::<TestBackend, 4>::zeros([1, INPUT_CHANNELS, 16, 16], &device);
        let err = model.forward(input).unwrap_err();
        assert!(matches!(err, HybridError::ShapeMismatch { .. }));

        let input = Tensor::<TestBackend, 4>::zeros([1, FIELD_CHANNELS, 8, 8], &device);
        assert!(model.forward(input).is_err());
    }

    #[test]
    fn zero_initialized_head_outputs_zero() {
        let device = Default::default();
        let config = NetworkConfig {
            base_channels: 4,
            depth: 1,
            zero_init_head: true,
        };
        let model = CorrectionNetwork::<TestBackend>::new(&config, &grid(8, 8), &device);
        let input = Tensor::<TestBackend, 4>::random([2, INPUT_CHANNELS, 8, 8], Distribution::Normal(0.0, 1.0), &device);
        let output = tensor_to_vec(&model.forward(input).unwrap()).unwrap();
        assert!(output.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn parameter_count_grows_with_depth() {
        let device = Default::default();
        let shallow = CorrectionNetwork::<TestBackend>::new(
            &NetworkConfig { base_channels: 4, depth: 1, zero_init_head: false },
            &grid(8, 8),
            &device,
        );
        let deep = CorrectionNetwork::<TestBackend>::new(
            &NetworkConfig { base_channels: 4, depth: 2, zero_init_head: false },
            &grid(8, 8),
            &device,
        );
        assert!(deep.num_params() > shallow.num_params());
    }
}
