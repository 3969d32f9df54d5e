use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

/// 出力射影: logits = b + R·h
#[derive(Module, Debug)]
pub struct OutputProjection<B: Backend> {
    linear: Linear<B>,
    hidden_dim: usize,
    vocab_size: usize,
}

impl<B: Backend> OutputProjection<B> {
    pub fn new(hidden_dim: usize, vocab_size: usize, device: &B::Device) -> Self {
        let linear = LinearConfig::new(hidden_dim, vocab_size).init(device);

        Self {
            linear,
            hidden_dim,
            vocab_size,
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// [.., hidden_dim] → [.., vocab_size]
    pub fn project<const D: usize>(&self, hidden: Tensor<B, D>) -> Tensor<B, D> {
        self.linear.forward(hidden)
    }

    /// 重みの形状 [hidden_dim, vocab_size]（burnは R の転置で保持）
    pub fn weight_dims(&self) -> [usize; 2] {
        self.linear.weight.val().dims()
    }

    pub fn bias_dims(&self) -> Option<[usize; 1]> {
        self.linear.bias.as_ref().map(|bias| bias.val().dims())
    }

    /// 重みとバイアスを差し替える（テストや外部重みの読み込み用）
    pub fn with_parameters(mut self, weight: Tensor<B, 2>, bias: Tensor<B, 1>) -> Self {
        self.linear.weight = burn::module::Param::from_tensor(weight);
        self.linear.bias = Some(burn::module::Param::from_tensor(bias));
        self
    }
}
