use crate::error::{LmError, Result};
use burn::nn::{Lstm, LstmConfig, LstmState};
use burn::prelude::*;
use burn::tensor::TensorData;
use rand::Rng;

/// ドロップアウト率。セルには保持せず、1回の変換ごとに渡す。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropouts {
    /// 各層の入力に掛ける率
    pub input: f64,
    /// 前時刻の隠れ状態に掛ける率
    pub recurrent: f64,
}

impl Dropouts {
    /// 推論・サンプリング用
    pub const DISABLED: Self = Self {
        input: 0.0,
        recurrent: 0.0,
    };

    pub fn new(input: f64, recurrent: f64) -> Self {
        Self { input, recurrent }
    }

    pub fn is_disabled(&self) -> bool {
        self.input == 0.0 && self.recurrent == 0.0
    }

    pub fn validate(&self) -> Result<()> {
        for (name, p) in [("input", self.input), ("recurrent", self.recurrent)] {
            if !(0.0..1.0).contains(&p) {
                return Err(LmError::Config(format!(
                    "{} dropout は [0, 1) の範囲で指定してください: {}",
                    name, p
                )));
            }
        }
        Ok(())
    }
}

/// 1回の変換の間だけ使う変分ドロップアウトのマスク（層ごと、[batch, dim]）
///
/// 時刻をまたいで同じマスクを使う。残った要素は 1/(1-p) 倍される。
#[derive(Debug, Clone)]
pub struct DropoutMasks<B: Backend> {
    input: Vec<Option<Tensor<B, 2>>>,
    recurrent: Vec<Option<Tensor<B, 2>>>,
}

impl<B: Backend> DropoutMasks<B> {
    pub fn disabled() -> Self {
        Self {
            input: Vec::new(),
            recurrent: Vec::new(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.input.iter().chain(&self.recurrent).all(Option::is_none)
    }

    fn input(&self, layer: usize) -> Option<&Tensor<B, 2>> {
        self.input.get(layer).and_then(Option::as_ref)
    }

    fn recurrent(&self, layer: usize) -> Option<&Tensor<B, 2>> {
        self.recurrent.get(layer).and_then(Option::as_ref)
    }
}

fn bernoulli_mask<B: Backend, R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    p: f64,
    rng: &mut R,
    device: &B::Device,
) -> Option<Tensor<B, 2>> {
    if p <= 0.0 {
        return None;
    }

    let scale = (1.0 / (1.0 - p)) as f32;
    let values: Vec<f32> = (0..rows * cols)
        .map(|_| if rng.gen::<f64>() < p { 0.0 } else { scale })
        .collect();

    Some(Tensor::from_data(TensorData::new(values, [rows, cols]), device))
}

fn apply_mask<B: Backend>(x: Tensor<B, 2>, mask: Option<&Tensor<B, 2>>) -> Tensor<B, 2> {
    match mask {
        Some(mask) => x * mask.clone(),
        None => x,
    }
}

/// 再帰状態（層ごとの cell / hidden）
pub struct RecurrentState<B: Backend> {
    layers: Vec<LstmState<B, 2>>,
}

impl<B: Backend> RecurrentState<B> {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// 層ごとの隠れ状態 [batch, d_hidden]（下の層から順）
    pub fn hidden(&self) -> Vec<Tensor<B, 2>> {
        self.layers.iter().map(|state| state.hidden.clone()).collect()
    }
}

/// 多層LSTM。セル本体の計算は burn の `Lstm` に任せる。
#[derive(Module, Debug)]
pub struct StackedLstm<B: Backend> {
    layers: Vec<Lstm<B>>,
    d_input: usize,
    d_hidden: usize,
}

impl<B: Backend> StackedLstm<B> {
    pub fn new(num_layers: usize, d_input: usize, d_hidden: usize, device: &B::Device) -> Self {
        let layers = (0..num_layers)
            .map(|layer| {
                let d_in = if layer == 0 { d_input } else { d_hidden };
                LstmConfig::new(d_in, d_hidden, true).init(device)
            })
            .collect();

        Self {
            layers,
            d_input,
            d_hidden,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn d_input(&self) -> usize {
        self.d_input
    }

    pub fn d_hidden(&self) -> usize {
        self.d_hidden
    }

    fn layer_input_dim(&self, layer: usize) -> usize {
        if layer == 0 {
            self.d_input
        } else {
            self.d_hidden
        }
    }

    /// 初期状態（全層ゼロ、バッチ内容に依存しない）
    pub fn initial_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B> {
        let layers = self
            .layers
            .iter()
            .map(|_| {
                LstmState::new(
                    Tensor::zeros([batch_size, self.d_hidden], device),
                    Tensor::zeros([batch_size, self.d_hidden], device),
                )
            })
            .collect();

        RecurrentState { layers }
    }

    /// 今回の呼び出し用にドロップアウトマスクを引く
    pub fn dropout_masks<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        dropouts: Dropouts,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<DropoutMasks<B>> {
        dropouts.validate()?;
        if dropouts.is_disabled() {
            return Ok(DropoutMasks::disabled());
        }

        let mut input = Vec::with_capacity(self.num_layers());
        let mut recurrent = Vec::with_capacity(self.num_layers());
        for layer in 0..self.num_layers() {
            input.push(bernoulli_mask(
                batch_size,
                self.layer_input_dim(layer),
                dropouts.input,
                rng,
                device,
            ));
            recurrent.push(bernoulli_mask(
                batch_size,
                self.d_hidden,
                dropouts.recurrent,
                rng,
                device,
            ));
        }

        Ok(DropoutMasks { input, recurrent })
    }

    fn layer_step(
        lstm: &Lstm<B>,
        x: Tensor<B, 2>,
        state: LstmState<B, 2>,
        recurrent_mask: Option<&Tensor<B, 2>>,
    ) -> LstmState<B, 2> {
        let [batch_size, d_in] = x.dims();
        let hidden = apply_mask(state.hidden, recurrent_mask);

        let (_, next) = lstm.forward(
            x.reshape([batch_size, 1, d_in]),
            Some(LstmState::new(state.cell, hidden)),
        );
        next
    }

    /// 1時刻進める: input [batch, d_input] → (新しい状態, 最上層の hidden [batch, d_hidden])
    pub fn step(
        &self,
        state: RecurrentState<B>,
        input: Tensor<B, 2>,
        masks: &DropoutMasks<B>,
    ) -> (RecurrentState<B>, Tensor<B, 2>) {
        let mut x = input;
        let mut next_layers = Vec::with_capacity(self.num_layers());

        for (layer, (lstm, layer_state)) in self.layers.iter().zip(state.layers).enumerate() {
            let x_in = apply_mask(x, masks.input(layer));
            let next = Self::layer_step(lstm, x_in, layer_state, masks.recurrent(layer));
            x = next.hidden.clone();
            next_layers.push(next);
        }

        (RecurrentState { layers: next_layers }, x)
    }

    /// 系列全体を変換: inputs [batch, seq_len, d_input] → hidden [batch, seq_len, d_hidden]
    ///
    /// 再帰ドロップアウトが無い層は burn の系列forwardを一度呼ぶだけ。
    /// ある層は時刻ごとにマスクを掛けながら回す。
    pub fn transduce(
        &self,
        state: RecurrentState<B>,
        inputs: Tensor<B, 3>,
        masks: &DropoutMasks<B>,
    ) -> (Tensor<B, 3>, RecurrentState<B>) {
        let mut x = inputs;
        let mut final_layers = Vec::with_capacity(self.num_layers());

        for (layer, (lstm, layer_state)) in self.layers.iter().zip(state.layers).enumerate() {
            let [batch_size, seq_len, d_in] = x.dims();

            let x_in = match masks.input(layer) {
                Some(mask) => x * mask.clone().unsqueeze_dim::<3>(1),
                None => x,
            };

            match masks.recurrent(layer) {
                None => {
                    let (output, next) = lstm.forward(x_in, Some(layer_state));
                    x = output;
                    final_layers.push(next);
                }
                Some(mask) => {
                    let mut current = layer_state;
                    let mut outputs = Vec::with_capacity(seq_len);
                    for t in 0..seq_len {
                        let x_t = x_in
                            .clone()
                            .slice([0..batch_size, t..t + 1, 0..d_in])
                            .reshape([batch_size, d_in]);
                        current = Self::layer_step(lstm, x_t, current, Some(mask));
                        outputs.push(current.hidden.clone());
                    }
                    x = Tensor::stack(outputs, 1);
                    final_layers.push(current);
                }
            }
        }

        (x, RecurrentState { layers: final_layers })
    }
}
