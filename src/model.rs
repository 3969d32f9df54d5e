use crate::batch::{self, Batch, BatchDims};
use crate::config::LanguageModelConfig;
use crate::embedding::EmbeddingTable;
use crate::error::{LmError, Result};
use crate::projection::OutputProjection;
use crate::recurrent::{DropoutMasks, Dropouts, StackedLstm};
use crate::sampling;
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::{ElementConversion, TensorData};
use rand::Rng;

/// テンソルをホスト側の f32 列に取り出す
pub fn to_vec_f32<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| LmError::TensorData(format!("{:?}", e)))
}

fn to_vec_ids<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<usize>> {
    let ids = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| LmError::TensorData(format!("{:?}", e)))?;

    Ok(ids.into_iter().map(|id| id as usize).collect())
}

/// 訓練（ドロップアウトあり）か推論（なし）か
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Inference,
}

/// 時刻ごとのlogits。burnに合わせて [batch, timesteps, vocab] で持つ。
#[derive(Debug, Clone)]
pub struct Decoding<B: Backend> {
    logits: Tensor<B, 3>,
}

impl<B: Backend> Decoding<B> {
    pub fn new(logits: Tensor<B, 3>) -> Self {
        Self { logits }
    }

    pub fn batch_size(&self) -> usize {
        self.logits.dims()[0]
    }

    /// 時刻数
    pub fn len(&self) -> usize {
        self.logits.dims()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vocab_size(&self) -> usize {
        self.logits.dims()[2]
    }

    pub fn logits(&self) -> &Tensor<B, 3> {
        &self.logits
    }

    pub fn into_logits(self) -> Tensor<B, 3> {
        self.logits
    }

    /// 各時刻の argmax（[時刻][バッチ]）
    pub fn greedy_ids(&self) -> Result<Vec<Vec<usize>>> {
        let [batch_size, seq_len, _] = self.logits.dims();
        let ids = to_vec_ids(self.logits.clone().argmax(2))?;

        Ok((0..seq_len)
            .map(|t| (0..batch_size).map(|b| ids[b * seq_len + t]).collect())
            .collect())
    }
}

/// 1バッチ分の損失とlogits
#[derive(Debug, Clone)]
pub struct BatchOutput<B: Backend> {
    /// マスク付き負の対数尤度の総和（形状 [1]）
    pub loss: Tensor<B, 1>,
    pub decoding: Decoding<B>,
}

impl<B: Backend> BatchOutput<B> {
    pub fn loss_value(&self) -> f32 {
        self.loss.clone().into_scalar().elem::<f32>()
    }
}

/// LSTM言語モデル（埋め込み → 多層LSTM → 出力射影）
#[derive(Module, Debug)]
pub struct LstmLanguageModel<B: Backend> {
    embedding: EmbeddingTable<B>,
    lstm: StackedLstm<B>,
    projection: OutputProjection<B>,
    input_dropout: f64,
    recurrent_dropout: f64,
}

impl LanguageModelConfig {
    /// モデルを構築（設定の不整合はここでエラー）
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LstmLanguageModel<B>> {
        self.validate()?;

        let model = LstmLanguageModel {
            embedding: EmbeddingTable::new(self.vocab_size, self.input_embedding_dim, device),
            lstm: StackedLstm::new(
                self.lstm_layers,
                self.input_embedding_dim,
                self.lstm_hidden_dim,
                device,
            ),
            projection: OutputProjection::new(self.lstm_hidden_dim, self.out_vocab_size, device),
            input_dropout: self.input_dropout,
            recurrent_dropout: self.recurrent_dropout,
        };
        model.check_shapes(self)?;

        Ok(model)
    }
}

impl<B: Backend> LstmLanguageModel<B> {
    pub fn embedding(&self) -> &EmbeddingTable<B> {
        &self.embedding
    }

    pub fn lstm(&self) -> &StackedLstm<B> {
        &self.lstm
    }

    pub fn projection(&self) -> &OutputProjection<B> {
        &self.projection
    }

    /// 出力射影を差し替える
    pub fn with_projection(mut self, projection: OutputProjection<B>) -> Self {
        self.projection = projection;
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.vocab_size()
    }

    pub fn out_vocab_size(&self) -> usize {
        self.projection.vocab_size()
    }

    /// 訓練時に使うドロップアウト率
    pub fn dropouts(&self) -> Dropouts {
        Dropouts::new(self.input_dropout, self.recurrent_dropout)
    }

    pub fn device(&self) -> B::Device {
        self.embedding.device()
    }

    /// パラメータの形状が設定と一致するか確認する
    pub fn check_shapes(&self, config: &LanguageModelConfig) -> Result<()> {
        let mismatch = |what: &str, actual: String, expected: String| {
            Err(LmError::Config(format!(
                "{} の形状 {} が設定 {} と一致しません",
                what, actual, expected
            )))
        };

        let embedding = self.embedding.weight_dims();
        let expected = [config.vocab_size, config.input_embedding_dim];
        if embedding != expected {
            return mismatch("埋め込み", format!("{:?}", embedding), format!("{:?}", expected));
        }

        let lstm = (
            self.lstm.num_layers(),
            self.lstm.d_input(),
            self.lstm.d_hidden(),
        );
        let expected = (
            config.lstm_layers,
            config.input_embedding_dim,
            config.lstm_hidden_dim,
        );
        if lstm != expected {
            return mismatch("LSTM", format!("{:?}", lstm), format!("{:?}", expected));
        }

        let weight = self.projection.weight_dims();
        let expected = [config.lstm_hidden_dim, config.out_vocab_size];
        if weight != expected {
            return mismatch("出力射影 R", format!("{:?}", weight), format!("{:?}", expected));
        }

        let bias = self.projection.bias_dims();
        let expected = Some([config.out_vocab_size]);
        if bias != expected {
            return mismatch("出力射影 b", format!("{:?}", bias), format!("{:?}", expected));
        }

        Ok(())
    }

    /// 形状・マスク・ID範囲をテンソルを作る前に確認する
    fn check_batch(&self, batch: &Batch) -> Result<BatchDims> {
        let dims = batch.dims()?;

        self.embedding.check_ids(batch.inputs.iter().flatten())?;
        if let Some(&id) = batch
            .targets
            .iter()
            .flatten()
            .find(|&&id| id >= self.out_vocab_size())
        {
            return Err(LmError::TokenOutOfRange {
                id,
                vocab_size: self.out_vocab_size(),
            });
        }

        Ok(dims)
    }

    /// 埋め込み → LSTM（系列一括） → 射影
    fn decode(
        &self,
        inputs: &[Vec<usize>],
        max_len: usize,
        masks: &DropoutMasks<B>,
        device: &B::Device,
    ) -> Result<Decoding<B>> {
        let embedded = self.embedding.lookup_sequences(inputs, device)?;
        let [batch_size, _, embedding_dim] = embedded.dims();
        let embedded = embedded.slice([0..batch_size, 0..max_len, 0..embedding_dim]);

        let state = self.lstm.initial_state(batch_size, device);
        let (hidden, _) = self.lstm.transduce(state, embedded, masks);

        Ok(Decoding::new(self.projection.project(hidden)))
    }

    /// Σ_t Σ_b mask[b][t] · (−log softmax(logits[b, t])[y[b][t]])
    fn masked_loss(
        &self,
        decoding: &Decoding<B>,
        targets: &[Vec<usize>],
        masks: &[Vec<f32>],
        device: &B::Device,
    ) -> Tensor<B, 1> {
        let [batch_size, seq_len, _] = decoding.logits.dims();

        let flattened_targets: Vec<i32> = targets
            .iter()
            .flat_map(|row| row[..seq_len].iter().map(|&id| id as i32))
            .collect();
        let targets = Tensor::<B, 1, Int>::from_data(flattened_targets.as_slice(), device)
            .reshape([batch_size, seq_len, 1]);

        let flattened_masks: Vec<f32> = masks
            .iter()
            .flat_map(|row| row[..seq_len].iter().copied())
            .collect();
        let masks = Tensor::<B, 2>::from_data(
            TensorData::new(flattened_masks, [batch_size, seq_len]),
            device,
        );

        let log_probs = log_softmax(decoding.logits.clone(), 2);
        let nll = log_probs
            .gather(2, targets)
            .reshape([batch_size, seq_len])
            .neg();

        // マスクは全時刻に掛ける
        (nll * masks).sum()
    }

    /// 訓練パス（Teacher Forcing、ドロップアウトあり）
    ///
    /// 全時刻の入力を埋め込み、LSTMで一度に変換し、各時刻のlogitsから
    /// マスク付きの負の対数尤度を時刻方向・バッチ方向に合計する。
    pub fn compute_batch_loss<R: Rng + ?Sized>(
        &self,
        batch: &Batch,
        rng: &mut R,
    ) -> Result<BatchOutput<B>> {
        let dims = self.check_batch(batch)?;
        let device = self.device();

        let masks = self
            .lstm
            .dropout_masks(dims.batch_size, self.dropouts(), rng, &device)?;
        let decoding = self.decode(&batch.inputs, dims.seq_len, &masks, &device)?;
        let loss = self.masked_loss(&decoding, &batch.targets, &batch.target_masks, &device);

        Ok(BatchOutput { loss, decoding })
    }

    /// 推論パス（ドロップアウトなし）。既知の入力系列の先頭 `max_len` 時刻のlogitsを返す。
    ///
    /// `eos_id` では止まらない（範囲チェックのみ）。
    pub fn forward_batch(
        &self,
        inputs: &[Vec<usize>],
        max_len: usize,
        input_masks: &[Vec<f32>],
        eos_id: usize,
    ) -> Result<Decoding<B>> {
        let (batch_size, seq_len) = batch::rectangular(inputs, "inputs")?;
        let dims = BatchDims {
            batch_size,
            seq_len,
        };
        batch::check_same_dims(
            "input_masks",
            batch::rectangular(input_masks, "input_masks")?,
            dims,
        )?;
        batch::check_mask_values(input_masks)?;
        if max_len == 0 || max_len > seq_len {
            return Err(LmError::Shape(format!(
                "max_len {} は 1 以上かつ入力の系列長 {} 以下にしてください",
                max_len, seq_len
            )));
        }
        self.embedding.check_ids(inputs.iter().flatten())?;
        self.embedding.check_ids(&[eos_id])?;

        let device = self.device();
        self.decode(inputs, max_len, &DropoutMasks::disabled(), &device)
    }

    /// 推論パスで損失を計算する（評価・スコアリング用）
    pub fn score_batch(&self, batch: &Batch, eos_id: usize) -> Result<BatchOutput<B>> {
        let dims = self.check_batch(batch)?;
        let device = self.device();

        let decoding =
            self.forward_batch(&batch.inputs, dims.seq_len, &batch.input_masks, eos_id)?;
        let loss = self.masked_loss(&decoding, &batch.targets, &batch.target_masks, &device);

        Ok(BatchOutput { loss, decoding })
    }

    /// 訓練・推論を切り替えて1バッチ処理する
    pub fn one_batch<R: Rng + ?Sized>(
        &self,
        batch: &Batch,
        eos_id: usize,
        mode: Mode,
        rng: &mut R,
    ) -> Result<BatchOutput<B>> {
        match mode {
            Mode::Training => self.compute_batch_loss(batch, rng),
            Mode::Inference => self.score_batch(batch, eos_id),
        }
    }

    /// 自己回帰サンプリング。戻り値は [時刻][バッチ]。
    ///
    /// 全要素 eos を入力して始め、各時刻で最上層の hidden → logits → softmax
    /// から逆CDF法で1つ引き、その埋め込みを次の入力にする。eos を引いても
    /// 止まらず、必ず `max_len` 時刻分返す。
    pub fn sample_batch<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        max_len: usize,
        eos_id: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>> {
        if batch_size == 0 {
            return Err(LmError::Shape("batch_size は 1 以上にしてください".to_string()));
        }
        // 引いたIDは次の時刻の入力になる
        if self.out_vocab_size() > self.vocab_size() {
            return Err(LmError::Config(format!(
                "出力語彙サイズ {} が入力語彙サイズ {} を超えるためサンプリングできません",
                self.out_vocab_size(),
                self.vocab_size()
            )));
        }
        self.embedding.check_ids(&[eos_id])?;

        let device = self.device();
        let masks = DropoutMasks::disabled();

        let state = self.lstm.initial_state(batch_size, &device);
        let eoses = self.embedding.lookup(&vec![eos_id; batch_size], &device)?;
        let (mut state, mut hidden) = self.lstm.step(state, eoses, &masks);

        let mut samples = Vec::with_capacity(max_len);
        for step in 0..max_len {
            let logits = self.projection.project(hidden.clone());
            let probs = to_vec_f32(softmax(logits, 1))?;
            let beam = sampling::sample_rows(&probs, self.out_vocab_size(), rng)?;

            // 最後の時刻は次の入力が不要
            if step + 1 < max_len {
                let next = self.embedding.lookup(&beam, &device)?;
                (state, hidden) = self.lstm.step(state, next, &masks);
            }
            samples.push(beam);
        }

        Ok(samples)
    }
}
