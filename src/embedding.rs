use crate::error::{LmError, Result};
use burn::nn::{Embedding, EmbeddingConfig};
use burn::prelude::*;

/// トークンIDごとの埋め込みベクトル表
#[derive(Module, Debug)]
pub struct EmbeddingTable<B: Backend> {
    embedding: Embedding<B>,
    vocab_size: usize,
    embedding_dim: usize,
}

impl<B: Backend> EmbeddingTable<B> {
    pub fn new(vocab_size: usize, embedding_dim: usize, device: &B::Device) -> Self {
        let embedding = EmbeddingConfig::new(vocab_size, embedding_dim).init(device);

        Self {
            embedding,
            vocab_size,
            embedding_dim,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn device(&self) -> B::Device {
        self.embedding.weight.val().device()
    }

    /// 重み行列の形状 [vocab_size, embedding_dim]
    pub fn weight_dims(&self) -> [usize; 2] {
        self.embedding.weight.val().dims()
    }

    /// IDが語彙範囲内かを確認（範囲外は丸めずにエラー）
    pub fn check_ids<'a, I>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a usize>,
    {
        match ids.into_iter().find(|&&id| id >= self.vocab_size) {
            Some(&id) => Err(LmError::TokenOutOfRange {
                id,
                vocab_size: self.vocab_size,
            }),
            None => Ok(()),
        }
    }

    /// バッチの各要素に1つずつIDを引く: [batch] → [batch, embedding_dim]
    pub fn lookup(&self, ids: &[usize], device: &B::Device) -> Result<Tensor<B, 2>> {
        self.check_ids(ids)?;

        let batch_size = ids.len();
        let flattened: Vec<i32> = ids.iter().map(|&id| id as i32).collect();
        let tokens = Tensor::<B, 1, Int>::from_data(flattened.as_slice(), device)
            .reshape([batch_size, 1]);

        // [batch, 1, embedding_dim] → [batch, embedding_dim]
        Ok(self
            .embedding
            .forward(tokens)
            .reshape([batch_size, self.embedding_dim]))
    }

    /// 系列のバッチを引く: [batch][seq_len] → [batch, seq_len, embedding_dim]
    pub fn lookup_sequences(&self, ids: &[Vec<usize>], device: &B::Device) -> Result<Tensor<B, 3>> {
        let batch_size = ids.len();
        let seq_len = ids.first().map(Vec::len).unwrap_or(0);
        if ids.iter().any(|row| row.len() != seq_len) {
            return Err(LmError::Shape("系列長がバッチ内で揃っていません".to_string()));
        }
        self.check_ids(ids.iter().flatten())?;

        let flattened: Vec<i32> = ids.iter().flatten().map(|&id| id as i32).collect();
        let tokens = Tensor::<B, 1, Int>::from_data(flattened.as_slice(), device)
            .reshape([batch_size, seq_len]);

        Ok(self.embedding.forward(tokens))
    }
}
