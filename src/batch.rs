use crate::error::{LmError, Result};

/// 1バッチ分の入力・正解・マスク（すべて [batch][timestep]）
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Vec<Vec<usize>>,
    pub targets: Vec<Vec<usize>>,
    pub input_masks: Vec<Vec<f32>>,
    pub target_masks: Vec<Vec<f32>>,
}

/// 検証済みのバッチ形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDims {
    pub batch_size: usize,
    pub seq_len: usize,
}

/// 各行の長さが揃っていることを確認し、(行数, 行の長さ) を返す
pub(crate) fn rectangular<T>(rows: &[Vec<T>], what: &str) -> Result<(usize, usize)> {
    let seq_len = match rows.first() {
        Some(row) => row.len(),
        None => return Err(LmError::Shape(format!("{} が空です", what))),
    };

    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != seq_len) {
        return Err(LmError::Shape(format!(
            "{} の {} 番目の長さ {} が先頭の長さ {} と一致しません",
            what,
            i,
            row.len(),
            seq_len
        )));
    }

    Ok((rows.len(), seq_len))
}

pub(crate) fn check_same_dims(
    what: &str,
    (batch_size, seq_len): (usize, usize),
    expected: BatchDims,
) -> Result<()> {
    if batch_size != expected.batch_size {
        return Err(LmError::Shape(format!(
            "{} のバッチサイズ {} が入力のバッチサイズ {} と一致しません",
            what, batch_size, expected.batch_size
        )));
    }
    if seq_len != expected.seq_len {
        return Err(LmError::Shape(format!(
            "{} の系列長 {} が入力の系列長 {} と一致しません",
            what, seq_len, expected.seq_len
        )));
    }
    Ok(())
}

pub(crate) fn check_mask_values(masks: &[Vec<f32>]) -> Result<()> {
    for (element, row) in masks.iter().enumerate() {
        if let Some((position, &value)) = row.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(LmError::InvalidMask {
                element,
                position,
                value,
            });
        }
    }
    Ok(())
}

impl Batch {
    /// 文（トークンID列）のまとまりから言語モデル用のバッチを作る
    ///
    /// 入力は [eos, w1..wn]、正解は [w1..wn, eos]。最長の文に合わせて
    /// eos で埋め、埋めた位置のマスクは 0 にする。
    pub fn from_sentences<S: AsRef<[usize]>>(sentences: &[S], eos_id: usize) -> Self {
        let max_len = sentences
            .iter()
            .map(|sentence| sentence.as_ref().len() + 1)
            .max()
            .unwrap_or(0);

        let mut batch = Batch {
            inputs: Vec::with_capacity(sentences.len()),
            targets: Vec::with_capacity(sentences.len()),
            input_masks: Vec::with_capacity(sentences.len()),
            target_masks: Vec::with_capacity(sentences.len()),
        };

        for sentence in sentences {
            let sentence = sentence.as_ref();
            let len = sentence.len() + 1;

            let mut input = Vec::with_capacity(max_len);
            input.push(eos_id);
            input.extend_from_slice(sentence);
            input.resize(max_len, eos_id);

            let mut target = sentence.to_vec();
            target.push(eos_id);
            target.resize(max_len, eos_id);

            let mut mask = vec![1.0_f32; len];
            mask.resize(max_len, 0.0);

            batch.inputs.push(input);
            batch.targets.push(target);
            batch.input_masks.push(mask.clone());
            batch.target_masks.push(mask);
        }

        batch
    }

    /// 入力・正解・マスクの形状がすべて一致するか確認する
    pub fn dims(&self) -> Result<BatchDims> {
        let (batch_size, seq_len) = rectangular(&self.inputs, "inputs")?;
        if seq_len == 0 {
            return Err(LmError::Shape("系列長が 0 です".to_string()));
        }
        let dims = BatchDims {
            batch_size,
            seq_len,
        };

        check_same_dims("targets", rectangular(&self.targets, "targets")?, dims)?;
        check_same_dims("input_masks", rectangular(&self.input_masks, "input_masks")?, dims)?;
        check_same_dims("target_masks", rectangular(&self.target_masks, "target_masks")?, dims)?;
        check_mask_values(&self.input_masks)?;
        check_mask_values(&self.target_masks)?;

        Ok(dims)
    }

    pub fn batch_size(&self) -> usize {
        self.inputs.len()
    }

    /// 損失に寄与するトークン数（正解マスクの総和）
    pub fn token_count(&self) -> f32 {
        self.target_masks.iter().flatten().sum()
    }
}
