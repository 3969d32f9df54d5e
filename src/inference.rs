use crate::batch::Batch;
use crate::checkpoint::load_checkpoint;
use crate::error::{LmError, Result};
use crate::model::LstmLanguageModel;
use crate::training::Evaluation;
use crate::vocabulary::Vocabulary;
use burn::backend::ndarray::NdArray;
use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

/// 推論の種類
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceRequest {
    /// `count` 文を `max_len` トークンまでサンプリング
    Sample {
        count: usize,
        max_len: usize,
        seed: u64,
    },
    /// テキストの損失とパープレキシティを計算
    Score { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
    Samples(Vec<String>),
    Score(Evaluation),
}

/// サンプリングして最初の <eos> までを文字列にする
pub fn sample_sentences<B: Backend>(
    model: &LstmLanguageModel<B>,
    vocab: &Vocabulary,
    count: usize,
    max_len: usize,
    seed: u64,
) -> Result<Vec<String>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = model.sample_batch(count, max_len, vocab.eos_id, &mut rng)?;

    // [時刻][バッチ] → [バッチ][時刻]
    (0..count)
        .map(|b| {
            let ids: Vec<usize> = samples.iter().map(|step| step[b]).collect();
            vocab.render(vocab.truncate_at_eos(&ids))
        })
        .collect()
}

/// 1文をスコアリング（推論パス）
pub fn score_text<B: Backend>(
    model: &LstmLanguageModel<B>,
    vocab: &Vocabulary,
    text: &str,
) -> Result<Evaluation> {
    let ids = vocab.encode(text);
    if ids.is_empty() {
        return Err(LmError::Shape("スコアリングするトークンがありません".to_string()));
    }

    let batch = Batch::from_sentences(&[ids], vocab.eos_id);
    let output = model.score_batch(&batch, vocab.eos_id)?;

    Ok(Evaluation {
        loss: output.loss_value(),
        tokens: batch.token_count(),
    })
}

/// 推論（ジェネリックBackend）
pub fn run_on_backend<B: Backend>(
    load_dir: &Path,
    device: &B::Device,
    request: &InferenceRequest,
) -> Result<InferenceOutput> {
    let checkpoint = load_checkpoint::<B>(load_dir, device)?;

    match request {
        InferenceRequest::Sample {
            count,
            max_len,
            seed,
        } => sample_sentences(&checkpoint.model, &checkpoint.vocab, *count, *max_len, *seed)
            .map(InferenceOutput::Samples),
        InferenceRequest::Score { text } => {
            score_text(&checkpoint.model, &checkpoint.vocab, text).map(InferenceOutput::Score)
        }
    }
}

/// バックエンドを選択して推論実行
pub fn run_inference(
    backend_name: &str,
    load_dir: &Path,
    request: &InferenceRequest,
) -> Result<InferenceOutput> {
    match backend_name {
        "wgpu" => {
            let device = WgpuDevice::default();
            run_on_backend::<Wgpu>(load_dir, &device, request)
        }
        "ndarray" => {
            let device = Default::default();
            run_on_backend::<NdArray>(load_dir, &device, request)
        }
        "auto" => {
            // WGPUを試し、失敗したらNdArrayにフォールバック
            let wgpu_result = std::panic::catch_unwind(|| {
                let device = WgpuDevice::default();
                run_on_backend::<Wgpu>(load_dir, &device, request)
            });

            match wgpu_result {
                Ok(Ok(output)) => {
                    log::info!("バックエンド: WGPU（自動選択）");
                    Ok(output)
                }
                _ => {
                    log::warn!("バックエンド: NdArray（WGPU利用不可のためフォールバック）");
                    let device = Default::default();
                    run_on_backend::<NdArray>(load_dir, &device, request)
                }
            }
        }
        _ => Err(LmError::Config(format!("未対応のバックエンド: {}", backend_name))),
    }
}
