use crate::config::TrainingConfig;
use crate::data::LmCorpus;
use crate::error::{LmError, Result};
use crate::metrics::TrainingMetrics;
use crate::model::{LstmLanguageModel, Mode};
use burn::backend::wgpu::Wgpu;
use burn::backend::Autodiff;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::SeedableRng;

// 訓練用バックエンド（GPU）
pub type TrainingBackend = Autodiff<Wgpu>;

/// 評価結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// マスク付き負の対数尤度の総和
    pub loss: f32,
    /// 損失に寄与したトークン数
    pub tokens: f32,
}

impl Evaluation {
    pub fn per_token_loss(&self) -> f32 {
        if self.tokens > 0.0 {
            self.loss / self.tokens
        } else {
            0.0
        }
    }

    pub fn perplexity(&self) -> f32 {
        self.per_token_loss().exp()
    }
}

/// 推論パス（ドロップアウトなし）でコーパス全体を評価する
pub fn evaluate<B: Backend>(
    model: &LstmLanguageModel<B>,
    corpus: &LmCorpus,
    batch_size: usize,
    eos_id: usize,
) -> Result<Evaluation> {
    let mut evaluation = Evaluation {
        loss: 0.0,
        tokens: 0.0,
    };

    for batch in corpus.batches(batch_size, eos_id) {
        let output = model.score_batch(&batch, eos_id)?;
        evaluation.loss += output.loss_value();
        evaluation.tokens += batch.token_count();
    }

    Ok(evaluation)
}

/// 訓練実行
pub fn train<B: AutodiffBackend>(
    model: LstmLanguageModel<B>,
    corpus: &LmCorpus,
    valid: Option<&LmCorpus>,
    eos_id: usize,
    config: &TrainingConfig,
) -> Result<(LstmLanguageModel<B>, TrainingMetrics)> {
    if corpus.is_empty() {
        return Err(LmError::Shape("訓練データが空です".to_string()));
    }

    let mut optimizer = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(config.grad_clip_norm)))
        .init();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut model = model;
    let mut metrics = TrainingMetrics {
        epochs: config.epochs,
        learning_rate: config.learning_rate,
        batch_size: config.batch_size,
        ..Default::default()
    };

    log::info!("訓練開始: {}エポック, {}文", config.epochs, corpus.len());

    for epoch in 0..config.epochs {
        let mut total_loss = 0.0;
        let mut total_tokens = 0.0;

        for batch in corpus.shuffled_batches(config.batch_size, eos_id, &mut rng) {
            // フォワードパス
            let output = model.one_batch(&batch, eos_id, Mode::Training, &mut rng)?;
            let loss = output.loss;

            // バックプロパゲーション
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);

            // パラメータ更新（バッチの合間にだけ行う）
            model = optimizer.step(config.learning_rate, model, grads);

            let batch_loss = loss.into_scalar().elem::<f32>();
            log::debug!(
                "epoch {} batch_size {} loss {:.4}",
                epoch + 1,
                batch.batch_size(),
                batch_loss
            );

            total_loss += batch_loss;
            total_tokens += batch.token_count();
        }

        let avg_loss = if total_tokens > 0.0 {
            total_loss / total_tokens
        } else {
            0.0
        };
        metrics.loss_history.push(avg_loss);

        let valid_perplexity = match valid {
            Some(valid) => {
                let evaluation = evaluate(&model.valid(), valid, config.batch_size, eos_id)?;
                metrics
                    .valid_perplexity_history
                    .push(evaluation.perplexity());
                Some(evaluation.perplexity())
            }
            None => None,
        };

        if epoch % config.log_every.max(1) == 0 || epoch + 1 == config.epochs {
            match valid_perplexity {
                Some(ppl) => log::info!(
                    "Epoch {}/{}: Loss = {:.6}, Valid PPL = {:.3}",
                    epoch + 1,
                    config.epochs,
                    avg_loss,
                    ppl
                ),
                None => log::info!("Epoch {}/{}: Loss = {:.6}", epoch + 1, config.epochs, avg_loss),
            }
        }
    }

    metrics.final_loss = metrics.loss_history.last().copied().unwrap_or(0.0);

    Ok((model, metrics))
}
