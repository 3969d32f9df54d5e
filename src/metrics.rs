use crate::config::{LanguageModelConfig, TrainingConfig, METRICS_FILE};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 訓練メトリクス
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// 訓練曲線（エポックごとの1トークンあたり損失）
    pub loss_history: Vec<f32>,
    /// 検証データのパープレキシティ（検証データがある場合のみ）
    pub valid_perplexity_history: Vec<f32>,
    /// 最終損失
    pub final_loss: f32,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
}

/// メタデータ
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Metadata {
    pub crate_version: String,
    pub trained_at: String,
}

/// 統合メトリクスファイル
#[derive(Serialize, Deserialize, Debug)]
pub struct MetricsFile {
    pub model_config: LanguageModelConfig,
    pub training_config: TrainingConfig,
    pub training: TrainingMetrics,
    pub metadata: Metadata,
}

/// metrics.json を保存
pub fn save_metrics(
    save_dir: &Path,
    training_metrics: &TrainingMetrics,
    model_config: &LanguageModelConfig,
    training_config: &TrainingConfig,
) -> Result<()> {
    fs::create_dir_all(save_dir)?;

    let metrics_file = MetricsFile {
        model_config: model_config.clone(),
        training_config: training_config.clone(),
        training: training_metrics.clone(),
        metadata: Metadata {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Local::now().to_rfc3339(),
        },
    };

    let path = save_dir.join(METRICS_FILE);
    fs::write(&path, serde_json::to_string_pretty(&metrics_file)?)?;
    log::info!("メトリクスを保存: {}", path.display());

    Ok(())
}

/// metrics.json を読み込む
pub fn load_metrics(load_dir: &Path) -> Result<MetricsFile> {
    let content = fs::read_to_string(load_dir.join(METRICS_FILE))?;
    Ok(serde_json::from_str(&content)?)
}
