use crate::config::{LanguageModelConfig, CONFIG_FILE, MODEL_FILE, VOCAB_FILE};
use crate::error::{LmError, Result};
use crate::model::LstmLanguageModel;
use crate::vocabulary::Vocabulary;
use burn::config::Config;
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use std::fs;
use std::path::Path;

/// 読み込んだチェックポイント一式
pub struct Checkpoint<B: Backend> {
    pub model: LstmLanguageModel<B>,
    pub config: LanguageModelConfig,
    pub vocab: Vocabulary,
}

/// モデル・設定・語彙を保存（model.bin / config.json / vocab.json）
pub fn save_checkpoint<B: Backend>(
    model: &LstmLanguageModel<B>,
    config: &LanguageModelConfig,
    vocab: &Vocabulary,
    save_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(save_dir)?;

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(save_dir.join(MODEL_FILE), &recorder)
        .map_err(|e| LmError::Checkpoint(format!("モデル保存エラー: {:?}", e)))?;

    config.save(save_dir.join(CONFIG_FILE))?;
    vocab.save(&save_dir.join(VOCAB_FILE))?;

    log::info!("モデルを保存: {}", save_dir.display());
    Ok(())
}

/// チェックポイントを読み込む（任意のBackend）
///
/// 設定からモデルを組み直してから重みを読み込み、形状を再確認する。
pub fn load_checkpoint<B: Backend>(load_dir: &Path, device: &B::Device) -> Result<Checkpoint<B>> {
    let config = LanguageModelConfig::load(load_dir.join(CONFIG_FILE))
        .map_err(|e| LmError::Checkpoint(format!("設定読み込みエラー: {:?}", e)))?;
    let vocab = Vocabulary::load(&load_dir.join(VOCAB_FILE))?;
    if vocab.vocab_size != config.vocab_size {
        return Err(LmError::Config(format!(
            "語彙サイズ {} が設定の vocab_size {} と一致しません",
            vocab.vocab_size, config.vocab_size
        )));
    }

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = config
        .init::<B>(device)?
        .load_file(load_dir.join(MODEL_FILE), &recorder, device)
        .map_err(|e| LmError::Checkpoint(format!("モデル読み込みエラー: {:?}", e)))?;
    model.check_shapes(&config)?;

    log::info!(
        "モデルを読み込み（{}バックエンド）: {}",
        std::any::type_name::<B>(),
        load_dir.display()
    );

    Ok(Checkpoint {
        model,
        config,
        vocab,
    })
}
