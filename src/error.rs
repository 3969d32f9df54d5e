use thiserror::Error;

/// 言語モデルのエラー
#[derive(Debug, Error)]
pub enum LmError {
    /// 設定エラー（次元・ドロップアウト率・パラメータ形状の不整合）
    #[error("設定エラー: {0}")]
    Config(String),

    /// 語彙範囲外のトークンID
    #[error("トークンID {id} は語彙サイズ {vocab_size} の範囲外です")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    /// バッチ形状の不整合
    #[error("形状エラー: {0}")]
    Shape(String),

    /// マスク値が有限でない
    #[error("マスク値が不正です（バッチ {element}, 位置 {position}）: {value}")]
    InvalidMask {
        element: usize,
        position: usize,
        value: f32,
    },

    /// サンプリング時の確率分布が壊れている
    #[error("確率分布が不正です（バッチ {element}）: {reason}")]
    Distribution { element: usize, reason: String },

    /// テンソルからホストへの変換失敗
    #[error("テンソルデータ変換エラー: {0}")]
    TensorData(String),

    /// チェックポイントの保存・読み込み失敗
    #[error("チェックポイントエラー: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LmError>;
