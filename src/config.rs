use crate::error::LmError;
use crate::recurrent::Dropouts;
use burn::config::Config;

// 特殊シンボル
pub const EOS_SYMBOL: &str = "<eos>"; // 文末（サンプリング時は文頭としても使用）
pub const UNK_SYMBOL: &str = "<unk>"; // 未知語

// チェックポイントのファイル名
pub const MODEL_FILE: &str = "model"; // BinFileRecorderが .bin を付与
pub const CONFIG_FILE: &str = "config.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const METRICS_FILE: &str = "metrics.json";

// 推論設定（CLIのデフォルト値）
pub const SAMPLE_MAX_LEN: usize = 30; // サンプリング長
pub const SEED: u64 = 42; // 乱数シード

/// LSTM言語モデルのハイパーパラメーター
#[derive(Config, Debug)]
pub struct LanguageModelConfig {
    /// 入力語彙サイズ
    pub vocab_size: usize,
    /// 出力語彙サイズ
    pub out_vocab_size: usize,
    /// 埋め込み次元
    #[config(default = 128)]
    pub input_embedding_dim: usize,
    /// LSTMの層数
    #[config(default = 2)]
    pub lstm_layers: usize,
    /// LSTMの隠れ状態次元
    #[config(default = 256)]
    pub lstm_hidden_dim: usize,
    /// 各層の入力に掛けるドロップアウト率（訓練時のみ）
    #[config(default = 0.3)]
    pub input_dropout: f64,
    /// 再帰接続に掛けるドロップアウト率（訓練時のみ）
    #[config(default = 0.3)]
    pub recurrent_dropout: f64,
}

impl LanguageModelConfig {
    /// 構築前に次元とドロップアウト率を確認する
    pub fn validate(&self) -> crate::error::Result<()> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("out_vocab_size", self.out_vocab_size),
            ("input_embedding_dim", self.input_embedding_dim),
            ("lstm_layers", self.lstm_layers),
            ("lstm_hidden_dim", self.lstm_hidden_dim),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, value)| *value == 0) {
            return Err(LmError::Config(format!("{} は 1 以上にしてください", name)));
        }

        Dropouts::new(self.input_dropout, self.recurrent_dropout).validate()
    }
}

/// 訓練ループの設定
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 20)]
    pub epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 0.001)]
    pub learning_rate: f64,
    /// 勾配クリッピング（L2ノルム）
    #[config(default = 5.0)]
    pub grad_clip_norm: f32,
    /// 1文の最大トークン数（超過分は切り捨て）
    #[config(default = 50)]
    pub max_sentence_len: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// 何エポックごとにログを出すか
    #[config(default = 1)]
    pub log_every: usize,
}
