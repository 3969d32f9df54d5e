#![recursion_limit = "256"]

use burn::backend::wgpu::WgpuDevice;
use clap::Parser;
use env_logger::Env;
use lstm_lm::checkpoint::{load_checkpoint, save_checkpoint};
use lstm_lm::config::{LanguageModelConfig, TrainingConfig, SAMPLE_MAX_LEN, SEED};
use lstm_lm::data::LmCorpus;
use lstm_lm::inference::{run_inference, sample_sentences, score_text, InferenceOutput, InferenceRequest};
use lstm_lm::metrics::save_metrics;
use lstm_lm::training::{train, TrainingBackend};
use lstm_lm::vocabulary::{Tokenization, Vocabulary};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

/// LSTM言語モデルの訓練・サンプリング・スコアリング
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 訓練モード（訓練を実行する場合に指定）
    #[arg(long)]
    train: bool,

    /// 訓練コーパス（1行1文）
    #[arg(long, default_value = "data/corpus.txt")]
    corpus: PathBuf,

    /// 検証コーパス（指定時はエポックごとにパープレキシティを計算）
    #[arg(long)]
    valid: Option<PathBuf>,

    /// 文字単位でトークン化する（新規訓練時のみ有効）
    #[arg(long)]
    chars: bool,

    /// エポック数
    #[arg(long)]
    epochs: Option<usize>,

    /// モデルを保存するディレクトリ
    #[arg(long)]
    save: Option<PathBuf>,

    /// モデルを読み込むディレクトリ
    #[arg(long)]
    load: Option<PathBuf>,

    /// サンプリングする文の数
    #[arg(long)]
    sample: Option<usize>,

    /// サンプリング長
    #[arg(long, default_value_t = SAMPLE_MAX_LEN)]
    max_len: usize,

    /// 乱数シード
    #[arg(long, default_value_t = SEED)]
    seed: u64,

    /// スコアリングするテキスト
    #[arg(long)]
    score: Option<String>,

    /// バックエンドの選択（auto, wgpu, ndarray）
    #[arg(long, default_value = "wgpu")]
    backend: String,
}

fn print_output(output: &InferenceOutput) {
    match output {
        InferenceOutput::Samples(sentences) => {
            for (i, sentence) in sentences.iter().enumerate() {
                println!("[{}] {}", i + 1, sentence);
            }
        }
        InferenceOutput::Score(evaluation) => {
            println!(
                "損失: {:.4}（{}トークン） パープレキシティ: {:.3}",
                evaluation.loss,
                evaluation.tokens,
                evaluation.perplexity()
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG 未指定なら info
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let start_time = Instant::now();

    let args = Args::parse();

    let mut request = None;
    if let Some(count) = args.sample {
        request = Some(InferenceRequest::Sample {
            count,
            max_len: args.max_len,
            seed: args.seed,
        });
    }
    if let Some(text) = &args.score {
        request = Some(InferenceRequest::Score { text: text.clone() });
    }

    // 訓練モード
    if args.train {
        println!("\n===== 訓練開始 =====");
        let training_device = WgpuDevice::default();

        let mut training_config = TrainingConfig::new().with_seed(args.seed);
        if let Some(epochs) = args.epochs {
            training_config = training_config.with_epochs(epochs);
        }

        // モデルの初期化または読み込み
        let (model, model_config, vocab) = if let Some(load_dir) = &args.load {
            let checkpoint = load_checkpoint::<TrainingBackend>(load_dir, &training_device)?;
            (checkpoint.model, checkpoint.config, checkpoint.vocab)
        } else {
            let content = fs::read_to_string(&args.corpus)?;
            let tokenization = if args.chars {
                Tokenization::Chars
            } else {
                Tokenization::Words
            };
            let vocab = Vocabulary::from_corpus(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.starts_with('#')),
                tokenization,
            );
            let model_config = LanguageModelConfig::new(vocab.vocab_size, vocab.vocab_size);
            let model = model_config.init::<TrainingBackend>(&training_device)?;
            (model, model_config, vocab)
        };
        println!("語彙サイズ: {}", vocab.vocab_size);

        let corpus = LmCorpus::load(&vocab, &args.corpus, training_config.max_sentence_len)?;
        let valid = match &args.valid {
            Some(path) => Some(LmCorpus::load(
                &vocab,
                path,
                training_config.max_sentence_len,
            )?),
            None => None,
        };
        println!("訓練サンプル数: {}文", corpus.len());

        let (model, training_metrics) = train(
            model,
            &corpus,
            valid.as_ref(),
            vocab.eos_id,
            &training_config,
        )?;
        println!("訓練完了！ 最終Loss: {:.6}", training_metrics.final_loss);

        // モデルとメトリクスを保存
        if let Some(save_dir) = &args.save {
            save_checkpoint(&model, &model_config, &vocab, save_dir)?;
            save_metrics(save_dir, &training_metrics, &model_config, &training_config)?;
        }

        // 訓練直後の場合はTrainingBackendで推論
        if let Some(request) = &request {
            println!("\n===== 推論テスト =====");
            let output = match request {
                InferenceRequest::Sample {
                    count,
                    max_len,
                    seed,
                } => InferenceOutput::Samples(sample_sentences(
                    &model, &vocab, *count, *max_len, *seed,
                )?),
                InferenceRequest::Score { text } => {
                    InferenceOutput::Score(score_text(&model, &vocab, text)?)
                }
            };
            print_output(&output);
        }
    } else if let (Some(load_dir), Some(request)) = (&args.load, &request) {
        // モデルが読み込まれている場合は指定されたバックエンドで推論
        println!("\n===== 推論 =====");
        let output = run_inference(&args.backend, load_dir, request)?;
        print_output(&output);
    } else {
        println!("===== デモモード =====");
        println!("使用方法:");
        println!("  訓練: cargo run --release -- --train --corpus data/corpus.txt --save models/lm");
        println!("  サンプリング: cargo run --release -- --load models/lm --sample 5");
        println!("  スコア: cargo run --release -- --load models/lm --score \"the cat sat\"");
        println!(
            "  継続訓練: cargo run --release -- --load models/lm --train --save models/lm2"
        );
    }

    let duration = start_time.elapsed();
    println!("\n実行時間: {:.2}秒", duration.as_secs_f64());

    Ok(())
}
