use burn::backend::ndarray::NdArray;
use lstm_lm::batch::Batch;
use lstm_lm::config::LanguageModelConfig;
use lstm_lm::error::LmError;
use lstm_lm::model::{to_vec_f32, LstmLanguageModel, Mode};
use rand::rngs::StdRng;
use rand::SeedableRng;

type TestBackend = NdArray;

const VOCAB_SIZE: usize = 7;
const EOS: usize = 0;

/// テスト用の小さなモデル
fn small_config() -> LanguageModelConfig {
    LanguageModelConfig::new(VOCAB_SIZE, VOCAB_SIZE)
        .with_input_embedding_dim(4)
        .with_lstm_layers(2)
        .with_lstm_hidden_dim(5)
}

fn small_model(config: &LanguageModelConfig) -> LstmLanguageModel<TestBackend> {
    config
        .init::<TestBackend>(&Default::default())
        .expect("モデル構築失敗")
}

/// 長さの違う2文のバッチ（2文目は埋め草を含む）
fn sample_batch() -> Batch {
    Batch::from_sentences(&[vec![2, 3, 4], vec![5]], EOS)
}

/// ホスト側で Σ mask · (−log softmax) を計算する
fn reference_loss(logits: &[f32], dims: [usize; 3], batch: &Batch) -> f32 {
    let [batch_size, seq_len, vocab_size] = dims;
    let mut total = 0.0;

    for b in 0..batch_size {
        for t in 0..seq_len {
            let start = (b * seq_len + t) * vocab_size;
            let row = &logits[start..start + vocab_size];
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let log_sum = max + row.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
            let nll = log_sum - row[batch.targets[b][t]];
            total += batch.target_masks[b][t] * nll;
        }
    }

    total
}

fn assert_close(a: f32, b: f32, tolerance: f32) {
    assert!(
        (a - b).abs() < tolerance,
        "値が一致しません: {} vs {}",
        a,
        b
    );
}

#[test]
fn test_zero_masks_give_zero_loss() {
    println!("=== テスト: マスクが全て0なら損失は0 ===");

    let model = small_model(&small_config());
    let mut batch = sample_batch();
    for row in batch.target_masks.iter_mut() {
        row.iter_mut().for_each(|m| *m = 0.0);
    }

    let mut rng = StdRng::seed_from_u64(0);
    let output = model.compute_batch_loss(&batch, &mut rng).unwrap();
    assert_eq!(output.loss_value(), 0.0);
}

#[test]
fn test_single_step_loss_matches_log_softmax() {
    println!("=== テスト: 長さ1の系列の損失 ===");

    let model = small_model(&small_config());
    let batch = Batch {
        inputs: vec![vec![EOS], vec![EOS], vec![3]],
        targets: vec![vec![2], vec![6], vec![EOS]],
        input_masks: vec![vec![1.0]; 3],
        target_masks: vec![vec![1.0]; 3],
    };

    let output = model.score_batch(&batch, EOS).unwrap();
    let dims = output.decoding.logits().dims();
    let expected = reference_loss(
        &to_vec_f32(output.decoding.clone().into_logits()).unwrap(),
        dims,
        &batch,
    );

    assert_eq!(dims, [3, 1, VOCAB_SIZE]);
    assert_close(output.loss_value(), expected, 1e-4);
}

#[test]
fn test_padding_positions_do_not_contribute() {
    println!("=== テスト: 埋め草の位置は損失に寄与しない ===");

    let model = small_model(&small_config());
    let batch = sample_batch();
    let output = model.score_batch(&batch, EOS).unwrap();

    let dims = output.decoding.logits().dims();
    let logits = to_vec_f32(output.decoding.clone().into_logits()).unwrap();
    assert_close(output.loss_value(), reference_loss(&logits, dims, &batch), 1e-4);

    // 埋め草の正解を変えても損失は同じ
    let mut changed = batch.clone();
    changed.targets[1][2] = 6;
    changed.targets[1][3] = 4;
    let changed_output = model.score_batch(&changed, EOS).unwrap();
    assert_close(output.loss_value(), changed_output.loss_value(), 1e-5);
}

#[test]
fn test_training_without_dropout_matches_inference() {
    println!("=== テスト: ドロップアウト0なら訓練パスと推論パスが一致 ===");

    let config = small_config()
        .with_input_dropout(0.0)
        .with_recurrent_dropout(0.0);
    let model = small_model(&config);
    let batch = sample_batch();
    let mut rng = StdRng::seed_from_u64(3);

    let training = model
        .one_batch(&batch, EOS, Mode::Training, &mut rng)
        .unwrap();
    let inference = model
        .one_batch(&batch, EOS, Mode::Inference, &mut rng)
        .unwrap();

    assert_close(training.loss_value(), inference.loss_value(), 1e-5);
}

#[test]
fn test_training_loss_is_finite_with_dropout() {
    let model = small_model(&small_config());
    let batch = sample_batch();
    let mut rng = StdRng::seed_from_u64(11);

    let output = model
        .one_batch(&batch, EOS, Mode::Training, &mut rng)
        .unwrap();
    let loss = output.loss_value();
    assert!(loss.is_finite() && loss > 0.0, "損失が不正: {}", loss);
    assert_eq!(output.decoding.batch_size(), 2);
    assert_eq!(output.decoding.len(), 4);
    assert_eq!(output.decoding.vocab_size(), VOCAB_SIZE);
}

#[test]
fn test_shape_mismatch_is_rejected() {
    println!("=== テスト: 形状の不整合はエラー ===");

    let model = small_model(&small_config());
    let mut rng = StdRng::seed_from_u64(0);

    // マスクのバッチサイズ違い
    let mut batch = sample_batch();
    batch.target_masks.pop();
    let err = model.compute_batch_loss(&batch, &mut rng).unwrap_err();
    assert!(matches!(err, LmError::Shape(_)), "{:?}", err);

    // 長さの揃っていない行
    let mut batch = sample_batch();
    batch.inputs[1].pop();
    let err = model.score_batch(&batch, EOS).unwrap_err();
    assert!(matches!(err, LmError::Shape(_)), "{:?}", err);

    // 空のバッチ
    let batch = Batch {
        inputs: vec![],
        targets: vec![],
        input_masks: vec![],
        target_masks: vec![],
    };
    let err = model.score_batch(&batch, EOS).unwrap_err();
    assert!(matches!(err, LmError::Shape(_)), "{:?}", err);
}

#[test]
fn test_out_of_range_ids_are_rejected() {
    let model = small_model(&small_config());
    let mut rng = StdRng::seed_from_u64(0);

    let mut batch = sample_batch();
    batch.inputs[0][1] = VOCAB_SIZE;
    let err = model.compute_batch_loss(&batch, &mut rng).unwrap_err();
    assert!(matches!(
        err,
        LmError::TokenOutOfRange { id: VOCAB_SIZE, .. }
    ));

    let mut batch = sample_batch();
    batch.targets[1][0] = VOCAB_SIZE + 3;
    let err = model.score_batch(&batch, EOS).unwrap_err();
    assert!(matches!(err, LmError::TokenOutOfRange { .. }));
}

#[test]
fn test_non_finite_mask_is_rejected() {
    let model = small_model(&small_config());
    let mut batch = sample_batch();
    batch.target_masks[0][2] = f32::NAN;

    let err = model.score_batch(&batch, EOS).unwrap_err();
    assert!(matches!(
        err,
        LmError::InvalidMask {
            element: 0,
            position: 2,
            ..
        }
    ));
}

#[test]
fn test_forward_batch_is_deterministic_and_causal() {
    println!("=== テスト: 推論パスの決定性と因果性 ===");

    let model = small_model(&small_config());
    let batch = sample_batch();

    let first = model
        .forward_batch(&batch.inputs, 4, &batch.input_masks, EOS)
        .unwrap();
    let second = model
        .forward_batch(&batch.inputs, 4, &batch.input_masks, EOS)
        .unwrap();
    let full = to_vec_f32(first.into_logits()).unwrap();
    assert_eq!(full, to_vec_f32(second.into_logits()).unwrap());

    // 先頭2時刻だけの結果は全体の先頭2時刻と同じ
    let prefix = model
        .forward_batch(&batch.inputs, 2, &batch.input_masks, EOS)
        .unwrap();
    assert_eq!(prefix.len(), 2);
    let prefix = to_vec_f32(prefix.into_logits()).unwrap();
    for b in 0..2 {
        for t in 0..2 {
            for v in 0..VOCAB_SIZE {
                let a = prefix[(b * 2 + t) * VOCAB_SIZE + v];
                let f = full[(b * 4 + t) * VOCAB_SIZE + v];
                assert!((a - f).abs() < 1e-5, "b={} t={} v={}: {} vs {}", b, t, v, a, f);
            }
        }
    }
}

#[test]
fn test_forward_batch_validates_arguments() {
    let model = small_model(&small_config());
    let batch = sample_batch();

    let err = model
        .forward_batch(&batch.inputs, 0, &batch.input_masks, EOS)
        .unwrap_err();
    assert!(matches!(err, LmError::Shape(_)));

    let err = model
        .forward_batch(&batch.inputs, 5, &batch.input_masks, EOS)
        .unwrap_err();
    assert!(matches!(err, LmError::Shape(_)));

    let err = model
        .forward_batch(&batch.inputs, 4, &batch.input_masks[..1], EOS)
        .unwrap_err();
    assert!(matches!(err, LmError::Shape(_)));

    let err = model
        .forward_batch(&batch.inputs, 4, &batch.input_masks, VOCAB_SIZE)
        .unwrap_err();
    assert!(matches!(err, LmError::TokenOutOfRange { .. }));
}

#[test]
fn test_greedy_ids_are_time_major() {
    let model = small_model(&small_config());
    let batch = sample_batch();
    let decoding = model
        .forward_batch(&batch.inputs, 3, &batch.input_masks, EOS)
        .unwrap();

    let ids = decoding.greedy_ids().unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|step| step.len() == 2));
    assert!(ids.iter().flatten().all(|&id| id < VOCAB_SIZE));
}

#[test]
fn test_invalid_config_is_rejected() {
    println!("=== テスト: 不正な設定はエラー ===");

    let device = Default::default();

    let err = small_config()
        .with_lstm_hidden_dim(0)
        .init::<TestBackend>(&device)
        .unwrap_err();
    assert!(matches!(err, LmError::Config(_)));

    let err = small_config()
        .with_lstm_layers(0)
        .init::<TestBackend>(&device)
        .unwrap_err();
    assert!(matches!(err, LmError::Config(_)));

    let err = small_config()
        .with_recurrent_dropout(1.0)
        .init::<TestBackend>(&device)
        .unwrap_err();
    assert!(matches!(err, LmError::Config(_)));

    let err = small_config()
        .with_input_dropout(-0.1)
        .init::<TestBackend>(&device)
        .unwrap_err();
    assert!(matches!(err, LmError::Config(_)));
}

#[test]
fn test_check_shapes_detects_mismatch() {
    let model = small_model(&small_config());
    assert!(model.check_shapes(&small_config()).is_ok());

    let err = model
        .check_shapes(&small_config().with_lstm_hidden_dim(6))
        .unwrap_err();
    assert!(matches!(err, LmError::Config(_)));
}

/// 入力語彙と出力語彙の大きさが異なるモデル
fn asymmetric_model(vocab_size: usize, out_vocab_size: usize) -> LstmLanguageModel<TestBackend> {
    LanguageModelConfig::new(vocab_size, out_vocab_size)
        .with_input_embedding_dim(4)
        .with_lstm_layers(1)
        .with_lstm_hidden_dim(5)
        .init::<TestBackend>(&Default::default())
        .expect("モデル構築失敗")
}

#[test]
fn test_smaller_output_vocabulary() {
    println!("=== テスト: 出力語彙が入力語彙より小さい場合 ===");

    let model = asymmetric_model(VOCAB_SIZE, 5);
    assert_eq!(model.vocab_size(), VOCAB_SIZE);
    assert_eq!(model.out_vocab_size(), 5);

    // 入力には出力語彙外のID（6）を使える
    let batch = Batch::from_sentences(&[vec![6, 3], vec![4]], EOS);
    let mut fixed = batch.clone();
    fixed.targets[0][0] = 2;
    let output = model.score_batch(&fixed, EOS).unwrap();
    assert_eq!(output.decoding.logits().dims(), [2, 3, 5]);

    // 正解が [out_vocab, vocab) ならエラー
    let err = model.score_batch(&batch, EOS).unwrap_err();
    assert!(matches!(
        err,
        LmError::TokenOutOfRange {
            id: 6,
            vocab_size: 5
        }
    ));

    // 出力語彙は入力語彙に収まるのでサンプリングできる
    let mut rng = StdRng::seed_from_u64(0);
    let samples = model.sample_batch(3, 6, EOS, &mut rng).unwrap();
    assert!(samples.iter().flatten().all(|&id| id < 5));
}

#[test]
fn test_larger_output_vocabulary_cannot_sample() {
    println!("=== テスト: 出力語彙が入力語彙より大きい場合 ===");

    let model = asymmetric_model(3, 8);
    assert_eq!(model.projection().weight_dims(), [5, 8]);

    // どのシードでも最初から設定エラー
    for seed in 0..8 {
        let mut rng = StdRng::seed_from_u64(seed);
        let err = model.sample_batch(2, 5, EOS, &mut rng).unwrap_err();
        assert!(matches!(err, LmError::Config(_)), "{:?}", err);
    }

    // 訓練・スコアリングは可能
    let batch = Batch {
        inputs: vec![vec![EOS, 2]],
        targets: vec![vec![7, EOS]],
        input_masks: vec![vec![1.0, 1.0]],
        target_masks: vec![vec![1.0, 1.0]],
    };
    let output = model.score_batch(&batch, EOS).unwrap();
    assert!(output.loss_value().is_finite());
    assert_eq!(output.decoding.vocab_size(), 8);
}

#[test]
fn test_check_shapes_detects_output_vocabulary_mismatch() {
    let model = asymmetric_model(VOCAB_SIZE, 5);
    let config = LanguageModelConfig::new(VOCAB_SIZE, 6)
        .with_input_embedding_dim(4)
        .with_lstm_layers(1)
        .with_lstm_hidden_dim(5);

    let err = model.check_shapes(&config).unwrap_err();
    assert!(matches!(err, LmError::Config(_)));
}
