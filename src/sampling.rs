use crate::error::{LmError, Result};
use rand::Rng;

/// 累積分布から draw を超える最小のIDを選ぶ（逆CDF法）
///
/// draw が先頭の累積確率より小さければ 0 を返す。丸め誤差で draw が
/// 総和以上になった場合は確率が 0 でない最後のIDを返す。
pub fn select_from_cdf(probs: &[f32], draw: f32) -> Option<usize> {
    let mut cumulative = 0.0_f32;
    let mut last_nonzero = None;

    for (id, &p) in probs.iter().enumerate() {
        cumulative += p;
        if p > 0.0 {
            last_nonzero = Some(id);
        }
        if cumulative > draw {
            return Some(id);
        }
    }

    last_nonzero
}

fn check_distribution(element: usize, probs: &[f32]) -> Result<()> {
    let invalid = |reason: String| LmError::Distribution { element, reason };

    if probs.is_empty() {
        return Err(invalid("語彙が空です".to_string()));
    }
    if let Some((id, &p)) = probs
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || **p < 0.0)
    {
        return Err(invalid(format!("ID {} の確率が不正です: {}", id, p)));
    }

    let total: f32 = probs.iter().sum();
    if total <= 0.0 {
        return Err(invalid("確率の総和が 0 です".to_string()));
    }
    Ok(())
}

/// 行優先の確率行列 [batch, vocab_size] から各行1つずつIDを引く
pub fn sample_rows<R: Rng + ?Sized>(
    probs: &[f32],
    vocab_size: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if vocab_size == 0 || probs.len() % vocab_size != 0 {
        return Err(LmError::Shape(format!(
            "確率行列の要素数 {} が語彙サイズ {} の倍数ではありません",
            probs.len(),
            vocab_size
        )));
    }

    probs
        .chunks(vocab_size)
        .enumerate()
        .map(|(element, row)| {
            check_distribution(element, row)?;
            let draw = rng.gen::<f32>();
            select_from_cdf(row, draw).ok_or_else(|| LmError::Distribution {
                element,
                reason: format!("draw {} に対応するIDがありません", draw),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_select_from_cdf_uniform_boundaries() {
        let uniform = [0.25_f32; 4];
        assert_eq!(select_from_cdf(&uniform, 0.0), Some(0));
        assert_eq!(select_from_cdf(&uniform, 0.25), Some(1));
        assert_eq!(select_from_cdf(&uniform, 0.74), Some(2));
        assert_eq!(select_from_cdf(&uniform, 1.0 - f32::EPSILON), Some(3));
    }

    #[test]
    fn test_select_from_cdf_never_goes_below_zero() {
        let probs = [0.9_f32, 0.1];
        assert_eq!(select_from_cdf(&probs, 0.0), Some(0));
        assert_eq!(select_from_cdf(&probs, 0.5), Some(0));
    }

    #[test]
    fn test_select_from_cdf_rounding_falls_back_to_last_nonzero() {
        // 総和が 1 に届かない分布
        let probs = [0.3_f32, 0.3, 0.3, 0.0];
        assert_eq!(select_from_cdf(&probs, 0.95), Some(2));
    }

    #[test]
    fn test_sample_rows_rejects_malformed_distribution() {
        let mut rng = StdRng::seed_from_u64(0);
        let probs = [0.5_f32, 0.5, f32::NAN, 1.0];
        let err = sample_rows(&probs, 2, &mut rng).unwrap_err();
        assert!(matches!(err, LmError::Distribution { element: 1, .. }));

        let zeros = [0.0_f32; 3];
        assert!(sample_rows(&zeros, 3, &mut rng).is_err());
    }

    #[test]
    fn test_sample_rows_one_id_per_row() {
        let mut rng = StdRng::seed_from_u64(7);
        // 行ごとに確率 1 のIDを置く
        let probs = [0.0_f32, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        assert_eq!(sample_rows(&probs, 3, &mut rng).unwrap(), vec![1, 0, 2]);
    }
}
