use crate::batch::Batch;
use crate::error::Result;
use crate::vocabulary::Vocabulary;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::Path;

/// 言語モデル用コーパス（1行1文をトークンID列にしたもの）
pub struct LmCorpus {
    pub sentences: Vec<Vec<usize>>,
}

impl LmCorpus {
    /// テキストファイルを読み込む
    pub fn load(vocab: &Vocabulary, path: &Path, max_sentence_len: usize) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let corpus = Self::from_lines(vocab, content.lines(), max_sentence_len);
        log::info!("コーパス読み込み: {} ({}文)", path.display(), corpus.len());
        Ok(corpus)
    }

    /// 行の並びからコーパスを作る（空行とコメント行はスキップ、長い文は切り詰め）
    pub fn from_lines<'a, I>(vocab: &Vocabulary, lines: I, max_sentence_len: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sentences = Vec::new();

        for line in lines {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = vocab.encode(line);
            if tokens.is_empty() {
                log::warn!("トークンが空の行をスキップ: {}", line);
                continue;
            }
            if tokens.len() > max_sentence_len {
                log::debug!("{}トークンに切り詰め: {}", max_sentence_len, line);
                tokens.truncate(max_sentence_len);
            }

            sentences.push(tokens);
        }

        Self { sentences }
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// 先頭から順にバッチを作る
    pub fn batches(&self, batch_size: usize, eos_id: usize) -> Vec<Batch> {
        self.sentences
            .chunks(batch_size.max(1))
            .map(|chunk| Batch::from_sentences(chunk, eos_id))
            .collect()
    }

    /// 文の順番をシャッフルしてからバッチを作る
    pub fn shuffled_batches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        eos_id: usize,
        rng: &mut R,
    ) -> Vec<Batch> {
        let mut order: Vec<&[usize]> = self.sentences.iter().map(Vec::as_slice).collect();
        order.shuffle(rng);

        order
            .chunks(batch_size.max(1))
            .map(|chunk| Batch::from_sentences(chunk, eos_id))
            .collect()
    }
}
