use crate::config::{EOS_SYMBOL, UNK_SYMBOL};
use crate::error::{LmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// トークン化の単位
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tokenization {
    /// 空白区切りの単語単位
    #[default]
    Words,
    /// 1文字単位
    Chars,
}

impl Tokenization {
    pub fn split(self, text: &str) -> Vec<String> {
        match self {
            Tokenization::Words => text.split_whitespace().map(str::to_string).collect(),
            Tokenization::Chars => text
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(String::from)
                .collect(),
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Tokenization::Words => " ",
            Tokenization::Chars => "",
        }
    }
}

/// vocab.json の中身
#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    tokenization: Tokenization,
    symbols: Vec<String>,
}

/// トークンID ↔ シンボルの対応表
#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub symbol_to_id: HashMap<String, usize>,
    pub id_to_symbol: Vec<String>,
    pub vocab_size: usize,
    pub eos_id: usize, // End of Sequence（サンプリングの開始記号を兼ねる）
    pub unk_id: usize, // Unknown
    pub tokenization: Tokenization,
}

impl Vocabulary {
    /// シンボル列から語彙を作る（IDは並び順）
    pub fn from_symbols(symbols: Vec<String>, tokenization: Tokenization) -> Result<Self> {
        let mut symbol_to_id = HashMap::with_capacity(symbols.len());
        for (id, symbol) in symbols.iter().enumerate() {
            if symbol_to_id.insert(symbol.clone(), id).is_some() {
                return Err(LmError::Config(format!("語彙に重複したシンボルがあります: {}", symbol)));
            }
        }

        let lookup = |symbol: &str| {
            symbol_to_id
                .get(symbol)
                .copied()
                .ok_or_else(|| LmError::Config(format!("語彙に {} がありません", symbol)))
        };
        let eos_id = lookup(EOS_SYMBOL)?;
        let unk_id = lookup(UNK_SYMBOL)?;

        Ok(Self {
            vocab_size: symbols.len(),
            symbol_to_id,
            id_to_symbol: symbols,
            eos_id,
            unk_id,
            tokenization,
        })
    }

    /// コーパスから語彙を構築
    pub fn from_corpus<'a, I>(lines: I, tokenization: Tokenization) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        // 特殊トークン
        let mut symbols = vec![EOS_SYMBOL.to_string(), UNK_SYMBOL.to_string()]; // ID 0, 1

        // ソートして再現性を保つ
        let unique: BTreeSet<String> = lines
            .into_iter()
            .flat_map(|line| tokenization.split(line))
            .filter(|token| token != EOS_SYMBOL && token != UNK_SYMBOL)
            .collect();
        symbols.extend(unique);

        let symbol_to_id = symbols
            .iter()
            .enumerate()
            .map(|(id, symbol)| (symbol.clone(), id))
            .collect();

        Self {
            vocab_size: symbols.len(),
            symbol_to_id,
            id_to_symbol: symbols,
            eos_id: 0,
            unk_id: 1,
            tokenization,
        }
    }

    /// テキストをトークンIDに変換（未知語は <unk>）
    pub fn encode(&self, text: &str) -> Vec<usize> {
        self.tokenization
            .split(text)
            .iter()
            .map(|token| self.symbol_to_id.get(token).copied().unwrap_or(self.unk_id))
            .collect()
    }

    pub fn symbol(&self, id: usize) -> Result<&str> {
        self.id_to_symbol
            .get(id)
            .map(String::as_str)
            .ok_or(LmError::TokenOutOfRange {
                id,
                vocab_size: self.vocab_size,
            })
    }

    /// トークンID列をシンボル列に変換
    pub fn decode(&self, ids: &[usize]) -> Result<Vec<&str>> {
        ids.iter().map(|&id| self.symbol(id)).collect()
    }

    /// シンボル列をトークン化の単位に合わせて連結する
    pub fn join(&self, symbols: &[&str]) -> String {
        symbols.join(self.tokenization.separator())
    }

    /// トークンID列を文字列に戻す
    pub fn render(&self, ids: &[usize]) -> Result<String> {
        Ok(self.join(&self.decode(ids)?))
    }

    /// 最初の <eos> の手前で切る
    pub fn truncate_at_eos<'a>(&self, ids: &'a [usize]) -> &'a [usize] {
        match ids.iter().position(|&id| id == self.eos_id) {
            Some(end) => &ids[..end],
            None => ids,
        }
    }

    /// 時刻優先のID列（[時刻][バッチ]）をバッチ優先のシンボル列に並べ替える
    pub fn to_sequence_batch(&self, decoding: &[Vec<usize>]) -> Result<Vec<Vec<&str>>> {
        let batch_size = match decoding.first() {
            Some(step) => step.len(),
            None => return Ok(Vec::new()),
        };

        if let Some((t, step)) = decoding
            .iter()
            .enumerate()
            .find(|(_, step)| step.len() != batch_size)
        {
            return Err(LmError::Shape(format!(
                "時刻 {} のバッチサイズ {} が先頭のバッチサイズ {} と一致しません",
                t,
                step.len(),
                batch_size
            )));
        }

        (0..batch_size)
            .map(|i| decoding.iter().map(|step| self.symbol(step[i])).collect())
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = VocabularyFile {
            tokenization: self.tokenization,
            symbols: self.id_to_symbol.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let file: VocabularyFile = serde_json::from_str(&content)?;
        Self::from_symbols(file.symbols, file.tokenization)
    }
}
