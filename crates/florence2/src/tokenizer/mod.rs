//! # Tokenizer - byte-level BPE for Florence-2 prompts and outputs
//!
//! Florence-2 uses the BART tokenizer: GPT-2 byte-level BPE with a vocabulary of
//! 50265 base entries plus ~1000 added tokens (`<loc_0>`..`<loc_999>`, task tokens,
//! `<poly>`, `</poly>`, `<sep>`).
//!
//! ## Pipeline
//!
//! 1. Split on atomic tokens (special + added), leftmost-longest
//! 2. Pre-tokenize the remaining spans with the GPT-2 regex
//! 3. Map each span's UTF-8 bytes through the byte-level table
//! 4. Merge symbols by rank ([`bpe::merge_symbols`]), memoized per tokenizer
//! 5. Look up ids, falling back to `<unk>`
//!
//! ## Artifacts
//!
//! - `vocab.json` (string -> id)
//! - `merges.txt` (header line, then one `left right` pair per line)
//! - `added_tokens.json` (optional, string -> id)

pub mod bpe;
pub mod byte_level;
pub mod vocab;

pub use bpe::{BpeCache, MergeRanks};
pub use vocab::{SpecialTokenIds, Vocabulary};

use crate::config::{ADDED_TOKENS_FILE, MERGES_FILE, VOCAB_FILE};
use crate::error::{Florence2Error, Result};
use aho_corasick::{AhoCorasick, MatchKind};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

/// Leading ids dropped by [`BartTokenizer::decode`]: the `<s>` the decoder emits first
pub const DECODE_SKIP_LEADING: usize = 1;

/// GPT-2 pre-tokenizer pattern: contractions, letter runs, digit runs,
/// punctuation runs, trailing whitespace, other whitespace
const PRETOKENIZE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

static PRETOKENIZE_RE: Lazy<fancy_regex::Regex> = Lazy::new(|| {
    fancy_regex::Regex::new(PRETOKENIZE_PATTERN).expect("valid GPT-2 pre-tokenizer regex")
});

/// Byte-level BPE tokenizer
pub struct BartTokenizer {
    vocab: Vocabulary,
    merges: MergeRanks,
    atomic_matcher: Option<AhoCorasick>,
    cache: BpeCache,
}

impl std::fmt::Debug for BartTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BartTokenizer")
            .field("vocab_size", &self.vocab.len())
            .field("merges", &self.merges.len())
            .field("special_ids", &self.vocab.special_ids())
            .field("cached_tokens", &self.cache.len())
            .finish()
    }
}

impl BartTokenizer {
    /// Load `vocab.json`, `merges.txt` and the optional `added_tokens.json`
    ///
    /// Fails with a [`Florence2Error::ConfigError`] naming the path when the
    /// vocabulary or merges artifact is missing or unparseable, or when an
    /// existing `added_tokens.json` cannot be read or parsed.
    pub async fn load<P: AsRef<Path>>(metadata_dir: P) -> Result<Self> {
        let metadata_dir = metadata_dir.as_ref();
        log::info!("Loading tokenizer from {}", metadata_dir.display());

        let vocab_path = metadata_dir.join(VOCAB_FILE);
        let vocab_text = read_required(&vocab_path).await?;
        let base = parse_token_map(&vocab_text, &vocab_path)?;

        let merges_path = metadata_dir.join(MERGES_FILE);
        let merges_text = read_required(&merges_path).await?;
        let merges = MergeRanks::parse(&merges_text).map_err(|e| {
            Florence2Error::config(format!("{}: {e}", merges_path.display()))
        })?;

        let added_path = metadata_dir.join(ADDED_TOKENS_FILE);
        let added_present = tokio::fs::try_exists(&added_path).await.map_err(|e| {
            Florence2Error::config(format!(
                "Failed to check tokenizer artifact {}: {e}",
                added_path.display()
            ))
        })?;
        let added = if added_present {
            let text = read_required(&added_path).await?;
            parse_token_map(&text, &added_path)?
        } else {
            log::debug!("No {} found, using base vocabulary only", ADDED_TOKENS_FILE);
            HashMap::new()
        };

        let tokenizer = Self::from_parts(Vocabulary::new(base, added)?, merges)?;
        log::debug!("Tokenizer loaded: {tokenizer:?}");
        Ok(tokenizer)
    }

    /// Build a tokenizer from an already-parsed vocabulary and merge table
    pub fn from_parts(vocab: Vocabulary, merges: MergeRanks) -> Result<Self> {
        let atomic = vocab.atomic_tokens();
        let atomic_matcher = if atomic.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&atomic)
                    .map_err(|e| {
                        Florence2Error::config(format!("Invalid special token set: {e}"))
                    })?,
            )
        };

        Ok(Self {
            vocab,
            merges,
            atomic_matcher,
            cache: BpeCache::default(),
        })
    }

    /// Split `text` into vocabulary token strings
    ///
    /// Atomic tokens are kept whole; every other span is pre-tokenized,
    /// byte-encoded and merged.
    pub fn tokenize(&mut self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut last = 0;

        let matches: Vec<(usize, usize)> = self
            .atomic_matcher
            .as_ref()
            .map(|ac| ac.find_iter(text).map(|m| (m.start(), m.end())).collect())
            .unwrap_or_default();

        for (start, end) in matches {
            if start > last {
                self.tokenize_span(&text[last..start], &mut tokens);
            }
            tokens.push(text[start..end].to_string());
            last = end;
        }
        if last < text.len() {
            self.tokenize_span(&text[last..], &mut tokens);
        }
        tokens
    }

    fn tokenize_span(&mut self, span: &str, tokens: &mut Vec<String>) {
        for piece in PRETOKENIZE_RE.find_iter(span) {
            let piece = match piece {
                Ok(m) => m.as_str(),
                Err(e) => {
                    // Backtracking limit; the pattern is linear in practice
                    log::warn!("Pre-tokenizer failed on span {span:?}: {e}");
                    continue;
                }
            };
            let encoded = byte_level::encode_bytes(piece);
            let merged = self.byte_pair_encode(&encoded);
            tokens.extend(merged.split(' ').map(str::to_string));
        }
    }

    /// Merge a byte-encoded token by rank; results are memoized per tokenizer
    pub fn byte_pair_encode(&mut self, token: &str) -> String {
        if let Some(hit) = self.cache.get(token) {
            return hit.to_string();
        }
        let merged = bpe::merge_symbols(token, &self.merges);
        self.cache.insert(token.to_string(), merged.clone());
        merged
    }

    /// Look up token ids; unknown tokens map to `<unk>`
    #[must_use = "returns the token ids"]
    pub fn convert_tokens_to_ids<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<i64> {
        let unk = self.vocab.special_ids().unk;
        tokens
            .iter()
            .map(|t| self.vocab.token_to_id(t.as_ref()).unwrap_or(unk))
            .collect()
    }

    /// Tokenize and convert `text`, optionally lowercasing it first
    ///
    /// No `<s>`/`</s>` are added; see [`encode_prompt`](Self::encode_prompt).
    pub fn encode(&mut self, text: &str, lowercase: bool) -> Vec<i64> {
        let tokens = if lowercase {
            self.tokenize(&text.to_lowercase())
        } else {
            self.tokenize(text)
        };
        self.convert_tokens_to_ids(&tokens)
    }

    /// Encode a model prompt as `<s> text </s>`
    pub fn encode_prompt(&mut self, text: &str) -> Vec<i64> {
        let special = self.vocab.special_ids();
        let mut ids = Vec::with_capacity(text.len() / 3 + 2);
        ids.push(special.bos);
        ids.extend(self.encode(text, false));
        ids.push(special.eos);
        ids
    }

    /// Convert generated ids back to text
    ///
    /// Drops the first [`DECODE_SKIP_LEADING`] ids, ignores ids with no token,
    /// optionally drops special tokens, joins tokens with single spaces and maps
    /// characters back to bytes. Characters outside the byte table (including the
    /// joining spaces) contribute no bytes; invalid UTF-8 is replaced.
    #[must_use = "returns the decoded text"]
    pub fn decode(&self, ids: &[i64], skip_special: bool) -> String {
        let tokens: Vec<&str> = ids
            .iter()
            .skip(DECODE_SKIP_LEADING)
            .filter_map(|&id| self.vocab.id_to_token(id))
            .filter(|token| !(skip_special && self.vocab.is_special_token(token)))
            .collect();

        let joined = tokens.join(" ");
        String::from_utf8_lossy(&byte_level::decode_chars(&joined)).into_owned()
    }

    #[inline]
    #[must_use = "returns the special token ids"]
    pub const fn special_ids(&self) -> SpecialTokenIds {
        self.vocab.special_ids()
    }

    #[inline]
    #[must_use = "returns the <s> id"]
    pub const fn bos_id(&self) -> i64 {
        self.vocab.special_ids().bos
    }

    #[inline]
    #[must_use = "returns the </s> id"]
    pub const fn eos_id(&self) -> i64 {
        self.vocab.special_ids().eos
    }

    #[inline]
    #[must_use = "returns the <pad> id"]
    pub const fn pad_id(&self) -> i64 {
        self.vocab.special_ids().pad
    }

    #[inline]
    #[must_use = "returns the <unk> id"]
    pub const fn unk_id(&self) -> i64 {
        self.vocab.special_ids().unk
    }

    #[inline]
    #[must_use = "returns the vocabulary"]
    pub const fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    #[inline]
    #[must_use = "returns the vocabulary size"]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    #[inline]
    #[must_use = "returns the token id, if present"]
    pub fn token_to_id(&self, token: &str) -> Option<i64> {
        self.vocab.token_to_id(token)
    }

    #[inline]
    #[must_use = "returns the token string, if the id is mapped"]
    pub fn id_to_token(&self, id: i64) -> Option<&str> {
        self.vocab.id_to_token(id)
    }

    /// Number of memoized BPE results
    #[inline]
    #[must_use = "returns the number of cached tokens"]
    pub fn cached_tokens(&self) -> usize {
        self.cache.len()
    }
}

async fn read_required(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        Florence2Error::config(format!(
            "Failed to read tokenizer artifact {}: {e}",
            path.display()
        ))
    })
}

fn parse_token_map(text: &str, path: &Path) -> Result<HashMap<String, i64>> {
    serde_json::from_str(text).map_err(|e| {
        Florence2Error::config(format!(
            "Failed to parse token map {}: {e}",
            path.display()
        ))
    })
}
