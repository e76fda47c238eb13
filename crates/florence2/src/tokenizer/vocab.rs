// Vocabulary: bidirectional token string <-> id map
//
// Base vocabulary comes from vocab.json; added_tokens.json (location tokens,
// task tokens, <poly>, <sep>, ...) is merged on top. Both the five BART special
// tokens and every added token are "atomic": the tokenizer never splits them.

use crate::error::{Florence2Error, Result};
use std::collections::HashMap;

/// Beginning-of-sequence token
pub const BOS_TOKEN: &str = "<s>";
/// Padding token
pub const PAD_TOKEN: &str = "<pad>";
/// End-of-sequence token (also the decoder start token)
pub const EOS_TOKEN: &str = "</s>";
/// Unknown token
pub const UNK_TOKEN: &str = "<unk>";
/// Mask token
pub const MASK_TOKEN: &str = "<mask>";

/// The fixed special tokens, in id order of the BART vocabulary
pub const SPECIAL_TOKENS: [&str; 5] = [BOS_TOKEN, PAD_TOKEN, EOS_TOKEN, UNK_TOKEN, MASK_TOKEN];

/// Resolved ids of the special tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenIds {
    pub bos: i64,
    pub pad: i64,
    pub eos: i64,
    pub unk: i64,
    pub mask: i64,
}

/// Token string <-> id mapping
#[derive(Debug, Clone)]
pub struct Vocabulary {
    token_to_id: HashMap<String, i64>,
    id_to_token: HashMap<i64, String>,
    /// Added tokens, kept atomic during tokenization
    added_tokens: Vec<String>,
    special: SpecialTokenIds,
}

impl Vocabulary {
    /// Build a vocabulary from the base map and the optional added-token map
    ///
    /// Added tokens override base entries with the same string. Fails if any of
    /// the five special tokens is absent.
    pub fn new(base: HashMap<String, i64>, added: HashMap<String, i64>) -> Result<Self> {
        let mut token_to_id = base;
        let mut added_tokens: Vec<(String, i64)> = added.into_iter().collect();
        added_tokens.sort_by_key(|(_, id)| *id);

        for (token, id) in &added_tokens {
            token_to_id.insert(token.clone(), *id);
        }

        let id_to_token = token_to_id
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();

        let lookup = |token: &str| {
            token_to_id.get(token).copied().ok_or_else(|| {
                Florence2Error::config(format!(
                    "Special token '{token}' is missing from the vocabulary"
                ))
            })
        };
        let special = SpecialTokenIds {
            bos: lookup(BOS_TOKEN)?,
            pad: lookup(PAD_TOKEN)?,
            eos: lookup(EOS_TOKEN)?,
            unk: lookup(UNK_TOKEN)?,
            mask: lookup(MASK_TOKEN)?,
        };

        Ok(Self {
            token_to_id,
            id_to_token,
            added_tokens: added_tokens.into_iter().map(|(token, _)| token).collect(),
            special,
        })
    }

    #[inline]
    #[must_use = "returns the token id, if present"]
    pub fn token_to_id(&self, token: &str) -> Option<i64> {
        self.token_to_id.get(token).copied()
    }

    #[inline]
    #[must_use = "returns the token string, if the id is mapped"]
    pub fn id_to_token(&self, id: i64) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Number of distinct token strings
    #[inline]
    #[must_use = "returns the vocabulary size"]
    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    #[inline]
    #[must_use = "returns whether the vocabulary is empty"]
    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    #[inline]
    #[must_use = "returns the special token ids"]
    pub const fn special_ids(&self) -> SpecialTokenIds {
        self.special
    }

    /// Whether `token` is one of the five fixed special tokens
    #[inline]
    #[must_use = "returns whether the token is special"]
    pub fn is_special_token(&self, token: &str) -> bool {
        SPECIAL_TOKENS.contains(&token)
    }

    /// Tokens that must never be split: the special tokens plus every added token
    #[must_use = "returns the atomic token list"]
    pub fn atomic_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = SPECIAL_TOKENS.iter().map(|t| (*t).to_string()).collect();
        for token in &self.added_tokens {
            if !tokens.contains(token) {
                tokens.push(token.clone());
            }
        }
        tokens
    }
}
