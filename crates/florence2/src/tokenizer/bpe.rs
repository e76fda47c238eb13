// Byte-pair merging over byte-level symbols
//
// merges.txt format:
//   #version: 0.2          <- header line
//   Ġ t                    <- rank 0
//   Ġ a                    <- rank 1
//   ...
// Lower rank merges first.

use crate::error::{Florence2Error, Result};
use std::collections::HashMap;

/// Merge rules: ordered symbol pair -> rank
#[derive(Debug, Clone, Default)]
pub struct MergeRanks {
    ranks: HashMap<(String, String), usize>,
}

impl MergeRanks {
    /// Build from pairs in rank order
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut ranks = HashMap::new();
        for (rank, pair) in pairs.into_iter().enumerate() {
            // First occurrence wins, like a dict built from the file in order
            ranks.entry(pair).or_insert(rank);
        }
        Self { ranks }
    }

    /// Parse the contents of `merges.txt`
    ///
    /// The first line is a header when it starts with `#`; blank lines are ignored.
    /// Each remaining line must hold exactly two whitespace-separated symbols.
    pub fn parse(text: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line_no == 0 && line.starts_with('#') {
                continue;
            }
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(left), Some(right), None) => {
                    pairs.push((left.to_string(), right.to_string()));
                }
                _ => {
                    return Err(Florence2Error::config(format!(
                        "Malformed merge rule on line {}: {line:?}",
                        line_no + 1
                    )));
                }
            }
        }
        Ok(Self::from_pairs(pairs))
    }

    #[inline]
    #[must_use = "returns the merge rank, if any"]
    pub fn rank(&self, left: &str, right: &str) -> Option<usize> {
        // Tuple keys of owned strings need an owned lookup key
        self.ranks.get(&(left.to_string(), right.to_string())).copied()
    }

    #[inline]
    #[must_use = "returns the number of merge rules"]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    #[inline]
    #[must_use = "returns whether there are no merge rules"]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Memo of `byte_pair_encode` results, owned by one tokenizer instance
#[derive(Debug, Clone, Default)]
pub struct BpeCache {
    entries: HashMap<String, String>,
}

impl BpeCache {
    #[inline]
    #[must_use = "returns the cached merge result, if any"]
    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(String::as_str)
    }

    #[inline]
    pub fn insert(&mut self, token: String, merged: String) {
        self.entries.insert(token, merged);
    }

    #[inline]
    #[must_use = "returns the number of cached tokens"]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use = "returns whether the cache is empty"]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge the characters of a byte-encoded `token` by rank
///
/// Repeatedly picks the adjacent pair with the lowest rank and merges every
/// non-overlapping occurrence of it, left to right, until no adjacent pair has a
/// rank or a single symbol remains. Returns the final symbols joined by spaces.
#[must_use = "returns the merged symbols"]
pub fn merge_symbols(token: &str, ranks: &MergeRanks) -> String {
    let mut symbols: Vec<String> = token.chars().map(String::from).collect();

    while symbols.len() > 1 {
        let best = symbols
            .windows(2)
            .filter_map(|pair| ranks.rank(&pair[0], &pair[1]).map(|rank| (rank, pair)))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, pair)| (pair[0].clone(), pair[1].clone()));

        let Some((left, right)) = best else {
            break;
        };

        let mut merged = Vec::with_capacity(symbols.len());
        let mut i = 0;
        while i < symbols.len() {
            if i + 1 < symbols.len() && symbols[i] == left && symbols[i + 1] == right {
                merged.push(format!("{left}{right}"));
                i += 2;
            } else {
                merged.push(std::mem::take(&mut symbols[i]));
                i += 1;
            }
        }
        symbols = merged;
    }

    symbols.join(" ")
}
