//! Miniature BART-style tokenizer artifacts
//!
//! Vocabulary layout:
//! - 0..=3: `<s>`, `<pad>`, `</s>`, `<unk>`
//! - one entry per byte-level character
//! - merged words: `he`, `ll`, `hell`, `hello`, `Ġw`, `or`, `Ġwor`, `ld`, `Ġworld`, `ca`, `cat`
//! - `<mask>`
//! - added tokens: `<loc_0>`..`<loc_999>`, `<poly>`, `</poly>`

use florence2::tokenizer::byte_level::byte_to_char;
use florence2::tokenizer::{MergeRanks, Vocabulary};
use florence2::BartTokenizer;
use std::collections::HashMap;
use std::path::Path;

/// Merge rules in rank order
pub const MERGES: [(&str, &str); 11] = [
    ("h", "e"),
    ("l", "l"),
    ("he", "ll"),
    ("hell", "o"),
    ("Ġ", "w"),
    ("o", "r"),
    ("Ġw", "or"),
    ("l", "d"),
    ("Ġwor", "ld"),
    ("c", "a"),
    ("ca", "t"),
];

const MERGED_TOKENS: [&str; 11] = [
    "he", "ll", "hell", "hello", "Ġw", "or", "Ġwor", "ld", "Ġworld", "ca", "cat",
];

pub fn base_vocab() -> HashMap<String, i64> {
    let mut vocab: HashMap<String, i64> = [("<s>", 0), ("<pad>", 1), ("</s>", 2), ("<unk>", 3)]
        .into_iter()
        .map(|(t, id)| (t.to_string(), id))
        .collect();
    let mut next = 4;
    for byte in 0u8..=255 {
        vocab.insert(byte_to_char(byte).to_string(), next);
        next += 1;
    }
    for token in MERGED_TOKENS {
        vocab.insert(token.to_string(), next);
        next += 1;
    }
    vocab.insert("<mask>".to_string(), next);
    vocab
}

pub fn added_tokens() -> HashMap<String, i64> {
    let start = base_vocab().len() as i64;
    let mut added: HashMap<String, i64> = (0..1000)
        .map(|i| (format!("<loc_{i}>"), start + i))
        .collect();
    added.insert("<poly>".to_string(), start + 1000);
    added.insert("</poly>".to_string(), start + 1001);
    added
}

pub fn merges_text() -> String {
    let mut text = String::from("#version: 0.2\n");
    for (left, right) in MERGES {
        text.push_str(&format!("{left} {right}\n"));
    }
    text
}

/// Tokenizer built in memory
pub fn fixture_tokenizer() -> BartTokenizer {
    let merges = MergeRanks::parse(&merges_text()).expect("fixture merges parse");
    let vocab = Vocabulary::new(base_vocab(), added_tokens()).expect("fixture vocab is complete");
    BartTokenizer::from_parts(vocab, merges).expect("fixture tokenizer builds")
}

/// Write `vocab.json`, `merges.txt` and optionally `added_tokens.json` into `dir`
pub fn write_metadata(dir: &Path, with_added_tokens: bool) {
    std::fs::write(
        dir.join("vocab.json"),
        serde_json::to_string(&base_vocab()).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.join("merges.txt"), merges_text()).unwrap();
    if with_added_tokens {
        std::fs::write(
            dir.join("added_tokens.json"),
            serde_json::to_string(&added_tokens()).unwrap(),
        )
        .unwrap();
    }
}

/// Id of `token` in the fixture vocabulary
pub fn id_of(tokenizer: &BartTokenizer, token: &str) -> i64 {
    tokenizer
        .token_to_id(token)
        .unwrap_or_else(|| panic!("fixture vocabulary has no {token:?}"))
}
