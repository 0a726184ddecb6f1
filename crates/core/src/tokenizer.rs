//! Prompt tokenizer and special-token registry.
//!
//! Wraps a `tokenizers` vocabulary and resolves the conversational control
//! tokens once at construction into a fixed set of named fields. A missing
//! token fails construction immediately instead of surfacing as a lookup
//! miss mid-inference.

use std::path::Path;

use thiserror::Error;
use tokenizers::Tokenizer;

use crate::packing::{self, PackedBatch, PackingError};

/// Errors from tokenizer construction and encoding.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("tokenizer load: {0}")]
    Load(String),

    /// A required control token is absent from the vocabulary. Fatal at
    /// construction.
    #[error("required special token '{token}' not found in vocabulary")]
    MissingSpecialToken { token: String },

    #[error("encode: {0}")]
    Encode(String),

    #[error(transparent)]
    Packing(#[from] PackingError),
}

/// Begin of turn.
pub const TURN_BEGIN_TOKEN: &str = "<|BOT|>";
/// End of turn.
pub const TURN_END_TOKEN: &str = "<|EOT|>";
pub const CALL_BEGIN_TOKEN: &str = "<|CALL_START|>";
pub const CALL_END_TOKEN: &str = "<|CALL_END|>";
pub const THINK_BEGIN_TOKEN: &str = "<|THINK_START|>";
pub const THINK_END_TOKEN: &str = "<|THINK_END|>";

/// Control-token ids resolved from the vocabulary, immutable after
/// construction, plus the fixed begin/end/pad triple used for generation
/// batching (`[bos, ..., eos, pad, pad, ...]` row layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenSet {
    pub turn_begin: u32,
    pub turn_end: u32,
    pub call_begin: u32,
    pub call_end: u32,
    pub think_begin: u32,
    pub think_end: u32,
    /// Row prefix for generation batching.
    pub bos: u32,
    /// Row terminator; doubles as the pad id in this vocabulary.
    pub eos: u32,
    pub pad: u32,
}

/// A batch of encoded prompts: the padded layout the mask refers to, and
/// the packed stream the distributed kernels consume.
#[derive(Debug, Clone)]
pub struct EncodedPrompts {
    pub padded_ids: Vec<Vec<u32>>,
    /// Suffix-run masks: 1 = valid, 0 = pad.
    pub attention_mask: Vec<Vec<u8>>,
    pub packed: PackedBatch,
}

/// Vocabulary-backed prompt encoder for the caption path.
#[derive(Debug)]
pub struct PromptTokenizer {
    inner: Tokenizer,
    specials: SpecialTokenSet,
}

impl PromptTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
        let inner = Tokenizer::from_file(path).map_err(|e| TokenizerError::Load(e.to_string()))?;
        Self::from_tokenizer(inner)
    }

    /// Resolve the special-token registry, failing fast on any gap.
    pub fn from_tokenizer(inner: Tokenizer) -> Result<Self, TokenizerError> {
        let resolve = |token: &str| {
            inner
                .token_to_id(token)
                .ok_or_else(|| TokenizerError::MissingSpecialToken {
                    token: token.to_string(),
                })
        };

        let specials = SpecialTokenSet {
            turn_begin: resolve(TURN_BEGIN_TOKEN)?,
            turn_end: resolve(TURN_END_TOKEN)?,
            call_begin: resolve(CALL_BEGIN_TOKEN)?,
            call_end: resolve(CALL_END_TOKEN)?,
            think_begin: resolve(THINK_BEGIN_TOKEN)?,
            think_end: resolve(THINK_END_TOKEN)?,
            // Generation batching convention of the caption vocabulary:
            // bos=1, eos=2, and eos reused as pad.
            bos: 1,
            eos: 2,
            pad: 2,
        };

        Ok(Self { inner, specials })
    }

    pub fn special_tokens(&self) -> &SpecialTokenSet {
        &self.specials
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Deterministic encoding of raw text, without generation wrapping.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| TokenizerError::Encode(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        self.inner
            .decode(ids, true)
            .map_err(|e| TokenizerError::Encode(e.to_string()))
    }

    /// Encode prompts into fixed-width rows and the packed stream.
    ///
    /// Each prompt is truncated to `max_length - 2`, wrapped as
    /// `[bos, tokens.., eos]`, and padded to `max_length`; the mask is a
    /// run of 1s then 0s. An empty prompt list still yields one
    /// `[bos, eos]` row so downstream shapes stay well-formed.
    pub fn encode_batch(
        &self,
        prompts: &[String],
        max_length: usize,
    ) -> Result<EncodedPrompts, TokenizerError> {
        let mut padded_ids = Vec::new();
        let mut attention_mask = Vec::new();

        if prompts.is_empty() {
            let (row, mask) = self.wrap_and_pad(Vec::new(), max_length)?;
            padded_ids.push(row);
            attention_mask.push(mask);
        } else {
            for prompt in prompts {
                let tokens = self.encode(prompt)?;
                let (row, mask) = self.wrap_and_pad(tokens, max_length)?;
                padded_ids.push(row);
                attention_mask.push(mask);
            }
        }

        let packed = packing::pack(&padded_ids, &attention_mask)?;
        Ok(EncodedPrompts {
            padded_ids,
            attention_mask,
            packed,
        })
    }

    /// Encode the classifier-free-guidance pair as an ordinary batch of
    /// size 2, positive-conditioned prompt first.
    pub fn encode_guidance_pair(
        &self,
        positive: &str,
        negative: &str,
        max_length: usize,
    ) -> Result<EncodedPrompts, TokenizerError> {
        self.encode_batch(&[positive.to_string(), negative.to_string()], max_length)
    }

    fn wrap_and_pad(
        &self,
        mut tokens: Vec<u32>,
        max_length: usize,
    ) -> Result<(Vec<u32>, Vec<u8>), TokenizerError> {
        // Every row carries the begin/end markers; a shorter budget would
        // silently drop them during padding.
        if max_length < 2 {
            return Err(TokenizerError::Encode(format!(
                "max_length {max_length} cannot hold the begin/end markers"
            )));
        }
        tokens.truncate(max_length - 2);

        let mut row = Vec::with_capacity(max_length);
        row.push(self.specials.bos);
        row.extend_from_slice(&tokens);
        row.push(self.specials.eos);

        let valid = row.len();
        row.resize(max_length, self.specials.pad);

        let mut mask = vec![1u8; valid];
        mask.resize(max_length, 0);
        Ok((row, mask))
    }

    /// Build an in-memory tokenizer whose vocabulary carries the required
    /// control tokens, for tests and single-process development.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing(vocab_size: usize) -> Self {
        use ahash::AHashMap;
        use tokenizers::models::wordlevel::WordLevel;
        use tokenizers::pre_tokenizers::whitespace::Whitespace;

        let mut vocab = AHashMap::new();
        for i in 0..vocab_size {
            vocab.insert(format!("t{i}"), i as u32);
        }
        for (offset, token) in [
            TURN_BEGIN_TOKEN,
            TURN_END_TOKEN,
            CALL_BEGIN_TOKEN,
            CALL_END_TOKEN,
            THINK_BEGIN_TOKEN,
            THINK_END_TOKEN,
        ]
        .iter()
        .enumerate()
        {
            vocab.insert(token.to_string(), (vocab_size + offset) as u32);
        }

        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("t0".into())
            .build()
            .expect("build test tokenizer model");
        let mut tokenizer = Tokenizer::new(model);
        tokenizer.with_pre_tokenizer(Some(Whitespace {}));
        Self::from_tokenizer(tokenizer).expect("test vocabulary carries all special tokens")
    }
}
