//! Packed variable-length batching.
//!
//! Padded per-sample token rows are concatenated into a single unpadded
//! stream with cumulative boundary offsets, so the distributed attention
//! kernels operate on ragged sequences without burning compute on padding
//! positions. The boundary bookkeeping here must match exactly between the
//! local and global tensor layouts; an off-by-one corrupts attention
//! silently.

use candle_core::{Device, Tensor};
use thiserror::Error;

/// Errors from the pack step.
#[derive(Error, Debug)]
pub enum PackingError {
    /// `padded_ids` and `attention_mask` disagree in batch or row shape.
    #[error("mask shape mismatch at sample {sample}: ids len {ids_len}, mask len {mask_len}")]
    MaskShapeMismatch {
        sample: usize,
        ids_len: usize,
        mask_len: usize,
    },

    /// A mask row is not a run of 1s followed by a run of 0s.
    ///
    /// The fast path extracts the leading `valid_len` tokens; a valid
    /// position after padding would be silently dropped, so it is reported
    /// per-sample instead. Use [`pack_by_mask`] if holes are expected.
    #[error("attention mask for sample {sample} has a valid token after padding")]
    NonContiguousMask { sample: usize },
}

/// A batch with padding removed, plus its boundary offsets.
///
/// Invariants: `cu_seqlens` has length `B + 1`, starts at 0, is
/// non-decreasing, and its last element equals `packed_ids.len()`.
/// Sample order and intra-sample token order match the input batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBatch {
    /// Concatenated valid tokens of every sample, in batch order.
    pub packed_ids: Vec<u32>,
    /// Cumulative sequence-length boundaries delimiting samples.
    pub cu_seqlens: Vec<u32>,
    /// Longest valid length in the batch.
    pub max_seq_len: usize,
}

impl PackedBatch {
    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.cu_seqlens.len() - 1
    }

    /// Token span of sample `i` within `packed_ids`.
    pub fn sample_span(&self, i: usize) -> std::ops::Range<usize> {
        self.cu_seqlens[i] as usize..self.cu_seqlens[i + 1] as usize
    }

    /// Place the packed stream and its offsets on a device.
    ///
    /// Returns `(packed_ids, cu_seqlens)` as u32 tensors, the layout the
    /// varlen attention kernels consume.
    pub fn to_tensors(&self, device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
        let ids = Tensor::from_slice(&self.packed_ids, self.packed_ids.len(), device)?;
        let cu = Tensor::from_slice(&self.cu_seqlens, self.cu_seqlens.len(), device)?;
        Ok((ids, cu))
    }
}

/// Pack a padded batch by stripping each sample's padding suffix.
///
/// For each sample in batch order: valid length is the count of 1s in its
/// mask, and the first `valid_len` tokens are appended to the stream. The
/// tokenizer upholds the suffix-padding invariant (mask is a run of 1s then
/// a run of 0s); a violation is reported as [`PackingError::NonContiguousMask`]
/// rather than silently truncating data.
///
/// Zero-length samples are legal and produce an empty span. An empty batch
/// yields `cu_seqlens = [0]` and `max_seq_len = 0`.
pub fn pack(
    padded_ids: &[Vec<u32>],
    attention_mask: &[Vec<u8>],
) -> Result<PackedBatch, PackingError> {
    check_shapes(padded_ids, attention_mask)?;

    let mut packed_ids = Vec::new();
    let mut cu_seqlens = Vec::with_capacity(padded_ids.len() + 1);
    cu_seqlens.push(0u32);
    let mut max_seq_len = 0usize;

    for (i, (ids, mask)) in padded_ids.iter().zip(attention_mask).enumerate() {
        let valid_len = mask.iter().filter(|&&m| m != 0).count();
        if mask[..valid_len].iter().any(|&m| m == 0) {
            return Err(PackingError::NonContiguousMask { sample: i });
        }
        packed_ids.extend_from_slice(&ids[..valid_len]);
        cu_seqlens.push(packed_ids.len() as u32);
        max_seq_len = max_seq_len.max(valid_len);
    }

    Ok(PackedBatch {
        packed_ids,
        cu_seqlens,
        max_seq_len,
    })
}

/// Hardened pack: select tokens positionally by mask.
///
/// Accepts masks with holes (valid tokens after padding) at the cost of a
/// full scan per row. Not the default; the tokenizer always emits
/// suffix-padded masks.
pub fn pack_by_mask(
    padded_ids: &[Vec<u32>],
    attention_mask: &[Vec<u8>],
) -> Result<PackedBatch, PackingError> {
    check_shapes(padded_ids, attention_mask)?;

    let mut packed_ids = Vec::new();
    let mut cu_seqlens = Vec::with_capacity(padded_ids.len() + 1);
    cu_seqlens.push(0u32);
    let mut max_seq_len = 0usize;

    for (ids, mask) in padded_ids.iter().zip(attention_mask) {
        let before = packed_ids.len();
        packed_ids.extend(
            ids.iter()
                .zip(mask)
                .filter(|(_, &m)| m != 0)
                .map(|(&id, _)| id),
        );
        let valid_len = packed_ids.len() - before;
        cu_seqlens.push(packed_ids.len() as u32);
        max_seq_len = max_seq_len.max(valid_len);
    }

    Ok(PackedBatch {
        packed_ids,
        cu_seqlens,
        max_seq_len,
    })
}

fn check_shapes(
    padded_ids: &[Vec<u32>],
    attention_mask: &[Vec<u8>],
) -> Result<(), PackingError> {
    if padded_ids.len() != attention_mask.len() {
        return Err(PackingError::MaskShapeMismatch {
            sample: padded_ids.len().min(attention_mask.len()),
            ids_len: padded_ids.len(),
            mask_len: attention_mask.len(),
        });
    }
    for (i, (ids, mask)) in padded_ids.iter().zip(attention_mask).enumerate() {
        if ids.len() != mask.len() {
            return Err(PackingError::MaskShapeMismatch {
                sample: i,
                ids_len: ids.len(),
                mask_len: mask.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worked_example_two_samples() {
        let ids = vec![vec![1, 7, 9, 2, 2, 2], vec![1, 5, 2, 2, 2, 2]];
        let mask = vec![vec![1, 1, 1, 1, 0, 0], vec![1, 1, 1, 0, 0, 0]];
        let packed = pack(&ids, &mask).unwrap();
        assert_eq!(packed.packed_ids, vec![1, 7, 9, 2, 1, 5, 2]);
        assert_eq!(packed.cu_seqlens, vec![0, 4, 7]);
        assert_eq!(packed.max_seq_len, 4);
        assert_eq!(packed.batch_size(), 2);
        assert_eq!(packed.sample_span(1), 4..7);
    }

    #[test]
    fn empty_batch() {
        let packed = pack(&[], &[]).unwrap();
        assert!(packed.packed_ids.is_empty());
        assert_eq!(packed.cu_seqlens, vec![0]);
        assert_eq!(packed.max_seq_len, 0);
        assert_eq!(packed.batch_size(), 0);
    }

    #[test]
    fn zero_length_sample_is_legal() {
        let ids = vec![vec![1, 2, 3], vec![9, 9, 9], vec![4, 5, 2]];
        let mask = vec![vec![1, 1, 0], vec![0, 0, 0], vec![1, 1, 1]];
        let packed = pack(&ids, &mask).unwrap();
        assert_eq!(packed.packed_ids, vec![1, 2, 4, 5, 2]);
        assert_eq!(packed.cu_seqlens, vec![0, 2, 2, 5]);
        assert_eq!(packed.max_seq_len, 3);
    }

    #[test]
    fn no_padding_reduces_to_concatenation() {
        let ids = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let mask = vec![vec![1, 1, 1], vec![1, 1, 1]];
        let packed = pack(&ids, &mask).unwrap();
        assert_eq!(packed.packed_ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(packed.cu_seqlens, vec![0, 3, 6]);
        assert_eq!(packed.max_seq_len, 3);
    }

    #[test]
    fn cu_seqlens_law_holds() {
        let ids = vec![vec![1, 2, 2, 2], vec![1, 2, 3, 2], vec![2, 2, 2, 2]];
        let mask = vec![vec![1, 1, 0, 0], vec![1, 1, 1, 0], vec![0, 0, 0, 0]];
        let packed = pack(&ids, &mask).unwrap();
        assert_eq!(packed.cu_seqlens[0], 0);
        assert!(packed.cu_seqlens.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            *packed.cu_seqlens.last().unwrap() as usize,
            packed.packed_ids.len()
        );
    }

    #[test]
    fn non_contiguous_mask_is_reported_per_sample() {
        let ids = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let mask = vec![vec![1, 1, 1], vec![1, 0, 1]];
        let err = pack(&ids, &mask).unwrap_err();
        assert!(matches!(err, PackingError::NonContiguousMask { sample: 1 }));
    }

    #[test]
    fn pack_by_mask_accepts_holes() {
        let ids = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let mask = vec![vec![1, 1, 1], vec![1, 0, 1]];
        let packed = pack_by_mask(&ids, &mask).unwrap();
        assert_eq!(packed.packed_ids, vec![1, 2, 3, 4, 6]);
        assert_eq!(packed.cu_seqlens, vec![0, 3, 5]);
        assert_eq!(packed.max_seq_len, 3);
    }

    #[test]
    fn pack_by_mask_matches_pack_on_suffix_padding() {
        let ids = vec![vec![1, 7, 9, 2, 2, 2], vec![1, 5, 2, 2, 2, 2]];
        let mask = vec![vec![1, 1, 1, 1, 0, 0], vec![1, 1, 1, 0, 0, 0]];
        assert_eq!(pack(&ids, &mask).unwrap(), pack_by_mask(&ids, &mask).unwrap());
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let ids = vec![vec![1, 2, 3]];
        let mask = vec![vec![1, 1]];
        assert!(matches!(
            pack(&ids, &mask),
            Err(PackingError::MaskShapeMismatch { sample: 0, .. })
        ));
        assert!(pack(&ids, &[]).is_err());
    }

    #[test]
    fn to_tensors_preserves_layout() {
        let ids = vec![vec![1, 7, 9, 2], vec![1, 5, 2, 2]];
        let mask = vec![vec![1, 1, 1, 1], vec![1, 1, 1, 0]];
        let packed = pack(&ids, &mask).unwrap();
        let (ids_t, cu_t) = packed.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(ids_t.to_vec1::<u32>().unwrap(), packed.packed_ids);
        assert_eq!(cu_t.to_vec1::<u32>().unwrap(), packed.cu_seqlens);
    }
}
