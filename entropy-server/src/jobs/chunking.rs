use miette::Diagnostic;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum ChunkPlanError {
    #[error(
        "chunk configuration is impossible: {max_bytes} max bytes per chunk \
        can't hold the {min_bits} bit minimum"
    )]
    ImpossibleConfig { max_bytes: usize, min_bits: u64 },

    #[error("insufficient data: need {needed} bits, have {have}")]
    InsufficientBits { needed: u64, have: u64 },
}

/// Splits a bitstream of `total_bytes` into SP 800-22 chunk ranges.
///
/// A stream that fits in one call stays one chunk. Longer streams are
/// cut into `max_bytes`-sized chunks from the start; when the tail end
/// falls under the per-chunk minimum, the last cut is rebalanced so
/// every chunk still carries at least `⌈min_bits/8⌉` bytes.
pub fn plan_suite_chunks(
    total_bytes: usize,
    max_bytes: usize,
    min_bits: u64,
) -> Result<Vec<Range<usize>>, ChunkPlanError> {
    if (max_bytes as u64) * 8 < min_bits {
        return Err(ChunkPlanError::ImpossibleConfig {
            max_bytes,
            min_bits,
        });
    }
    if (total_bytes as u64) * 8 < min_bits {
        return Err(ChunkPlanError::InsufficientBits {
            needed: min_bits,
            have: total_bytes as u64 * 8,
        });
    }

    if total_bytes <= max_bytes {
        return Ok(vec![0..total_bytes]);
    }

    let min_bytes = (min_bits as usize).div_ceil(8);

    let mut chunks: Vec<Range<usize>> = Vec::new();
    let mut offset = 0;
    while total_bytes - offset > max_bytes {
        chunks.push(offset..offset + max_bytes);
        offset += max_bytes;
    }

    let remainder = total_bytes - offset;
    if remainder >= min_bytes {
        chunks.push(offset..total_bytes);
    } else {
        // The tail is too small to test on its own. Take the deficit
        // from the chunk before it; if that would push the donor under
        // the minimum too, fold the tail into it instead.
        let deficit = min_bytes - remainder;
        let donor = chunks
            .last()
            .cloned()
            .expect("total > max_bytes guarantees at least one full chunk");
        if donor.end - donor.start >= min_bytes + deficit {
            let cut = donor.end - deficit;
            chunks
                .last_mut()
                .expect("just observed a last chunk")
                .end = cut;
            chunks.push(cut..total_bytes);
        } else {
            chunks
                .last_mut()
                .expect("just observed a last chunk")
                .end = total_bytes;
        }
    }

    Ok(chunks)
}
