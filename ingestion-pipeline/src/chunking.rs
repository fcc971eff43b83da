use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

use common::error::AppError;

/// Splits document text into character-bounded chunks with overlap,
/// preserving document order. Empty input yields an empty list.
pub fn split_text(
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<String>, AppError> {
    if max_chars == 0 {
        return Err(AppError::Validation(
            "chunk size must be greater than zero".into(),
        ));
    }

    if overlap_chars >= max_chars {
        return Err(AppError::Validation(format!(
            "chunk overlap of {overlap_chars} must be smaller than the chunk size of {max_chars}"
        )));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chunk_config = ChunkConfig::new(max_chars)
        .with_overlap(overlap_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    let chunks: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();
    debug!(chunks = chunks.len(), max_chars, overlap_chars, "Split text");

    Ok(chunks)
}
