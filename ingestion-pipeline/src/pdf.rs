use std::path::Path;

use tracing::debug;

use common::error::AppError;

const MIN_TEXT_LEN: usize = 150;
const MIN_ASCII_RATIO: f64 = 0.7;
const MIN_LETTER_RATIO: f64 = 0.3;

/// Extracts the text layer of the PDF at `file_path`.
pub async fn extract_pdf_text(file_path: &Path) -> Result<String, AppError> {
    let pdf_bytes = tokio::fs::read(file_path).await?;
    extract_pdf_text_from_bytes(pdf_bytes).await
}

/// Runs `pdf-extract` on the PDF bytes and validates the result with simple
/// heuristics. A missing or noisy text layer is a processing error; there is
/// no rendering fallback.
pub async fn extract_pdf_text_from_bytes(pdf_bytes: Vec<u8>) -> Result<String, AppError> {
    let extraction = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&pdf_bytes).map(|s| s.trim().to_string())
    })
    .await?
    .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))?;

    if extraction.is_empty() {
        return Err(AppError::Processing(
            "PDF has no extractable text layer".into(),
        ));
    }

    if !looks_good_enough(&extraction) {
        return Err(AppError::Processing(
            "PDF text layer is too noisy to index".into(),
        ));
    }

    let text = reflow_text(&extraction);
    debug!(chars = text.len(), "Extracted PDF text");
    Ok(text)
}

/// Heuristic that determines whether the extracted text looks like
/// well-formed prose rather than extraction garbage.
fn looks_good_enough(text: &str) -> bool {
    if text.len() < MIN_TEXT_LEN {
        return false;
    }

    let total_chars = text.chars().count() as f64;
    if total_chars == 0.0 {
        return false;
    }

    let ascii_chars = text.chars().filter(|c| c.is_ascii()).count() as f64;
    if ascii_chars / total_chars < MIN_ASCII_RATIO {
        return false;
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count() as f64;
    letters / total_chars > MIN_LETTER_RATIO
}

/// Joins hard-wrapped paragraph lines while keeping list items and headings
/// on their own lines, so the splitter sees sentence-shaped paragraphs.
fn reflow_text(input: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut buffer: Vec<String> = Vec::new();

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !buffer.is_empty() {
                paragraphs.push(buffer.join(" "));
                buffer.clear();
            }
            continue;
        }

        if is_structural_line(trimmed) {
            if !buffer.is_empty() {
                paragraphs.push(buffer.join(" "));
                buffer.clear();
            }
            paragraphs.push(trimmed.to_string());
            continue;
        }

        buffer.push(trimmed.to_string());
    }

    if !buffer.is_empty() {
        paragraphs.push(buffer.join(" "));
    }

    paragraphs.join("\n\n")
}

fn is_structural_line(line: &str) -> bool {
    line.starts_with('#')
        || line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('>')
        || (line
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
            && line.contains('.'))
}
