pub mod chunking;
pub mod pdf;

pub use chunking::split_text;
pub use pdf::{extract_pdf_text, extract_pdf_text_from_bytes};
