//! Troceado de texto en ventanas solapadas de tamaño fijo.
//!
//! Las longitudes se miden en caracteres Unicode, no en bytes.

use crate::config::ChunkingConfig;
use crate::error::ChunkingError;

/// Trocea `text` con una ventana de `chunk_size` que avanza
/// `chunk_size - overlap` caracteres. Descarta las ventanas cuya longitud
/// recortada no supera `min_chars`.
pub fn chunk(text: &str, cfg: ChunkingConfig) -> Result<Vec<String>, ChunkingError> {
    let ChunkingConfig { chunk_size, overlap, min_chars } = cfg;
    if chunk_size == 0 {
        return Err(ChunkingError::ZeroChunkSize);
    }
    if overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge { chunk_size, overlap });
    }

    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size - overlap;

    let chunks = (0..chars.len())
        .step_by(step)
        .map(|start| {
            let end = (start + chunk_size).min(chars.len());
            chars[start..end].iter().collect::<String>()
        })
        .filter(|window| window.trim().chars().count() > min_chars)
        .collect();

    Ok(chunks)
}
