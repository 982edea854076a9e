//! Volume label generation
//!
//! Labels are short codes an operator writes on a disc with a marker pen.
//! The alphabet leaves out characters that are easy to misread by hand
//! (I, L, O, 0, 1).

use rand::Rng;

use crate::errors::{ArcdError, ArcdResult};

/// Characters labels are drawn from
pub const LABEL_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Attempts before giving up on finding an unused label
pub const MAX_LABEL_ATTEMPTS: usize = 10_000;

/// Longest label accepted from a manifest or the command line
const MAX_LABEL_LENGTH: usize = 32;

/// Draw a random label of the given length
pub fn generate_label<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| LABEL_ALPHABET[rng.gen_range(0..LABEL_ALPHABET.len())] as char)
        .collect()
}

/// Check that a label can name volume keys safely.
///
/// Accepts any ASCII letters and digits so volumes labelled by hand or by
/// older builds remain readable.
pub fn validate_label(label: &str) -> ArcdResult<()> {
    if label.is_empty()
        || label.len() > MAX_LABEL_LENGTH
        || !label.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(ArcdError::invalid_label(label));
    }
    Ok(())
}
