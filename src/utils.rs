use memchr::{memchr, memchr_iter};

/// Number of chars (Unicode scalar values) in `text`.
///
/// All positions and lengths in this crate are measured in chars, never bytes,
/// because edit logs count cursor positions the way editors do.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Whether `text` contains a line break.
pub fn contains_newline(text: &str) -> bool {
    memchr(b'\n', text.as_bytes()).is_some()
}

/// Number of line breaks in `text`.
pub fn newline_count(text: &str) -> usize {
    memchr_iter(b'\n', text.as_bytes()).count()
}

/// Convert a char position into a byte offset into `text`.
///
/// Positions past the end of the text clamp to the end, mirroring how the
/// replay treats an insert beyond the current document as an append.
fn char_to_byte(text: &str, char_pos: usize) -> usize {
    if cfg!(feature = "optimized-splice") {
        char_to_byte_optimized(text, char_pos)
    } else {
        char_to_byte_naive(text, char_pos)
    }
}

fn char_to_byte_naive(text: &str, char_pos: usize) -> usize {
    text.char_indices()
        .nth(char_pos)
        .map(|(byte_idx, _)| byte_idx)
        .unwrap_or(text.len())
}

fn char_to_byte_optimized(text: &str, char_pos: usize) -> usize {
    // for pads that are pure ASCII (so basically: most of them), char
    // positions and byte offsets coincide
    if text.is_ascii() {
        char_pos.min(text.len())
    } else {
        char_to_byte_naive(text, char_pos)
    }
}

/// Insert `payload` into `text` at char position `char_pos`.
///
/// # Arguments
///
/// * `text` - The document buffer to modify.
/// * `char_pos` - Char position of the insert. Positions past the end append.
/// * `payload` - The text to insert.
pub fn splice_insert(text: &mut String, char_pos: usize, payload: &str) {
    if cfg!(feature = "optimized-splice") {
        splice_insert_optimized(text, char_pos, payload)
    } else {
        splice_insert_naive(text, char_pos, payload)
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn splice_insert_naive(text: &mut String, char_pos: usize, payload: &str) {
    let byte_idx = char_to_byte_naive(text, char_pos);
    if byte_idx == text.len() {
        text.push_str(payload);
    } else {
        text.insert_str(byte_idx, payload);
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn splice_insert_optimized(text: &mut String, char_pos: usize, payload: &str) {
    let byte_idx = char_to_byte_optimized(text, char_pos);
    if byte_idx == text.len() {
        text.push_str(payload);
    } else {
        text.insert_str(byte_idx, payload);
    }
}

/// Remove `char_count` chars from `text` starting at char position `char_pos`.
///
/// A range reaching past the end of the text is truncated at the end, the same
/// way a Python-style slice would behave. The reconstruction engine never
/// produces such a range for a well-formed log.
pub fn splice_delete(text: &mut String, char_pos: usize, char_count: usize) {
    if cfg!(feature = "optimized-splice") {
        splice_delete_optimized(text, char_pos, char_count)
    } else {
        splice_delete_naive(text, char_pos, char_count)
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn splice_delete_naive(text: &mut String, char_pos: usize, char_count: usize) {
    let start = char_to_byte_naive(text, char_pos);
    let end = char_to_byte_naive(text, char_pos + char_count);
    text.replace_range(start..end, "");
}

#[doc(hidden)] /* only public for benchmarking */
pub fn splice_delete_optimized(text: &mut String, char_pos: usize, char_count: usize) {
    let start = char_to_byte_optimized(text, char_pos);
    let end = char_to_byte_optimized(text, char_pos + char_count);
    text.replace_range(start..end, "");
}

/// Char-slice of `text` covering `[char_start, char_start + char_count)`.
pub fn char_slice(text: &str, char_start: usize, char_count: usize) -> &str {
    let start = char_to_byte(text, char_start);
    let end = char_to_byte(text, char_start + char_count);
    &text[start..end]
}
