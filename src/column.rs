//! Column reference codec
//!
//! Columns are bijective base-26: `A` = 1 … `Z` = 26, `AA` = 27. There is no
//! zero digit, so every positive integer has exactly one minimal spelling.

/// Last column a worksheet can address (`XFD`)
pub const MAX_COLUMN: u32 = 16_384;

/// Column number of a cell or column reference (`"C7"` → 3, `"AA"` → 27)
///
/// Reads leading letters case-insensitively and stops at the first
/// non-letter. Returns 0 when the reference has no leading letters.
pub fn column_number(reference: &str) -> u32 {
    let mut number: u32 = 0;
    for ch in reference.chars() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        let digit = (ch.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        number = number.saturating_mul(26).saturating_add(digit);
    }
    number
}

/// Letters of a 1-based column number (27 → `"AA"`), empty for 0
pub fn column_name(number: u32) -> String {
    let mut letters = Vec::new();
    let mut remaining = number;

    while remaining > 0 {
        let modulo = (remaining - 1) % 26;
        letters.push(b'A' + modulo as u8);
        remaining = (remaining - modulo - 1) / 26;
    }

    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Split a cell reference into its column and row numbers (`"B12"` → `(2, 12)`)
pub fn parse_cell_reference(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let row = digits.parse().ok()?;
    Some((column_number(letters), row))
}
