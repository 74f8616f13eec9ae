//! A1 column-letter helpers.
//!
//! Columns are 0-based here (`A` = 0, `Z` = 25, `AA` = 26), matching
//! [`CellRef`](crate::CellRef). Excel's limit of 16,384 columns (`XFD`) is
//! enforced on parse.

pub const MAX_COLUMNS: u32 = 16_384;
pub const MAX_ROWS: u32 = 1_048_576;

pub fn column_to_letters(mut col: u32) -> String {
    let mut buf = Vec::new();
    loop {
        let rem = (col % 26) as u8;
        buf.push(b'A' + rem);
        col /= 26;
        if col == 0 {
            break;
        }
        col -= 1;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// Column letters (either case) to a 0-based index.
pub fn letters_to_column(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for ch in s.bytes() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let val = (ch.to_ascii_uppercase() - b'A') as u32 + 1;
        col = col * 26 + val;
    }
    let col = col - 1;
    (col < MAX_COLUMNS).then_some(col)
}

/// 1-based row text to a 0-based index.
pub fn digits_to_row(s: &str) -> Option<u32> {
    let row: u32 = s.parse().ok()?;
    (1..=MAX_ROWS).contains(&row).then(|| row - 1)
}
