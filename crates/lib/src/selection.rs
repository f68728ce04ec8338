//! Mapping presentation list entries back to contacts.
//!
//! List widgets hand back an opaque token for the clicked row. [`SelectionTable`] records
//! the contact behind every token when the list is populated, so a selection never has to be
//! reconstructed from the token text. [`encode_token`] / [`decode_token`] implement the
//! positional token scheme used for those rows (a one-character prefix, then the 1-based row
//! number in zero-padded uppercase hex: `I001`, `I00A`, `I0FF`, `I100`), which is still
//! accepted for callers that only have a token.

use std::collections::HashMap;

use crate::contacts::{Contact, ContactDirectory};

const TOKEN_PREFIX: char = 'I';
const TOKEN_WIDTH: usize = 3;
const TOKEN_RADIX: u32 = 16;

/// Token for the row inserted at 0-based `index`.
pub fn encode_token(index: usize) -> String {
    format!("{}{:0width$X}", TOKEN_PREFIX, index + 1, width = TOKEN_WIDTH)
}

/// 0-based row index encoded in `token`, ignoring the prefix character and zero padding.
pub fn decode_token(token: &str) -> Option<usize> {
    let mut chars = token.trim().chars();
    chars.next()?;
    let digits = chars.as_str().trim_start_matches('0');
    if digits.is_empty() {
        return None;
    }
    let id = usize::from_str_radix(digits, TOKEN_RADIX).ok()?;
    id.checked_sub(1)
}

/// Token -> contact table, rebuilt every time the presentation layer repopulates its list.
#[derive(Debug, Clone, Default)]
pub struct SelectionTable {
    entries: HashMap<String, Contact>,
}

impl SelectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table with one row per contact, in directory order. Returns (token, contact) rows.
    pub fn populate(&mut self, contacts: &[Contact]) -> Vec<(String, Contact)> {
        self.entries.clear();
        contacts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let token = encode_token(i);
                self.entries.insert(token.clone(), c.clone());
                (token, c.clone())
            })
            .collect()
    }

    /// Contact for `token`: the recorded row when present, otherwise the decoded position in `directory`.
    pub fn resolve(&self, token: &str, directory: &ContactDirectory) -> Option<Contact> {
        if let Some(c) = self.entries.get(token.trim()) {
            return Some(c.clone());
        }
        decode_token(token).and_then(|i| directory.at(i).cloned())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
