//! Contact directory: ordered, duplicate-free set of counterpart usernames.
//!
//! Insertion order is the display order, so indices stay stable for the lifetime
//! of a session (contacts are never removed).

use std::collections::HashMap;

/// Counterpart username.
pub type Contact = String;

/// Ordered set of known contacts with O(1) index lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDirectory {
    entries: Vec<Contact>,
    index: HashMap<Contact, usize>,
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `contact` if absent. Returns true when an insertion happened.
    pub fn add(&mut self, contact: impl Into<Contact>) -> bool {
        let contact = contact.into();
        if self.index.contains_key(&contact) {
            return false;
        }
        self.index.insert(contact.clone(), self.entries.len());
        self.entries.push(contact);
        true
    }

    /// 0-based insertion position of `contact`.
    pub fn index_of(&self, contact: &str) -> Option<usize> {
        self.index.get(contact).copied()
    }

    /// Contact at `index`; `None` when out of bounds.
    pub fn at(&self, index: usize) -> Option<&Contact> {
        self.entries.get(index)
    }

    pub fn contains(&self, contact: &str) -> bool {
        self.index.contains_key(contact)
    }

    /// Snapshot of all contacts in insertion order.
    pub fn list(&self) -> Vec<Contact> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<Contact>> FromIterator<S> for ContactDirectory {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut dir = ContactDirectory::new();
        for c in iter {
            dir.add(c);
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut dir = ContactDirectory::new();
        assert!(dir.add("bob"));
        assert!(dir.add("carol"));
        assert!(!dir.add("bob"));
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.index_of("bob"), Some(0));
        assert_eq!(dir.index_of("carol"), Some(1));
    }

    #[test]
    fn at_out_of_bounds_is_none() {
        let dir: ContactDirectory = ["bob"].into_iter().collect();
        assert_eq!(dir.at(0).map(String::as_str), Some("bob"));
        assert_eq!(dir.at(1), None);
        assert_eq!(dir.index_of("dave"), None);
    }

    #[test]
    fn from_iter_drops_duplicates_keeping_first_position() {
        let dir: ContactDirectory = ["bob", "carol", "bob", "dave"].into_iter().collect();
        assert_eq!(dir.list(), vec!["bob", "carol", "dave"]);
    }
}
