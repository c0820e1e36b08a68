//! Canonical identity names.
//!
//! Every comparison in the workspace (gallery lookup, ledger rows, match
//! labels) goes through [`IdentityName`]. The key is title-cased with
//! whitespace collapsed; underscores are kept in the key and only turned
//! into spaces by [`IdentityName::display`].

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("identity name is empty")]
    Empty,
    #[error("identity name {0:?} contains a forbidden character")]
    ForbiddenCharacter(String),
}

/// Normalized identity key, e.g. `"jean_paul  DUPONT"` → `"Jean_Paul Dupont"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityName(String);

impl IdentityName {
    pub fn new(raw: &str) -> Result<Self, NameError> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return Err(NameError::Empty);
        }
        // Names become file stems and CSV cells.
        if collapsed.contains(['/', '\\', ',', '"']) || collapsed == "." || collapsed == ".." {
            return Err(NameError::ForbiddenCharacter(raw.to_string()));
        }
        Ok(Self(title_case(&collapsed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-facing form: underscores rendered as spaces.
    pub fn display(&self) -> String {
        self.0.replace('_', " ")
    }
}

impl fmt::Display for IdentityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for IdentityName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Upper-case the first letter after any non-letter, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_boundary = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_boundary = false;
        } else {
            out.push(c);
            at_boundary = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_cases_words() {
        assert_eq!(IdentityName::new("alice").unwrap().as_str(), "Alice");
        assert_eq!(IdentityName::new("BOB MARLEY").unwrap().as_str(), "Bob Marley");
    }

    #[test]
    fn test_underscore_is_word_boundary_and_kept() {
        let name = IdentityName::new("jean_paul").unwrap();
        assert_eq!(name.as_str(), "Jean_Paul");
        assert_eq!(name.display(), "Jean Paul");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let name = IdentityName::new("  mary   ann ").unwrap();
        assert_eq!(name.as_str(), "Mary Ann");
    }

    #[test]
    fn test_upper_and_title_forms_agree() {
        // Match labels are shown upper-cased; marking must still hit the same key.
        assert_eq!(
            IdentityName::new("ALICE_SMITH").unwrap(),
            IdentityName::new("alice_smith").unwrap()
        );
    }

    #[test]
    fn test_apostrophe_capitalizes_next_letter() {
        assert_eq!(IdentityName::new("o'neil").unwrap().as_str(), "O'Neil");
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(IdentityName::new("   "), Err(NameError::Empty));
    }

    #[test]
    fn test_rejects_path_and_csv_characters() {
        assert!(IdentityName::new("../etc").is_err());
        assert!(IdentityName::new("a,b").is_err());
        assert!(IdentityName::new("..").is_err());
    }
}
