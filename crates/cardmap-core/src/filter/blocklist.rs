//! Case-insensitive term matching against configurable block-lists.
//!
//! Single-word terms match whole tokens of the keyword (so "class" does not
//! trip on "ass"); multi-word terms match as substrings of the normalized
//! keyword.

/// A compiled block-list.
#[derive(Debug, Clone)]
pub struct Blocklist {
    terms: Vec<String>,
}

impl Blocklist {
    /// Build a block-list from built-in terms plus config extras.
    /// Terms are lowercased; duplicates are dropped.
    pub fn new(builtin: &[&str], extra: &[String]) -> Self {
        let mut terms: Vec<String> = builtin
            .iter()
            .map(|t| t.to_lowercase())
            .chain(extra.iter().map(|t| t.to_lowercase()))
            .filter(|t| !t.trim().is_empty())
            .collect();
        terms.sort();
        terms.dedup();
        Self { terms }
    }

    /// Return the first matching term, if any.
    pub fn matches(&self, keyword: &str) -> Option<&str> {
        let normalized = normalize(keyword);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        self.terms
            .iter()
            .find(|term| {
                if term.contains(' ') {
                    normalized.contains(term.as_str())
                } else {
                    tokens.contains(&term.as_str())
                }
            })
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Lowercase and collapse non-alphanumeric runs to single spaces.
fn normalize(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len());
    let mut last_space = true;
    for c in keyword.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}
