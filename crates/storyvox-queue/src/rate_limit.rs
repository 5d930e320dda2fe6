//! Rate-limit detection from error text.

/// Case-insensitive substring matcher over an error and its sources.
///
/// All-digit signatures such as `429` only match as a standalone number,
/// so `request 14290` or `took 4290ms` do not count as rate limits.
#[derive(Debug, Clone)]
pub struct RateLimitMatcher {
    signatures: Vec<String>,
}

impl RateLimitMatcher {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            signatures: signatures
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn matches_text(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.signatures.iter().any(|s| {
            if s.bytes().all(|b| b.is_ascii_digit()) {
                contains_number(&text, s)
            } else {
                text.contains(s.as_str())
            }
        })
    }

    /// Check the error message and every source in its chain.
    pub fn matches(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        let mut current = Some(error);
        while let Some(e) = current {
            if self.matches_text(&e.to_string()) {
                return true;
            }
            current = e.source();
        }
        false
    }
}

fn contains_number(text: &str, number: &str) -> bool {
    let bytes = text.as_bytes();
    text.match_indices(number).any(|(start, _)| {
        let end = start + number.len();
        let before = start.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(end).copied();
        !before.is_some_and(|b| b.is_ascii_alphanumeric()) && !after.is_some_and(|b| b.is_ascii_alphanumeric())
    })
}
