//! ISBN validation, normalization, and conversion.
//!
//! All identity decisions in the merge engine rest on these functions:
//! an ISBN only participates in dedup after its checksum verifies, and
//! ISBN-10 values are converted to ISBN-13 so the two forms of the same
//! book collide.

/// Normalizes a raw ISBN string to a checksum-verified ISBN-13.
///
/// Accepts hyphenated and spaced input. Returns `None` when the digits
/// do not form a valid ISBN-10 or ISBN-13; callers treat that as "no
/// ISBN" rather than an error.
#[must_use]
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match digits.len() {
        10 if validate_isbn10(&digits) => Some(isbn10_to_isbn13(&digits)),
        13 if validate_isbn13(&digits) => Some(digits),
        _ => None,
    }
}

/// Verifies an ISBN-10 checksum. Input must be exactly 10 characters of
/// digits with an optional trailing `X`.
#[must_use]
pub fn validate_isbn10(isbn: &str) -> bool {
    if isbn.len() != 10 {
        return false;
    }
    let mut sum: u32 = 0;
    for (i, c) in isbn.chars().enumerate() {
        let value = match c {
            '0'..='9' => u32::from(c as u8 - b'0'),
            // 'X' is only valid as the check digit.
            'X' if i == 9 => 10,
            _ => return false,
        };
        sum += value * (10 - u32::try_from(i).unwrap_or(0));
    }
    sum % 11 == 0
}

/// Verifies an ISBN-13 checksum. Input must be exactly 13 digits.
#[must_use]
pub fn validate_isbn13(isbn: &str) -> bool {
    if isbn.len() != 13 || !isbn.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = isbn
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let digit = u32::from(c as u8 - b'0');
            if i % 2 == 0 { digit } else { digit * 3 }
        })
        .sum();
    sum % 10 == 0
}

/// Converts a valid ISBN-10 to its ISBN-13 form (978 prefix, recomputed
/// check digit). The caller must have validated the input first.
#[must_use]
pub fn isbn10_to_isbn13(isbn10: &str) -> String {
    let mut result = String::with_capacity(13);
    result.push_str("978");
    result.push_str(&isbn10[..9]);

    let sum: u32 = result
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let digit = u32::from(c as u8 - b'0');
            if i % 2 == 0 { digit } else { digit * 3 }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    result.push(char::from(b'0' + u8::try_from(check).unwrap_or(0)));
    result
}

/// Extracts the first valid ISBN from free text, normalized to ISBN-13.
///
/// Scans for 10 or 13 character runs of digits and hyphens; used by
/// adapters whose native payloads bury the ISBN inside a description
/// field instead of a dedicated one.
#[must_use]
pub fn extract(text: &str) -> Option<String> {
    let mut run = String::new();
    let mut candidates = Vec::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '-' || c == 'X' || c == 'x' {
            run.push(c);
        } else if !run.is_empty() {
            candidates.push(std::mem::take(&mut run));
        }
    }
    if !run.is_empty() {
        candidates.push(run);
    }
    candidates.iter().find_map(|c| normalize(c))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Validation Tests ====================

    #[test]
    fn test_validate_isbn13_accepts_valid() {
        assert!(validate_isbn13("9780132350884"));
        assert!(validate_isbn13("9780201616224"));
    }

    #[test]
    fn test_validate_isbn13_rejects_bad_checksum() {
        assert!(!validate_isbn13("9780132350885"));
    }

    #[test]
    fn test_validate_isbn13_rejects_wrong_length() {
        assert!(!validate_isbn13("97801323508"));
        assert!(!validate_isbn13(""));
    }

    #[test]
    fn test_validate_isbn10_accepts_valid() {
        assert!(validate_isbn10("0132350882"));
        // Check digit X.
        assert!(validate_isbn10("043942089X"));
    }

    #[test]
    fn test_validate_isbn10_rejects_bad_checksum() {
        assert!(!validate_isbn10("0132350883"));
    }

    #[test]
    fn test_validate_isbn10_rejects_x_before_check_position() {
        assert!(!validate_isbn10("0X32350882"));
    }

    // ==================== Conversion Tests ====================

    #[test]
    fn test_isbn10_to_isbn13() {
        assert_eq!(isbn10_to_isbn13("0132350882"), "9780132350884");
        assert_eq!(isbn10_to_isbn13("0201616224"), "9780201616224");
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_normalize_hyphenated_isbn13() {
        assert_eq!(
            normalize("978-0-13-235088-4"),
            Some("9780132350884".to_string())
        );
    }

    #[test]
    fn test_normalize_isbn10_converts_to_13() {
        assert_eq!(normalize("0-13-235088-2"), Some("9780132350884".to_string()));
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert_eq!(normalize("9780132350885"), None);
        assert_eq!(normalize("not an isbn"), None);
        assert_eq!(normalize(""), None);
    }

    // ==================== Extraction Tests ====================

    #[test]
    fn test_extract_from_text() {
        assert_eq!(
            extract("First edition, ISBN 978-0-13-235088-4, hardcover"),
            Some("9780132350884".to_string())
        );
    }

    #[test]
    fn test_extract_skips_invalid_runs() {
        assert_eq!(
            extract("catalog id 1234567890123, isbn 0132350882"),
            Some("9780132350884".to_string())
        );
    }

    #[test]
    fn test_extract_none_when_absent() {
        assert_eq!(extract("no identifiers here"), None);
    }
}
