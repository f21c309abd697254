//! HTTP headers handling
//!
//! This module provides a type for managing HTTP headers with case-insensitive
//! lookups and support for multiple values per header name.

use super::{Error, Result};
use std::fmt;

/// HTTP headers collection
///
/// Headers are stored in insertion order and support:
/// - Case-insensitive header name lookups
/// - Multiple values for the same header name
/// - Iteration over all headers
///
/// The spelling of the first occurrence of a name is kept for every later
/// value of that name, so serialization is stable no matter how callers
/// spell it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Build a collection from name/value pairs, validating each of them
    pub fn from_pairs<I, N, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Headers::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value.as_ref())?;
        }
        Ok(headers)
    }

    /// Replace all values of a header with a single value
    ///
    /// The header keeps the position (and spelling) of its first occurrence.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        let value = normalize_value(name, value)?;

        match self.position(name) {
            Some(first) => {
                self.headers[first].1 = value;
                let mut index = 0;
                self.headers.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.headers.push((name.to_string(), value)),
        }

        Ok(())
    }

    /// Add a value without touching existing ones
    pub fn append(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        let value = normalize_value(name, value)?;

        let stored = match self.position(name) {
            Some(first) => self.headers[first].0.clone(),
            None => name.to_string(),
        };
        self.headers.push((stored, value));
        Ok(())
    }

    /// Get all values for a header joined with ", " (case-insensitive)
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values for a header (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Check if a header exists
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove all instances of a header (case-insensitive)
    pub fn delete(&mut self, name: &str) -> usize {
        let initial_len = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        initial_len - self.headers.len()
    }

    /// Get the number of header lines
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all (name, value) pairs in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a header line into name and value
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        if let Some(colon_pos) = line.find(':') {
            let name = &line[..colon_pos];
            let value = line[colon_pos + 1..].trim();

            if name.is_empty() || name.trim() != name {
                return Err(Error::Parse(format!("Malformed header name in {:?}", line)));
            }
            validate_name(name)?;

            Ok((name.to_string(), value.to_string()))
        } else {
            Err(Error::Parse(format!("No colon in header: {}", line)))
        }
    }

    /// Push a header parsed off the wire (already validated)
    pub(crate) fn push_raw(&mut self, name: String, value: String) {
        let name = match self.position(&name) {
            Some(first) => self.headers[first].0.clone(),
            None => name,
        };
        self.headers.push((name, value));
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// RFC 7230 token characters
fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~')
        || b.is_ascii_alphanumeric()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(is_token_char) {
        return Err(Error::InvalidHeaderName(name.to_string()));
    }
    Ok(())
}

/// Strip surrounding whitespace and reject control characters (HTAB allowed)
fn normalize_value(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim_matches(|c| c == ' ' || c == '\t');
    if trimmed.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
        return Err(Error::InvalidHeaderValue {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html").unwrap();
        headers.set("Content-Length", "42").unwrap();

        assert_eq!(headers.get("Content-Type").as_deref(), Some("text/html"));
        assert_eq!(headers.get("Content-Length").as_deref(), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html").unwrap();

        assert_eq!(headers.get("content-type").as_deref(), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE").as_deref(), Some("text/html"));
        assert!(headers.has("CoNtEnT-TyPe"));

        headers.set("CONTENT-TYPE", "text/plain").unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get_first("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_append_joins_values() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/html").unwrap();
        headers.append("accept", "application/json").unwrap();

        assert_eq!(
            headers.get("ACCEPT").as_deref(),
            Some("text/html, application/json")
        );
        assert_eq!(headers.get_all("Accept"), vec!["text/html", "application/json"]);
    }

    #[test]
    fn test_first_spelling_preserved() {
        let mut headers = Headers::new();
        headers.append("X-Trace-Id", "a").unwrap();
        headers.append("x-trace-id", "b").unwrap();

        let names: Vec<_> = headers.entries().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["X-Trace-Id", "X-Trace-Id"]);
    }

    #[test]
    fn test_set_replaces_all_values_in_place() {
        let mut headers = Headers::new();
        headers.append("A", "1").unwrap();
        headers.append("B", "2").unwrap();
        headers.append("a", "3").unwrap();

        headers.set("a", "4").unwrap();

        let collected: Vec<_> = headers.entries().collect();
        assert_eq!(collected, vec![("A", "4"), ("B", "2")]);
    }

    #[test]
    fn test_delete() {
        let mut headers = Headers::new();
        headers.append("X-Remove", "value1").unwrap();
        headers.append("X-Keep", "value2").unwrap();
        headers.append("x-remove", "value3").unwrap();

        assert_eq!(headers.delete("X-REMOVE"), 2);
        assert!(!headers.has("X-Remove"));
        assert_eq!(headers.get("X-Keep").as_deref(), Some("value2"));
    }

    #[test]
    fn test_entries_in_insertion_order() {
        let mut headers = Headers::new();
        headers.append("A", "1").unwrap();
        headers.append("B", "2").unwrap();
        headers.append("C", "3").unwrap();

        let collected: Vec<_> = headers.entries().collect();
        assert_eq!(collected, vec![("A", "1"), ("B", "2"), ("C", "3")]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut headers = Headers::new();
        assert!(matches!(
            headers.set("Bad Name", "x"),
            Err(Error::InvalidHeaderName(_))
        ));
        assert!(matches!(
            headers.append("", "x"),
            Err(Error::InvalidHeaderName(_))
        ));
        assert!(matches!(
            headers.append("X-Evil\r\n", "x"),
            Err(Error::InvalidHeaderName(_))
        ));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut headers = Headers::new();
        assert!(matches!(
            headers.set("X-Test", "a\r\nInjected: yes"),
            Err(Error::InvalidHeaderValue { .. })
        ));
        assert!(matches!(
            headers.append("X-Test", "nul\0byte"),
            Err(Error::InvalidHeaderValue { .. })
        ));
        headers.set("X-Test", "  tab\tinside  ").unwrap();
        assert_eq!(headers.get_first("x-test"), Some("tab\tinside"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        let (name, value) = Headers::parse_header_line("X-Custom:  value  ").unwrap();
        assert_eq!(name, "X-Custom");
        assert_eq!(value, "value");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
        assert!(Headers::parse_header_line("Space Name : value").is_err());
    }

    #[test]
    fn test_from_pairs() {
        let headers =
            Headers::from_pairs([("Content-Type", "application/json"), ("X-A", "1")]).unwrap();
        assert_eq!(headers.len(), 2);
        assert!(Headers::from_pairs([("Bad:Name", "1")]).is_err());
    }
}
