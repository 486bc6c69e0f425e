//! Frame codec: build and parse `<?scscp …?>` processing instructions
//! (spec §4.1).
//!
//! Each frame is exactly one line of the form
//! `<?scscp [<key> ]<attr>="<value>" …?>`. Implementations MUST NOT emit
//! interior newlines; [`encode`] guarantees this by escaping control
//! characters into numeric character references.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::errors::ScscpError;

/// A single decoded `<?scscp …?>` instruction.
///
/// `key` is the optional bare word immediately following `scscp` (e.g.
/// `start`, `quit`, `terminate`); `attrs` holds the `attr="value"` pairs that
/// followed it, last-one-wins on duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instruction {
    /// The bare keyword token, if present (e.g. `"start"`, `"quit"`).
    pub key: Option<String>,
    /// Attribute map, ordered for deterministic iteration in tests.
    pub attrs: BTreeMap<String, String>,
}

impl Instruction {
    /// Build a bare keyed instruction with no attributes.
    #[must_use]
    pub fn keyed(key: &str) -> Self {
        Self {
            key: Some(key.to_owned()),
            attrs: BTreeMap::new(),
        }
    }

    /// Fetch an attribute value by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> { self.attrs.get(name).map(String::as_str) }
}

/// Encode an ordered sequence of strings into one `<?scscp …?>` line.
///
/// If `parts` has odd length, the first element is the bare `key` token and
/// the rest are `(attr, value)` pairs; if even, every element is part of a
/// pair. The returned string ends in `?>` followed by a line feed.
#[must_use]
pub fn encode(parts: &[&str]) -> String {
    let mut out = String::from("<?scscp ");
    let mut rest = parts;
    if parts.len() % 2 == 1 {
        if let Some((key, tail)) = parts.split_first() {
            let _ = write!(out, "{key} ");
            rest = tail;
        }
    }
    for pair in rest.chunks(2) {
        let [attr, value] = pair else { continue };
        let _ = write!(out, "{attr}=\"{}\" ", escape_attr_value(value));
    }
    out.push_str("?>\n");
    out
}

/// Escape a string for use as an XML attribute value within one line.
fn escape_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

/// Unescape the numeric character references and entities [`escape_attr_value`] emits.
fn unescape_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '&' {
            out.push(ch);
            continue;
        }
        let mut entity = String::new();
        let mut closed = false;
        for next in chars.by_ref() {
            if next == ';' {
                closed = true;
                break;
            }
            entity.push(next);
        }
        if !closed {
            out.push('&');
            out.push_str(&entity);
            continue;
        }
        match entity.as_str() {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "#9" => out.push('\t'),
            "#10" => out.push('\n'),
            "#13" => out.push('\r'),
            other => {
                out.push('&');
                out.push_str(other);
                out.push(';');
            }
        }
    }
    out
}

/// Decode one trimmed line into an [`Instruction`].
///
/// # Errors
///
/// Returns [`ScscpError::MalformedFrame`] if the line is not of the form
/// `<?scscp …?>`.
#[expect(clippy::shadow_reuse, reason = "intentional shadowing while peeling prefixes/suffixes")]
pub fn decode(line: &str) -> Result<Instruction, ScscpError> {
    let line = line.trim();
    let body = line
        .strip_prefix("<?")
        .ok_or_else(|| ScscpError::MalformedFrame("missing '<?' prefix".to_owned()))?;
    let body = body
        .strip_suffix("?>")
        .ok_or_else(|| ScscpError::MalformedFrame("missing '?>' suffix".to_owned()))?;
    let body = body.trim_start();
    let body = body
        .strip_prefix("scscp")
        .ok_or_else(|| ScscpError::MalformedFrame("missing 'scscp' target".to_owned()))?;

    let mut instr = Instruction::default();
    let mut rest = body;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let Some(eq) = rest.find('=') else {
            // A bare word with no '=' is the optional leading key.
            let (word, tail) = split_word(rest);
            if word.is_empty() {
                break;
            }
            if instr.key.is_none() && instr.attrs.is_empty() {
                instr.key = Some(word.to_owned());
            }
            rest = tail;
            continue;
        };
        let Some(word_end) = rest.get(..eq) else {
            break;
        };
        let attr = word_end.trim_end();
        if attr.is_empty() || !is_word(attr) {
            let (_, tail) = split_word(rest);
            rest = tail;
            continue;
        }
        let after_eq = rest.get(eq + 1..).unwrap_or("");
        let Some(quoted) = after_eq.strip_prefix('"') else {
            break;
        };
        let Some(close) = quoted.find('"') else {
            break;
        };
        let (value, tail) = quoted.split_at(close);
        instr
            .attrs
            .insert(attr.to_owned(), unescape_attr_value(value));
        rest = tail.get(1..).unwrap_or("");
    }
    Ok(instr)
}

/// Split leading whitespace-delimited word from `s`, returning `(word, rest)`.
fn split_word(s: &str) -> (&str, &str) {
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    let (word, tail) = s.split_at(end);
    (word, tail)
}

/// Whether `s` is a valid attribute-name word (letters, digits, underscore).
fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn encode_odd_leading_key() {
        let line = encode(&["start"]);
        assert_eq!(line, "<?scscp start ?>\n");
    }

    #[test]
    fn encode_even_pairs_only() {
        let line = encode(&["version", "1.3"]);
        assert_eq!(line, "<?scscp version=\"1.3\" ?>\n");
    }

    #[test]
    fn encode_escapes_special_chars() {
        let line = encode(&["quit", "reason", "a \"quote\" & <tag>\n"]);
        assert!(line.contains("&quot;"));
        assert!(line.contains("&amp;"));
        assert!(line.contains("&lt;"));
        assert!(line.contains("&#10;"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[rstest]
    #[case(&["start"])]
    #[case(&["version", "1.3"])]
    #[case(&["quit", "reason", "not supported version"])]
    #[case(&["terminate", "call_id", "c7"])]
    fn roundtrip_preserves_key_and_attrs(#[case] parts: &[&str]) {
        let line = encode(parts);
        let decoded = decode(line.trim_end()).expect("decode");
        let mut rest = parts;
        let mut expected = Instruction::default();
        if parts.len() % 2 == 1 {
            if let Some((key, tail)) = parts.split_first() {
                expected.key = Some((*key).to_owned());
                rest = tail;
            }
        }
        for pair in rest.chunks(2) {
            if let [attr, value] = pair {
                expected
                    .attrs
                    .insert((*attr).to_owned(), (*value).to_owned());
            }
        }
        assert_eq!(decoded, expected);
    }

    #[test]
    fn decode_rejects_missing_prefix() {
        assert!(decode("scscp version=\"1.3\"?>").is_err());
    }

    #[test]
    fn decode_rejects_missing_suffix() {
        assert!(decode("<?scscp version=\"1.3\"").is_err());
    }

    #[test]
    fn decode_rejects_missing_target() {
        assert!(decode("<?xml version=\"1.0\"?>").is_err());
    }

    #[test]
    fn decode_empty_body_has_no_key_or_attrs() {
        let instr = decode("<?scscp ?>").expect("decode");
        assert_eq!(instr.key, None);
        assert!(instr.attrs.is_empty());
    }

    #[test]
    fn decode_duplicate_attr_last_wins() {
        let instr = decode("<?scscp call_id=\"a\" call_id=\"b\"?>").expect("decode");
        assert_eq!(instr.attr("call_id"), Some("b"));
    }

    #[test]
    fn decode_tolerates_leading_whitespace_before_target() {
        let instr = decode("<?  scscp start ?>").expect("decode");
        assert_eq!(instr.key.as_deref(), Some("start"));
    }
}
