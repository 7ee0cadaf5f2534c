//! Best-effort parsing of JSON text that is still being streamed.
//!
//! The function call arguments arrive a few characters at a time, so most of
//! the time the accumulated text is a truncated JSON document. Instead of
//! failing on the missing tail, the parser closes whatever is still open:
//!
//! - an unterminated string inside an object or array ends at the current position
//! - unterminated objects and arrays are closed
//! - a key without a value (or a key whose name is still being typed) is dropped
//! - a trailing comma is ignored
//!
//! Tokens that cannot be completed without guessing (a half-typed `true`, a
//! number that may still grow, a cut-off `\u` escape) are dropped as well, so
//! a value that has been reported once is never reported differently later.

use serde_json::{Map, Number, Value};
use std::iter::Peekable;
use std::str::Chars;

/// Parse possibly truncated JSON text.
///
/// Returns `None` for empty input and for text that is malformed in a way
/// more input cannot fix.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    let mut parser = PartialParser::new(text);
    parser.skip_whitespace();
    let value = if parser.chars.next_if_eq(&'"').is_some() {
        // Only strings nested in a container are closed early
        let string = parser.parse_string().ok()?;
        if !string.closed {
            return None;
        }
        Value::String(string.text)
    } else {
        parser.parse_value().ok()?
    };

    parser.skip_whitespace();
    if parser.chars.peek().is_some() {
        // Trailing content after a complete top-level value
        return None;
    }

    Some(value)
}

/// Why the parser stopped before producing a value
#[derive(Debug, PartialEq)]
enum Stop {
    /// The text ends before the value could be completed
    Incomplete,
    /// The text can never become valid JSON
    Malformed,
}

type Parsed<T> = Result<T, Stop>;

struct PartialString {
    text: String,
    closed: bool,
}

enum Escape {
    Char(char),
    Incomplete,
}

struct PartialParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> PartialParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn parse_value(&mut self) -> Parsed<Value> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            None => Err(Stop::Incomplete),
            Some('{') => {
                self.chars.next();
                self.parse_object()
            }
            Some('[') => {
                self.chars.next();
                self.parse_array()
            }
            Some('"') => {
                self.chars.next();
                Ok(Value::String(self.parse_string()?.text))
            }
            Some('t') => self.parse_literal("true", Value::Bool(true)),
            Some('f') => self.parse_literal("false", Value::Bool(false)),
            Some('n') => self.parse_literal("null", Value::Null),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(_) => Err(Stop::Malformed),
        }
    }

    fn parse_object(&mut self) -> Parsed<Value> {
        let mut map = Map::new();

        loop {
            self.skip_whitespace();
            match self.chars.next() {
                None | Some('}') => return Ok(Value::Object(map)),
                Some('"') => {}
                Some(_) => return Err(Stop::Malformed),
            }

            let key = self.parse_string()?;
            if !key.closed {
                return Ok(Value::Object(map));
            }

            self.skip_whitespace();
            match self.chars.next() {
                None => return Ok(Value::Object(map)),
                Some(':') => {}
                Some(_) => return Err(Stop::Malformed),
            }

            match self.parse_value() {
                Ok(value) => {
                    map.insert(key.text, value);
                }
                Err(Stop::Incomplete) => return Ok(Value::Object(map)),
                Err(err) => return Err(err),
            }

            self.skip_whitespace();
            match self.chars.next() {
                None | Some('}') => return Ok(Value::Object(map)),
                Some(',') => continue,
                Some(_) => return Err(Stop::Malformed),
            }
        }
    }

    fn parse_array(&mut self) -> Parsed<Value> {
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                None => return Ok(Value::Array(items)),
                Some(']') => {
                    self.chars.next();
                    return Ok(Value::Array(items));
                }
                _ => {}
            }

            match self.parse_value() {
                Ok(value) => items.push(value),
                Err(Stop::Incomplete) => return Ok(Value::Array(items)),
                Err(err) => return Err(err),
            }

            self.skip_whitespace();
            match self.chars.next() {
                None | Some(']') => return Ok(Value::Array(items)),
                Some(',') => continue,
                Some(_) => return Err(Stop::Malformed),
            }
        }
    }

    /// Reads string content after the opening quote.
    fn parse_string(&mut self) -> Parsed<PartialString> {
        let mut text = String::new();

        while let Some(c) = self.chars.next() {
            match c {
                '"' => return Ok(PartialString { text, closed: true }),
                '\\' => match self.parse_escape()? {
                    Escape::Char(decoded) => text.push(decoded),
                    Escape::Incomplete => break,
                },
                other => text.push(other),
            }
        }

        Ok(PartialString {
            text,
            closed: false,
        })
    }

    fn parse_escape(&mut self) -> Parsed<Escape> {
        let decoded = match self.chars.next() {
            None => return Ok(Escape::Incomplete),
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('u') => return self.parse_unicode_escape(),
            // Covers \" \\ \/ and is lenient about unknown escapes
            Some(other) => other,
        };
        Ok(Escape::Char(decoded))
    }

    fn parse_unicode_escape(&mut self) -> Parsed<Escape> {
        let Some(first) = self.read_hex4()? else {
            return Ok(Escape::Incomplete);
        };

        if !(0xD800..0xDC00).contains(&first) {
            return char::from_u32(first)
                .map(Escape::Char)
                .ok_or(Stop::Malformed);
        }

        // High surrogate, the low half must follow as another \u escape
        match self.chars.next() {
            None => return Ok(Escape::Incomplete),
            Some('\\') => {}
            Some(_) => return Err(Stop::Malformed),
        }
        match self.chars.next() {
            None => return Ok(Escape::Incomplete),
            Some('u') => {}
            Some(_) => return Err(Stop::Malformed),
        }
        let Some(second) = self.read_hex4()? else {
            return Ok(Escape::Incomplete);
        };
        if !(0xDC00..0xE000).contains(&second) {
            return Err(Stop::Malformed);
        }

        let code_point = 0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00);
        char::from_u32(code_point)
            .map(Escape::Char)
            .ok_or(Stop::Malformed)
    }

    /// `Ok(None)` when the text ends before four hex digits were read.
    fn read_hex4(&mut self) -> Parsed<Option<u32>> {
        let mut value = 0;
        for _ in 0..4 {
            let Some(c) = self.chars.next() else {
                return Ok(None);
            };
            let digit = c.to_digit(16).ok_or(Stop::Malformed)?;
            value = value * 16 + digit;
        }
        Ok(Some(value))
    }

    fn parse_literal(&mut self, word: &str, value: Value) -> Parsed<Value> {
        for expected in word.chars() {
            match self.chars.next() {
                None => return Err(Stop::Incomplete),
                Some(c) if c == expected => {}
                Some(_) => return Err(Stop::Malformed),
            }
        }
        Ok(value)
    }

    fn parse_number(&mut self) -> Parsed<Value> {
        let mut literal = String::new();
        while let Some(c) = self
            .chars
            .next_if(|c| c.is_ascii_digit() || matches!(*c, '-' | '+' | '.' | 'e' | 'E'))
        {
            literal.push(c);
        }

        // More digits may still be on their way
        if self.chars.peek().is_none() {
            return Err(Stop::Incomplete);
        }

        serde_json::from_str::<Number>(&literal)
            .map(Value::Number)
            .map_err(|_| Stop::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_and_whitespace_input() {
        assert_eq!(parse_partial_json(""), None);
        assert_eq!(parse_partial_json("   \n\t"), None);
    }

    #[test]
    fn test_complete_document() {
        assert_eq!(
            parse_partial_json(r#"{"language": "python", "code": "print(1)"}"#),
            Some(json!({"language": "python", "code": "print(1)"}))
        );
    }

    #[test]
    fn test_unterminated_object_and_string() {
        assert_eq!(parse_partial_json("{"), Some(json!({})));
        assert_eq!(parse_partial_json(r#"{"a": "b"#), Some(json!({"a": "b"})));
        assert_eq!(
            parse_partial_json(r#"{"a": {"b": [1, 2"#),
            Some(json!({"a": {"b": [1]}}))
        );
    }

    #[test]
    fn test_dangling_keys_are_dropped() {
        assert_eq!(
            parse_partial_json(r#"{"language": "python", "co"#),
            Some(json!({"language": "python"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"language": "python", "code""#),
            Some(json!({"language": "python"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"language": "python", "code": "#),
            Some(json!({"language": "python"}))
        );
    }

    #[test]
    fn test_trailing_comma_is_ignored() {
        assert_eq!(
            parse_partial_json(r#"{"category": "ATPG_General","#),
            Some(json!({"category": "ATPG_General"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"a": 1, }"#),
            Some(json!({"a": 1}))
        );
        assert_eq!(parse_partial_json("[1, 2,"), Some(json!([1, 2])));
    }

    #[test]
    fn test_incomplete_scalars_are_dropped() {
        assert_eq!(
            parse_partial_json(r#"{"a": "x", "b": tr"#),
            Some(json!({"a": "x"}))
        );
        assert_eq!(parse_partial_json(r#"{"n": 12"#), Some(json!({})));
        assert_eq!(parse_partial_json(r#"{"n": 12,"#), Some(json!({"n": 12})));
        assert_eq!(parse_partial_json("tru"), None);
        assert_eq!(parse_partial_json("12"), Some(json!(12)));
    }

    #[test]
    fn test_top_level_string_needs_its_closing_quote() {
        assert_eq!(parse_partial_json(r#""abc"#), None);
        assert_eq!(parse_partial_json(r#"  "ab\"c"#), None);
        assert_eq!(parse_partial_json(r#""abc""#), Some(json!("abc")));
        assert_eq!(parse_partial_json(r#"["abc"#), Some(json!(["abc"])));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            parse_partial_json(r#"{"code": "print(\"hi\")\n"#),
            Some(json!({"code": "print(\"hi\")\n"}))
        );
        // Cut-off escapes are dropped until complete
        assert_eq!(parse_partial_json(r#"{"code": "a\"#), Some(json!({"code": "a"})));
        assert_eq!(
            parse_partial_json(r#"{"code": "caf\u00"#),
            Some(json!({"code": "caf"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"code": "café"#),
            Some(json!({"code": "café"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"code": "\ud83d"#),
            Some(json!({"code": ""}))
        );
        assert_eq!(
            parse_partial_json(r#"{"code": "😀"#),
            Some(json!({"code": "😀"}))
        );
    }

    #[test]
    fn test_raw_newlines_inside_strings() {
        assert_eq!(
            parse_partial_json("{\"code\": \"a\nb"),
            Some(json!({"code": "a\nb"}))
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(parse_partial_json("hello"), None);
        assert_eq!(parse_partial_json(r#"{"a" 1}"#), None);
        assert_eq!(parse_partial_json(r#"{"a": 1} trailing"#), None);
        assert_eq!(parse_partial_json("{]"), None);
        assert_eq!(parse_partial_json(r#"{"a": "\uZZZZ"#), None);
    }

    #[test]
    fn test_prefixes_never_revise_a_completed_value() {
        let document = r#"{"language": "python", "code": "for i in range(3):\n    print(\"café 😀\", i)", "n": -12.5e3, "flags": [true, null], "nested": {"k": "v"}}"#;
        let expected: Value = serde_json::from_str(document).unwrap();
        let expected = expected.as_object().unwrap();

        let mut settled: Map<String, Value> = Map::new();
        let boundaries = document
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(document.len()));

        for end in boundaries {
            let Some(Value::Object(parsed)) = parse_partial_json(&document[..end]) else {
                continue;
            };

            for (key, value) in &parsed {
                if let Some(previous) = settled.get(key) {
                    assert_eq!(
                        previous, value,
                        "value of '{key}' changed after completion at prefix {end}"
                    );
                }
                if expected.get(key) == Some(value) {
                    settled.insert(key.clone(), value.clone());
                }
            }
            for key in settled.keys() {
                assert!(
                    parsed.contains_key(key),
                    "completed key '{key}' vanished at prefix {end}"
                );
            }
        }

        assert_eq!(settled.len(), expected.len());
    }
}
