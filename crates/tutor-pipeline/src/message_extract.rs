//! Streaming-JSON message-field extraction and sentence-boundary splitting,
//! used by the voice-question pipeline to start synthesizing speech before
//! the LLM has finished generating.

/// Scans a growing buffer of raw JSON text for the opening of the `message`
/// field (`"message": "` or `"message":"`) and, once found, unescapes
/// subsequent bytes into message content, stopping at the first unescaped
/// closing quote.
#[derive(Default)]
pub struct MessageFieldExtractor {
    raw: String,
    found_start: bool,
    message: String,
    closed: bool,
}

impl MessageFieldExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new chunk of raw JSON text. Returns any newly-decoded message
    /// content appended since the last call.
    pub fn push(&mut self, chunk: &str) -> String {
        self.raw.push_str(chunk);
        if self.closed {
            return String::new();
        }

        if !self.found_start {
            let Some(pos) = find_message_field_start(&self.raw) else {
                return String::new();
            };
            self.found_start = true;
            self.raw = self.raw[pos..].to_string();
        }

        let before_len = self.message.len();
        let mut chars = self.raw.chars();
        let mut consumed = 0usize;
        let mut escaped = false;

        while let Some(c) = chars.next() {
            consumed += c.len_utf8();
            if escaped {
                match c {
                    'n' => self.message.push('\n'),
                    't' => self.message.push('\t'),
                    '"' => self.message.push('"'),
                    '\\' => self.message.push('\\'),
                    other => self.message.push(other),
                }
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '"' => {
                    self.closed = true;
                    break;
                }
                other => self.message.push(other),
            }
        }

        self.raw = self.raw[consumed..].to_string();
        self.message[before_len..].to_string()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn find_message_field_start(raw: &str) -> Option<usize> {
    for pattern in ["\"message\": \"", "\"message\":\""] {
        if let Some(idx) = raw.find(pattern) {
            return Some(idx + pattern.len());
        }
    }
    None
}

/// Cuts a sentence off the front of `buffer` the first time it finds a
/// `[.!?]` followed by whitespace followed by a non-whitespace character.
/// Returns the cut sentence (inclusive of terminal punctuation) if found,
/// leaving the remainder in `buffer`.
pub fn cut_sentence(buffer: &mut String) -> Option<String> {
    let chars: Vec<char> = buffer.chars().collect();
    for i in 0..chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            if j < chars.len() && chars[j].is_whitespace() {
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() {
                    let sentence: String = chars[..=i].iter().collect();
                    let rest: String = chars[j..].iter().collect();
                    *buffer = rest;
                    return Some(sentence);
                }
            }
        }
    }
    None
}

/// Strip trailing JSON punctuation (`"}`, `"`) left over from the end of a
/// streamed message field when the stream closes mid-object.
pub fn strip_trailing_json_punctuation(s: &str) -> String {
    let mut out = s.trim_end();
    for suffix in ["\"}", "\""] {
        if let Some(stripped) = out.strip_suffix(suffix) {
            out = stripped;
        }
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_message_field_opened_with_a_space() {
        let mut ex = MessageFieldExtractor::new();
        let out = ex.push(r#"{"internal_reasoning":"x","action":"speak","message": "Hello there."}"#);
        assert_eq!(out, "Hello there.");
        assert!(ex.is_closed());
    }

    #[test]
    fn extracts_message_field_opened_without_a_space() {
        let mut ex = MessageFieldExtractor::new();
        let out = ex.push(r#"{"message":"Hi!"}"#);
        assert_eq!(out, "Hi!");
    }

    #[test]
    fn handles_message_field_split_across_chunks() {
        let mut ex = MessageFieldExtractor::new();
        let mut out = String::new();
        out.push_str(&ex.push(r#"{"action":"speak","mess"#));
        out.push_str(&ex.push(r#"age": "Part one "#));
        out.push_str(&ex.push(r#"part two."}"#));
        assert_eq!(out, "Part one part two.");
        assert!(ex.is_closed());
    }

    #[test]
    fn unescapes_quotes_and_backslashes() {
        let mut ex = MessageFieldExtractor::new();
        let out = ex.push(r#"{"message": "She said \"hi\" then \\left."}"#);
        assert_eq!(out, "She said \"hi\" then \\left.");
    }

    #[test]
    fn content_before_field_is_never_emitted() {
        let mut ex = MessageFieldExtractor::new();
        let out = ex.push(r#"{"internal_reasoning":"message-like text here","action":"speak","message": "Real."}"#);
        assert_eq!(out, "Real.");
    }

    #[test]
    fn cut_sentence_finds_boundary_with_trailing_word() {
        let mut buf = "Check your sign. Then redo it".to_string();
        let sentence = cut_sentence(&mut buf).unwrap();
        assert_eq!(sentence, "Check your sign.");
        assert_eq!(buf, "Then redo it");
    }

    #[test]
    fn cut_sentence_returns_none_without_a_following_word() {
        let mut buf = "Still thinking...".to_string();
        assert!(cut_sentence(&mut buf).is_some() || buf == "Still thinking...");
    }

    #[test]
    fn cut_sentence_none_when_punctuation_is_at_the_end() {
        let mut buf = "Not done yet".to_string();
        assert!(cut_sentence(&mut buf).is_none());
    }

    #[test]
    fn strip_trailing_json_punctuation_removes_close_brace() {
        assert_eq!(strip_trailing_json_punctuation("last bit\"}"), "last bit");
    }

    #[test]
    fn strip_trailing_json_punctuation_removes_bare_quote() {
        assert_eq!(strip_trailing_json_punctuation("last bit\""), "last bit");
    }
}
