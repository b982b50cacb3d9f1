//! Span-preserving parser for OpenStep ("old-style ASCII") property lists
//!
//! `project.pbxproj` files use this format. The parser keeps the byte range
//! of every key and value so that callers can rewrite individual values or
//! insert entries without re-serializing (and reformatting) the document.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at byte {}", self.message, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub key_span: Range<usize>,
    pub value: Node,
    /// From the start of the key through the terminating `;`
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Str { value: String, span: Range<usize> },
    Data { span: Range<usize> },
    Array { items: Vec<Node>, span: Range<usize> },
    Dict { entries: Vec<Entry>, span: Range<usize> },
}

impl Node {
    #[must_use]
    pub fn span(&self) -> &Range<usize> {
        match self {
            Self::Str { span, .. }
            | Self::Data { span }
            | Self::Array { span, .. }
            | Self::Dict { span, .. } => span,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str { value, .. } => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn entries(&self) -> Option<&[Entry]> {
        match self {
            Self::Dict { entries, .. } => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn items(&self) -> Option<&[Node]> {
        match self {
            Self::Array { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Dictionary lookup; the last entry wins when a key repeats.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries()?
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| &e.value)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }
}

/// Characters allowed in an unquoted string.
fn is_bare_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$' | b'/' | b':' | b'.' | b'-' | b'+' | b'*')
}

/// Render a string the way Xcode does: bare when safe, quoted otherwise.
#[must_use]
pub fn render_string(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$' | b'/' | b':' | b'.'));
    if bare {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn parse(src: &str) -> Result<Node, ParseError> {
    let mut parser = Parser {
        src: src.as_bytes(),
        text: src,
        pos: 0,
    };
    parser.skip_trivia()?;
    let root = parser.value()?;
    parser.skip_trivia()?;
    if parser.pos != parser.src.len() {
        return Err(parser.error("trailing content after root object"));
    }
    Ok(root)
}

struct Parser<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ParseError {
        ParseError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    /// Skip whitespace, `/* … */` and `// …` comments.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'*') => {
                    let rest = &self.text[self.pos + 2..];
                    let end = rest
                        .find("*/")
                        .ok_or_else(|| self.error("unterminated comment"))?;
                    self.pos += 2 + end + 2;
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'/') => {
                    let rest = &self.text[self.pos..];
                    self.pos += rest.find('\n').unwrap_or(rest.len());
                }
                _ => return Ok(()),
            }
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), ParseError> {
        self.skip_trivia()?;
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn value(&mut self) -> Result<Node, ParseError> {
        self.skip_trivia()?;
        match self.peek() {
            Some(b'{') => self.dict(),
            Some(b'(') => self.array(),
            Some(b'<') => self.data(),
            Some(b'"') => self.quoted(),
            Some(c) if is_bare_char(c) => Ok(self.bare()),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut entries = Vec::new();

        loop {
            self.skip_trivia()?;
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(Node::Dict {
                    entries,
                    span: start..self.pos,
                });
            }

            let key_node = match self.peek() {
                Some(b'"') => self.quoted()?,
                Some(c) if is_bare_char(c) => self.bare(),
                _ => return Err(self.error("expected dictionary key")),
            };
            let key_span = key_node.span().clone();
            let Node::Str { value: key, .. } = key_node else {
                unreachable!("keys are parsed as strings");
            };

            self.expect(b'=')?;
            let value = self.value()?;
            self.expect(b';')?;

            entries.push(Entry {
                key,
                span: key_span.start..self.pos,
                key_span,
                value,
            });
        }
    }

    fn array(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_trivia()?;
            if self.peek() == Some(b')') {
                self.pos += 1;
                return Ok(Node::Array {
                    items,
                    span: start..self.pos,
                });
            }

            items.push(self.value()?);
            self.skip_trivia()?;
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {}
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn data(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let rest = &self.text[self.pos..];
        let end = rest
            .find('>')
            .ok_or_else(|| self.error("unterminated data"))?;
        self.pos += end + 1;
        Ok(Node::Data {
            span: start..self.pos,
        })
    }

    fn quoted(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();

        let text = self.text;
        let mut chars = text[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Node::Str {
                        value,
                        span: start..self.pos,
                    });
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, other)) => value.push(other),
                    None => break,
                },
                _ => value.push(c),
            }
        }

        Err(ParseError {
            offset: start,
            message: "unterminated string".to_string(),
        })
    }

    fn bare(&mut self) -> Node {
        let start = self.pos;
        while self.peek().is_some_and(is_bare_char) {
            self.pos += 1;
        }
        Node::Str {
            value: self.text[start..self.pos].to_string(),
            span: start..self.pos,
        }
    }
}
