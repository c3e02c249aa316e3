use std::{
    fmt,
    io::{self, BufRead, ErrorKind},
};

use super::value::{is_identifier_part, is_identifier_start};

/// Lexical unit of the wire grammar.
///
/// Numbers keep their source text; the parser decides whether it fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Identifier(String),
    String(String),
    Integer(String),
    Double(String),
    Symbol(char),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{s}'"),
            Token::String(s) => write!(f, "string {s:?}"),
            Token::Integer(s) => write!(f, "integer {s}"),
            Token::Double(s) => write!(f, "double {s}"),
            Token::Symbol(c) => write!(f, "'{c}'"),
            Token::Eof => write!(f, "end of stream"),
        }
    }
}

/// Lazily splits a byte stream into [`Token`]s.
///
/// The tokenizer never rejects input, and it only looks ahead through the
/// reader's buffer, so bytes following a complete message stay unread.
/// Exactly one [`Token::Eof`] is produced; after it the iterator is exhausted.
pub struct Tokenizer<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Returns `Ok(None)` once the terminal [`Token::Eof`] has been handed out.
    pub fn next_token(&mut self) -> io::Result<Option<Token>> {
        if self.finished {
            return Ok(None);
        }

        let token = self.scan()?;
        if token == Token::Eof {
            self.finished = true;
        }
        Ok(Some(token))
    }

    fn scan(&mut self) -> io::Result<Token> {
        while let Some(b) = self.peek_byte()? {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.reader.consume(1);
        }

        let Some(b) = self.peek_byte()? else {
            return Ok(Token::Eof);
        };

        match b {
            b'"' => {
                self.reader.consume(1);
                self.scan_string()
            }
            b'0'..=b'9' | b'-' => self.scan_number(),
            b if is_identifier_start(b) => self.scan_identifier(),
            _ => Ok(Token::Symbol(
                self.next_char()?.unwrap_or(char::REPLACEMENT_CHARACTER),
            )),
        }
    }

    fn scan_string(&mut self) -> io::Result<Token> {
        let mut out = String::new();

        // An unterminated string ends at end of stream; the parser reports it.
        while let Some(c) = self.next_char()? {
            match c {
                '"' => break,
                '\\' => match self.next_char()? {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => break,
                },
                c => out.push(c),
            }
        }

        Ok(Token::String(out))
    }

    fn scan_number(&mut self) -> io::Result<Token> {
        let mut text = String::new();
        let mut double = false;

        while let Some(b) = self.peek_byte()? {
            let accept = match b {
                b'0'..=b'9' => true,
                b'-' => text.is_empty() || text.ends_with(['e', 'E']),
                b'+' => text.ends_with(['e', 'E']),
                b'.' | b'e' | b'E' => {
                    double = true;
                    true
                }
                _ => false,
            };
            if !accept {
                break;
            }
            text.push(b as char);
            self.reader.consume(1);
        }

        Ok(if double {
            Token::Double(text)
        } else {
            Token::Integer(text)
        })
    }

    fn scan_identifier(&mut self) -> io::Result<Token> {
        let mut text = String::new();

        while let Some(b) = self.peek_byte()? {
            if !is_identifier_part(b) {
                break;
            }
            text.push(b as char);
            self.reader.consume(1);
        }

        Ok(Token::Identifier(text))
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Decodes one UTF-8 character; malformed sequences become U+FFFD.
    fn next_char(&mut self) -> io::Result<Option<char>> {
        let Some(first) = self.peek_byte()? else {
            return Ok(None);
        };
        self.reader.consume(1);

        let width = match first {
            0x00..=0x7F => return Ok(Some(first as char)),
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
        };

        let mut buf = [first, 0, 0, 0];
        let mut len = 1;
        while len < width {
            match self.peek_byte()? {
                Some(b @ 0x80..=0xBF) => {
                    buf[len] = b;
                    len += 1;
                    self.reader.consume(1);
                }
                _ => break,
            }
        }

        Ok(Some(
            std::str::from_utf8(&buf[..len])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER),
        ))
    }
}

impl<R: BufRead> Iterator for Tokenizer<R> {
    type Item = io::Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}
