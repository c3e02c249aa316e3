use std::io::{self, BufRead};

use thiserror::Error;

use super::{
    token::{Token, Tokenizer},
    value::{Message, MessageArray, MessageObject, MessageValue},
};

/// Objects and arrays nested deeper than this are rejected.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The stream ended, either between messages or inside one.
    #[error("unexpected end of stream")]
    EndOfStream,

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    fn unexpected(expected: &str, found: Token) -> Self {
        match found {
            Token::Eof => ParseError::EndOfStream,
            found => ParseError::Syntax(format!("expected {expected}, found {found}")),
        }
    }
}

/// Reads consecutive messages from a stream.
///
/// The grammar is the framing: a message ends where its outermost brace or
/// bracket closes, and nothing after it is consumed.
pub struct MessageReader<R> {
    tokens: Tokenizer<R>,
    lookahead: Option<Token>,
    depth: usize,
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            tokens: Tokenizer::new(reader),
            lookahead: None,
            depth: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        self.tokens.get_ref()
    }

    /// Parses the next top-level message.
    ///
    /// After a syntax error the rest of the broken message is skipped so the
    /// following call starts on a message boundary.
    pub fn read_message(&mut self) -> Result<Message, ParseError> {
        self.depth = 0;
        let result = self.message();

        if let Err(ParseError::Syntax(_)) = &result {
            while self.depth > 0 {
                if self.advance()? == Token::Eof {
                    break;
                }
            }
        }

        result
    }

    fn message(&mut self) -> Result<Message, ParseError> {
        match self.advance()? {
            Token::Symbol('{') => self.object(None).map(Message::Object),
            Token::Symbol('[') => self.array(None).map(Message::Array),
            Token::Identifier(name) => match self.advance()? {
                Token::Symbol('{') => self.object(Some(name)).map(Message::Object),
                Token::Symbol('[') => self.array(Some(name)).map(Message::Array),
                other => Err(ParseError::unexpected(&format!("'{{' or '[' after '{name}'"), other)),
            },
            other => Err(ParseError::unexpected("a message", other)),
        }
    }

    fn value(&mut self) -> Result<MessageValue, ParseError> {
        match self.advance()? {
            Token::Symbol('{') => self.object(None).map(MessageValue::Object),
            Token::Symbol('[') => self.array(None).map(MessageValue::Array),
            Token::String(s) => Ok(MessageValue::String(s)),
            Token::Integer(text) => text
                .parse()
                .map(MessageValue::Integer)
                .map_err(|_| ParseError::Syntax(format!("invalid integer '{text}'"))),
            Token::Double(text) => text
                .parse()
                .map(MessageValue::Float)
                .map_err(|_| ParseError::Syntax(format!("invalid double '{text}'"))),
            Token::Identifier(word) => match self.peek()? {
                Token::Symbol('{') => {
                    self.advance()?;
                    self.object(Some(word)).map(MessageValue::Object)
                }
                Token::Symbol('[') => {
                    self.advance()?;
                    self.array(Some(word)).map(MessageValue::Array)
                }
                _ => match word.as_str() {
                    "true" => Ok(MessageValue::Boolean(true)),
                    "false" => Ok(MessageValue::Boolean(false)),
                    "null" => Ok(MessageValue::Null),
                    _ => Err(ParseError::Syntax(format!("unexpected identifier '{word}'"))),
                },
            },
            other => Err(ParseError::unexpected("a value", other)),
        }
    }

    /// Called with the opening brace already consumed.
    fn object(&mut self, name: Option<String>) -> Result<MessageObject, ParseError> {
        self.check_depth()?;
        let mut object = MessageObject::from_token(name);

        if *self.peek()? == Token::Symbol('}') {
            self.advance()?;
            return Ok(object);
        }

        loop {
            let key = match self.advance()? {
                Token::Identifier(key) => key,
                other => return Err(ParseError::unexpected("an attribute name", other)),
            };

            match self.advance()? {
                Token::Symbol('=') => {}
                other => return Err(ParseError::unexpected("'='", other)),
            }

            let value = self.value()?;
            if object.contains(&key) {
                return Err(ParseError::Syntax(format!("duplicate attribute '{key}'")));
            }
            object.insert_parsed(key, value);

            match self.advance()? {
                Token::Symbol(',') => continue,
                Token::Symbol('}') => return Ok(object),
                other => return Err(ParseError::unexpected("',' or '}'", other)),
            }
        }
    }

    /// Called with the opening bracket already consumed.
    fn array(&mut self, name: Option<String>) -> Result<MessageArray, ParseError> {
        self.check_depth()?;
        let mut array = MessageArray::from_token(name);

        if *self.peek()? == Token::Symbol(']') {
            self.advance()?;
            return Ok(array);
        }

        loop {
            array.push(self.value()?);

            match self.advance()? {
                Token::Symbol(',') => continue,
                Token::Symbol(']') => return Ok(array),
                other => return Err(ParseError::unexpected("',' or ']'", other)),
            }
        }
    }

    fn check_depth(&self) -> Result<(), ParseError> {
        if self.depth > MAX_NESTING {
            return Err(ParseError::Syntax(format!(
                "nesting deeper than {MAX_NESTING} levels"
            )));
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.pull()?);
        }
        Ok(self.lookahead.get_or_insert(Token::Eof))
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let token = match self.lookahead.take() {
            Some(token) => token,
            None => self.pull()?,
        };

        match token {
            Token::Symbol('{' | '[') => self.depth += 1,
            Token::Symbol('}' | ']') => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }

        Ok(token)
    }

    fn pull(&mut self) -> Result<Token, ParseError> {
        Ok(self.tokens.next_token()?.unwrap_or(Token::Eof))
    }
}

impl Message {
    /// Parses a single message from text.
    pub fn parse(text: &str) -> Result<Message, ParseError> {
        MessageReader::new(text.as_bytes()).read_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Message, ParseError> {
        Message::parse(text)
    }

    #[test]
    fn parse_named_object() {
        let message = parse(r#"MOVE_FLEET { fleetId = 12, x = 1.5, tag = "alpha" }"#).unwrap();
        let object = message.as_object().unwrap();

        assert!(object.is("MOVE_FLEET"));
        assert_eq!(object.get_int("fleetId").unwrap(), 12);
        assert_eq!(object.get_float("x").unwrap(), 1.5);
        assert_eq!(object.get_string("tag").unwrap(), "alpha");
    }

    #[test]
    fn parse_nested_values() {
        let message =
            parse("STATE{ships=[SHIP{id=1},{id=2},null],home=PLANET{owned=true},flags=[false]}")
                .unwrap();
        let object = message.as_object().unwrap();

        let ships = object.get_array("ships").unwrap();
        assert_eq!(ships.len(), 3);
        assert!(ships.get_object(0).unwrap().is("SHIP"));
        assert_eq!(ships.get_object(1).unwrap().name(), None);
        assert!(ships.get(2).unwrap().is_null());

        let home = object.get_object("home").unwrap();
        assert!(home.get_bool("owned").unwrap());
        assert!(!object.get_array("flags").unwrap().get_bool(0).unwrap());
    }

    #[test]
    fn parse_anonymous_and_empty() {
        assert_eq!(parse("{}").unwrap(), Message::Object(MessageObject::anonymous()));
        assert_eq!(parse("[ ]").unwrap(), Message::Array(MessageArray::anonymous()));
        assert!(parse("PING{}").unwrap().is("PING"));
    }

    #[test]
    fn missing_value_is_syntax_error() {
        assert!(matches!(parse("FOO { a = }"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn separator_errors() {
        assert!(matches!(parse("FOO { a = 1 b = 2 }"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse("[1 2]"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse("[1,]"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse("FOO { a = 1, }"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn scalars_are_not_messages() {
        assert!(matches!(parse("42"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse("true"), Err(ParseError::EndOfStream)));
        assert!(matches!(parse("FOO 1"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn bare_identifiers_are_rejected_as_values() {
        assert!(matches!(parse("{a = maybe}"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn duplicate_attribute_is_syntax_error() {
        assert!(matches!(parse("{a=1,a=2}"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn integer_overflow_is_syntax_error() {
        assert!(matches!(
            parse("{a=99999999999999999999}"),
            Err(ParseError::Syntax(_))
        ));
    }

    #[test]
    fn premature_end_is_distinct_from_syntax() {
        assert!(matches!(parse(""), Err(ParseError::EndOfStream)));
        assert!(matches!(parse("FOO { a = 1,"), Err(ParseError::EndOfStream)));
        assert!(matches!(parse("[1, [2"), Err(ParseError::EndOfStream)));
        assert!(matches!(parse("{s = \"open"), Err(ParseError::EndOfStream)));
    }

    #[test]
    fn consecutive_messages_share_a_stream() {
        let mut reader = MessageReader::new(&b"PING{} [1,2]\nLOGIN{user=\"a\"}"[..]);

        assert!(reader.read_message().unwrap().is("PING"));
        assert_eq!(reader.read_message().unwrap().as_array().unwrap().len(), 2);
        assert!(reader.read_message().unwrap().is("LOGIN"));
        assert!(matches!(reader.read_message(), Err(ParseError::EndOfStream)));
        assert!(matches!(reader.read_message(), Err(ParseError::EndOfStream)));
    }

    #[test]
    fn recovers_after_syntax_error() {
        let mut reader = MessageReader::new(&b"FOO { a = = 1, b = [2] } PING{}"[..]);

        assert!(matches!(reader.read_message(), Err(ParseError::Syntax(_))));
        assert!(reader.read_message().unwrap().is("PING"));
    }

    #[test]
    fn recovers_when_error_closes_the_message() {
        let mut reader = MessageReader::new(&b"FOO { a = } PING{}"[..]);

        assert!(matches!(reader.read_message(), Err(ParseError::Syntax(_))));
        assert!(reader.read_message().unwrap().is("PING"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let text = "[".repeat(MAX_NESTING + 1);
        assert!(matches!(parse(&text), Err(ParseError::Syntax(_))));
    }
}
