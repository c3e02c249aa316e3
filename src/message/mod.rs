//! Text message model and its wire grammar.
//!
//! Every exchange between client and server is a single [`Message`]: either a
//! [`MessageObject`] (named attribute map) or a [`MessageArray`] (named list).
//! Values nest freely inside both.
//!
//! # Grammar
//!
//! ```text
//! value   := object | array | STRING | INTEGER | DOUBLE | "true" | "false" | "null"
//! object  := [IDENTIFIER] "{" [member ("," member)*] "}"
//! member  := IDENTIFIER "=" value
//! array   := [IDENTIFIER] "[" [value ("," value)*] "]"
//! ```
//!
//! There is no length prefix or terminator; a message ends where its outermost
//! brace or bracket closes, so a [`MessageReader`] can pull messages one after
//! another from the same stream.
//!
//! # Example
//!
//! ```rust
//! use tether::message::{Message, MessageObject};
//!
//! let request: Message = MessageObject::new("MOVE_FLEET")?
//!     .with("fleetId", 7)?
//!     .with("x", 120)?
//!     .into();
//!
//! let text = request.to_wire()?;
//! assert_eq!(text, "MOVE_FLEET{fleetId=7,x=120}");
//! assert_eq!(Message::parse(&text)?, request);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
mod parser;
mod token;
mod value;
mod writer;

pub use parser::{MAX_NESTING, MessageReader, ParseError};
pub use token::{Token, Tokenizer};
pub use value::{Message, MessageArray, MessageError, MessageObject, MessageValue, is_identifier};
