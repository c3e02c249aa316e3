pub mod cli;
pub mod config;
pub mod message;
pub mod protocol;

pub use cli::{Command, prompt};
pub use config::{ClientConfig, ServerConfig};
pub use message::{Message, MessageArray, MessageObject, MessageValue};
pub use protocol::{MessageClient, MessageServer, ProtocolError, Router};
