//! Fetching mails and reconstructing them into navigable [`Message`]s.

pub mod body_part;
pub mod display;
pub mod encoded_word;
pub mod error;
pub mod fetch;
pub mod imap;
pub mod media_type;
pub mod message;
pub mod multipart;
pub mod transform;

pub use body_part::BodyPart;
pub use error::{MessageError, ParseError, PartError, TransportError};
pub use fetch::{fetch_messages, FetchOptions, FetchResponse};
pub use imap::{MailStore, RawFetch};
pub use message::{assemble, Address, Envelope, Message, ParsedMessage};
pub use multipart::{build_tree, ParseOptions, ParsedPart};
