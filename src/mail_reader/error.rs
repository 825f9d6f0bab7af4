//! Error kinds of the mailbox client.
//!
//! Failures are split by blast radius: a [`TransportError`] aborts a whole
//! operation, a [`MessageError`] is fatal to one fetched message, and a
//! [`ParseError`] is contained at the body part where it happened.

use std::fmt;

use itertools::Itertools;

/// Failure of the protocol session itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("dialing {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("negotiating TLS with {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: native_tls::Error,
    },

    #[error("authenticating: {0}")]
    Login(#[source] async_imap::error::Error),

    #[error("selecting mailbox {folder:?}: {source}")]
    Select {
        folder: String,
        #[source]
        source: async_imap::error::Error,
    },

    #[error("searching mails: {0}")]
    Search(#[source] async_imap::error::Error),

    #[error("fetching mails: {0}")]
    Fetch(#[source] async_imap::error::Error),

    #[error("logging out: {0}")]
    Logout(#[source] async_imap::error::Error),
}

/// Malformed `Content-Type` or `Content-Disposition` value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaTypeError {
    #[error("no media type")]
    NoMediaType,

    #[error("expected slash after first token")]
    ExpectedSlash,

    #[error("expected token after slash")]
    ExpectedSubtype,

    #[error("unexpected content after media subtype")]
    TrailingContent,

    #[error("invalid media parameter")]
    InvalidParameter,

    #[error("duplicate parameter name {0:?}")]
    DuplicateParameter(String),
}

/// Failure to build one node of the body tree.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("parsing Content-Type: {0}")]
    InvalidContentType(#[source] MediaTypeError),

    #[error("parsing Content-Disposition: {0}")]
    InvalidContentDisposition(#[source] MediaTypeError),

    #[error("unsupported encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("failed to decode {encoding} body: {reason}")]
    TransferDecode { encoding: String, reason: String },

    #[error("parsing part header: {0}")]
    InvalidPartHeader(#[source] mailparse::MailParseError),

    #[error("multipart body without boundary parameter")]
    MissingBoundary,

    #[error("multipart body ended without a closing delimiter")]
    UnterminatedMultipart,

    #[error("parts nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("parsing cancelled")]
    Cancelled,
}

/// A [`ParseError`] together with the position of the node it belongs to.
///
/// The path lists zero based child indices from the root; an empty path is
/// the root itself.
#[derive(Debug, thiserror::Error)]
#[error("part {}: {error}", PartPath(.path))]
pub struct PartError {
    pub path: Vec<usize>,
    #[source]
    pub error: ParseError,
}

impl PartError {
    pub fn new(path: Vec<usize>, error: ParseError) -> Self {
        Self { path, error }
    }

    /// Re-roots the error below child `index` of a parent node.
    pub(crate) fn nested(mut self, index: usize) -> Self {
        self.path.insert(0, index);
        self
    }
}

/// IMAP-style section numbering (`1.2`), `root` for the empty path.
struct PartPath<'a>(&'a [usize]);

impl fmt::Display for PartPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("root");
        }
        write!(f, "{}", self.0.iter().map(|index| index + 1).join("."))
    }
}

/// Failure to reconstruct one fetched message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("parsing mail: {0}")]
    InvalidHeader(#[from] mailparse::MailParseError),

    #[error("parsing From: {0}")]
    InvalidFrom(String),

    #[error("parsing To: {0}")]
    InvalidTo(String),

    /// The envelope is fine but parts of the body could not be parsed.
    #[error("parsing body: {}", .0.iter().join("; "))]
    Body(Vec<PartError>),
}
