//! Streaming reconstruction of fetched messages.
//!
//! One bulk `UID FETCH` is issued up front; a background task then turns the
//! responses into [`FetchResponse`]s one at a time and hands them over a
//! bounded channel, blocking while the consumer lags behind.

use log::{debug, warn};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::mail_reader::error::{MessageError, TransportError};
use crate::mail_reader::imap::{uid_set, MailStore, RawFetch};
use crate::mail_reader::message::{assemble, Message};
use crate::mail_reader::multipart::ParseOptions;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// `BODY.PEEK[]` is answered as `BODY[]` without setting `\Seen`.
pub const FETCH_ITEMS: &str = "(INTERNALDATE BODY.PEEK[] UID RFC822.HEADER)";

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// How many results may wait unread before the producer blocks.
    pub channel_capacity: usize,
    pub parse: ParseOptions,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            parse: ParseOptions::default(),
        }
    }
}

/// The outcome for one fetched message.
///
/// A message and an error may both be present when the envelope was parsed
/// but (parts of) the body were not.
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    #[serde(flatten)]
    pub message: Option<Message>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<MessageError>,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<MessageError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.collect_str(error),
        None => serializer.serialize_none(),
    }
}

/// Fetches `uids` and streams one [`FetchResponse`] per message.
///
/// An empty `uids` yields an already closed stream without talking to the
/// server. A failing `UID FETCH` is returned directly. Responses lacking
/// `RFC822.HEADER` are unsolicited (e.g. flag updates) and are dropped.
/// The stream closes after the last response, or early once `cancel` fires
/// or the receiver is dropped.
pub async fn fetch_messages<S: MailStore>(
    store: &mut S,
    uids: &[u32],
    options: &FetchOptions,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<FetchResponse>, TransportError> {
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    if uids.is_empty() {
        return Ok(rx);
    }

    let responses = store.fetch_uids(&uid_set(uids), FETCH_ITEMS).await?;
    let parse_options = options.parse.clone();

    tokio::spawn(async move {
        for raw in responses {
            if cancel.is_cancelled() {
                debug!("fetch cancelled, closing stream");
                break;
            }
            let Some(response) = process(&raw, &parse_options, &cancel) else {
                continue;
            };
            if tx.send(response).await.is_err() {
                debug!("fetch stream receiver dropped");
                break;
            }
        }
    });

    Ok(rx)
}

fn process(raw: &RawFetch, options: &ParseOptions, cancel: &CancellationToken) -> Option<FetchResponse> {
    // make sure is a legit response before we attempt to parse it,
    // servers send unsolicited FETCH responses containing only flags
    let Some(header) = raw.header.as_deref() else {
        debug!("skipping FETCH response without RFC822.HEADER (uid {:?})", raw.uid);
        return None;
    };

    let uid = raw.uid.unwrap_or_else(|| {
        warn!("FETCH response without UID");
        0
    });
    let body = message_text(raw.body.as_deref().unwrap_or_default());

    let response = match assemble(cancel, header, body, raw.internal_date, uid, options) {
        Ok(parsed) => {
            let (message, error) = parsed.into_parts();
            FetchResponse {
                message: Some(message),
                error,
            }
        }
        Err(e) => FetchResponse {
            message: None,
            error: Some(e),
        },
    };
    if let Some(error) = &response.error {
        warn!("uid {}: {}", uid, error);
    }
    Some(response)
}

/// Skips the header block of a full `BODY[]` message.
fn message_text(full: &[u8]) -> &[u8] {
    match mailparse::parse_headers(full) {
        Ok((_, offset)) => &full[offset..],
        Err(_) => full,
    }
}
