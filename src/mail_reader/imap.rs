use std::fmt;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use chrono::{DateTime, FixedOffset, NaiveDate};
use futures::TryStreamExt;
use itertools::Itertools;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::mail_reader::error::TransportError;
use crate::settings::ImapConfig;

/// Date format used by the IMAP `SINCE` search key.
pub const IMAP_DATE_FORMAT: &str = "%d-%b-%Y";

/// The byte stream under a session, TLS or plain TCP.
pub trait ServerStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> ServerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

pub type ImapSession = Session<Compat<Box<dyn ServerStream>>>;

/// One untagged FETCH response, reduced to the fields this crate asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFetch {
    /// `RFC822.HEADER`
    pub header: Option<Vec<u8>>,
    /// `BODY[]`, the full message
    pub body: Option<Vec<u8>>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub uid: Option<u32>,
}

impl From<&Fetch> for RawFetch {
    fn from(fetch: &Fetch) -> Self {
        Self {
            header: fetch.header().map(<[u8]>::to_vec),
            body: fetch.body().map(<[u8]>::to_vec),
            internal_date: fetch.internal_date(),
            uid: fetch.uid,
        }
    }
}

/// The commands the client needs from a selected mailbox.
///
/// Only one command may be in flight at a time, hence `&mut self`.
#[allow(async_fn_in_trait)]
pub trait MailStore {
    /// Runs `UID SEARCH` and returns the matching UIDs in ascending order.
    async fn search_uids(&mut self, query: &str) -> Result<Vec<u32>, TransportError>;

    /// Runs `UID FETCH` and returns the responses in server order.
    async fn fetch_uids(&mut self, uid_set: &str, items: &str) -> Result<Vec<RawFetch>, TransportError>;
}

impl MailStore for ImapSession {
    async fn search_uids(&mut self, query: &str) -> Result<Vec<u32>, TransportError> {
        let uids = self.uid_search(query).await.map_err(TransportError::Search)?;
        Ok(uids.into_iter().sorted().collect())
    }

    async fn fetch_uids(&mut self, uid_set: &str, items: &str) -> Result<Vec<RawFetch>, TransportError> {
        let fetches: Vec<Fetch> = self
            .uid_fetch(uid_set, items)
            .await
            .map_err(TransportError::Fetch)?
            .try_collect()
            .await
            .map_err(TransportError::Fetch)?;
        Ok(fetches.iter().map(RawFetch::from).collect())
    }
}

/// The mailbox picked by [`connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMailbox {
    pub name: String,
    pub exists: u32,
    /// Validity epoch of the UIDs handed out by this mailbox.
    pub uid_validity: Option<u32>,
}

// Open the connection to the IMAP server, TLS-encrypted unless disabled
async fn connect_to_server(config: &ImapConfig) -> Result<Box<dyn ServerStream>, TransportError> {
    let server = config.server.as_str();
    let port = config.port();
    let tcp_stream = TcpStream::connect((server, port))
        .await
        .map_err(|source| TransportError::Connect {
            host: server.to_owned(),
            source,
        })?;

    if !config.tls {
        warn!("-- connected to {}:{} without TLS", server, port);
        return Ok(Box::new(tcp_stream));
    }

    let tls_error = |source| TransportError::Tls {
        host: server.to_owned(),
        source,
    };
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(config.insecure_skip_verify)
        .build()
        .map_err(tls_error)?;
    let tls_stream = tokio_native_tls::TlsConnector::from(connector)
        .connect(server, tcp_stream)
        .await
        .map_err(tls_error)?;

    info!("-- connected to {}:{}", server, port);
    Ok(Box::new(tls_stream))
}

/// Connects, logs in and selects the configured folder.
///
/// The folder is opened with `EXAMINE` when `read_only` is set so fetching
/// does not change flags.
pub async fn connect(
    config: &ImapConfig,
    password: &str,
) -> Result<(ImapSession, SelectedMailbox), TransportError> {
    let stream = connect_to_server(config).await?;
    let client = Client::new(stream.compat());

    let mut session = client
        .login(&config.username, password)
        .await
        .map_err(|(e, _)| TransportError::Login(e))?;
    info!("-- logged in as {}", config.username);

    let select_error = |source| TransportError::Select {
        folder: config.folder.clone(),
        source,
    };
    let mailbox = if config.read_only {
        session.examine(&config.folder).await.map_err(select_error)?
    } else {
        session.select(&config.folder).await.map_err(select_error)?
    };
    info!(
        "-- {} selected ({} messages, uidvalidity {:?})",
        config.folder, mailbox.exists, mailbox.uid_validity
    );

    Ok((
        session,
        SelectedMailbox {
            name: config.folder.clone(),
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
        },
    ))
}

/// Builds a `UID SEARCH` query from a free-form search term and an optional
/// arrival date lower bound. Both are combined conjunctively.
pub fn search_query(search: &str, since: Option<NaiveDate>) -> String {
    let since = since.map(|date| format!("SINCE {}", date.format(IMAP_DATE_FORMAT)));
    let query = [Some(search.trim().to_owned()).filter(|s| !s.is_empty()), since]
        .into_iter()
        .flatten()
        .join(" ");

    if query.is_empty() {
        "ALL".to_owned()
    } else {
        query
    }
}

/// Searches the selected mailbox, see [`search_query`].
pub async fn search<S: MailStore>(
    store: &mut S,
    search: &str,
    since: Option<NaiveDate>,
) -> Result<Vec<u32>, TransportError> {
    let query = search_query(search, since);
    debug!("UID SEARCH {}", query);
    store.search_uids(&query).await
}

/// Formats UIDs as an IMAP sequence set, collapsing runs into ranges.
pub fn uid_set(uids: &[u32]) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for uid in uids.iter().copied().sorted().dedup() {
        match ranges.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(uid) => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .join(",")
}
