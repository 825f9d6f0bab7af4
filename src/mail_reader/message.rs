use std::ops::Deref;

use chrono::{DateTime, FixedOffset};
use mailparse::{addrparse_header, MailAddr, MailHeader, MailHeaderMap, SingleInfo};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::mail_reader::body_part::BodyPart;
use crate::mail_reader::encoded_word::{decode_header_text, unfold};
use crate::mail_reader::error::{MessageError, PartError};
use crate::mail_reader::multipart::{build_tree, ParseOptions};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
}

impl From<&SingleInfo> for Address {
    fn from(info: &SingleInfo) -> Self {
        Self {
            name: info.display_name.clone(),
            address: info.addr.clone(),
        }
    }
}

/// Sender, recipients and subject of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub from: Address,
    pub to: Vec<Address>,
    pub precedence: String,
    pub subject: String,
}

/// A fetched mail: its body tree plus envelope metadata.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Message {
    #[serde(flatten)]
    pub root: BodyPart,
    pub from: Address,
    pub to: Vec<Address>,
    /// When the mail store received the message, not the `Date` header.
    #[serde(rename = "internalDate")]
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub precedence: String,
    pub subject: String,
    /// Only meaningful together with the UIDVALIDITY of the mailbox it was
    /// fetched from.
    pub uid: u32,
}

impl Deref for Message {
    type Target = BodyPart;

    fn deref(&self) -> &BodyPart {
        &self.root
    }
}

/// An assembled message and the body parts that could not be parsed.
#[derive(Debug)]
pub struct ParsedMessage {
    pub message: Message,
    pub errors: Vec<PartError>,
}

impl ParsedMessage {
    /// Splits into the message and, if parts of the body failed, the error
    /// describing them.
    pub fn into_parts(self) -> (Message, Option<MessageError>) {
        let error = (!self.errors.is_empty()).then(|| MessageError::Body(self.errors));
        (self.message, error)
    }
}

fn raw_value(headers: &[MailHeader<'_>], name: &str) -> Option<String> {
    headers
        .get_first_header(name)
        .map(|header| unfold(header.get_value_raw()))
}

fn parse_from(headers: &[MailHeader<'_>]) -> Result<Address, MessageError> {
    let header = headers
        .get_first_header("From")
        .ok_or_else(|| MessageError::InvalidFrom("missing From header".to_owned()))?;
    let addresses = addrparse_header(header).map_err(|e| MessageError::InvalidFrom(e.to_string()))?;

    match addresses.as_slice() {
        [MailAddr::Single(info)] => Ok(info.into()),
        [] => Err(MessageError::InvalidFrom("no address".to_owned())),
        [MailAddr::Group(_)] => Err(MessageError::InvalidFrom(
            "expected a single address, got a group".to_owned(),
        )),
        _ => Err(MessageError::InvalidFrom(format!(
            "expected a single address, got {}",
            addresses.len()
        ))),
    }
}

fn parse_to(headers: &[MailHeader<'_>]) -> Result<Vec<Address>, MessageError> {
    let Some(header) = headers.get_first_header("To") else {
        return Ok(Vec::new());
    };
    let addresses = addrparse_header(header).map_err(|e| MessageError::InvalidTo(e.to_string()))?;

    Ok(addresses
        .iter()
        .flat_map(|address| match address {
            MailAddr::Single(info) => vec![Address::from(info)],
            MailAddr::Group(group) => group.addrs.iter().map(Address::from).collect(),
        })
        .collect())
}

/// Extracts the envelope fields from parsed message headers.
pub fn extract_envelope(headers: &[MailHeader<'_>]) -> Result<Envelope, MessageError> {
    Ok(Envelope {
        from: parse_from(headers)?,
        to: parse_to(headers)?,
        precedence: raw_value(headers, "Precedence").unwrap_or_default(),
        subject: raw_value(headers, "Subject")
            .map(|subject| decode_header_text(&subject))
            .unwrap_or_default(),
    })
}

/// Builds a [`Message`] from the raw header block and raw body of a fetched
/// mail.
///
/// Envelope failures reject the message. Body failures do not: the message
/// is returned with whatever tree could be built and the failures listed in
/// [`ParsedMessage::errors`].
pub fn assemble(
    cancel: &CancellationToken,
    raw_header: &[u8],
    raw_body: &[u8],
    internal_date: Option<DateTime<FixedOffset>>,
    uid: u32,
    options: &ParseOptions,
) -> Result<ParsedMessage, MessageError> {
    let mut raw_mail = Vec::with_capacity(raw_header.len() + raw_body.len() + 2);
    raw_mail.extend_from_slice(raw_header);
    raw_mail.extend_from_slice(b"\r\n");
    raw_mail.extend_from_slice(raw_body);

    let (headers, _) = mailparse::parse_headers(&raw_mail)?;
    let envelope = extract_envelope(&headers)?;

    let mut message = Message {
        root: BodyPart::default(),
        from: envelope.from,
        to: envelope.to,
        internal_date,
        precedence: envelope.precedence,
        subject: envelope.subject,
        uid,
    };

    // boundaries are searched in the original body, not in raw_mail
    let errors = match build_tree(&headers, raw_body, options, cancel) {
        Ok(parsed) => {
            message.root = parsed.part;
            parsed.errors
        }
        Err(e) => vec![PartError::new(Vec::new(), e)],
    };

    Ok(ParsedMessage { message, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail_reader::error::ParseError;

    const HEADER: &[u8] = b"From: \"Ann Example\" <ann@example.com>\r\n\
To: bob@example.com, Team: carol@example.com, dave@example.com;\r\n\
Subject: =?UTF-8?B?SGVsbG8=?=\r\n\
Precedence: bulk\r\n\
Content-Type: multipart/mixed; boundary=sep\r\n\
\r\n";

    const BODY: &[u8] = b"--sep\r\n\
Content-Type: text/plain\r\n\
\r\n\
hi\r\n\
--sep--\r\n";

    fn parse_headers(raw: &[u8]) -> Vec<MailHeader<'_>> {
        mailparse::parse_headers(raw).unwrap().0
    }

    #[test]
    fn test_extract_envelope() {
        let envelope = extract_envelope(&parse_headers(HEADER)).unwrap();
        assert_eq!(
            envelope.from,
            Address {
                name: Some("Ann Example".into()),
                address: "ann@example.com".into(),
            }
        );
        let to: Vec<_> = envelope.to.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(to, vec!["bob@example.com", "carol@example.com", "dave@example.com"]);
        assert_eq!(envelope.subject, "Hello");
        assert_eq!(envelope.precedence, "bulk");
    }

    #[test]
    fn test_optional_fields_default_to_empty() {
        let envelope = extract_envelope(&parse_headers(b"From: ann@example.com\r\n\r\n")).unwrap();
        assert!(envelope.to.is_empty());
        assert_eq!(envelope.subject, "");
        assert_eq!(envelope.precedence, "");
    }

    #[test]
    fn test_folded_subject() {
        let headers = parse_headers(b"From: a@example.com\r\nSubject: a long\r\n  subject line\r\n\r\n");
        assert_eq!(extract_envelope(&headers).unwrap().subject, "a long subject line");
    }

    #[test]
    fn test_from_must_be_one_address() {
        for header in [
            &b"To: bob@example.com\r\n\r\n"[..],
            &b"From: \r\n\r\n"[..],
            &b"From: a@example.com, b@example.com\r\n\r\n"[..],
        ] {
            let err = extract_envelope(&parse_headers(header)).unwrap_err();
            assert!(matches!(err, MessageError::InvalidFrom(_)), "{err}");
        }
    }

    #[test]
    fn test_malformed_to_is_rejected() {
        for header in [
            &b"From: ann@example.com\r\nTo: <bob@example.com\r\n\r\n"[..],
            &b"From: ann@example.com\r\nTo: a@b.c, <<>>\r\n\r\n"[..],
        ] {
            let err = extract_envelope(&parse_headers(header)).unwrap_err();
            assert!(matches!(err, MessageError::InvalidTo(_)), "{err}");
        }

        let cancel = CancellationToken::new();
        let header = b"From: ann@example.com\r\nTo: <bob@example.com\r\n\r\n";
        let err = assemble(&cancel, header, b"hi", None, 9, &ParseOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("parsing To: "));
    }

    #[test]
    fn test_assemble() {
        let date = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+01:00").unwrap();
        let cancel = CancellationToken::new();
        let parsed =
            assemble(&cancel, HEADER, BODY, Some(date), 42, &ParseOptions::default()).unwrap();
        assert!(parsed.errors.is_empty());

        let message = parsed.message;
        assert_eq!(message.uid, 42);
        assert_eq!(message.internal_date, Some(date));
        assert_eq!(message.mime_type, "multipart/mixed");
        assert_eq!(message.find_by_mime_type("text/plain").len(), 1);
        assert_eq!(message.children[0].body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_body_failure_keeps_envelope() {
        let header = b"From: ann@example.com\r\nSubject: broken\r\nContent-Type: text/plain\r\n\
Content-Transfer-Encoding: x-binhex\r\n\r\n";
        let cancel = CancellationToken::new();
        let parsed = assemble(&cancel, header, b"data", None, 7, &ParseOptions::default()).unwrap();
        assert_eq!(parsed.message.subject, "broken");
        assert_eq!(parsed.message.root, BodyPart::default());
        assert!(matches!(parsed.errors[0].error, ParseError::UnsupportedEncoding(_)));

        let (message, error) = parsed.into_parts();
        assert_eq!(message.uid, 7);
        assert!(matches!(error, Some(MessageError::Body(_))));
    }

    #[test]
    fn test_message_json() {
        let cancel = CancellationToken::new();
        let parsed = assemble(&cancel, HEADER, BODY, None, 3, &ParseOptions::default()).unwrap();
        let json = serde_json::to_value(&parsed.message).unwrap();
        assert_eq!(json["mimeType"], "multipart/mixed");
        assert_eq!(json["children"][0]["body"], "aGk=");
        assert_eq!(json["from"]["address"], "ann@example.com");
        assert_eq!(json["subject"], "Hello");
        assert_eq!(json["uid"], 3);
        assert!(json["internalDate"].is_null());
    }
}
