//! Charset and transfer-encoding decoding of raw part bodies.

use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::mail_reader::error::ParseError;

/// The only charset that is reinterpreted; everything else passes through.
const LATIN1: &str = "iso-8859-1";

/// Decodes `raw` according to the declared charset and transfer encoding.
///
/// The charset is applied to the raw octets first and the transfer decoder
/// then reads the reinterpreted bytes.
pub fn decode<'a>(
    charset: Option<&str>,
    transfer_encoding: &str,
    raw: &'a [u8],
) -> Result<Cow<'a, [u8]>, ParseError> {
    let reinterpreted = reinterpret_charset(charset, raw);

    match transfer_encoding.trim().to_ascii_lowercase().as_str() {
        "" | "7bit" | "8bit" | "binary" => Ok(reinterpreted),
        "quoted-printable" => {
            quoted_printable::decode(&*reinterpreted, quoted_printable::ParseMode::Robust)
                .map(Cow::Owned)
                .map_err(|e| ParseError::TransferDecode {
                    encoding: "quoted-printable".to_owned(),
                    reason: e.to_string(),
                })
        }
        "base64" => {
            let compact: Vec<u8> = reinterpreted
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64
                .decode(compact)
                .map(Cow::Owned)
                .map_err(|e| ParseError::TransferDecode {
                    encoding: "base64".to_owned(),
                    reason: e.to_string(),
                })
        }
        _ => Err(ParseError::UnsupportedEncoding(transfer_encoding.to_owned())),
    }
}

fn reinterpret_charset<'a>(charset: Option<&str>, raw: &'a [u8]) -> Cow<'a, [u8]> {
    match charset {
        Some(charset) if charset.trim().eq_ignore_ascii_case(LATIN1) => {
            match encoding_rs::mem::decode_latin1(raw) {
                Cow::Borrowed(text) => Cow::Borrowed(text.as_bytes()),
                Cow::Owned(text) => Cow::Owned(text.into_bytes()),
            }
        }
        _ => Cow::Borrowed(raw),
    }
}
