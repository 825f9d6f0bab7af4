//! Recursive construction of the [`BodyPart`] tree.

use log::warn;
use mailparse::{MailHeader, MailHeaderMap};
use tokio_util::sync::CancellationToken;

use crate::mail_reader::body_part::{is_multipart_type, BodyPart};
use crate::mail_reader::encoded_word::decode_header_text;
use crate::mail_reader::error::{ParseError, PartError};
use crate::mail_reader::media_type::{parse_content_disposition, parse_content_type};
use crate::mail_reader::transform;

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Deepest multipart nesting accepted below the root.
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A built tree plus everything that went wrong below its root.
///
/// Children that failed to parse are left out of `part` and reported in
/// `errors`; recoverable problems of kept nodes are reported there too.
#[derive(Debug, Default)]
pub struct ParsedPart {
    pub part: BodyPart,
    pub errors: Vec<PartError>,
}

impl ParsedPart {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Rejects the tree if any part of it failed.
    pub fn into_strict(self) -> Result<BodyPart, PartError> {
        let ParsedPart { part, errors } = self;
        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(part),
        }
    }
}

/// Builds the body tree of a part from its headers and raw body.
///
/// Fails only when the part itself is unusable: its `Content-Type` cannot be
/// parsed, its body cannot be decoded, it is nested too deeply, or `cancel`
/// fired. Failures of nested parts are contained in [`ParsedPart::errors`].
pub fn build_tree(
    headers: &[MailHeader<'_>],
    raw_body: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
) -> Result<ParsedPart, ParseError> {
    build_node(headers, raw_body, options, cancel, 0)
}

fn build_node(
    headers: &[MailHeader<'_>],
    raw_body: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
    depth: usize,
) -> Result<ParsedPart, ParseError> {
    if cancel.is_cancelled() {
        return Err(ParseError::Cancelled);
    }
    if depth > options.max_depth {
        return Err(ParseError::NestingTooDeep(options.max_depth));
    }

    let content_type = parse_content_type(
        &headers.get_first_value("Content-Type").unwrap_or_default(),
    )
    .map_err(ParseError::InvalidContentType)?;

    let mut parsed = ParsedPart {
        part: BodyPart {
            mime_type: content_type.value.clone(),
            ..Default::default()
        },
        errors: Vec::new(),
    };

    if let Some(disposition) = headers
        .get_first_value("Content-Disposition")
        .filter(|value| !value.trim().is_empty())
    {
        match parse_content_disposition(&disposition) {
            Ok(disposition) => {
                parsed.part.file_name = disposition.param("filename").map(decode_header_text);
                parsed.part.inline = disposition.value == "inline";
            }
            Err(e) => parsed.errors.push(PartError::new(
                Vec::new(),
                ParseError::InvalidContentDisposition(e),
            )),
        }
    }

    let encoding = headers
        .get_first_value("Content-Transfer-Encoding")
        .unwrap_or_default();
    let decoded = transform::decode(content_type.param("charset"), &encoding, raw_body)?;

    if !is_multipart_type(&parsed.part.mime_type) {
        parsed.part.body = Some(decoded.into_owned());
        return Ok(parsed);
    }

    let Some(boundary) = content_type.param("boundary").filter(|b| !b.is_empty()) else {
        parsed
            .errors
            .push(PartError::new(Vec::new(), ParseError::MissingBoundary));
        return Ok(parsed);
    };

    let split = split_parts(&decoded, boundary);
    for (index, raw_part) in split.parts.into_iter().enumerate() {
        match build_child(raw_part, options, cancel, depth + 1) {
            Ok(child) => {
                parsed
                    .errors
                    .extend(child.errors.into_iter().map(|e| e.nested(index)));
                parsed.part.children.push(child.part);
            }
            Err(ParseError::Cancelled) => {
                parsed
                    .errors
                    .push(PartError::new(vec![index], ParseError::Cancelled));
                return Ok(parsed);
            }
            Err(e) => {
                warn!("failed to parse part {}: {}", index + 1, e);
                parsed.errors.push(PartError::new(vec![index], e));
            }
        }
    }
    if !split.terminated {
        parsed
            .errors
            .push(PartError::new(Vec::new(), ParseError::UnterminatedMultipart));
    }

    Ok(parsed)
}

fn build_child(
    raw_part: &[u8],
    options: &ParseOptions,
    cancel: &CancellationToken,
    depth: usize,
) -> Result<ParsedPart, ParseError> {
    let (headers, body_offset) =
        mailparse::parse_headers(raw_part).map_err(ParseError::InvalidPartHeader)?;
    build_node(&headers, &raw_part[body_offset..], options, cancel, depth)
}

/// The encapsulated parts of a multipart body, in order.
#[derive(Debug)]
struct Split<'a> {
    parts: Vec<&'a [u8]>,
    /// Whether the close delimiter (`--boundary--`) was seen.
    terminated: bool,
}

fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Split<'a> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();

    // everything before the first delimiter is preamble
    let Some(mut cursor) = find_delimiter(body, delimiter, 0) else {
        return Split {
            parts,
            terminated: false,
        };
    };

    loop {
        let after = cursor + delimiter.len();
        if body[after..].starts_with(b"--") {
            return Split {
                parts,
                terminated: true,
            };
        }
        let Some(line_end) = body[after..].iter().position(|&b| b == b'\n') else {
            return Split {
                parts,
                terminated: false,
            };
        };
        let content_start = after + line_end + 1;

        match find_delimiter(body, delimiter, content_start) {
            Some(next) => {
                parts.push(strip_line_break(&body[content_start..next]));
                cursor = next;
            }
            None => {
                parts.push(&body[content_start..]);
                return Split {
                    parts,
                    terminated: false,
                };
            }
        }
    }
}

/// Finds the next line, starting at line start `from`, that is a delimiter.
fn find_delimiter(body: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut start = from;
    while start <= body.len() {
        if is_delimiter_line(&body[start..], delimiter) {
            return Some(start);
        }
        start += body[start..].iter().position(|&b| b == b'\n')? + 1;
    }
    None
}

fn is_delimiter_line(line: &[u8], delimiter: &[u8]) -> bool {
    let Some(rest) = line.strip_prefix(delimiter) else {
        return false;
    };
    // transport padding may follow the delimiter
    rest.starts_with(b"--")
        || rest
            .iter()
            .take_while(|&&b| b != b'\n')
            .all(|b| matches!(b, b' ' | b'\t' | b'\r'))
}

/// The line break before a delimiter belongs to the delimiter.
fn strip_line_break(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}
