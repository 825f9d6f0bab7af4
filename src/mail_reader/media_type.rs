//! `Content-Type` and `Content-Disposition` values.
//!
//! Parameters follow the RFC 2045 token / quoted-string grammar with RFC 2231
//! extended (`filename*=utf-8''...`) and continued (`filename*0=`) values.

use std::collections::HashMap;

use encoding_rs::Encoding;

use crate::mail_reader::error::MediaTypeError;

/// A parsed `type/subtype` (or bare disposition) value with its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaType {
    /// Lowercased value before the first `;`.
    pub value: String,
    /// Parameters keyed by lowercased name.
    pub params: HashMap<String, String>,
}

impl MediaType {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Parses a `Content-Type` value, which must carry a `type/subtype` pair.
pub fn parse_content_type(input: &str) -> Result<MediaType, MediaTypeError> {
    parse(input, true)
}

/// Parses a `Content-Disposition` value such as `attachment; filename=a.pdf`.
pub fn parse_content_disposition(input: &str) -> Result<MediaType, MediaTypeError> {
    parse(input, false)
}

fn parse(input: &str, require_subtype: bool) -> Result<MediaType, MediaTypeError> {
    let (base, mut rest) = match input.find(';') {
        Some(index) => input.split_at(index),
        None => (input, ""),
    };

    let value = base.trim().to_ascii_lowercase();
    check_base(&value, require_subtype)?;

    let mut simple: HashMap<String, String> = HashMap::new();
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let Some((key, param_value, tail)) = consume_param(rest) else {
            // a lone trailing semicolon is tolerated
            if rest.trim() == ";" {
                break;
            }
            return Err(MediaTypeError::InvalidParameter);
        };
        rest = tail;

        match key.split_once('*') {
            Some((name, section)) => insert_unique(
                sections.entry(name.to_owned()).or_default(),
                section.to_owned(),
                param_value,
                &key,
            )?,
            None => insert_unique(&mut simple, key.clone(), param_value, &key)?,
        }
    }

    let mut params = simple;
    for (name, pieces) in sections {
        if let Some(encoded) = pieces.get("") {
            if let Some(decoded) = decode_extended(encoded) {
                params.insert(name, decoded);
            }
            continue;
        }
        if let Some(joined) = join_continuations(&pieces) {
            params.insert(name, joined);
        }
    }

    Ok(MediaType { value, params })
}

fn check_base(value: &str, require_subtype: bool) -> Result<(), MediaTypeError> {
    let Some((_, rest)) = consume_token(value) else {
        return Err(MediaTypeError::NoMediaType);
    };
    if rest.is_empty() {
        return if require_subtype {
            Err(MediaTypeError::ExpectedSlash)
        } else {
            Ok(())
        };
    }
    let Some(rest) = rest.strip_prefix('/') else {
        return Err(MediaTypeError::ExpectedSlash);
    };
    let Some((_, rest)) = consume_token(rest) else {
        return Err(MediaTypeError::ExpectedSubtype);
    };
    if !rest.is_empty() {
        return Err(MediaTypeError::TrailingContent);
    }
    Ok(())
}

fn insert_unique(
    map: &mut HashMap<String, String>,
    key: String,
    value: String,
    full_name: &str,
) -> Result<(), MediaTypeError> {
    if map.contains_key(&key) {
        return Err(MediaTypeError::DuplicateParameter(full_name.to_owned()));
    }
    map.insert(key, value);
    Ok(())
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c)
}

fn consume_token(input: &str) -> Option<(&str, &str)> {
    let end = input.find(|c| !is_token_char(c)).unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    Some(input.split_at(end))
}

fn consume_value(input: &str) -> Option<(String, &str)> {
    let Some(quoted) = input.strip_prefix('"') else {
        return consume_token(input).map(|(token, rest)| (token.to_owned(), rest));
    };

    let mut value = String::new();
    let mut chars = quoted.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '"' => return Some((value, &quoted[index + 1..])),
            '\\' => value.push(chars.next()?.1),
            '\r' | '\n' => return None,
            _ => value.push(c),
        }
    }
    None
}

/// Consumes `; name = value`, returning the lowercased name, the value and
/// the unconsumed tail.
fn consume_param(input: &str) -> Option<(String, String, &str)> {
    let rest = input.trim_start().strip_prefix(';')?.trim_start();
    let (name, rest) = consume_token(rest)?;
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let (value, rest) = consume_value(rest)?;
    Some((name.to_ascii_lowercase(), value, rest))
}

/// Decodes an RFC 2231 `charset'language'percent-encoded` value.
fn decode_extended(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    decode_charset(charset, &urlencoding::decode_binary(encoded.as_bytes()))
}

fn join_continuations(pieces: &HashMap<String, String>) -> Option<String> {
    let mut charset = String::new();
    let mut bytes = Vec::new();

    for index in 0.. {
        if let Some(plain) = pieces.get(&index.to_string()) {
            bytes.extend_from_slice(plain.as_bytes());
        } else if let Some(encoded) = pieces.get(&format!("{index}*")) {
            let encoded = if index == 0 {
                let mut parts = encoded.splitn(3, '\'');
                let (Some(declared), Some(_), Some(rest)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return None;
                };
                charset = declared.to_owned();
                rest
            } else {
                encoded.as_str()
            };
            bytes.extend_from_slice(&urlencoding::decode_binary(encoded.as_bytes()));
        } else {
            break;
        }
    }

    if bytes.is_empty() && !pieces.contains_key("0") {
        return None;
    }
    decode_charset(&charset, &bytes)
}

fn decode_charset(charset: &str, bytes: &[u8]) -> Option<String> {
    if charset.is_empty() {
        return Some(String::from_utf8_lossy(bytes).into_owned());
    }
    let encoding = Encoding::for_label(charset.as_bytes())?;
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    Some(text.into_owned())
}
