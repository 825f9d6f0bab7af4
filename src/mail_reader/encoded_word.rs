//! RFC 2047 encoded words in header text (`=?charset?encoding?text?=`).
//!
//! Decoding is best effort: anything that does not look like a single well
//! formed encoded word is returned unchanged.

fn has_encoding(word: &str) -> bool {
    word.contains("=?") && word.contains("?=")
}

fn is_encoded_word(word: &str) -> bool {
    word.starts_with("=?") && word.ends_with("?=") && word.matches('?').count() == 4
}

/// Resolves the encoded word in `value`, if any.
pub fn decode_header_text(value: &str) -> String {
    if !has_encoding(value) || !is_encoded_word(value) {
        return value.to_owned();
    }

    // mailparse only decodes words inside a header, so wrap the value in one
    match mailparse::parse_header(format!("X: {value}").as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_owned(),
    }
}

/// Joins folded header lines into one logical line.
pub(crate) fn unfold(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.lines();
    let mut unfolded = lines.next().unwrap_or_default().trim().to_owned();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        unfolded.push(' ');
        unfolded.push_str(line);
    }
    unfolded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_word() {
        assert_eq!(decode_header_text("=?UTF-8?B?SGVsbG8=?="), "Hello");
    }

    #[test]
    fn test_q_word() {
        assert_eq!(decode_header_text("=?iso-8859-1?Q?caf=E9_au_lait?="), "café au lait");
    }

    #[test]
    fn test_plain_text_is_untouched() {
        assert_eq!(decode_header_text("Quarterly report"), "Quarterly report");
    }

    #[test]
    fn test_failing_strict_check_is_untouched() {
        for value in [
            "Re: =?UTF-8?B?SGVsbG8=?=",
            "=?UTF-8?B?SGVsbG8=?= =?UTF-8?B?SGVsbG8=?=",
            "=?UTF-8?SGVsbG8=?=",
            "a =? b ?= c",
        ] {
            assert_eq!(decode_header_text(value), value);
        }
    }

    #[test]
    fn test_unfold() {
        assert_eq!(unfold(b"first part\r\n second part\r\n\tthird"), "first part second part third");
        assert_eq!(unfold(b" single "), "single");
    }
}
