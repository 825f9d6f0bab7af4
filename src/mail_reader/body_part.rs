use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use serde::{Serialize, Serializer};

const MULTIPART_PREFIX: &str = "multipart/";

/// One node of a parsed MIME body.
///
/// Multipart nodes hold `children` and never a `body`; every other node
/// holds its fully decoded `body`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPart {
    /// Lowercased `type/subtype` from `Content-Type`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    /// Decoded `filename` parameter of `Content-Disposition`.
    #[serde(rename = "filename", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// `Content-Disposition: inline`. False for attachments and when the
    /// header is absent.
    #[serde(skip_serializing_if = "is_false")]
    pub inline: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BodyPart>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_body"
    )]
    pub body: Option<Vec<u8>>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn serialize_body<S: Serializer>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn is_multipart_type(mime_type: &str) -> bool {
    mime_type.starts_with(MULTIPART_PREFIX)
}

impl BodyPart {
    /// Returns true if this part may contain nested children.
    pub fn is_multipart(&self) -> bool {
        is_multipart_type(&self.mime_type)
    }

    /// Walks the tree in document order: a node before its children,
    /// children in their original order.
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder { stack: vec![self] }
    }

    /// Finds the parts whose MIME type matches `pattern`.
    ///
    /// Either segment of the pattern may be `*`, so `image/*` selects all
    /// images. Other segments are compared literally against the lowercased
    /// type. A bare `*` selects every part including this one.
    pub fn find_by_mime_type(&self, pattern: &str) -> Vec<&BodyPart> {
        if pattern == "*" {
            return self.iter().collect();
        }
        let Some((want_type, want_subtype)) = pattern.split_once('/') else {
            return Vec::new();
        };

        self.iter()
            .filter(|part| match part.mime_type.split_once('/') {
                Some((main, sub)) => {
                    segment_matches(want_type, main) && segment_matches(want_subtype, sub)
                }
                None => false,
            })
            .collect()
    }

    /// Finds the parts advertising exactly `name` as their filename.
    pub fn find_by_filename(&self, name: &str) -> Vec<&BodyPart> {
        self.iter()
            .filter(|part| part.file_name.as_deref() == Some(name))
            .collect()
    }

    /// Like [`find_by_filename`](Self::find_by_filename) but matches a
    /// regular expression. Parts without a filename are tested as `""`.
    pub fn find_by_filename_pattern(&self, pattern: &Regex) -> Vec<&BodyPart> {
        self.iter()
            .filter(|part| pattern.is_match(part.file_name.as_deref().unwrap_or_default()))
            .collect()
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    pattern == "*" || pattern == segment
}

/// Pre-order iterator over a [`BodyPart`] tree.
pub struct PreOrder<'a> {
    stack: Vec<&'a BodyPart>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a BodyPart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        self.stack.extend(part.children.iter().rev());
        Some(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(mime_type: &str, file_name: Option<&str>) -> BodyPart {
        BodyPart {
            mime_type: mime_type.to_owned(),
            file_name: file_name.map(str::to_owned),
            body: Some(Vec::new()),
            ..Default::default()
        }
    }

    fn container(mime_type: &str, children: Vec<BodyPart>) -> BodyPart {
        BodyPart {
            mime_type: mime_type.to_owned(),
            children,
            ..Default::default()
        }
    }

    fn sample() -> BodyPart {
        container(
            "multipart/mixed",
            vec![
                container(
                    "multipart/alternative",
                    vec![leaf("text/plain", None), leaf("text/html", None)],
                ),
                leaf("image/png", Some("chart.png")),
                leaf("application/png", Some("")),
                leaf("image/jpeg", Some("photo.jpg")),
            ],
        )
    }

    fn types(parts: &[&BodyPart]) -> Vec<String> {
        parts.iter().map(|part| part.mime_type.clone()).collect()
    }

    #[test]
    fn test_star_returns_every_part_in_pre_order() {
        let tree = sample();
        assert_eq!(
            types(&tree.find_by_mime_type("*")),
            vec![
                "multipart/mixed",
                "multipart/alternative",
                "text/plain",
                "text/html",
                "image/png",
                "application/png",
                "image/jpeg",
            ]
        );
    }

    #[test]
    fn test_segment_wildcards() {
        let tree = sample();
        assert_eq!(
            types(&tree.find_by_mime_type("image/*")),
            vec!["image/png", "image/jpeg"]
        );
        assert_eq!(
            types(&tree.find_by_mime_type("*/png")),
            vec!["image/png", "application/png"]
        );
        assert_eq!(tree.find_by_mime_type("*/*").len(), 7);
        assert_eq!(types(&tree.find_by_mime_type("text/html")), vec!["text/html"]);
        // mime types are stored lowercased, patterns are taken literally
        assert!(tree.find_by_mime_type("TEXT/html").is_empty());
    }

    #[test]
    fn test_malformed_pattern_matches_nothing() {
        let tree = sample();
        assert!(tree.find_by_mime_type("image").is_empty());
        assert!(tree.find_by_mime_type("").is_empty());
    }

    #[test]
    fn test_find_by_filename() {
        let tree = sample();
        assert_eq!(types(&tree.find_by_filename("photo.jpg")), vec!["image/jpeg"]);
        assert!(tree.find_by_filename("missing.txt").is_empty());
        // only the part with an explicitly empty filename
        assert_eq!(types(&tree.find_by_filename("")), vec!["application/png"]);
    }

    #[test]
    fn test_find_by_filename_pattern() {
        let tree = sample();
        let images = Regex::new(r"\.(png|jpg)$").unwrap();
        assert_eq!(
            types(&tree.find_by_filename_pattern(&images)),
            vec!["image/png", "image/jpeg"]
        );

        let empty = Regex::new("^$").unwrap();
        assert_eq!(tree.find_by_filename_pattern(&empty).len(), 5);
    }

    #[test]
    fn test_queries_are_repeatable() {
        let tree = sample();
        assert_eq!(tree.find_by_mime_type("image/*"), tree.find_by_mime_type("image/*"));
        assert_eq!(tree.find_by_filename("chart.png"), tree.find_by_filename("chart.png"));
    }

    #[test]
    fn test_json_shape() {
        let tree = container(
            "multipart/mixed",
            vec![BodyPart {
                mime_type: "text/plain".into(),
                file_name: Some("a.txt".into()),
                inline: true,
                children: Vec::new(),
                body: Some(b"hi".to_vec()),
            }],
        );
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "mimeType": "multipart/mixed",
                "children": [{
                    "mimeType": "text/plain",
                    "filename": "a.txt",
                    "inline": true,
                    "body": "aGk="
                }]
            })
        );
    }
}
