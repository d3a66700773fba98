//! Charset detection for feed payloads
//!
//! Order: byte-order mark, `Content-Type` charset, XML declaration, then
//! UTF-8. A payload without a BOM or declared charset is UTF-8, as XML
//! defines it. `chardetng` only steps in when a declared charset is unknown
//! or does not fit the bytes. Whatever cannot be decoded cleanly ends up as
//! lossy UTF-8, so decoding never fails.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFeed {
    pub text: String,
    /// Name of the encoding that produced `text`
    pub encoding: &'static str,
    /// True when the payload was decoded as lossy UTF-8
    pub lossy: bool,
}

/// Decode raw feed bytes into text
pub fn decode_feed(bytes: &[u8], content_type: Option<&str>) -> DecodedFeed {
    if bytes.is_empty() {
        return lossy_utf8(bytes);
    }

    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        if let Some(decoded) = decode_with(&bytes[bom_len..], encoding) {
            return decoded;
        }
    }

    let declared = content_type
        .and_then(charset_from_content_type)
        .or_else(|| charset_from_xml_declaration(bytes));
    if let Some(encoding) = declared
        .as_deref()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        if let Some(decoded) = decode_with(bytes, encoding) {
            return decoded;
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedFeed {
            text: declare_utf8(text.to_string()),
            encoding: UTF_8.name(),
            lossy: false,
        };
    }

    if declared.is_some() {
        if let Some(decoded) = detect(bytes) {
            return decoded;
        }
    }
    lossy_utf8(bytes)
}

/// Decode with the `chardetng` guess, if it is a confident one
fn detect(bytes: &[u8]) -> Option<DecodedFeed> {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let (guessed, confident) = detector.guess_assess(None, false);
    if !confident {
        return None;
    }
    decode_with(bytes, guessed)
}

/// UTF-8 with U+FFFD in place of every invalid sequence
pub fn lossy_utf8(bytes: &[u8]) -> DecodedFeed {
    DecodedFeed {
        text: declare_utf8(String::from_utf8_lossy(bytes).into_owned()),
        encoding: UTF_8.name(),
        lossy: true,
    }
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> Option<DecodedFeed> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        return None;
    }
    Some(DecodedFeed {
        text: declare_utf8(text.into_owned()),
        encoding: encoding.name(),
        lossy: false,
    })
}

/// Rewrite a non UTF-8 `encoding` in the XML declaration
///
/// The text is UTF-8 once decoded; a stale declaration would make the XML
/// reader decode it a second time.
fn declare_utf8(mut text: String) -> String {
    if let Some(range) = declared_encoding_range(text.as_bytes()) {
        if !text[range.clone()].eq_ignore_ascii_case("utf-8") {
            text.replace_range(range, "UTF-8");
        }
    }
    text
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches(['"', '\'']);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Read `encoding="..."` from a leading `<?xml ... ?>` declaration
fn charset_from_xml_declaration(bytes: &[u8]) -> Option<String> {
    let range = declared_encoding_range(bytes)?;
    let value = std::str::from_utf8(&bytes[range]).ok()?;
    (!value.is_empty()).then(|| value.to_string())
}

/// Byte range of the encoding value inside the XML declaration
fn declared_encoding_range(bytes: &[u8]) -> Option<std::ops::Range<usize>> {
    let head = &bytes[..bytes.len().min(512)];
    let start = find(head, b"<?xml")?;
    let end = start + find(&head[start..], b"?>")?;
    let decl = &head[start..end];

    let mut pos = find(decl, b"encoding")? + b"encoding".len();
    while decl.get(pos)?.is_ascii_whitespace() {
        pos += 1;
    }
    if decl[pos] != b'=' {
        return None;
    }
    pos += 1;
    while decl.get(pos)?.is_ascii_whitespace() {
        pos += 1;
    }
    let quote = decl[pos];
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let value_start = pos + 1;
    let value_len = decl[value_start..].iter().position(|b| *b == quote)?;

    Some(start + value_start..start + value_start + value_len)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
