//! Picks the part of a message the extractor should read and decodes it.

use mailparse::{DispositionType, ParsedMail};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Plain,
    Empty,
}

#[derive(Debug, Clone)]
pub struct DecodedBody {
    kind: BodyKind,
    content: String,
}

impl DecodedBody {
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
            content: String::new(),
        }
    }

    fn new(kind: BodyKind, content: String) -> Self {
        if content.trim().is_empty() {
            Self::empty()
        } else {
            Self { kind, content }
        }
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.kind == BodyKind::Empty
    }

    pub fn is_html(&self) -> bool {
        self.kind == BodyKind::Html
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }
}

/// Returns the first `text/html` part, else the first `text/plain` part.
///
/// Transfer encodings are undone and the declared charset is applied lossily,
/// so undecodable bytes become U+FFFD instead of failing the message. A
/// message with nothing readable yields an empty body.
pub fn decode(mail: &ParsedMail) -> DecodedBody {
    if mail.subparts.is_empty() {
        let mimetype = mail.ctype.mimetype.to_lowercase();
        return match mimetype.as_str() {
            "text/html" => DecodedBody::new(BodyKind::Html, decode_part(mail)),
            m if m.starts_with("text/") => DecodedBody::new(BodyKind::Plain, decode_part(mail)),
            _ => DecodedBody::empty(),
        };
    }

    if let Some(part) = find_part(mail, "text/html") {
        return DecodedBody::new(BodyKind::Html, decode_part(part));
    }
    if let Some(part) = find_part(mail, "text/plain") {
        return DecodedBody::new(BodyKind::Plain, decode_part(part));
    }
    DecodedBody::empty()
}

/// Depth-first search for an inline leaf part of the given type.
fn find_part<'a, 'b>(part: &'b ParsedMail<'a>, mimetype: &str) -> Option<&'b ParsedMail<'a>> {
    if !part.subparts.is_empty() {
        return part.subparts.iter().find_map(|sub| find_part(sub, mimetype));
    }
    let is_attachment = part.get_content_disposition().disposition == DispositionType::Attachment;
    if !is_attachment && part.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
        Some(part)
    } else {
        None
    }
}

fn decode_part(part: &ParsedMail) -> String {
    match part.get_body() {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to decode {} part: {}, falling back to raw bytes", part.ctype.mimetype, e);
            part.get_body_raw()
                .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_raw(raw: &[u8]) -> DecodedBody {
        let parsed = mailparse::parse_mail(raw).unwrap();
        decode(&parsed)
    }

    const ALTERNATIVE: &[u8] = b"From: info@account.netflix.com\r\n\
To: user@example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"ALT\"\r\n\
\r\n\
--ALT\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Plain version 111111\r\n\
--ALT\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>HTML version 222222</p>\r\n\
--ALT--\r\n";

    const PLAIN_ONLY_MIXED: &[u8] = b"From: info@account.netflix.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"MIX\"\r\n\
\r\n\
--MIX\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Your code is 482913\r\n\
--MIX\r\n\
Content-Type: application/pdf; name=\"terms.pdf\"\r\n\
Content-Disposition: attachment; filename=\"terms.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--MIX--\r\n";

    const BASE64_HTML: &[u8] = b"From: info@account.netflix.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/html; charset=utf-8\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
PHA+Q8OzZGlnbzogMzMzMzMzPC9wPg==\r\n";

    const QUOTED_PRINTABLE: &[u8] = b"From: info@account.netflix.com\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
C=C3=B3digo: 444444\r\n";

    #[test]
    fn prefers_html_part() {
        let body = decode_raw(ALTERNATIVE);
        assert_eq!(body.kind(), BodyKind::Html);
        assert!(body.as_str().contains("222222"));
        assert!(!body.as_str().contains("111111"));
    }

    #[test]
    fn falls_back_to_plain_and_skips_attachments() {
        let body = decode_raw(PLAIN_ONLY_MIXED);
        assert_eq!(body.kind(), BodyKind::Plain);
        assert!(body.as_str().contains("482913"));
    }

    #[test]
    fn decodes_base64_single_part() {
        let body = decode_raw(BASE64_HTML);
        assert!(body.is_html());
        assert_eq!(body.as_str(), "<p>Código: 333333</p>");
    }

    #[test]
    fn decodes_quoted_printable() {
        let body = decode_raw(QUOTED_PRINTABLE);
        assert_eq!(body.kind(), BodyKind::Plain);
        assert!(body.as_str().starts_with("Código: 444444"));
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut raw = b"From: info@account.netflix.com\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Code 555555 "
            .to_vec();
        raw.extend_from_slice(&[0xff, 0xfe]);
        let body = decode_raw(&raw);
        assert!(body.as_str().contains("555555"));
        assert!(body.as_str().contains('\u{FFFD}'));
    }

    #[test]
    fn missing_body_is_empty_not_error() {
        let body = decode_raw(b"From: info@account.netflix.com\r\nSubject: nothing\r\n\r\n");
        assert!(body.is_empty());
    }

    #[test]
    fn non_text_single_part_is_empty() {
        let body = decode_raw(
            b"Content-Type: application/octet-stream\r\nContent-Transfer-Encoding: base64\r\n\r\nAAEC\r\n",
        );
        assert!(body.is_empty());
    }
}
