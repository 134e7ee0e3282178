//! Danmaku XML codec (Bilibili-style `<d p="...">` documents).
//!
//! Incoming XML keeps the whole `p` attribute as the opaque style blob;
//! only the leading timestamp is interpreted. Plain-text payloads accept
//! one comment per line as `timestamp,text`.

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::models::danmaku::Comment;

/// Parse a danmaku XML document. Malformed `<d>` elements are skipped, a
/// document without any valid element yields an empty list.
pub fn parse_xml(content: &str) -> anyhow::Result<Vec<Comment>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut comments = Vec::new();
    let mut pending_style: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"d" => {
                pending_style = e
                    .try_get_attribute("p")?
                    .and_then(|a| a.unescape_value().ok())
                    .map(|v| v.into_owned());
            }
            Ok(Event::Text(ref t)) => {
                if let Some(style) = pending_style.take() {
                    let text = unescape(&t.decode()?)?.into_owned();
                    if let Some(timestamp) = leading_timestamp(&style) {
                        comments.push(Comment {
                            timestamp,
                            style,
                            text,
                        });
                    }
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"d" => {
                pending_style = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("invalid danmaku xml: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(comments)
}

/// Parse plain-text danmaku: one `timestamp,text` pair per line. Lines
/// without a leading number are skipped.
#[must_use]
pub fn parse_text(content: &str) -> Vec<Comment> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (ts, text) = line.split_once(',')?;
            let timestamp: f64 = ts.trim().parse().ok()?;
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(Comment {
                timestamp,
                style: format!("{timestamp},1,25,16777215"),
                text: text.to_string(),
            })
        })
        .collect()
}

/// Render comments back into an XML document.
pub fn generate_xml(comments: &[Comment]) -> anyhow::Result<String> {
    let mut writer = quick_xml::Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("i")))?;

    for comment in comments {
        let mut elem = BytesStart::new("d");
        elem.push_attribute(("p", comment.style.as_str()));
        writer.write_event(Event::Start(elem))?;
        writer.write_event(Event::Text(BytesText::new(&comment.text)))?;
        writer.write_event(Event::End(BytesEnd::new("d")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("i")))?;
    Ok(String::from_utf8(writer.into_inner())?)
}

fn leading_timestamp(style: &str) -> Option<f64> {
    style.split(',').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_document() {
        let xml = r#"<?xml version="1.0"?><i>
            <d p="12.5,1,25,16777215,1700000000,0,abc,1">hello</d>
            <d p="90,4,25,255,1700000001,0,def,2">world</d>
        </i>"#;
        let comments = parse_xml(xml).unwrap();
        assert_eq!(comments.len(), 2);
        assert!((comments[0].timestamp - 12.5).abs() < f64::EPSILON);
        assert_eq!(comments[1].text, "world");
    }

    #[test]
    fn skips_elements_without_timestamp() {
        let xml = r#"<i><d p="notanumber,1">bad</d><d p="3,1">ok</d></i>"#;
        let comments = parse_xml(xml).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "ok");
    }

    #[test]
    fn text_lines_round_trip_through_xml() {
        let comments = parse_text("1.5,first\n badline \n20,second");
        assert_eq!(comments.len(), 2);

        let xml = generate_xml(&comments).unwrap();
        let reparsed = parse_xml(&xml).unwrap();
        assert_eq!(reparsed, comments);
    }
}
