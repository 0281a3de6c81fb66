use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::{Cursor, Read};
use zip::ZipArchive;

pub const PREVIEW_PARAGRAPHS: usize = 30;

/// Text of the first `limit` paragraphs of `word/document.xml`.
pub fn extract_paragraphs(bytes: &[u8], limit: usize) -> Result<Vec<String>, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|err| err.to_string())?
        .read_to_string(&mut xml)
        .map_err(|err| err.to_string())?;

    parse_document_xml(&xml, limit)
}

fn parse_document_xml(xml: &str, limit: usize) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    while paragraphs.len() < limit {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => current = Some(String::new()),
                b"w:t" => in_text = true,
                _ => (),
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:p" => paragraphs.push(String::new()),
                b"w:tab" => {
                    if let Some(paragraph) = current.as_mut() {
                        paragraph.push('\t');
                    }
                }
                b"w:br" | b"w:cr" => {
                    if let Some(paragraph) = current.as_mut() {
                        paragraph.push('\n');
                    }
                }
                _ => (),
            },
            Ok(Event::Text(e)) => {
                if in_text {
                    if let Some(paragraph) = current.as_mut() {
                        let text = e.unescape().map_err(|err| err.to_string())?;
                        paragraph.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if let Some(paragraph) = current.take() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => (),
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.to_string()),
            _ => (),
        }
        buf.clear();
    }

    Ok(paragraphs)
}
