use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use zip::ZipArchive;

/// Text of the first spine documents, stopping once `max_chars` characters have been collected.
pub fn extract_text(bytes: &[u8], max_chars: usize) -> Result<String, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;

    // 1. META-INF/container.xml points at the OPF package document
    let opf_path = find_opf_path(&mut archive)?;
    let opf = read_entry(&mut archive, &opf_path)?;

    // 2. Spine order decides which content documents come first
    let documents = parse_spine(&opf)?;
    let opf_dir = Path::new(&opf_path)
        .parent()
        .map(|value| value.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    let mut text = String::new();
    for href in documents {
        let href = href.split('#').next().unwrap_or_default();
        let entry_path = if opf_dir.is_empty() {
            href.to_string()
        } else {
            format!("{}/{}", opf_dir, href)
        };
        let xhtml = match read_entry(&mut archive, &entry_path) {
            Ok(value) => value,
            Err(err) => {
                log::debug!("epub spine entry {} unreadable: {}", entry_path, err);
                continue;
            }
        };

        let body = xhtml_text(&xhtml);
        if body.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&body);
        if text.chars().count() > max_chars {
            break;
        }
    }

    Ok(text)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, String> {
    let mut entry = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut content = String::new();
    entry.read_to_string(&mut content).map_err(|e| e.to_string())?;
    Ok(content)
}

fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, String> {
    let xml = read_entry(archive, "META-INF/container.xml")
        .map_err(|_| "Missing META-INF/container.xml".to_string())?;

    let mut reader = Reader::from_str(&xml);
    let mut buf = Vec::new();

    // <rootfile full-path="OEBPS/content.opf" ... />
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| e.to_string())?;
                        if attr.key.as_ref() == b"full-path" {
                            return Ok(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => (),
        }
        buf.clear();
    }

    Err("Could not find OPF path in container.xml".to_string())
}

/// Hrefs of the spine items in reading order.
fn parse_spine(opf: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(opf);
    let mut buf = Vec::new();

    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" => {
                    let mut id = String::new();
                    let mut href = String::new();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"id" => id = String::from_utf8_lossy(&attr.value).to_string(),
                            b"href" => href = String::from_utf8_lossy(&attr.value).to_string(),
                            _ => (),
                        }
                    }
                    if !id.is_empty() && !href.is_empty() {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"idref" {
                            spine.push(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
                _ => (),
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => (),
        }
        buf.clear();
    }

    if spine.is_empty() {
        return Err("OPF has an empty spine".to_string());
    }

    Ok(spine
        .into_iter()
        .filter_map(|idref| manifest.get(&idref).cloned())
        .collect())
}

fn is_block(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div" | b"br" | b"li" | b"tr" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6"
    )
}

/// Visible body text of an XHTML document, one line per block element.
fn xhtml_text(xhtml: &str) -> String {
    let mut reader = Reader::from_str(xhtml);
    reader.trim_text(true);
    reader.check_end_names(false);
    let mut buf = Vec::new();

    let mut in_body = false;
    let mut skip_depth = 0usize;
    let mut out = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"body" => in_body = true,
                b"script" | b"style" | b"head" => skip_depth += 1,
                _ => (),
            },
            Ok(Event::Empty(e)) => {
                if in_body && is_block(e.local_name().as_ref()) && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"body" => in_body = false,
                b"script" | b"style" | b"head" => skip_depth = skip_depth.saturating_sub(1),
                name if in_body && is_block(name) => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => (),
            },
            Ok(Event::Text(e)) => {
                if in_body && skip_depth == 0 {
                    let piece = e
                        .unescape()
                        .map(|value| value.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                    let piece = piece.split_whitespace().collect::<Vec<_>>().join(" ");
                    if !piece.is_empty() {
                        if !out.is_empty() && !out.ends_with('\n') {
                            out.push(' ');
                        }
                        out.push_str(&piece);
                    }
                }
            }
            Ok(Event::Eof) => break,
            // Malformed markup ends the document early; keep what was read
            Err(_) => break,
            _ => (),
        }
        buf.clear();
    }

    out.trim().to_string()
}
