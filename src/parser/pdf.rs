use lopdf::Document;

pub const PREVIEW_PAGES: usize = 3;

/// Text of the first `pages` pages. A page without extractable text contributes nothing.
pub fn extract_leading_pages(bytes: &[u8], pages: usize) -> Result<String, String> {
    let doc = Document::load_mem(bytes).map_err(|err| err.to_string())?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().take(pages).cloned().collect();

    let mut text = String::new();
    for page in page_numbers {
        match doc.extract_text(&[page]) {
            Ok(page_text) => text.push_str(&page_text),
            Err(err) => log::debug!("pdf page {} has no extractable text: {}", page, err),
        }
    }
    Ok(text)
}
