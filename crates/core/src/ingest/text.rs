//! Text extraction for word counts, page limits and the analysis pre-stage.

use std::io::{Cursor, Read, Seek};

use quick_xml::events::Event;
use quick_xml::Reader;

use super::FileType;

/// Words per page for formats without a real page structure.
pub const WORDS_PER_PAGE: u64 = 250;

/// Decoded manuscript text.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub word_count: u64,
    /// Exact page count for PDFs, estimated from words otherwise.
    pub pages: u64,
}

/// Whitespace-separated tokens; empty tokens do not count.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

fn estimated_pages(words: u64) -> u64 {
    words.div_ceil(WORDS_PER_PAGE)
}

/// Decode `bytes` as `file_type`. CPU-bound; call from a blocking thread.
pub fn extract(file_type: FileType, bytes: &[u8]) -> Result<Extracted, String> {
    let (text, exact_pages) = match file_type {
        FileType::Txt => (String::from_utf8_lossy(bytes).into_owned(), None),
        FileType::Pdf => {
            let (text, pages) = extract_pdf(bytes)?;
            (text, Some(pages))
        }
        FileType::Docx => (extract_docx(bytes)?, None),
        FileType::Epub => (extract_epub(bytes)?, None),
        FileType::Doc => (extract_legacy_doc(bytes), None),
    };

    let words = word_count(&text);
    Ok(Extracted {
        pages: exact_pages.unwrap_or_else(|| estimated_pages(words)),
        word_count: words,
        text,
    })
}

/// Run [`extract`] on the blocking pool.
pub async fn extract_blocking(file_type: FileType, bytes: Vec<u8>) -> Result<Extracted, String> {
    tokio::task::spawn_blocking(move || extract(file_type, &bytes))
        .await
        .map_err(|e| format!("text extraction task failed: {e}"))?
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, u64), String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("failed to load PDF: {e}"))?;
    let pages = doc.get_pages();

    let mut text = String::new();
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => tracing::debug!(page = page_num, error = %e, "Skipping unreadable PDF page"),
        }
    }
    Ok((text, pages.len() as u64))
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<Cursor<&[u8]>>, String> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("failed to open archive: {e}"))
}

fn read_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<String, String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| format!("missing {name}: {e}"))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| format!("failed to read {name}: {e}"))?;
    Ok(xml)
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    xml_text(&xml, &[b"t"], &[b"p"])
}

fn extract_epub(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let mut chapters: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(".xhtml") || n.ends_with(".html") || n.ends_with(".htm"))
        .map(str::to_string)
        .collect();
    chapters.sort();

    let mut text = String::new();
    for name in chapters {
        let xml = read_entry(&mut archive, &name)?;
        text.push_str(&xml_text(&xml, &[b"body"], &[b"p", b"div", b"h1", b"h2", b"h3", b"br"])?);
        text.push('\n');
    }
    Ok(text)
}

/// Collect character data inside any of `content` elements, breaking lines
/// after `blocks`.
fn xml_text(xml: &str, content: &[&[u8]], blocks: &[&[u8]]) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if content.contains(&e.local_name().as_ref()) {
                    depth += 1;
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.local_name();
                if content.contains(&name.as_ref()) {
                    depth = depth.saturating_sub(1);
                }
                if blocks.contains(&name.as_ref()) {
                    text.push('\n');
                }
            }
            Ok(Event::Empty(ref e)) => {
                if blocks.contains(&e.local_name().as_ref()) {
                    text.push('\n');
                }
            }
            Ok(Event::Text(e)) => {
                if depth > 0 {
                    text.push_str(&e.decode().unwrap_or_default());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parsing error: {e}")),
            _ => {}
        }
    }
    Ok(text)
}

/// Legacy `.doc` files: keep runs of printable text. Good enough for word
/// counts and prompts; formatting is lost.
fn extract_legacy_doc(bytes: &[u8]) -> String {
    const MIN_RUN: usize = 4;
    let mut text = String::new();
    let mut run = String::new();
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            run.push(b as char);
            continue;
        }
        if run.trim().len() >= MIN_RUN {
            text.push_str(run.trim());
            text.push('\n');
        }
        run.clear();
    }
    if run.trim().len() >= MIN_RUN {
        text.push_str(run.trim());
    }
    text
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_word_count_ignores_empty_tokens() {
        assert_eq!(word_count("  the   old\n\norchard \t"), 3);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_txt_pages_are_estimated() {
        let text = "word ".repeat(501);
        let out = extract(FileType::Txt, text.as_bytes()).unwrap();
        assert_eq!(out.word_count, 501);
        assert_eq!(out.pages, 3);
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body><w:p><w:r><w:t>The orchard</w:t></w:r></w:p><w:p><w:r><w:t>was quiet.</w:t></w:r></w:p></w:body>
</w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);

        assert_eq!(FileType::detect(&bytes), Some(FileType::Docx));
        let out = extract(FileType::Docx, &bytes).unwrap();
        assert_eq!(out.text, "The orchard\nwas quiet.\n");
        assert_eq!(out.word_count, 4);
    }

    #[test]
    fn test_epub_chapters_in_order() {
        let ch1 = "<html><body><p>First chapter.</p></body></html>";
        let ch2 = "<html><body><p>Second chapter.</p></body></html>";
        let bytes = zip_with(&[
            ("mimetype", "application/epub+zip"),
            ("OEBPS/ch2.xhtml", ch2),
            ("OEBPS/ch1.xhtml", ch1),
        ]);

        assert_eq!(FileType::detect(&bytes), Some(FileType::Epub));
        let out = extract(FileType::Epub, &bytes).unwrap();
        let first = out.text.find("First").unwrap();
        let second = out.text.find("Second").unwrap();
        assert!(first < second);
        assert_eq!(out.word_count, 4);
    }

    #[test]
    fn test_broken_pdf_is_an_error() {
        assert!(extract(FileType::Pdf, b"%PDF-1.4 truncated").is_err());
    }

    #[test]
    fn test_legacy_doc_keeps_text_runs() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0x00, 0x01];
        bytes.extend_from_slice(b"Call me Ishmael.");
        bytes.extend_from_slice(&[0x00, 0x02, b'a', b'b', 0x00]);
        let out = extract(FileType::Doc, &bytes).unwrap();
        assert_eq!(out.text.trim(), "Call me Ishmael.");
        assert_eq!(out.word_count, 3);
    }
}
