//! File type resolution: what the client declared versus what the bytes are.

use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Serialize};

/// Manuscript formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Doc,
    Txt,
    Epub,
}

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Doc => "doc",
            FileType::Txt => "txt",
            FileType::Epub => "epub",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileType::Doc => "application/msword",
            FileType::Txt => "text/plain",
            FileType::Epub => "application/epub+zip",
        }
    }

    /// Parse a declared type: a short name (`pdf`), an extension (`.pdf`)
    /// or a MIME string (`application/pdf; charset=binary`).
    pub fn from_declared(declared: &str) -> Option<Self> {
        let value = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_start_matches('.')
            .to_ascii_lowercase();

        match value.as_str() {
            "pdf" => return Some(FileType::Pdf),
            "docx" => return Some(FileType::Docx),
            "doc" => return Some(FileType::Doc),
            "txt" | "text" => return Some(FileType::Txt),
            "epub" => return Some(FileType::Epub),
            _ => {}
        }

        [
            FileType::Pdf,
            FileType::Docx,
            FileType::Doc,
            FileType::Txt,
            FileType::Epub,
        ]
        .into_iter()
        .find(|t| t.mime() == value)
    }

    /// Type implied by the file name's extension.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let guess = mime_guess::from_path(file_name).first()?;
        Self::from_declared(guess.essence_str())
    }

    /// Sniff the type from the leading bytes.
    ///
    /// ZIP containers are opened to tell EPUB from DOCX. Anything that is
    /// valid UTF-8 without NUL bytes counts as plain text.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PDF_MAGIC) {
            return Some(FileType::Pdf);
        }
        if bytes.starts_with(OLE_MAGIC) {
            return Some(FileType::Doc);
        }
        if bytes.starts_with(ZIP_MAGIC) {
            return detect_zip(bytes);
        }
        if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
            return Some(FileType::Txt);
        }
        None
    }
}

fn detect_zip(bytes: &[u8]) -> Option<FileType> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).ok()?;
    let names: Vec<&str> = archive.file_names().collect();
    if names.contains(&"word/document.xml") {
        Some(FileType::Docx)
    } else if names.contains(&"mimetype") || names.contains(&"META-INF/container.xml") {
        Some(FileType::Epub)
    } else {
        None
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the upload's type and check it against the bytes.
///
/// The declared type wins over the file name; when neither names a
/// supported type the detected one is used.
pub fn resolve(
    declared: Option<&str>,
    file_name: &str,
    bytes: &[u8],
) -> Result<FileType, String> {
    let detected = FileType::detect(bytes);

    let claimed = match declared.filter(|d| !d.trim().is_empty()) {
        Some(d) => Some(
            FileType::from_declared(d).ok_or_else(|| format!("unsupported file type '{d}'"))?,
        ),
        None => FileType::from_file_name(file_name),
    };

    match (claimed, detected) {
        (Some(c), Some(d)) if c == d => Ok(c),
        (Some(c), Some(d)) => Err(format!(
            "declared type {c} does not match file contents ({d})"
        )),
        (Some(c), None) => Err(format!("file contents are not a valid {c} document")),
        (None, Some(d)) => Ok(d),
        (None, None) => Err("unrecognized file type".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_forms() {
        assert_eq!(FileType::from_declared("pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_declared(".EPUB"), Some(FileType::Epub));
        assert_eq!(
            FileType::from_declared("text/plain; charset=utf-8"),
            Some(FileType::Txt)
        );
        assert_eq!(FileType::from_declared("application/msword"), Some(FileType::Doc));
        assert_eq!(FileType::from_declared("image/png"), None);
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(FileType::from_file_name("novel.pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_file_name("draft.txt"), Some(FileType::Txt));
        assert_eq!(FileType::from_file_name("cover.png"), None);
    }

    #[test]
    fn test_detect_magic() {
        assert_eq!(FileType::detect(b"%PDF-1.7\n..."), Some(FileType::Pdf));
        assert_eq!(FileType::detect(b"Chapter One\n"), Some(FileType::Txt));
        assert_eq!(FileType::detect(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0]), Some(FileType::Doc));
        assert_eq!(FileType::detect(&[0xFF, 0xD8, 0xFF, 0x00]), None);
    }

    #[test]
    fn test_resolve_mismatch_is_rejected() {
        let err = resolve(Some("pdf"), "novel.pdf", b"plain words").unwrap_err();
        assert!(err.contains("does not match"));
    }

    #[test]
    fn test_resolve_falls_back_to_extension_then_content() {
        assert_eq!(resolve(None, "novel.txt", b"words").unwrap(), FileType::Txt);
        assert_eq!(resolve(None, "novel", b"words").unwrap(), FileType::Txt);
        assert!(resolve(Some("rtf"), "novel.rtf", b"words").is_err());
    }
}
