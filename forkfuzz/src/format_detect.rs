//! MIME sniffing of the seed buffer, with CSV and JSON content heuristics
//! overriding buffers the sniffer calls plain text — `infer` is a magic-number
//! sniffer with no text-content matchers, so JSON (and CSV) seeds need a
//! content-based override the same way CSV already has one.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Json,
    Xml,
    Csv,
    Jpeg,
    Elf,
    Pdf,
    Plain,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Json => "json",
            FileType::Xml => "xml",
            FileType::Csv => "csv",
            FileType::Jpeg => "jpeg",
            FileType::Elf => "elf",
            FileType::Pdf => "pdf",
            FileType::Plain => "plain",
        }
    }
}

/// Sniffs a MIME type out of `buf`; "application/octet-stream" when the
/// buffer is empty or unclassifiable, matching the reference sniffer's
/// fallback.
fn sniff_mime(buf: &[u8]) -> String {
    if buf.is_empty() {
        return "application/octet-stream".to_string();
    }
    match infer::get(buf) {
        Some(kind) => kind.mime_type().to_string(),
        None => "application/octet-stream".to_string(),
    }
}

fn mime_to_file_type(mime: &str) -> FileType {
    if mime.contains("json") {
        FileType::Json
    } else if mime.contains("xml") {
        FileType::Xml
    } else if mime.contains("csv") {
        FileType::Csv
    } else if mime.contains("jpeg") || mime.contains("jpg") {
        FileType::Jpeg
    } else if mime.contains("application/x-executable")
        || mime.contains("x-sharedlib")
        || mime.contains("x-object")
    {
        FileType::Elf
    } else if mime.contains("pdf") {
        FileType::Pdf
    } else if mime.contains("text/") {
        FileType::Plain
    } else {
        FileType::Plain
    }
}

fn trim_ascii_whitespace(buf: &[u8]) -> &[u8] {
    let start = buf.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(buf.len());
    let end = buf.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &buf[start..end]
}

/// Trims surrounding whitespace, requires the first/last non-whitespace byte
/// to be a matching object or array delimiter, then confirms with a real
/// parse — `infer` has no JSON matcher at all, so this is the only thing
/// that routes a JSON seed to the JSON engine.
fn looks_like_json(buf: &[u8]) -> bool {
    let trimmed = trim_ascii_whitespace(buf);
    if trimmed.is_empty() {
        return false;
    }
    let wrapped = (trimmed[0] == b'{' && trimmed[trimmed.len() - 1] == b'}')
        || (trimmed[0] == b'[' && trimmed[trimmed.len() - 1] == b']');
    if !wrapped {
        return false;
    }
    serde_json::from_slice::<serde_json::Value>(trimmed).is_ok()
}

/// Looks at up to the first 512 bytes, across up to 10 lines. Promotes to
/// CSV when commas >= 2, newlines >= 1, at least two lines observed, and at
/// least half of the non-first observed lines share the first line's comma
/// count.
fn looks_like_csv(buf: &[u8]) -> bool {
    let window = &buf[..buf.len().min(512)];

    let total_commas = window.iter().filter(|&&b| b == b',').count();
    let total_newlines = window.iter().filter(|&&b| b == b'\n').count();
    if total_commas < 2 || total_newlines < 1 {
        return false;
    }

    let mut lines: Vec<&[u8]> = Vec::new();
    let mut start = 0usize;
    for (i, &b) in window.iter().enumerate() {
        if b == b'\n' {
            lines.push(&window[start..i]);
            start = i + 1;
            if lines.len() >= 10 {
                break;
            }
        }
    }
    if lines.len() < 2 {
        return false;
    }

    let first_commas = lines[0].iter().filter(|&&b| b == b',').count();
    let rest = &lines[1..];
    let consistent = rest
        .iter()
        .filter(|line| line.iter().filter(|&&b| b == b',').count() == first_commas)
        .count();

    consistent >= rest.len() / 2
}

/// Detects the format tag for a seed buffer: MIME sniffing, then the JSON
/// and CSV content heuristic overrides on a PLAIN result.
pub fn detect_file_type(buf: &[u8]) -> FileType {
    let mime = sniff_mime(buf);
    let ft = mime_to_file_type(&mime);
    if ft != FileType::Plain {
        return ft;
    }
    if looks_like_json(buf) {
        FileType::Json
    } else if looks_like_csv(buf) {
        FileType::Csv
    } else {
        ft
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_octet_stream_and_plain() {
        assert_eq!(detect_file_type(b""), FileType::Plain);
    }

    #[test]
    fn single_line_no_commas_is_not_csv() {
        // seed scenario 4: "x\n" has one line and zero commas.
        assert_eq!(detect_file_type(b"x\n"), FileType::Plain);
    }

    #[test]
    fn consistent_comma_counts_promote_to_csv() {
        let seed = b"a,b,c\n1,2,3\n4,5,6\n";
        assert_eq!(detect_file_type(seed), FileType::Csv);
    }

    #[test]
    fn json_seed_is_detected_as_json() {
        let seed = br#"{"n": 1}"#;
        assert_eq!(detect_file_type(seed), FileType::Json);
    }

    #[test]
    fn json_array_seed_is_detected_as_json() {
        assert_eq!(detect_file_type(b"[1, 2, 3]"), FileType::Json);
    }

    #[test]
    fn brace_wrapped_but_invalid_json_is_not_promoted() {
        assert_eq!(detect_file_type(b"{not json at all}"), FileType::Plain);
    }
}
