//! Directory index pages

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything but RFC 3986 unreserved characters
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// One row of a directory index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Read a directory: subdirectories first, then files, each sorted by name
pub async fn read_entries(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(item) = reader.next_entry().await? {
        let meta = match item.metadata().await {
            Ok(meta) => meta,
            // Vanished between listing and stat
            Err(_) => continue,
        };
        entries.push(Entry {
            name: item.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: meta.len(),
        });
    }
    sort_entries(&mut entries);
    Ok(entries)
}

pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
}

/// Render the HTML index for `url_path` (always ends with `/`)
pub fn render_index(url_path: &str, entries: &[Entry]) -> String {
    let title = escape_html(url_path);
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n<body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );

    if url_path != "/logs/" {
        html.push_str("<li><a href=\"../\">../</a></li>\n");
    }

    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let _ = write!(
            html,
            "<li><a href=\"{}{suffix}\">{}{suffix}</a>",
            encode_segment(&entry.name),
            escape_html(&entry.name),
        );
        if !entry.is_dir {
            let _ = write!(html, " ({} bytes)", entry.size);
        }
        html.push_str("</li>\n");
    }

    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode one path segment for use in an href
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}
