//! Reading source documents from disk.
//!
//! Only plain text and Markdown are read here; PDF/EPUB extraction happens
//! upstream.

use std::path::Path;

use eyre::{bail, Context, Result};

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Read every input and join them with blank lines.
pub fn read_sources<P: AsRef<Path>>(paths: &[P]) -> Result<String> {
    let mut sections = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        check_extension(path)?;
        let text = read_text(path)?;
        let text = text.trim();
        if text.is_empty() {
            log::warn!("{} is empty, skipping", path.display());
            continue;
        }
        log::info!("Read {} ({} chars)", path.display(), text.chars().count());
        sections.push(text.to_string());
    }
    Ok(sections.join("\n\n"))
}

/// Read a text file, dropping invalid UTF-8 sequences.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    if text.contains(char::REPLACEMENT_CHARACTER) {
        log::warn!("{} contains invalid UTF-8, dropping it", path.display());
        return Ok(text.replace(char::REPLACEMENT_CHARACTER, ""));
    }
    Ok(text.into_owned())
}

fn check_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        bail!(
            "Unsupported input '{}': only .txt and .md files are read, extract other formats to text first",
            path.display()
        );
    }
    Ok(())
}
