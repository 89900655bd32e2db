use std::path::PathBuf;

pub(crate) fn test_data_dir() -> PathBuf {
    let crate_root = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(crate_root).join("test-data")
}

/// Extract the contents of every ```` ```toml ```` fenced block in `text`.
///
/// Lines may be prefixed with a doc comment marker (`//!` or `///`), so this works on
/// Rust source files as well as Markdown.
pub(crate) fn toml_blocks(text: &str) -> Vec<String> {
    let mut blocks = vec![];
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        let line = strip_doc_marker(line);
        match current.as_mut() {
            None if line.starts_with("```toml") => current = Some(vec![]),
            None => {}
            Some(lines) if line.starts_with("```") => {
                blocks.push(lines.join("\n"));
                current = None;
            }
            Some(lines) => lines.push(line),
        }
    }
    blocks
}

fn strip_doc_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("//!")
        .or_else(|| trimmed.strip_prefix("///"));
    match rest {
        Some(r) => r.strip_prefix(' ').unwrap_or(r),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_blocks() {
        let text = "intro\n```toml\nkey1 = 1\nkey2 = 2\n```\n```rust\nlet x = 1;\n```\n//! ```toml\n//! key3 = 3\n//! ```";
        let blocks = toml_blocks(text);
        assert_eq!(blocks, ["key1 = 1\nkey2 = 2", "key3 = 3"]);
    }
}
