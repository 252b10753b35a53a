use percent_encoding::percent_decode_str;
use std::process::Command;
use url::Url;

/// Last path segment if it looks like a file name (contains a dot),
/// otherwise a generated name.
pub fn file_name_from_url(url: &Url) -> String {
    if let Some(segments) = url.path_segments() {
        if let Some(last) = segments.last() {
            let decoded = percent_decode_str(last).decode_utf8_lossy();
            if decoded.contains('.') {
                return sanitize_filename(&decoded);
            }
        }
    }

    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

pub fn clear_terminal() {
    let status = if cfg!(windows) {
        Command::new("cmd").args(["/c", "cls"]).status()
    } else {
        Command::new("clear").status()
    };
    if let Err(e) = status {
        tracing::debug!("Could not clear terminal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_comes_from_last_segment_with_a_dot() {
        let url = Url::parse("https://example.com/pub/ubuntu-24.04.iso?token=1").unwrap();
        assert_eq!(file_name_from_url(&url), "ubuntu-24.04.iso");
    }

    #[test]
    fn segment_without_dot_gets_generated_name() {
        let url = Url::parse("https://example.com/download/latest").unwrap();
        assert!(file_name_from_url(&url).starts_with("download_"));

        let root = Url::parse("https://example.com/").unwrap();
        assert!(file_name_from_url(&root).starts_with("download_"));
    }

    #[test]
    fn encoded_segment_is_decoded_before_sanitising() {
        let url = Url::parse("https://example.com/files/my%20file.zip").unwrap();
        assert_eq!(file_name_from_url(&url), "my_file.zip");

        let url = Url::parse("https://example.com/files/caf%C3%A9.txt").unwrap();
        assert_eq!(file_name_from_url(&url), "café.txt");
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(sanitize_filename("my file (1).zip"), "my_file__1_.zip");
    }
}
