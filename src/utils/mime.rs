//! Content-type guessing for artifacts the downloader persists (spec §4.4
//! step 2: "if server did not provide a content type, guess from filename").

/// Guess a content type from a filename extension, falling back to
/// `application/octet-stream` when nothing matches.
pub fn guess_content_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_known_extensions() {
        assert_eq!(guess_content_type("submission.txt"), "text/plain");
        assert_eq!(guess_content_type("index.html"), "text/html");
        assert_eq!(guess_content_type("report.pdf"), "application/pdf");
    }

    #[test]
    fn test_guess_unknown_extension_falls_back() {
        assert_eq!(guess_content_type("blob.bin"), "application/octet-stream");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }
}
