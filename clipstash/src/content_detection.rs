//! Content type detection for clipboard captures
//!
//! Maps the set of representations a clipboard change offered to exactly one
//! `ContentType`, and recognizes URL-shaped text for readers that only see
//! plain strings.

use crate::interface::ContentType;
use crate::models::Representations;

/// Common protocols accepted as links. Exotic schemes like javascript:,
/// data:, or custom-app:// are rejected to avoid misclassifying non-web
/// content as clickable links.
const LINK_PROTOCOLS: &[&str] = &["http://", "https://", "ftp://", "ftps://"];

/// Pick the single content type for a capture.
///
/// Priority: image → file list → URL → rich text → HTML → plain text.
/// Plain text is also the answer for an empty capture; the detector discards
/// those before they get this far.
pub fn classify(reps: &Representations) -> ContentType {
    if reps.image().is_some() {
        ContentType::Image
    } else if reps.has_files() {
        ContentType::File
    } else if reps.url().is_some() {
        ContentType::Url
    } else if reps.rtf().is_some() {
        ContentType::RichText
    } else if reps.html().is_some() {
        ContentType::Html
    } else {
        ContentType::Text
    }
}

/// Check if a string looks like a URL with a common protocol
pub fn looks_like_url(text: &str) -> bool {
    let trimmed = text.trim();

    if trimmed.is_empty() || trimmed.len() > 2000 || trimmed.contains(char::is_whitespace) {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if !LINK_PROTOCOLS.iter().any(|p| lower.starts_with(p)) {
        return false;
    }

    url::Url::parse(trimmed)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reps() -> Representations {
        Representations::default()
    }

    #[test]
    fn test_image_beats_url() {
        let r = Representations {
            image: Some(vec![1, 2, 3]),
            url: Some("https://example.com".into()),
            ..reps()
        };
        assert_eq!(classify(&r), ContentType::Image);
    }

    #[test]
    fn test_url_with_plain_text_is_url() {
        let r = Representations {
            url: Some("https://example.com".into()),
            plain_text: Some("https://example.com".into()),
            ..reps()
        };
        assert_eq!(classify(&r), ContentType::Url);
    }

    #[test]
    fn test_plain_text_only() {
        let r = Representations {
            plain_text: Some("hello".into()),
            ..reps()
        };
        assert_eq!(classify(&r), ContentType::Text);
    }

    #[test]
    fn test_full_priority_chain() {
        let mut r = Representations {
            image: Some(vec![1]),
            file_paths: vec!["/tmp/a".into()],
            url: Some("https://a.b".into()),
            rtf: Some(b"{\\rtf1}".to_vec()),
            html: Some("<p>a</p>".into()),
            plain_text: Some("a".into()),
        };
        assert_eq!(classify(&r), ContentType::Image);
        r.image = None;
        assert_eq!(classify(&r), ContentType::File);
        r.file_paths.clear();
        assert_eq!(classify(&r), ContentType::Url);
        r.url = None;
        assert_eq!(classify(&r), ContentType::RichText);
        r.rtf = None;
        assert_eq!(classify(&r), ContentType::Html);
        r.html = None;
        assert_eq!(classify(&r), ContentType::Text);
    }

    #[test]
    fn test_empty_capture_defaults_to_text() {
        assert_eq!(classify(&reps()), ContentType::Text);
        let blank = Representations {
            image: Some(Vec::new()),
            url: Some(String::new()),
            ..reps()
        };
        assert_eq!(classify(&blank), ContentType::Text);
    }

    #[test]
    fn test_url_common_protocols_accepted() {
        assert!(looks_like_url("http://example.com"));
        assert!(looks_like_url("https://example.com/path?q=1"));
        assert!(looks_like_url("ftp://files.example.com/doc.pdf"));
        assert!(looks_like_url("HTTPS://EXAMPLE.COM"));
        assert!(looks_like_url("  https://example.com  "));
    }

    #[test]
    fn test_url_exotic_protocols_rejected() {
        assert!(!looks_like_url("javascript:alert(1)"));
        assert!(!looks_like_url("data:text/html,<h1>hi</h1>"));
        assert!(!looks_like_url("custom-app://open/path"));
        assert!(!looks_like_url("file:///etc/passwd"));
        assert!(!looks_like_url("see https://example.com for details"));
        assert!(!looks_like_url(""));
    }
}
