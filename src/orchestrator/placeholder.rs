use crate::config::DEFAULT_PLACEHOLDER_BASE;
use crate::models::ImageGenerationResult;
use reqwest::Url;

const MAX_REASON_CHARS: usize = 80;

/// Image URL for a panel or meme whose image could not be generated. The
/// reason is rendered into the placeholder so the failure is visible.
pub fn placeholder_url(base: &str, reason: &str) -> String {
    let reason = truncate(reason, MAX_REASON_CHARS);
    let params = [("text", reason.as_str())];
    Url::parse_with_params(base, &params)
        .or_else(|_| Url::parse_with_params(DEFAULT_PLACEHOLDER_BASE, &params))
        .map(String::from)
        .unwrap_or_else(|_| DEFAULT_PLACEHOLDER_BASE.to_string())
}

/// Real data URL when the image succeeded, labelled placeholder otherwise.
pub fn image_or_placeholder(base: &str, result: &ImageGenerationResult) -> String {
    if let Some(url) = &result.image_url {
        return url.clone();
    }
    let error = result.error.as_deref().unwrap_or("unknown error");
    let reason = if result.is_quota_error == Some(true) {
        format!("Rate limited, try later ({})", error)
    } else {
        format!("Image failed: {}", error)
    };
    placeholder_url(base, &reason)
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let mut short: String = single_line.chars().take(max_chars - 1).collect();
        short.push('…');
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_is_query_encoded() {
        let url = placeholder_url("https://placehold.co/600x400/png", "Image failed: HTTP 500");
        assert_eq!(
            url,
            "https://placehold.co/600x400/png?text=Image+failed%3A+HTTP+500"
        );
    }

    #[test]
    fn test_long_reason_truncated() {
        let url = placeholder_url(DEFAULT_PLACEHOLDER_BASE, &"x".repeat(500));
        let parsed = Url::parse(&url).unwrap();
        let (_, text) = parsed.query_pairs().next().unwrap();
        assert_eq!(text.chars().count(), MAX_REASON_CHARS);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn test_invalid_base_uses_default() {
        let url = placeholder_url("not a url", "oops");
        assert!(url.starts_with(DEFAULT_PLACEHOLDER_BASE));
    }

    #[test]
    fn test_success_passes_through() {
        let ok = ImageGenerationResult::success("data:image/png;base64,AA".into(), "m");
        assert_eq!(image_or_placeholder(DEFAULT_PLACEHOLDER_BASE, &ok), "data:image/png;base64,AA");

        let quota = ImageGenerationResult::failure("m1: 429", true);
        assert!(image_or_placeholder(DEFAULT_PLACEHOLDER_BASE, &quota).contains("Rate+limited"));
    }
}
