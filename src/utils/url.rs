//! Endpoint construction for the Gemini REST API.

/// Normalize a base URL by removing trailing slashes
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Builds `{base}/models/{model}:{method}`, adding `?alt=sse` for streamed calls.
///
/// Accepts model ids with or without the `models/` prefix.
///
/// # Examples
///
/// ```
/// use mathlogos::utils::url::model_endpoint;
///
/// assert_eq!(
///     model_endpoint("https://example.com/v1beta/", "gemini-pro", "generateContent", false),
///     "https://example.com/v1beta/models/gemini-pro:generateContent"
/// );
/// ```
pub fn model_endpoint(base_url: &str, model: &str, method: &str, sse: bool) -> String {
    let model = model.trim_start_matches('/');
    let model = model.strip_prefix("models/").unwrap_or(model);
    let url = format!("{}/models/{}:{}", normalize_base_url(base_url), model, method);
    if sse {
        format!("{url}?alt=sse")
    } else {
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://api.example.com/v1beta"),
            "https://api.example.com/v1beta"
        );
        assert_eq!(
            normalize_base_url("https://api.example.com/v1beta///"),
            "https://api.example.com/v1beta"
        );
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn streamed_endpoints_request_sse() {
        assert_eq!(
            model_endpoint(
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-3-pro-preview",
                "streamGenerateContent",
                true
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-pro-preview:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn model_prefix_is_not_doubled() {
        assert_eq!(
            model_endpoint("https://x.test/", "models/gemini-pro", "generateContent", false),
            "https://x.test/models/gemini-pro:generateContent"
        );
    }
}
