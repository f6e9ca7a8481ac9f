use config_model::PUBLIC_TOKEN;
use reqwest::header::HeaderMap;

pub const DOWNLOAD_TOKEN_HEADER: &str = "x-download-token";
pub const PREVIEW_TOKEN_HEADER: &str = "x-preview-token";

/// Short-lived credentials handed out with an album response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessTokens {
    pub download: Option<String>,
    pub preview: Option<String>,
}

impl AccessTokens {
    /// Reads both tokens from response headers. Header lookup is case-insensitive.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        Self {
            download: read(DOWNLOAD_TOKEN_HEADER),
            preview: read(PREVIEW_TOKEN_HEADER),
        }
    }

    /// Token for thumbnail URLs: preview, then download, then the public placeholder.
    pub fn thumbnail_token(&self) -> &str {
        self.preview
            .as_deref()
            .or(self.download.as_deref())
            .unwrap_or(PUBLIC_TOKEN)
    }

    /// Token for direct downloads: download, then the public placeholder.
    pub fn download_token(&self) -> &str {
        self.download.as_deref().unwrap_or(PUBLIC_TOKEN)
    }

    pub fn is_degraded(&self) -> bool {
        self.download.is_none() || self.preview.is_none()
    }
}

/// Tokens from the most recent successful sync, tagged with the cycle that produced them.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: AccessTokens,
    cycle: u64,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the stored tokens wholesale; nothing from the previous cycle survives.
    pub fn replace(&mut self, tokens: AccessTokens) -> u64 {
        self.current = tokens;
        self.cycle += 1;
        self.cycle
    }

    pub fn current(&self) -> &AccessTokens {
        &self.current
    }

    /// Number of syncs that have written tokens so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn tokens(download: Option<&str>, preview: Option<&str>) -> AccessTokens {
        AccessTokens {
            download: download.map(str::to_owned),
            preview: preview.map(str::to_owned),
        }
    }

    #[test]
    fn thumbnail_token_precedence() {
        assert_eq!(tokens(Some("d"), Some("p")).thumbnail_token(), "p");
        assert_eq!(tokens(Some("d"), None).thumbnail_token(), "d");
        assert_eq!(tokens(None, None).thumbnail_token(), PUBLIC_TOKEN);
    }

    #[test]
    fn download_token_ignores_preview() {
        assert_eq!(tokens(Some("d"), Some("p")).download_token(), "d");
        assert_eq!(tokens(None, Some("p")).download_token(), PUBLIC_TOKEN);
    }

    #[test]
    fn headers_are_matched_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"X-Download-Token").unwrap(),
            HeaderValue::from_static("dl"),
        );
        headers.insert(
            HeaderName::from_bytes(b"X-PREVIEW-TOKEN").unwrap(),
            HeaderValue::from_static(" pv "),
        );
        let parsed = AccessTokens::from_headers(&headers);
        assert_eq!(parsed, tokens(Some("dl"), Some("pv")));
        assert!(!parsed.is_degraded());
    }

    #[test]
    fn replace_drops_previous_tokens() {
        let mut store = TokenStore::new();
        store.replace(tokens(Some("d1"), Some("p1")));
        let cycle = store.replace(tokens(Some("d2"), None));
        assert_eq!(cycle, 2);
        assert_eq!(store.current(), &tokens(Some("d2"), None));
        assert_eq!(store.current().thumbnail_token(), "d2");
    }
}
