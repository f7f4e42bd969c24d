//! Browser-like request headers.
//!
//! Every request gets a freshly randomized header set so consecutive requests
//! through different proxies do not share an obvious fingerprint. Only HTML
//! and text are accepted.

use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, DNT, PRAGMA,
    REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Windows NT 10.0; rv:118.0) Gecko/20100101 Firefox/118.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.1 Safari/605.1.15",
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Mobile Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
];

const LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "en-CA,en;q=0.8",
    "en-AU,en;q=0.8",
    "en-IN,en;q=0.8",
];

const REFERERS: &[&str] = &[
    "https://duckduckgo.com/",
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://search.brave.com/",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8";

fn pick(rng: &mut impl Rng, values: &'static [&'static str]) -> HeaderValue {
    HeaderValue::from_static(values.choose(rng).copied().unwrap_or(values[0]))
}

/// Build a randomized, browser-like header set.
pub fn browser_headers() -> HeaderMap {
    let mut rng = rand::rng();
    let mut headers = HeaderMap::new();

    headers.insert(USER_AGENT, pick(&mut rng, USER_AGENTS));
    headers.insert(ACCEPT_LANGUAGE, pick(&mut rng, LANGUAGES));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(CACHE_CONTROL, pick(&mut rng, &["max-age=0", "no-cache", "no-store"]));
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        pick(&mut rng, &["same-origin", "none", "cross-site"]),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        pick(&mut rng, &["navigate", "no-cors"]),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        pick(&mut rng, &["document", "empty"]),
    );

    if rng.random_bool(0.5) {
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    }
    if rng.random_bool(0.7) {
        headers.insert(REFERER, pick(&mut rng, REFERERS));
    }
    if rng.random_bool(0.5) {
        headers.insert(DNT, pick(&mut rng, &["1", "0"]));
    }
    if rng.random_bool(0.4) {
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_sends_identity_headers() {
        for _ in 0..20 {
            let headers = browser_headers();
            let ua = headers.get(USER_AGENT).unwrap().to_str().unwrap();
            assert!(USER_AGENTS.contains(&ua));
            assert!(headers.contains_key(ACCEPT_LANGUAGE));
            assert_eq!(headers.get(ACCEPT).unwrap(), ACCEPT_HTML);
        }
    }
}
