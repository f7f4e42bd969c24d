//! Page inspection helpers.

use scraper::{Html, Selector};
use std::collections::HashSet;

const CHALLENGE_MARKERS: &[&str] = &[
    "unfortunately, bots use duckduckgo too",
    "please complete the following challenge",
    "select all squares containing a duck",
    "anomaly-modal__puzzle",
    "error-lite@duckduckgo.com",
    "cloudflare",
    "captcha",
];

/// Selectors tried in order; later ones only run when earlier ones did not
/// produce enough text.
const PRIORITY_SELECTORS: &[&str] = &[
    "main p, main div",
    "article p, article div",
    ".content p, .content div, .main-content p, .main-content div",
    "p, div",
];

const NAVIGATION_MARKERS: &[&str] = &[
    "click here",
    "privacy",
    "terms",
    "login",
    "subscribe",
    "©",
    "all rights reserved",
];

const MIN_BLOCK_CHARS: usize = 10;

/// Whether the page is a bot challenge instead of real content.
pub fn is_challenge_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Count the elements matching `selector`. Returns `None` for an invalid selector.
pub fn count_matches(html: &str, selector: &str) -> Option<usize> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    Some(document.select(&selector).count())
}

fn is_navigation(text: &str) -> bool {
    if text.split_whitespace().count() < 5 {
        return false;
    }
    let lower = text.to_lowercase();
    NAVIGATION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Collect up to `max_chars` characters of main-content text, preferring
/// `main`, then `article`, then content containers, then any block.
pub fn prioritized_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let mut blocks: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let mut total = 0;

    'selectors: for selector in PRIORITY_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.chars().count() < MIN_BLOCK_CHARS || is_navigation(&text) {
                continue;
            }
            if !seen.insert(text.clone()) {
                continue;
            }
            total += text.chars().count();
            blocks.push(text);
            if total >= max_chars {
                break 'selectors;
            }
        }
    }

    blocks.join(" ").chars().take(max_chars).collect()
}

/// Whether `html` already holds `threshold` characters of prioritized text.
pub fn has_enough_content(html: &str, threshold: usize) -> bool {
    prioritized_text(html, threshold).chars().count() >= threshold
}
