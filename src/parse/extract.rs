use scraper::{Html, Selector};
use std::collections::HashSet;

/// Relationship counts pulled from one profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFacts {
    pub following_count: Option<u64>,
    pub follower_count: Option<u64>,
}

/// Extract the following/follower counts from a profile page.
///
/// The counts live inside the number-board anchors linking to the
/// `/following` and `/followers` lists. Either count may be missing;
/// the caller treats an absent count as a single-page list.
pub fn profile_facts(html: &str) -> ProfileFacts {
    let Ok(anchor_sel) = Selector::parse("a") else {
        return ProfileFacts::default();
    };
    let Ok(value_sel) = Selector::parse("strong.NumberBoard-itemValue") else {
        return ProfileFacts::default();
    };

    let document = Html::parse_document(html);
    let mut facts = ProfileFacts::default();

    for anchor in document.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let slot = if href.trim_end_matches('/').ends_with("/following") {
            &mut facts.following_count
        } else if href.trim_end_matches('/').ends_with("/followers") {
            &mut facts.follower_count
        } else {
            continue;
        };

        if slot.is_some() {
            continue;
        }
        let count = anchor
            .select(&value_sel)
            .next()
            .and_then(|value| match value.value().attr("title") {
                Some(title) => parse_count(title),
                None => parse_count(&value.text().collect::<String>()),
            });
        *slot = count;
    }

    facts
}

/// Extract newly discovered profile tokens from a relationship-list
/// page, in document order with duplicates removed.
pub fn discovered_tokens(html: &str) -> Vec<String> {
    let Ok(anchor_sel) = Selector::parse("a") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    for anchor in document.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(start) = href.find("/people/") else {
            continue;
        };
        let rest = &href[start + "/people/".len()..];
        let token = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        if !token.is_empty() && seen.insert(token.to_string()) {
            tokens.push(token.to_string());
        }
    }

    tokens
}

/// Digits-only parse, tolerating separators like "1,024".
fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_PAGE: &str = r#"
        <html><body>
          <div class="NumberBoard">
            <a class="NumberBoard-item" href="/people/alice/following">
              <span>Following</span>
              <strong class="NumberBoard-itemValue" title="45">45</strong>
            </a>
            <a class="NumberBoard-item" href="/people/alice/followers">
              <span>Followers</span>
              <strong class="NumberBoard-itemValue" title="1,024">1,024</strong>
            </a>
          </div>
        </body></html>"#;

    #[test]
    fn test_profile_facts_reads_both_counts() {
        let facts = profile_facts(PROFILE_PAGE);
        assert_eq!(facts.following_count, Some(45));
        assert_eq!(facts.follower_count, Some(1024));
    }

    #[test]
    fn test_profile_facts_tolerates_missing_counts() {
        let facts = profile_facts("<html><body><p>suspended account</p></body></html>");
        assert_eq!(facts, ProfileFacts::default());

        let only_following = r#"
            <a href="/people/bob/following">
              <strong class="NumberBoard-itemValue">7</strong>
            </a>"#;
        let facts = profile_facts(only_following);
        assert_eq!(facts.following_count, Some(7));
        assert_eq!(facts.follower_count, None);
    }

    #[test]
    fn test_discovered_tokens_dedupes_and_keeps_order() {
        let page = r#"
            <html><body>
              <a href="/people/bob">bob</a>
              <a href="https://www.zhihu.com/people/carol/answers">carol</a>
              <a href="/people/bob?tab=profile">bob again</a>
              <a href="/people/">empty</a>
              <a href="/topics/rust">not a person</a>
            </body></html>"#;

        assert_eq!(discovered_tokens(page), ["bob", "carol"]);
    }

    #[test]
    fn test_discovered_tokens_on_empty_page() {
        assert!(discovered_tokens("<html></html>").is_empty());
    }
}
