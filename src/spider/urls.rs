/// Builds the three page URL shapes the crawl targets: a profile's
/// answers page and its paginated following/followers lists.
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    base: String,
}

impl UrlBuilder {
    /// `base` is the profile root, e.g. `https://www.zhihu.com/people`.
    /// A trailing slash is tolerated.
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Profile info page for a token.
    pub fn profile(&self, token: &str) -> String {
        format!("{}/{}/answers", self.base, token)
    }

    /// One page of the list of profiles a token follows.
    pub fn following(&self, token: &str, page: u64) -> String {
        format!("{}/{}/following?page={}", self.base, token, page)
    }

    /// One page of the list of profiles following a token.
    pub fn followers(&self, token: &str, page: u64) -> String {
        format!("{}/{}/followers?page={}", self.base, token, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_shapes() {
        let urls = UrlBuilder::new("https://www.zhihu.com/people/");

        assert_eq!(
            urls.profile("alice"),
            "https://www.zhihu.com/people/alice/answers"
        );
        assert_eq!(
            urls.following("alice", 3),
            "https://www.zhihu.com/people/alice/following?page=3"
        );
        assert_eq!(
            urls.followers("alice", 1),
            "https://www.zhihu.com/people/alice/followers?page=1"
        );
    }
}
