use std::collections::BTreeMap;
use crate::{FetchRequest, LocalFetcher};
use std::time::Instant;
use webchat_core::{
    Error, Result, SearchCandidate, SearchProvider, SearchQuery, SearchResponse,
};

/// Snippet used when an entry has no description element.
pub const NO_DESCRIPTION: &str = "No description available";

pub const DEFAULT_LISTING_MAX_BYTES: u64 = 2_000_000;

/// SearXNG listing scraped from its HTML results page.
///
/// Selectors follow the "simple" theme: `article.result` per entry, the title
/// link inside its `h3`, and an optional `p.content` snippet.
#[derive(Debug, Clone)]
pub struct SearxngHtmlProvider {
    client: reqwest::Client,
    endpoint: String,
    headers: BTreeMap<String, String>,
    timeout_ms: u64,
    max_bytes: u64,
}

impl SearxngHtmlProvider {
    /// `endpoint` is either a template containing `{query}` or a prefix the
    /// encoded query is appended to, e.g. `http://127.0.0.1:8080/search?q=`.
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        headers: BTreeMap<String, String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            headers,
            // Provider requests can hang indefinitely without an explicit timeout.
            timeout_ms: timeout_ms.clamp(1_000, 120_000),
            max_bytes: DEFAULT_LISTING_MAX_BYTES,
        }
    }

    /// Cap on bytes read from a results page; entries past it are not seen.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    pub fn request_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        if self.endpoint.contains("{query}") {
            self.endpoint.replace("{query}", &encoded)
        } else {
            format!("{}{}", self.endpoint, encoded)
        }
    }
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_listing_inner(html: &str, max_results: usize) -> Option<Vec<SearchCandidate>> {
    let doc = html_scraper::Html::parse_document(html);
    let entry_sel = html_scraper::Selector::parse("article.result").ok()?;
    let h3_sel = html_scraper::Selector::parse("h3").ok()?;
    let a_sel = html_scraper::Selector::parse("a").ok()?;
    let snippet_sel = html_scraper::Selector::parse("p.content").ok()?;

    let mut out = Vec::new();
    for (i, entry) in doc.select(&entry_sel).enumerate() {
        let id = i + 1;
        if id > max_results {
            break;
        }
        let Some(h3) = entry.select(&h3_sel).next() else {
            continue;
        };
        let Some(link) = h3.select(&a_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            continue;
        };
        let title = norm_ws(&link.text().collect::<Vec<_>>().join(" "));
        let snippet = entry
            .select(&snippet_sel)
            .next()
            .map(|p| norm_ws(&p.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());
        out.push(SearchCandidate {
            id,
            title,
            link: href.to_string(),
            snippet,
        });
    }
    Some(out)
}

/// Parse the first `max_results` entries of a results page.
///
/// Entries without an `h3 > a[href]` are skipped; `id` keeps the entry's
/// position in the page, so skipped entries leave gaps.
pub fn parse_listing(html: &str, max_results: usize) -> Vec<SearchCandidate> {
    parse_listing_inner(html, max_results).unwrap_or_default()
}

#[async_trait::async_trait]
impl SearchProvider for SearxngHtmlProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let req = FetchRequest {
            url: self.request_url(&q.query),
            timeout_ms: Some(self.timeout_ms),
            max_bytes: Some(self.max_bytes),
            headers: self.headers.clone(),
        };
        let resp = LocalFetcher::new(self.client.clone())
            .fetch(&req)
            .await
            .map_err(|e| Error::SearchProviderUnavailable(e.to_string()))?;
        tracing::debug!(status = resp.status, bytes = resp.bytes.len(), "searxng: listing returned");
        if !(200..300).contains(&resp.status) {
            return Err(Error::SearchProviderUnavailable(format!(
                "searxng search HTTP {}",
                resp.status
            )));
        }
        if resp.truncated {
            tracing::warn!(max_bytes = self.max_bytes, "searxng: listing truncated");
        }
        let body = resp.text_lossy();

        let results = parse_listing(&body, q.max_results);
        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());
        Ok(SearchResponse {
            results,
            provider: "searxng".to_string(),
            timings_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Router};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    const PAGE: &str = r#"
    <html><body><main id="results">
      <article class="result result-default">
        <h3><a href="https://example.com/a">Alpha <b>title</b></a></h3>
        <p class="content">Alpha   snippet</p>
      </article>
      <article class="result">
        <h3>No link here</h3>
        <p class="content">broken</p>
      </article>
      <article class="result">
        <h3><a href="https://example.com/c">Gamma</a></h3>
      </article>
      <article class="result">
        <h3><a href="https://example.com/d">Delta</a></h3>
        <p class="content">delta</p>
      </article>
      <div class="result"><h3><a href="https://example.com/ignored">Not an article</a></h3></div>
    </main></body></html>
    "#;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn parses_entries_and_skips_broken_ones() {
        let rs = parse_listing(PAGE, 10);
        assert_eq!(rs.len(), 3);
        assert_eq!(rs[0].id, 1);
        assert_eq!(rs[0].title, "Alpha title");
        assert_eq!(rs[0].link, "https://example.com/a");
        assert_eq!(rs[0].snippet, "Alpha snippet");
        assert_eq!(rs[1].id, 3);
        assert_eq!(rs[1].snippet, NO_DESCRIPTION);
        assert_eq!(rs[2].link, "https://example.com/d");
    }

    #[test]
    fn cap_counts_listing_positions() {
        let rs = parse_listing(PAGE, 2);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].link, "https://example.com/a");
        assert!(parse_listing(PAGE, 0).is_empty());
    }

    proptest! {
        #[test]
        fn ids_are_increasing_positions_within_cap(
            linked in proptest::collection::vec(any::<bool>(), 0..20),
            cap in 0usize..25,
        ) {
            let mut html = String::from("<html><body>");
            for (i, has_link) in linked.iter().enumerate() {
                if *has_link {
                    html.push_str(&format!(
                        r#"<article class="result"><h3><a href="https://e.com/{i}">T{i}</a></h3></article>"#
                    ));
                } else {
                    html.push_str(r#"<article class="result"><h3>none</h3></article>"#);
                }
            }
            html.push_str("</body></html>");
            let rs = parse_listing(&html, cap);
            let expected = linked.iter().take(cap).filter(|b| **b).count();
            prop_assert_eq!(rs.len(), expected);
            for w in rs.windows(2) {
                prop_assert!(w[0].id < w[1].id);
            }
            for r in &rs {
                prop_assert!(r.id >= 1 && r.id <= cap);
                prop_assert_eq!(&r.link, &format!("https://e.com/{}", r.id - 1));
            }
        }
    }

    #[test]
    fn garbage_yields_no_candidates() {
        assert!(parse_listing("", 10).is_empty());
        assert!(parse_listing("<<<not html", 10).is_empty());
    }

    #[test]
    fn request_url_appends_or_substitutes() {
        let c = reqwest::Client::new();
        let p = SearxngHtmlProvider::new(c.clone(), "http://s/search?q=", BTreeMap::new(), 5_000);
        assert_eq!(p.request_url("rust 1.80 & more"), "http://s/search?q=rust+1.80+%26+more");
        let p = SearxngHtmlProvider::new(
            c,
            "http://s/search?q={query}&language=en",
            BTreeMap::new(),
            5_000,
        );
        assert_eq!(p.request_url("a b"), "http://s/search?q=a+b&language=en");
    }

    #[tokio::test]
    async fn searches_against_local_listing() {
        let app = Router::new().route(
            "/search",
            get(|q: Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("q").map(String::as_str), Some("weather today"));
                axum::response::Html(PAGE)
            }),
        );
        let addr = serve(app).await;
        let p = SearxngHtmlProvider::new(
            reqwest::Client::new(),
            format!("http://{addr}/search?q="),
            BTreeMap::new(),
            5_000,
        );
        let r = p
            .search(&SearchQuery {
                query: "weather today".to_string(),
                max_results: 10,
            })
            .await
            .unwrap();
        assert_eq!(r.provider, "searxng");
        assert_eq!(r.results.len(), 3);
    }

    #[tokio::test]
    async fn oversized_listing_is_read_up_to_the_cap() {
        let mut page = String::from("<html><body>");
        for i in 0..2 {
            page.push_str(&format!(
                r#"<article class="result"><h3><a href="https://example.com/{i}">T{i}</a></h3></article>"#
            ));
        }
        let head_len = page.len() as u64;
        // Several megabytes of filler the provider must never buffer.
        page.push_str(&"<p>padding</p>".repeat(400_000));
        page.push_str(r#"<article class="result"><h3><a href="https://example.com/tail">Tail</a></h3></article>"#);
        page.push_str("</body></html>");

        let app = Router::new().route(
            "/search",
            get(move || {
                let page = page.clone();
                async move { axum::response::Html(page) }
            }),
        );
        let addr = serve(app).await;
        let p = SearxngHtmlProvider::new(
            reqwest::Client::new(),
            format!("http://{addr}/search?q="),
            BTreeMap::new(),
            5_000,
        )
        .with_max_bytes(head_len + 1_000);
        let r = p
            .search(&SearchQuery {
                query: "x".to_string(),
                max_results: 10,
            })
            .await
            .unwrap();
        let links: Vec<_> = r.results.iter().map(|c| c.link.as_str()).collect();
        assert_eq!(links, ["https://example.com/0", "https://example.com/1"]);
    }

    #[tokio::test]
    async fn non_2xx_listing_is_provider_unavailable() {
        let app = Router::new().route(
            "/search",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let addr = serve(app).await;
        let p = SearxngHtmlProvider::new(
            reqwest::Client::new(),
            format!("http://{addr}/search?q="),
            BTreeMap::new(),
            5_000,
        );
        let err = p
            .search(&SearchQuery {
                query: "x".to_string(),
                max_results: 5,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SearchProviderUnavailable(m) if m.contains("429")));
    }
}
