//! Gateway to the headless CMS.
//!
//! The CMS exposes two operations this service consumes: a paginated search
//! over documents of type `post`, and the opaque `next_page` URL that search
//! hands back for the following page. Both return the same
//! `{results, next_page}` envelope. Calls are treated as opaque remote
//! requests: no retries, no local caching.

use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use time::{
    OffsetDateTime,
    format_description::{BorrowedFormatItem, well_known::Rfc3339},
    macros::format_description,
};
use tracing::debug;
use url::Url;

use crate::domain::posts::{ContentSection, PostDetail, PostSummary};

/// Offset timestamps as some CMS backends emit them: `2021-03-15T19:25:28+0000`.
const COMPACT_OFFSET_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
);

const SUMMARY_FETCH_FIELDS: &str = "post.title,post.subtitle,post.author";
const TYPE_PREDICATE: &str = r#"[[at(document.type,"post")]]"#;

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("invalid CMS URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CMS responded with status {status}")]
    Status { status: StatusCode },
    #[error("failed to decode CMS response: {0}")]
    Decode(String),
    #[error("invalid publication date `{value}`: {reason}")]
    Date { value: String, reason: String },
}

/// Sort order over `document.first_publication_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    PublicationAsc,
    PublicationDesc,
}

impl SortOrder {
    fn orderings(self) -> &'static str {
        match self {
            SortOrder::PublicationAsc => "[document.first_publication_date]",
            SortOrder::PublicationDesc => "[document.first_publication_date desc]",
        }
    }
}

/// Parameters for a paginated post query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub page_size: u32,
    /// CMS-internal document id to resume after.
    pub after: Option<String>,
    pub order: Option<SortOrder>,
}

/// One page of decoded post summaries plus the cursor to the next page.
#[derive(Debug, Clone)]
pub struct SummaryPage {
    pub results: Vec<PostSummary>,
    /// Opaque URL to the next results page; absent when exhausted.
    pub next_page: Option<String>,
}

/// A decoded detail document plus the CMS-internal id adjacency queries need.
#[derive(Debug, Clone)]
pub struct DetailDocument {
    pub id: String,
    pub post: PostDetail,
}

#[async_trait]
pub trait CmsGateway: Send + Sync {
    /// Search documents of type `post`, projected to summary fields.
    async fn query_posts(&self, options: QueryOptions) -> Result<SummaryPage, CmsError>;

    /// Follow an opaque `next_page` URL from an earlier query.
    async fn fetch_next(&self, next_page: &Url) -> Result<SummaryPage, CmsError>;

    /// Look up a single post by its slug. Absent posts are not errors.
    async fn get_by_slug(&self, slug: &str) -> Result<Option<DetailDocument>, CmsError>;
}

// Wire envelope shared by search responses and next_page fetches.
#[derive(Debug, Deserialize)]
struct WirePage<D> {
    #[serde(default = "Vec::new")]
    results: Vec<WireDocument<D>>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDocument<D> {
    id: String,
    uid: String,
    #[serde(default)]
    first_publication_date: Option<String>,
    #[serde(default)]
    last_publication_date: Option<String>,
    data: D,
}

#[derive(Debug, Deserialize)]
struct WireSummaryData {
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    author: String,
}

#[derive(Debug, Deserialize)]
struct WireDetailData {
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    author: String,
    banner: WireBanner,
    #[serde(default = "Vec::new")]
    content: Vec<WireSection>,
}

#[derive(Debug, Deserialize)]
struct WireBanner {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WireSection {
    #[serde(default)]
    heading: String,
    #[serde(default = "Vec::new")]
    body: Vec<WireParagraph>,
}

#[derive(Debug, Deserialize)]
struct WireParagraph {
    #[serde(default)]
    text: String,
}

fn parse_publication_date(value: &str) -> Result<OffsetDateTime, CmsError> {
    OffsetDateTime::parse(value, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(value, COMPACT_OFFSET_FORMAT))
        .map_err(|err| CmsError::Date {
            value: value.to_string(),
            reason: err.to_string(),
        })
}

fn parse_optional_date(value: Option<&str>) -> Result<Option<OffsetDateTime>, CmsError> {
    value.map(parse_publication_date).transpose()
}

impl WireDocument<WireSummaryData> {
    fn into_summary(self) -> Result<PostSummary, CmsError> {
        Ok(PostSummary {
            slug: self.uid,
            first_published_at: parse_optional_date(self.first_publication_date.as_deref())?,
            title: self.data.title,
            subtitle: self.data.subtitle,
            author: self.data.author,
        })
    }
}

impl WireDocument<WireDetailData> {
    fn into_detail(self) -> Result<DetailDocument, CmsError> {
        let sections = self
            .data
            .content
            .into_iter()
            .map(|section| ContentSection {
                heading: section.heading,
                paragraphs: section.body.into_iter().map(|p| p.text).collect(),
            })
            .collect();

        Ok(DetailDocument {
            id: self.id,
            post: PostDetail {
                slug: self.uid,
                first_published_at: parse_optional_date(self.first_publication_date.as_deref())?,
                last_published_at: parse_optional_date(self.last_publication_date.as_deref())?,
                title: self.data.title,
                subtitle: self.data.subtitle,
                banner_url: self.data.banner.url,
                author: self.data.author,
                sections,
            },
        })
    }
}

fn summaries_from_wire(page: WirePage<WireSummaryData>) -> Result<SummaryPage, CmsError> {
    let results = page
        .results
        .into_iter()
        .map(WireDocument::into_summary)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SummaryPage {
        results,
        next_page: page.next_page,
    })
}

/// reqwest-backed gateway implementation.
#[derive(Debug, Clone)]
pub struct HttpCmsGateway {
    client: Client,
    base: Url,
}

impl HttpCmsGateway {
    pub fn new(api_url: &Url) -> Result<Self, CmsError> {
        let mut base = api_url.clone();
        // `Url::join` drops the last path segment without this.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("orbita/", env!("CARGO_PKG_VERSION"))
    }

    fn search_url(&self) -> Result<Url, CmsError> {
        Ok(self.base.join("documents/search")?)
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, CmsError> {
        let start = Instant::now();
        counter!("orbita_cms_request_total").increment(1);
        debug!(target = "orbita::cms", url = %url, "fetching from CMS");

        let result = self.execute(url).await;
        histogram!("orbita_cms_request_ms").record(start.elapsed().as_millis() as f64);
        if result.is_err() {
            counter!("orbita_cms_failure_total").increment(1);
        }
        result
    }

    async fn execute<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, CmsError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CmsError::Status { status });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| CmsError::Decode(err.to_string()))
    }
}

#[async_trait]
impl CmsGateway for HttpCmsGateway {
    async fn query_posts(&self, options: QueryOptions) -> Result<SummaryPage, CmsError> {
        let mut url = self.search_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", TYPE_PREDICATE);
            pairs.append_pair("fetch", SUMMARY_FETCH_FIELDS);
            pairs.append_pair("pageSize", &options.page_size.to_string());
            if let Some(after) = options.after.as_deref() {
                pairs.append_pair("after", after);
            }
            if let Some(order) = options.order {
                pairs.append_pair("orderings", order.orderings());
            }
        }

        let page: WirePage<WireSummaryData> = self.fetch_json(url).await?;
        summaries_from_wire(page)
    }

    async fn fetch_next(&self, next_page: &Url) -> Result<SummaryPage, CmsError> {
        let page: WirePage<WireSummaryData> = self.fetch_json(next_page.clone()).await?;
        summaries_from_wire(page)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<DetailDocument>, CmsError> {
        let mut url = self.search_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", &format!(r#"[[at(my.post.uid,"{slug}")]]"#));
            pairs.append_pair("pageSize", "1");
        }

        let page: WirePage<WireDetailData> = self.fetch_json(url).await?;
        page.results
            .into_iter()
            .next()
            .map(WireDocument::into_detail)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn parses_rfc3339_and_compact_offsets() {
        let expected = datetime!(2021-03-15 19:25:28 UTC);
        assert_eq!(
            parse_publication_date("2021-03-15T19:25:28+00:00").expect("rfc3339"),
            expected
        );
        assert_eq!(
            parse_publication_date("2021-03-15T19:25:28+0000").expect("compact offset"),
            expected
        );
        assert!(parse_publication_date("yesterday").is_err());
    }

    #[test]
    fn decodes_summary_page_with_null_cursor_and_dates() {
        let body = r#"{
            "results": [
                {
                    "id": "YBt5XhMAACMAvLLF",
                    "uid": "how-to-use-hooks",
                    "first_publication_date": "2021-03-15T19:25:28+0000",
                    "data": {
                        "title": "How to use hooks",
                        "subtitle": "Thinking in hooks",
                        "author": "Joseph Oliveira"
                    }
                },
                {
                    "id": "YBt5XhMAACMAvLLG",
                    "uid": "draft-post",
                    "first_publication_date": null,
                    "data": { "title": "Draft" }
                }
            ],
            "next_page": null
        }"#;

        let page: WirePage<WireSummaryData> = serde_json::from_str(body).expect("decoded page");
        let page = summaries_from_wire(page).expect("converted summaries");

        assert_eq!(page.results.len(), 2);
        assert!(page.next_page.is_none());
        assert_eq!(page.results[0].slug, "how-to-use-hooks");
        assert_eq!(
            page.results[0].first_published_at,
            Some(datetime!(2021-03-15 19:25:28 UTC))
        );
        assert!(page.results[1].first_published_at.is_none());
        assert_eq!(page.results[1].subtitle, "");
    }

    #[test]
    fn decodes_detail_document_preserving_section_order() {
        let body = r#"{
            "id": "YBt5XhMAACMAvLLF",
            "uid": "how-to-use-hooks",
            "first_publication_date": "2021-03-15T19:25:28+0000",
            "last_publication_date": "2021-03-16T09:25:28+0000",
            "data": {
                "title": "How to use hooks",
                "subtitle": "Thinking in hooks",
                "author": "Joseph Oliveira",
                "banner": { "url": "https://images.example.com/banner.png" },
                "content": [
                    { "heading": "First", "body": [ { "text": "alpha" }, { "text": "beta" } ] },
                    { "heading": "Second", "body": [ { "text": "gamma" } ] }
                ]
            }
        }"#;

        let document: WireDocument<WireDetailData> =
            serde_json::from_str(body).expect("decoded document");
        let detail = document.into_detail().expect("converted detail");

        assert_eq!(detail.id, "YBt5XhMAACMAvLLF");
        assert!(detail.post.was_edited());
        assert_eq!(detail.post.sections.len(), 2);
        assert_eq!(detail.post.sections[0].heading, "First");
        assert_eq!(detail.post.sections[0].paragraphs, vec!["alpha", "beta"]);
        assert_eq!(detail.post.sections[1].paragraphs, vec!["gamma"]);
    }

    #[test]
    fn search_url_keeps_the_api_path_prefix() {
        let base = Url::parse("https://cms.example.com/api/v2").expect("base url");
        let gateway = HttpCmsGateway::new(&base).expect("gateway");
        let url = gateway.search_url().expect("search url");
        assert_eq!(url.as_str(), "https://cms.example.com/api/v2/documents/search");
    }
}
