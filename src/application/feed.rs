//! Listing loader and post detail assembly.
//!
//! `PostFeed` owns the accumulated listing sequence and the pagination
//! cursor; `FeedService` turns feeds and CMS documents into view contexts
//! for the HTTP surface. Cursors handed to the browser are wrapped as
//! `/api/posts?after=<cms url>` so the client never talks to the CMS
//! directly.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use url::{Url, form_urlencoded};

use crate::domain::posts::{PostSummary, format_edited_date, format_human_date};
use crate::infra::cms::{CmsError, CmsGateway, DetailDocument, QueryOptions, SortOrder};
use crate::presentation::views::{
    PageContext, PostCard, PostDetailContext, PostLinkView, SectionView,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error(transparent)]
    Cms(#[from] CmsError),
}

/// Settings slice the feed needs.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: u32,
    pub post_navigation: bool,
    pub cms_api_url: Url,
}

/// The accumulated, monotonically growing listing sequence plus the cursor
/// to the next CMS page. An absent cursor is the sole termination signal.
#[derive(Debug, Clone)]
pub struct PostFeed {
    posts: Vec<PostSummary>,
    next_page: Option<Url>,
}

impl PostFeed {
    /// Fetch the first page. Failure is fatal to the page render: no
    /// partial content is surfaced.
    pub async fn load_initial(gateway: &dyn CmsGateway, page_size: u32) -> Result<Self, FeedError> {
        let page = gateway
            .query_posts(QueryOptions {
                page_size,
                after: None,
                order: None,
            })
            .await?;

        Ok(Self {
            posts: page.results,
            next_page: parse_next_page(page.next_page)?,
        })
    }

    /// Rebuild a feed positioned at a cursor, with nothing accumulated yet.
    pub fn resume(next_page: Option<Url>) -> Self {
        Self {
            posts: Vec::new(),
            next_page,
        }
    }

    pub fn posts(&self) -> &[PostSummary] {
        &self.posts
    }

    pub fn next_page(&self) -> Option<&Url> {
        self.next_page.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }

    /// Follow the cursor: append the fetched summaries after the existing
    /// ones and replace the cursor with the new `next_page`. Without a
    /// cursor this is a no-op.
    pub async fn load_more(&mut self, gateway: &dyn CmsGateway) -> Result<(), FeedError> {
        let Some(cursor) = self.next_page.clone() else {
            return Ok(());
        };

        let page = gateway.fetch_next(&cursor).await?;
        self.posts.extend(page.results);
        self.next_page = parse_next_page(page.next_page)?;
        Ok(())
    }
}

fn parse_next_page(next_page: Option<String>) -> Result<Option<Url>, FeedError> {
    next_page
        .map(|raw| {
            Url::parse(&raw)
                .map_err(|err| FeedError::InvalidCursor(format!("`{raw}` is not a URL: {err}")))
        })
        .transpose()
}

/// JSON payload of the load-more endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LoadMorePage {
    pub results: Vec<PostCard>,
    pub next_page: Option<String>,
}

impl LoadMorePage {
    /// The no-op page: nothing appended, pagination ended.
    pub fn exhausted() -> Self {
        Self {
            results: Vec::new(),
            next_page: None,
        }
    }
}

#[derive(Clone)]
pub struct FeedService {
    cms: Arc<dyn CmsGateway>,
    config: FeedConfig,
}

impl FeedService {
    pub fn new(cms: Arc<dyn CmsGateway>, config: FeedConfig) -> Self {
        Self { cms, config }
    }

    /// Initial listing context for the index page.
    pub async fn home_context(&self) -> Result<PageContext, FeedError> {
        let feed = PostFeed::load_initial(self.cms.as_ref(), self.config.page_size).await?;

        let posts: Vec<PostCard> = feed.posts().iter().map(summary_card).collect();
        let has_results = !posts.is_empty();
        Ok(PageContext {
            posts,
            has_results,
            next_page: wrap_cursor(feed.next_page()),
        })
    }

    /// Runtime counterpart of the "load more" control. An absent cursor is
    /// the no-op: nothing fetched, pagination stays ended.
    pub async fn load_more(&self, after: Option<&str>) -> Result<LoadMorePage, FeedError> {
        let Some(after) = after else {
            return Ok(LoadMorePage::exhausted());
        };

        let cursor = self.unwrap_cursor(after)?;
        let mut feed = PostFeed::resume(Some(cursor));
        feed.load_more(self.cms.as_ref()).await?;

        // The feed started empty, so everything in it was appended now.
        let results = feed.posts().iter().map(summary_card).collect();
        let next_page = wrap_cursor(feed.next_page());
        Ok(LoadMorePage { results, next_page })
    }

    /// Resolve one post by slug, with derived display fields and, when the
    /// feature is on, the adjacent-post links.
    pub async fn post_detail(&self, slug: &str) -> Result<Option<PostDetailContext>, FeedError> {
        let Some(document) = self.cms.get_by_slug(slug).await? else {
            return Ok(None);
        };

        let (older, newer) = if self.config.post_navigation {
            self.adjacent_posts(&document).await?
        } else {
            (None, None)
        };

        let post = document.post;
        let edited_at = post
            .was_edited()
            .then(|| post.last_published_at.map(format_edited_date))
            .flatten();

        let sections = post
            .sections
            .iter()
            .map(|section| SectionView {
                heading: section.heading.clone(),
                paragraphs: section.paragraphs.clone(),
            })
            .collect();

        Ok(Some(PostDetailContext {
            slug: post.slug.clone(),
            title: post.title.clone(),
            subtitle: post.subtitle.clone(),
            banner_url: post.banner_url.clone(),
            author: post.author.clone(),
            published: post.first_published_at.map(format_human_date),
            reading_minutes: post.reading_time(),
            edited_at,
            sections,
            older,
            newer,
        }))
    }

    /// One document immediately after the current one in each publication
    /// order: ascending yields the newer post, descending the older one.
    async fn adjacent_posts(
        &self,
        document: &DetailDocument,
    ) -> Result<(Option<PostLinkView>, Option<PostLinkView>), FeedError> {
        let newer = self.adjacent(document, SortOrder::PublicationAsc).await?;
        let older = self.adjacent(document, SortOrder::PublicationDesc).await?;
        Ok((older, newer))
    }

    async fn adjacent(
        &self,
        document: &DetailDocument,
        order: SortOrder,
    ) -> Result<Option<PostLinkView>, FeedError> {
        let page = self
            .cms
            .query_posts(QueryOptions {
                page_size: 1,
                after: Some(document.id.clone()),
                order: Some(order),
            })
            .await?;

        Ok(page.results.into_iter().next().map(|summary| PostLinkView {
            slug: summary.slug,
            title: summary.title,
        }))
    }

    fn unwrap_cursor(&self, after: &str) -> Result<Url, FeedError> {
        let url = Url::parse(after)
            .map_err(|err| FeedError::InvalidCursor(format!("`{after}` is not a URL: {err}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FeedError::InvalidCursor(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }

        // Only the configured CMS may be fetched through this endpoint.
        let base = &self.config.cms_api_url;
        if url.host_str() != base.host_str()
            || url.port_or_known_default() != base.port_or_known_default()
        {
            return Err(FeedError::InvalidCursor(format!(
                "cursor host does not match the configured CMS: `{after}`"
            )));
        }

        Ok(url)
    }
}

fn summary_card(summary: &PostSummary) -> PostCard {
    PostCard {
        slug: summary.slug.clone(),
        title: summary.title.clone(),
        subtitle: summary.subtitle.clone(),
        author: summary.author.clone(),
        published: summary.first_published_at.map(format_human_date),
    }
}

/// Re-wrap a CMS cursor as a same-origin load-more URL.
pub fn wrap_cursor(next_page: Option<&Url>) -> Option<String> {
    next_page.map(|url| {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("after", url.as_str())
            .finish();
        format!("/api/posts?{query}")
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::infra::cms::SummaryPage;

    fn summary(slug: &str, title: &str) -> PostSummary {
        PostSummary {
            slug: slug.to_string(),
            first_published_at: Some(datetime!(2021-03-15 19:25:28 UTC)),
            title: title.to_string(),
            subtitle: "subtitle".to_string(),
            author: "author".to_string(),
        }
    }

    /// Gateway double scripted with one initial page and per-URL follow-ups.
    #[derive(Default)]
    struct ScriptedGateway {
        initial: Mutex<Option<SummaryPage>>,
        next: Mutex<HashMap<String, SummaryPage>>,
        detail: Mutex<Option<DetailDocument>>,
    }

    impl ScriptedGateway {
        fn with_initial(page: SummaryPage) -> Self {
            Self {
                initial: Mutex::new(Some(page)),
                ..Default::default()
            }
        }

        fn script_next(&self, url: &str, page: SummaryPage) {
            self.next
                .lock()
                .expect("next pages lock")
                .insert(url.to_string(), page);
        }
    }

    #[async_trait]
    impl CmsGateway for ScriptedGateway {
        async fn query_posts(&self, _options: QueryOptions) -> Result<SummaryPage, CmsError> {
            self.initial
                .lock()
                .expect("initial lock")
                .take()
                .ok_or(CmsError::Status {
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }

        async fn fetch_next(&self, next_page: &Url) -> Result<SummaryPage, CmsError> {
            self.next
                .lock()
                .expect("next pages lock")
                .remove(next_page.as_str())
                .ok_or(CmsError::Status {
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }

        async fn get_by_slug(&self, _slug: &str) -> Result<Option<DetailDocument>, CmsError> {
            Ok(self.detail.lock().expect("detail lock").clone())
        }
    }

    fn service(gateway: ScriptedGateway, post_navigation: bool) -> FeedService {
        FeedService::new(
            Arc::new(gateway),
            FeedConfig {
                page_size: 100,
                post_navigation,
                cms_api_url: Url::parse("https://cms.example.com/api/v2").expect("cms url"),
            },
        )
    }

    #[tokio::test]
    async fn load_more_without_cursor_is_a_no_op() {
        let gateway = ScriptedGateway::default();
        let mut feed = PostFeed::resume(None);

        feed.load_more(&gateway).await.expect("no-op succeeds");

        assert!(feed.posts().is_empty());
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn load_more_appends_in_order_and_replaces_the_cursor() {
        let gateway = ScriptedGateway::with_initial(SummaryPage {
            results: vec![summary("first", "First"), summary("second", "Second")],
            next_page: Some("https://cms.example.com/api/v2/page2".to_string()),
        });
        gateway.script_next(
            "https://cms.example.com/api/v2/page2",
            SummaryPage {
                results: vec![summary("third", "Third")],
                next_page: Some("https://cms.example.com/api/v2/page3".to_string()),
            },
        );

        let mut feed = PostFeed::load_initial(&gateway, 100).await.expect("initial load");
        feed.load_more(&gateway).await.expect("load more");

        let slugs: Vec<&str> = feed.posts().iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["first", "second", "third"]);
        assert_eq!(
            feed.next_page().map(Url::as_str),
            Some("https://cms.example.com/api/v2/page3")
        );
    }

    #[tokio::test]
    async fn exhausted_cursor_ends_pagination() {
        let gateway = ScriptedGateway::with_initial(SummaryPage {
            results: vec![summary("first", "First"), summary("second", "Second")],
            next_page: Some("https://cms.example.com/api/v2/page2".to_string()),
        });
        gateway.script_next(
            "https://cms.example.com/api/v2/page2",
            SummaryPage {
                results: vec![summary("third", "Third")],
                next_page: None,
            },
        );

        let mut feed = PostFeed::load_initial(&gateway, 100).await.expect("initial load");
        assert!(feed.has_more());

        feed.load_more(&gateway).await.expect("load more");

        assert_eq!(feed.posts().len(), 3);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn home_context_formats_dates_and_wraps_the_cursor() {
        let gateway = ScriptedGateway::with_initial(SummaryPage {
            results: vec![summary("first", "First")],
            next_page: Some("https://cms.example.com/api/v2/page2?token=abc".to_string()),
        });

        let context = service(gateway, false).home_context().await.expect("context");

        assert!(context.has_results);
        assert_eq!(context.posts[0].published.as_deref(), Some("15 Mar 2021"));
        let next = context.next_page.expect("wrapped cursor");
        assert!(next.starts_with("/api/posts?after="));
        assert!(next.contains("page2"));
    }

    #[tokio::test]
    async fn service_load_more_round_trips_the_wrapped_cursor() {
        let gateway = ScriptedGateway::default();
        gateway.script_next(
            "https://cms.example.com/api/v2/page2",
            SummaryPage {
                results: vec![summary("third", "Third")],
                next_page: None,
            },
        );
        let service = service(gateway, false);

        let cms_url = Url::parse("https://cms.example.com/api/v2/page2").expect("url");
        let wrapped = wrap_cursor(Some(&cms_url)).expect("wrapped");
        let after = wrapped
            .strip_prefix("/api/posts?after=")
            .map(|encoded| {
                form_urlencoded::parse(format!("after={encoded}").as_bytes())
                    .next()
                    .map(|(_, value)| value.into_owned())
                    .expect("decoded after value")
            })
            .expect("after parameter");

        let page = service.load_more(Some(&after)).await.expect("load more");
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].slug, "third");
        assert!(page.next_page.is_none());
    }

    #[tokio::test]
    async fn service_load_more_without_cursor_returns_the_exhausted_page() {
        let service = service(ScriptedGateway::default(), false);
        let page = service.load_more(None).await.expect("no-op page");
        assert!(page.results.is_empty());
        assert!(page.next_page.is_none());
    }

    #[tokio::test]
    async fn foreign_cursor_hosts_are_rejected() {
        let service = service(ScriptedGateway::default(), false);

        let err = service
            .load_more(Some("https://attacker.example.net/steal"))
            .await
            .expect_err("foreign host rejected");
        assert!(matches!(err, FeedError::InvalidCursor(_)));

        let err = service
            .load_more(Some("file:///etc/passwd"))
            .await
            .expect_err("non-http scheme rejected");
        assert!(matches!(err, FeedError::InvalidCursor(_)));
    }

    #[tokio::test]
    async fn detail_skips_adjacency_queries_when_navigation_is_off() {
        let gateway = ScriptedGateway::default();
        *gateway.detail.lock().expect("detail lock") = Some(DetailDocument {
            id: "YBt5XhMAACMAvLLF".to_string(),
            post: crate::domain::posts::PostDetail {
                slug: "how-to-use-hooks".to_string(),
                first_published_at: Some(datetime!(2021-03-15 19:25:28 UTC)),
                last_published_at: Some(datetime!(2021-03-16 09:25:28 UTC)),
                title: "How to use hooks".to_string(),
                subtitle: "Thinking in hooks".to_string(),
                banner_url: "https://images.example.com/banner.png".to_string(),
                author: "Joseph Oliveira".to_string(),
                sections: Vec::new(),
            },
        });

        // query_posts is unscripted and would error, so reaching Ok proves
        // the adjacency queries never ran.
        let detail = service(gateway, false)
            .post_detail("how-to-use-hooks")
            .await
            .expect("detail")
            .expect("present");

        assert!(detail.older.is_none());
        assert!(detail.newer.is_none());
        assert_eq!(detail.published.as_deref(), Some("15 Mar 2021"));
        assert_eq!(detail.edited_at.as_deref(), Some("16 Mar 2021, 9:25"));
    }
}
