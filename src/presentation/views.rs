//! View contexts and askama templates.
//!
//! Contexts hold display-ready strings only: dates are formatted and the
//! reading time computed before anything reaches a template.

use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::application::error::{ErrorReport, HttpError};
use crate::config::{CommentsSettings, SiteSettings};

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(chrome: SiteChrome) -> Response {
    let template = ErrorTemplate {
        chrome,
        status: StatusCode::NOT_FOUND.as_u16(),
        message: "Page not found",
    };
    let mut response = render_template_response(template, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Per-site fields shared by every page.
#[derive(Debug, Clone)]
pub struct SiteChrome {
    pub title: String,
}

impl SiteChrome {
    pub fn from_settings(site: &SiteSettings) -> Self {
        Self {
            title: site.title.clone(),
        }
    }
}

/// One listing entry. Serialized as-is in the load-more payload, so the
/// field names are part of the JSON contract.
#[derive(Debug, Clone, Serialize)]
pub struct PostCard {
    pub slug: String,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub published: Option<String>,
}

/// Index page context: the first listing page plus the wrapped cursor the
/// load-more control follows.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub posts: Vec<PostCard>,
    pub has_results: bool,
    pub next_page: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SectionView {
    pub heading: String,
    pub paragraphs: Vec<String>,
}

/// Link to an adjacent post, present only when navigation is enabled and a
/// neighbor exists in that direction.
#[derive(Debug, Clone)]
pub struct PostLinkView {
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct PostDetailContext {
    pub slug: String,
    pub title: String,
    pub subtitle: String,
    pub banner_url: String,
    pub author: String,
    pub published: Option<String>,
    pub reading_minutes: u64,
    /// Formatted last publication instant, present only for edited posts.
    pub edited_at: Option<String>,
    pub sections: Vec<SectionView>,
    pub older: Option<PostLinkView>,
    pub newer: Option<PostLinkView>,
}

/// Comment widget wiring for the post page script tag.
#[derive(Debug, Clone)]
pub struct CommentsView {
    pub enabled: bool,
    pub repo: String,
    pub issue_term: String,
    pub label: String,
    pub theme: String,
}

impl CommentsView {
    pub fn from_settings(comments: &CommentsSettings) -> Self {
        Self {
            enabled: comments.enabled,
            repo: comments.repo.clone().unwrap_or_default(),
            issue_term: comments.issue_term.clone(),
            label: comments.label.clone(),
            theme: comments.theme.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub chrome: SiteChrome,
    pub page: PageContext,
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub chrome: SiteChrome,
    pub post: PostDetailContext,
    pub comments: CommentsView,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub chrome: SiteChrome,
    pub status: u16,
    pub message: &'static str,
}
