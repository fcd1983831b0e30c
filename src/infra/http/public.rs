use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::{
    application::{
        error::HttpError,
        feed::{FeedError, FeedService},
    },
    presentation::views::{
        CommentsView, ErrorTemplate, IndexTemplate, PostTemplate, SiteChrome,
        render_not_found_response, render_template_response,
    },
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub chrome: SiteChrome,
    pub comments: CommentsView,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/post/{slug}", get(post_detail))
        .route("/api/posts", get(load_more))
        .route("/_health", get(health))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoadMoreQuery {
    after: Option<String>,
}

async fn index(State(state): State<HttpState>) -> Response {
    match state.feed.home_context().await {
        Ok(page) => render_template_response(
            IndexTemplate {
                chrome: state.chrome.clone(),
                page,
            },
            StatusCode::OK,
        ),
        Err(err) => feed_error_to_response(err, state.chrome.clone()),
    }
}

async fn post_detail(State(state): State<HttpState>, Path(slug): Path<String>) -> Response {
    match state.feed.post_detail(&slug).await {
        Ok(Some(post)) => render_template_response(
            PostTemplate {
                chrome: state.chrome.clone(),
                post,
                comments: state.comments.clone(),
            },
            StatusCode::OK,
        ),
        Ok(None) => render_not_found_response(state.chrome.clone()),
        Err(err) => feed_error_to_response(err, state.chrome.clone()),
    }
}

/// JSON endpoint behind the load-more control. The response mirrors the CMS
/// envelope shape with cursors rewritten to this origin.
async fn load_more(
    State(state): State<HttpState>,
    Query(query): Query<LoadMoreQuery>,
) -> Response {
    match state.feed.load_more(query.after.as_deref()).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => {
            let http = HttpError::from(err);
            let status = http.status();
            let mut response = (
                status,
                Json(serde_json::json!({ "error": http.public_message() })),
            )
                .into_response();
            http.into_report().attach(&mut response);
            response
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback(State(state): State<HttpState>) -> Response {
    render_not_found_response(state.chrome.clone())
}

/// HTML-surface error handling: render the shared error page at the mapped
/// status and keep the diagnostic for the logging middleware.
fn feed_error_to_response(err: FeedError, chrome: SiteChrome) -> Response {
    let http = HttpError::from(err);
    let status = http.status();
    let template = ErrorTemplate {
        chrome,
        status: status.as_u16(),
        message: http.public_message(),
    };
    let mut response = render_template_response(template, status);
    http.into_report().attach(&mut response);
    response
}
