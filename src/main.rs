use std::{future::IntoFuture, process, sync::Arc};

use orbita::{
    application::{
        error::AppError,
        feed::{FeedConfig, FeedService},
    },
    config,
    infra::{
        cms::HttpCmsGateway,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
    presentation::views::{CommentsView, SiteChrome},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(AppError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let gateway = HttpCmsGateway::new(&settings.cms.api_url).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to build CMS client: {err}"
        )))
    })?;

    let feed = Arc::new(FeedService::new(
        Arc::new(gateway),
        FeedConfig {
            page_size: settings.cms.page_size.get(),
            post_navigation: settings.features.post_navigation,
            cms_api_url: settings.cms.api_url.clone(),
        },
    ));

    let state = HttpState {
        feed,
        chrome: SiteChrome::from_settings(&settings.site),
        comments: CommentsView::from_settings(&settings.comments),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "orbita::serve",
        addr = %settings.server.public_addr,
        cms = %settings.cms.api_url,
        "serving"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::pin!(server);

    // In-flight requests get the configured window after the signal before
    // the process is torn down regardless.
    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = async {
            let _ = tokio::signal::ctrl_c().await;
            tokio::time::sleep(grace).await;
        } => {
            info!(
                target = "orbita::serve",
                grace_secs = grace.as_secs(),
                "graceful shutdown window elapsed"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(target = "orbita::serve", "shutting down");
}
