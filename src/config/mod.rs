//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "orbita";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CMS_PAGE_SIZE: u32 = 100;
const DEFAULT_SITE_TITLE: &str = "spacetraveling";
const DEFAULT_PUBLIC_SITE_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_COMMENTS_ISSUE_TERM: &str = "pathname";
const DEFAULT_COMMENTS_LABEL: &str = "blog-comment";
const DEFAULT_COMMENTS_THEME: &str = "dark-blue";

/// Command-line arguments for the Orbita binary.
#[derive(Debug, Parser)]
#[command(name = "orbita", version, about = "Orbita blog front-end server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ORBITA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Orbita HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the CMS API base URL.
    #[arg(long = "cms-api-url", value_name = "URL")]
    pub cms_api_url: Option<String>,

    /// Override the number of post summaries fetched per CMS page.
    #[arg(long = "cms-page-size", value_name = "COUNT")]
    pub cms_page_size: Option<u32>,

    /// Toggle older/newer navigation links on post pages.
    #[arg(
        long = "features-post-navigation",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub features_post_navigation: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cms: CmsSettings,
    pub site: SiteSettings,
    pub features: FeatureSettings,
    pub comments: CommentsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub api_url: Url,
    pub page_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub title: String,
    pub public_site_url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureSettings {
    pub post_navigation: bool,
}

#[derive(Debug, Clone)]
pub struct CommentsSettings {
    pub enabled: bool,
    pub repo: Option<String>,
    pub issue_term: String,
    pub label: String,
    pub theme: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Parse CLI arguments and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("ORBITA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cms: RawCmsSettings,
    site: RawSiteSettings,
    features: RawFeatureSettings,
    comments: RawCommentsSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    public_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCmsSettings {
    api_url: Option<String>,
    page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    title: Option<String>,
    public_site_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeatureSettings {
    post_navigation: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCommentsSettings {
    enabled: Option<bool>,
    repo: Option<String>,
    issue_term: Option<String>,
    label: Option<String>,
    theme: Option<String>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.cms_api_url.as_ref() {
            self.cms.api_url = Some(url.clone());
        }
        if let Some(size) = overrides.cms_page_size {
            self.cms.page_size = Some(size);
        }
        if let Some(enabled) = overrides.features_post_navigation {
            self.features.post_navigation = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cms,
            site,
            features,
            comments,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cms = build_cms_settings(cms)?;
        let site = build_site_settings(site);
        let features = build_feature_settings(features);
        let comments = build_comments_settings(comments);

        Ok(Self {
            server,
            logging,
            cms,
            site,
            features,
            comments,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }
    let graceful_shutdown = Duration::from_secs(graceful_secs);

    Ok(ServerSettings {
        public_addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cms_settings(cms: RawCmsSettings) -> Result<CmsSettings, LoadError> {
    let raw_url = cms
        .api_url
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        })
        .ok_or_else(|| LoadError::invalid("cms.api_url", "CMS API URL is not configured"))?;

    let api_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("cms.api_url", format!("failed to parse: {err}")))?;
    if api_url.host_str().is_none() {
        return Err(LoadError::invalid("cms.api_url", "URL must have a host"));
    }

    let page_size_value = cms.page_size.unwrap_or(DEFAULT_CMS_PAGE_SIZE);
    let page_size = NonZeroU32::new(page_size_value)
        .ok_or_else(|| LoadError::invalid("cms.page_size", "must be greater than zero"))?;

    Ok(CmsSettings { api_url, page_size })
}

fn build_site_settings(site: RawSiteSettings) -> SiteSettings {
    SiteSettings {
        title: site.title.unwrap_or_else(|| DEFAULT_SITE_TITLE.to_string()),
        public_site_url: site
            .public_site_url
            .unwrap_or_else(|| DEFAULT_PUBLIC_SITE_URL.to_string()),
    }
}

fn build_feature_settings(features: RawFeatureSettings) -> FeatureSettings {
    FeatureSettings {
        post_navigation: features.post_navigation.unwrap_or(false),
    }
}

fn build_comments_settings(comments: RawCommentsSettings) -> CommentsSettings {
    let repo = comments.repo.and_then(|value| {
        let trimmed = value.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    });

    CommentsSettings {
        // The widget posts into a repository; without one it stays off.
        enabled: comments.enabled.unwrap_or(false) && repo.is_some(),
        repo,
        issue_term: comments
            .issue_term
            .unwrap_or_else(|| DEFAULT_COMMENTS_ISSUE_TERM.to_string()),
        label: comments
            .label
            .unwrap_or_else(|| DEFAULT_COMMENTS_LABEL.to_string()),
        theme: comments
            .theme
            .unwrap_or_else(|| DEFAULT_COMMENTS_THEME.to_string()),
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse()
        .map_err(|err| format!("failed to parse `{host}:{port}`: {err}"))
}
