//! OIDC session CLI
//!
//! Wires the session core to the default OIDC client:
//! 1. `serve` publishes the identity provider coordinates at `/v1/config`
//! 2. `login` / `callback <url>` run the authorization-code redirect flow
//! 3. `whoami` / `fetch <path>` use the stored session
//! 4. `logout` drops the session and redirects to the provider's sign-out

mod config;
mod config_server;
mod identity_impl;

use anyhow::{Context, Result};
use oidc_client::UserStore;
use oidc_session::{AuthenticatedFetch, ReqwestTransport, RequestOptions, SessionProvider};
use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::identity_impl::{OidcIdentityFactory, RenewSchedule, TerminalNavigator};

const USAGE: &str = "usage: oidc-session [--config PATH] <command>

commands:
  serve                 serve /v1/config from the configured OIDC settings
  login                 start sign-in and print the authorization URL
  callback <url>        complete sign-in with the URL the provider redirected to
  logout                sign out and print the end-session URL
  whoami                show the signed-in user
  fetch <path> [-X METHOD] [-H 'Name: value']... [-d BODY]
                        send an authenticated request to the API";

#[derive(Debug, PartialEq)]
enum Command {
    Serve,
    Session(SessionCommand),
}

/// Commands that run against the session core.
#[derive(Debug, PartialEq)]
enum SessionCommand {
    Login,
    Callback(String),
    Logout,
    Whoami,
    Fetch(FetchArgs),
}

#[derive(Debug, PartialEq)]
struct FetchArgs {
    path: String,
    method: reqwest::Method,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<String>,
}

#[derive(Debug, PartialEq)]
struct Cli {
    config_path: Option<String>,
    command: Command,
}

/// Parse arguments (without the program name).
fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config requires a path")?;
            config_path = Some(path.clone());
        } else {
            rest.push(arg.as_str());
        }
    }

    let (name, operands) = rest
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("missing command\n\n{USAGE}"))?;

    let command = match *name {
        "serve" => Command::Serve,
        "login" => Command::Session(SessionCommand::Login),
        "logout" => Command::Session(SessionCommand::Logout),
        "whoami" => Command::Session(SessionCommand::Whoami),
        "callback" => {
            let url = operands.first().context("callback requires the redirect URL")?;
            Command::Session(SessionCommand::Callback(url.to_string()))
        }
        "fetch" => Command::Session(SessionCommand::Fetch(parse_fetch(operands)?)),
        other => anyhow::bail!("unknown command: {other}\n\n{USAGE}"),
    };

    Ok(Cli {
        config_path,
        command,
    })
}

fn parse_fetch(operands: &[&str]) -> Result<FetchArgs> {
    let mut path = None;
    let mut method = reqwest::Method::GET;
    let mut headers = Vec::new();
    let mut body = None;

    let mut iter = operands.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-X" => {
                let value = iter.next().context("-X requires a method")?;
                method = reqwest::Method::from_bytes(value.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid method: {value}"))?;
            }
            "-H" => {
                let value = iter.next().context("-H requires 'Name: value'")?;
                let (name, value) = value
                    .split_once(':')
                    .with_context(|| format!("header must be 'Name: value', got: {value}"))?;
                let name = HeaderName::from_bytes(name.trim().as_bytes())
                    .with_context(|| format!("invalid header name: {name}"))?;
                let value = HeaderValue::from_str(value.trim())
                    .with_context(|| format!("invalid value for header {name}"))?;
                headers.push((name, value));
            }
            "-d" => {
                let value = iter.next().context("-d requires a body")?;
                body = Some(value.to_string());
            }
            other if path.is_none() => path = Some(other.to_string()),
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    Ok(FetchArgs {
        path: path.context("fetch requires a path")?,
        method,
        headers,
        body,
    })
}

/// The session core wired to the default OIDC client.
struct Session {
    provider: Arc<SessionProvider>,
    fetch: AuthenticatedFetch,
}

async fn build_session(config: &Config) -> Result<Session> {
    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .context("failed to build HTTP client")?;

    let origin = Url::parse(&config.app.origin)
        .with_context(|| format!("invalid origin {}", config.app.origin))?;
    let api_url = Url::parse(config.api_url())
        .with_context(|| format!("invalid api_url {}", config.api_url()))?;
    let post_logout_redirect_uri = config
        .app
        .post_logout_redirect_uri
        .as_deref()
        .map(Url::parse)
        .transpose()
        .context("invalid post_logout_redirect_uri")?;

    let store = UserStore::load(config.session.store_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load user store from {}",
                config.session.store_path.display()
            )
        })?;

    let factory = OidcIdentityFactory::new(Arc::new(store), Arc::new(TerminalNavigator))
        .with_http_client(http.clone())
        .with_post_logout_redirect_uri(post_logout_redirect_uri)
        .with_silent_renew(RenewSchedule {
            interval: Duration::from_secs(config.session.renew_interval_secs),
            threshold: Duration::from_secs(config.session.renew_threshold_secs),
        });

    let transport = Arc::new(ReqwestTransport::new(api_url).with_client(http));
    let provider = Arc::new(
        SessionProvider::new(transport.clone(), Arc::new(origin), Arc::new(factory))
            .with_failure_policy(config.session.failure_policy),
    );
    info!(
        api_url = %transport.base_url(),
        failure_policy = ?provider.failure_policy(),
        "session configured"
    );
    let fetch = AuthenticatedFetch::new(provider.clone(), transport);

    Ok(Session { provider, fetch })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        origin = %config.app.origin,
        api_url = %config.api_url(),
        failure_policy = ?config.session.failure_policy,
        "configuration loaded"
    );

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Session(command) => run(&config, command).await,
    }
}

async fn serve(config: &Config) -> Result<()> {
    let remote = config_server::remote_config(config)?;
    info!(authority = %remote.issuer_url, client_id = %remote.client_id, "serving auth configuration");

    let app = config_server::build_router(remote);
    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(stop_requested())
        .await
    {
        error!(error = %e, "server error during shutdown");
    }

    info!("shutdown complete");
    Ok(())
}

async fn run(config: &Config, command: SessionCommand) -> Result<()> {
    let session = build_session(config).await?;

    match command {
        SessionCommand::Login => session.provider.login().await.context("sign-in failed")?,
        SessionCommand::Callback(url) => {
            let user = session
                .provider
                .complete_login(&url)
                .await
                .context("sign-in callback failed")?;
            println!("signed in as {}", user.subject().unwrap_or("<unknown>"));
        }
        SessionCommand::Logout => session.provider.logout().await.context("sign-out failed")?,
        SessionCommand::Whoami => match session.provider.current_user().await? {
            Some(user) if user.has_access_token() => {
                let summary = serde_json::json!({
                    "subject": user.subject(),
                    "expires_at": user.expires_at,
                    "expired": user.is_expired(),
                    "claims": user.claims,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            _ => println!("not signed in"),
        },
        SessionCommand::Fetch(args) => {
            let mut options = RequestOptions::new().with_method(args.method);
            for (name, value) in args.headers {
                options = options.with_header(name, value);
            }
            if let Some(body) = args.body {
                options = options.with_body(body);
            }

            let response = session
                .fetch
                .fetch(&args.path, options)
                .await
                .with_context(|| format!("request to {} failed", args.path))?;
            eprintln!("{}", response.status);
            println!("{}", response.text());
        }
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
/// Resolves on SIGINT or SIGTERM. A signal whose handler cannot be installed
/// is logged and never fires; the other one still stops the server.
async fn stop_requested() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "stopping server");
}
