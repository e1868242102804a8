use std::sync::Arc;

use clap::Parser;
use tessera_clock::DurationSecs;
use tessera_reqwest::{AuthClient, RequestConfig};
use tessera_tokens::{StorageConfig, StorageKind, TokenConfig};

#[derive(Debug, Parser)]
struct Opts {
    /// The endpoint that exchanges an expired token for a fresh one
    #[clap(short, long, env)]
    refresh_url: reqwest::Url,

    /// The resource to fetch
    #[clap(short, long, env)]
    url: reqwest::Url,

    /// A token to store before fetching
    #[clap(short, long, env, hide_env_values = true)]
    token: Option<String>,

    /// Where to keep the token: `memory`, `local-storage`, or `cookies`
    #[clap(short = 'k', long, env, default_value = "local-storage")]
    storage: StorageKind,

    /// The file used by `local-storage`
    #[clap(short = 'f', long, env, default_value = ".tessera-tokens.json")]
    storage_file: std::path::PathBuf,

    /// Prefix for the storage key
    #[clap(short = 'n', long, env)]
    namespace: Option<String>,

    /// How long after issuance, in seconds, an expired token may be refreshed
    #[clap(short = 'w', long, env, default_value_t = tessera_tokens::DEFAULT_REFRESH_WINDOW.0)]
    refresh_window: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut config = TokenConfig::new(opts.refresh_url)
        .with_refresh_window(DurationSecs(opts.refresh_window));
    if let Some(namespace) = opts.namespace {
        config = config.with_storage_namespace(namespace);
    }

    let jar = Arc::new(reqwest::cookie::Jar::default());
    let storage = match opts.storage {
        StorageKind::Memory => StorageConfig::memory(),
        StorageKind::LocalStorage => StorageConfig::local_storage(opts.storage_file),
        StorageKind::Cookies => StorageConfig::cookies(opts.url.clone()),
    }
    .build_with_cookie_jar(Arc::clone(&jar))?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .cookie_provider(jar)
        .build()?;

    let client = AuthClient::builder(config)
        .with_storage(storage)
        .with_client(http)
        .build()
        .await?;

    if let Some(token) = opts.token {
        client.token().set_token(&token).await?;
    }

    tracing::info!(
        expired = client.token().is_expired(),
        should_refresh = client.token().should_refresh().await,
        "loaded token"
    );

    let resp = client.get(opts.url, RequestConfig::new()).await?;
    let status = resp.status();
    let body = resp.text().await?;

    tracing::info!(status = status.as_u16(), "received response");
    println!("{}", body);

    Ok(())
}
