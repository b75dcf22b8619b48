use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use leadcapture::api::{resend::ResendNotifier, smtp::SmtpNotifier, supabase::SupabaseStore};
use leadcapture::config::{AppConfig, NotifierKind, RemoteStoreKind};
use leadcapture::repositories::lead_store::{RemoteStore, SqliteLeadStore};
use leadcapture::repositories::sqlite_kv::SqliteKvStore;
use leadcapture::utils::lead_email::LeadEmailTemplate;
use leadcapture::utils::notifier::{LogNotifier, Notifier};
use leadcapture::{app, db, jobs, AppState};

fn build_remote_store(config: &AppConfig, pool: &leadcapture::DbPool, client: &reqwest::Client) -> Arc<dyn RemoteStore> {
    match &config.remote_store {
        RemoteStoreKind::Sqlite => Arc::new(SqliteLeadStore::new(pool.clone())),
        RemoteStoreKind::Supabase { url, anon_key, table } => {
            tracing::info!("Storing leads in Supabase table {} at {}", table, url);
            Arc::new(SupabaseStore::new(client.clone(), url, anon_key, table))
        }
    }
}

fn build_notifier(config: &AppConfig, client: &reqwest::Client) -> anyhow::Result<Arc<dyn Notifier>> {
    let template = LeadEmailTemplate::new(&config.site_name, config.timezone);
    let notifier: Arc<dyn Notifier> = match &config.notifier {
        NotifierKind::Log => Arc::new(LogNotifier::new(template, &config.notify_to)),
        NotifierKind::Resend { api_key } => Arc::new(ResendNotifier::new(
            client.clone(),
            api_key,
            &config.notify_from,
            &config.notify_to,
            template,
        )),
        NotifierKind::Smtp {
            host,
            port,
            username,
            password,
        } => Arc::new(
            SmtpNotifier::new(
                host,
                *port,
                username,
                password,
                &config.notify_from,
                &config.notify_to,
                template,
            )
            .context("Failed to configure SMTP notifier")?,
        ),
    };
    Ok(notifier)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    let _guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,leadcapture=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let pool = db::build_pool(&config.database_url).context("Failed to open database")?;
    let client = reqwest::Client::new();
    let remote = build_remote_store(&config, &pool, &client);
    let notifier = build_notifier(&config, &client)?;
    let kv = Arc::new(SqliteKvStore::new(pool.clone()));

    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, kv, remote, notifier));

    let _scheduler = jobs::scheduler::start_scheduler(state.clone())
        .await
        .context("Failed to start maintenance scheduler")?;

    let router = app(state);
    tracing::info!("Starting server on {}", bind_addr);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
