use dotenv::dotenv;
use replybot_backend::ai::build_completion;
use replybot_backend::config::{defaults, Config, CursorBackend, LedgerBackend};
use replybot_backend::generator::ResponseGenerator;
use replybot_backend::http::build_client;
use replybot_backend::pipeline::BotContext;
use replybot_backend::render::{HctiRenderer, ImageRenderer};
use replybot_backend::scheduler::run_scheduler;
use replybot_backend::store::{AirtableLedger, CursorStore, DedupLedger, RedisCursorStore, SqliteStore};
use replybot_backend::twitter::TwitterClient;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, Box<dyn Error>> {
    let config = Config::from_env()?;
    let http = build_client(config.pipeline.call_timeout)?;

    let twitter = TwitterClient::connect(http.clone(), config.twitter.clone()).await?;
    let bot = twitter.bot().clone();
    let source = Arc::new(twitter);

    let chat = build_completion(http.clone(), &config.chat);
    let summarizer = config
        .summary
        .chat
        .as_ref()
        .map(|settings| build_completion(http.clone(), settings));
    let renderer: Option<Arc<dyn ImageRenderer>> = config.render.as_ref().map(|r| {
        Arc::new(HctiRenderer::new(
            http.clone(),
            &r.endpoint,
            &r.user_id,
            &r.api_key,
            &r.google_fonts,
        )) as Arc<dyn ImageRenderer>
    });
    log::info!(
        "Reply generation: {:?} chat, summary {}, image cards {}",
        config.chat.provider,
        if summarizer.is_some() { "on" } else { "off" },
        if renderer.is_some() { "on" } else { "off" }
    );
    let generator = ResponseGenerator::new(
        chat,
        summarizer,
        renderer,
        &config.summary.promo_suffix,
        config.pipeline.tweet_max_chars,
        config.pipeline.call_timeout,
    );

    let needs_sqlite = config.storage.cursor_backend == CursorBackend::Sqlite
        || config.storage.ledger_backend == LedgerBackend::Sqlite;
    let sqlite = if needs_sqlite {
        Some(Arc::new(SqliteStore::open(&config.storage.database_url)?))
    } else {
        None
    };

    let ledger: Arc<dyn DedupLedger> = match (&config.storage.ledger_backend, &sqlite) {
        (LedgerBackend::Airtable { api_key, base_key, table_name }, _) => {
            log::info!("Reply ledger: Airtable table {}", table_name);
            Arc::new(AirtableLedger::new(
                http.clone(),
                defaults::AIRTABLE_API_BASE,
                base_key,
                table_name,
                api_key,
            ))
        }
        (LedgerBackend::Sqlite, Some(store)) => store.clone(),
        (LedgerBackend::Sqlite, None) => return Err("SQLite ledger selected but store not opened".into()),
    };

    let cursor: Arc<dyn CursorStore> = match (config.storage.cursor_backend, &sqlite) {
        (CursorBackend::Redis, _) => {
            let redis = RedisCursorStore::new(&config.storage.redis_url)?;
            if !redis.ping().await {
                log::warn!("Redis at {} is not reachable yet", config.storage.redis_url);
            }
            Arc::new(redis)
        }
        (CursorBackend::Sqlite, Some(store)) => store.clone(),
        (CursorBackend::Sqlite, None) => return Err("SQLite cursor selected but store not opened".into()),
    };

    let ctx = BotContext::new(bot, source, generator, ledger, cursor, config.pipeline.clone());

    if config.run_once {
        return match ctx.run_once().await {
            Ok(stats) => {
                log::info!("Single run complete. {}", stats);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                log::error!("Single run failed: {}", e);
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            // Dropping the sender would stop the scheduler
            std::future::pending::<()>().await;
        }
        log::info!("Ctrl-C received, finishing current run");
        let _ = shutdown_tx.send(());
    });

    log::info!("Replying to mentions of @{}", ctx.bot().username);
    run_scheduler(
        Duration::from_secs(config.poll_interval_secs),
        shutdown_rx,
        || ctx.run_once(),
    )
    .await;

    Ok(ExitCode::SUCCESS)
}
