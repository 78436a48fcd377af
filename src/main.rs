use chatrelay::aggregator::TriggerAggregator;
use chatrelay::bridge;
use chatrelay::chat::{ChatPlatform, IrcSettings, TwitchIrc};
use chatrelay::completion::OpenRouterProvider;
use chatrelay::config::{Args, Secrets};
use chatrelay::control::ControlPlane;
use chatrelay::db;
use chatrelay::dispatcher::{RelayDispatcher, Session};
use chatrelay::failover::FailoverController;
use chatrelay::gate::Gate;
use chatrelay::hardening::RetryPolicy;
use chatrelay::health::{self, HealthState};
use chatrelay::telegram::TelegramClient;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn fatal(message: impl std::fmt::Display) -> ! {
    tracing::error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guards = chatrelay::logging::init_tracing(std::path::Path::new(&args.log_dir));
    chatrelay::logging::setup_panic_hook();

    let db = match db::init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => fatal(format!("Failed to initialize database: {}", e)),
    };

    let stored = match db::load_config(&db).await {
        Ok(c) => c,
        Err(e) => fatal(format!("Failed to load config table: {}", e)),
    };
    let secrets = match Secrets::from_process_env(&stored) {
        Ok(s) => s,
        Err(e) => fatal(e),
    };
    let (Some(oauth_token), Some(nick)) = (secrets.twitch_oauth_token.clone(), secrets.twitch_nick.clone()) else {
        fatal("twitch_oauth_token and twitch_nick must be set in the config table or the environment");
    };

    let admins = match db::load_admins(&db).await {
        Ok(a) => a,
        Err(e) => fatal(format!("Failed to load admins: {}", e)),
    };
    if admins.is_empty() {
        tracing::warn!("Admin roster is empty; nobody can log in");
    } else {
        tracing::info!("Loaded {} admins", admins.len());
    }

    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(args.request_timeout_secs))
        .connect_timeout(Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
    {
        Ok(c) => c,
        Err(e) => fatal(format!("Failed to build HTTP client: {}", e)),
    };

    let telegram = TelegramClient::new(http.clone(), &secrets.telegram_api_key);

    let (tx_chat, rx_chat) = mpsc::channel(256);
    let irc_settings = IrcSettings {
        host: args.twitch_host.clone(),
        port: args.twitch_port,
        tls: !args.twitch_plaintext,
        nick,
        oauth_token,
        reconnect_base_delay_ms: args.twitch_reconnect_delay_ms,
    };
    let connect_policy = RetryPolicy::new(5, 1000);
    let irc = match connect_policy
        .execute_with_retry(|| TwitchIrc::connect(irc_settings.clone(), tx_chat.clone()))
        .await
    {
        Ok(irc) => irc,
        Err(e) => fatal(format!("Failed to connect to Twitch IRC: {}", e)),
    };
    drop(tx_chat);
    let chat: Arc<dyn ChatPlatform> = irc;

    let gate = Gate::new();
    let (bridge_handle, rx_bridge) = bridge::channel();
    let pump_telegram = telegram.clone();
    tokio::spawn(async move {
        bridge::run_pump(rx_bridge, &pump_telegram).await;
    });

    let provider = Arc::new(OpenRouterProvider::new(
        http.clone(),
        Some(args.openrouter_base_url.clone()),
        args.model.clone(),
    ));
    let session = Session::new(
        FailoverController::new(provider),
        TriggerAggregator::new(fastrand::Rng::new()),
    );
    let dispatcher = RelayDispatcher::new(
        session,
        gate.clone(),
        bridge_handle,
        chat,
        fastrand::Rng::new(),
        args.probe_rounds,
    );
    let (tx_cmd, rx_cmd) = mpsc::channel(32);
    tokio::spawn(dispatcher.run(rx_chat, rx_cmd));

    let health_state = Arc::new(HealthState {
        db: db.clone(),
        tx_cmd: tx_cmd.clone(),
    });
    match tokio::net::TcpListener::bind(&args.health_addr).await {
        Ok(listener) => {
            let app = health::router(health_state);
            let addr = args.health_addr.clone();
            tokio::spawn(async move {
                tracing::info!("Health endpoint listening on {}", addr);
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("Health server error: {}", e);
                }
            });
        }
        Err(e) => tracing::warn!("Health endpoint disabled, cannot bind {}: {}", args.health_addr, e),
    }

    let control = ControlPlane::new(db, gate, tx_cmd, admins);
    tokio::select! {
        _ = control.run(telegram) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
}
