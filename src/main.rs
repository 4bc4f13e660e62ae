use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use chapgen::orchestrator;
use chapgen::router::MessageRouter;
use chapgen::settings::Settings;
use chapgen::state::AppState;
use chapgen::AppConfig;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let config = AppConfig::from_env();
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize client state: {}", e);
            std::process::exit(1);
        }
    };

    // One connection for the whole application lifetime, regardless of
    // which view is active.
    let connection_task = {
        let connection = state.connection.clone();
        let session_rx = state.session.subscribe();
        tokio::spawn(async move { connection.run(session_rx).await })
    };

    let router_task = tokio::spawn(MessageRouter::new(state.clone()).run());
    let watcher_task = tokio::spawn(session_watcher(state.clone()));

    if let Some(path) = state.last_path() {
        tracing::info!("Last visited view: {}", path);
    }
    if state.jobs.current().is_some() {
        state.set_loading(true);
    }

    command_loop(&state).await;

    tracing::info!("Shutting down");
    state.connection.shutdown();
    router_task.abort();
    watcher_task.abort();
    let _ = connection_task.await;
}

/// Reacts to session transitions: a fresh or restored token gets its
/// profile fetched (which doubles as token validation), a loaded profile
/// triggers a processed-list refresh, and a sign-out drops the tracked
/// job and local results along with the credentials.
async fn session_watcher(state: Arc<AppState>) {
    let mut session_rx = state.session.subscribe();
    let mut had_token = false;
    loop {
        let session = session_rx.borrow_and_update().clone();
        let has_token = session.access_token.is_some();

        if has_token && session.profile.is_none() {
            if let Err(e) = state.session.ensure_profile(&state.http).await {
                state.record_error(e.to_string());
            }
        } else if let Some(profile) = &session.profile {
            if let Err(e) = state.refresh_processed(&profile.email).await {
                tracing::warn!("Failed to refresh processed videos: {}", e);
            }
        }

        if had_token && !has_token {
            state.jobs.clear_job();
            state.set_loading(false);
            state.publish_chapters(String::new());
        }
        had_token = has_token;

        if session_rx.changed().await.is_err() {
            break;
        }
    }
}

async fn command_loop(state: &Arc<AppState>) {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !dispatch(state, line.trim()).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
        }
    }
}

async fn dispatch(state: &Arc<AppState>, line: &str) -> bool {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "help" => print_help(),
        "login" => {
            if rest.is_empty() {
                println!("usage: login <access-token>");
            } else {
                state.session.set_token(rest.to_string());
            }
        }
        "logout" => state.session.sign_out(),
        "latest" => {
            state.save_last_path("/latest");
            orchestrator::run_latest(state).await;
        }
        "manual" => {
            state.save_last_path("/manual");
            orchestrator::run_manual(state, rest).await;
        }
        "chapters" => {
            let block = state.generated_chapters();
            if block.is_empty() {
                println!("(no generated chapters yet)");
            } else {
                println!("{}", block);
            }
        }
        "processed" => {
            state.save_last_path("/processed");
            let videos = state.processed_videos();
            if videos.is_empty() {
                println!("(no processed videos)");
            }
            for video in videos {
                println!("{}  [{}]  {}", video.video_id, video.status, video.title);
            }
        }
        "settings" => {
            state.save_last_path("/settings");
            handle_settings(state, rest);
        }
        "status" => print_status(state),
        "clear" => {
            state.jobs.clear_job();
            state.set_loading(false);
            state.clear_error();
        }
        "quit" | "exit" => return false,
        other => println!("unknown command: {} (try 'help')", other),
    }
    true
}

fn handle_settings(state: &Arc<AppState>, rest: &str) {
    let current = state.current_settings();
    if rest.is_empty() {
        println!(
            "creativity: {} ({}), segmentation: {} ({})",
            current.creativity,
            current.creativity_label(),
            current.threshold,
            current.threshold_label()
        );
        return;
    }

    let mut parts = rest.split_whitespace();
    let parsed = (
        parts.next().and_then(|v| v.parse::<usize>().ok()),
        parts.next().and_then(|v| v.parse::<usize>().ok()),
    );
    match parsed {
        (Some(creativity), Some(threshold)) => {
            let settings = Settings {
                creativity,
                threshold,
            };
            state.update_settings(settings);
            println!(
                "saved: creativity {} / segmentation {}",
                settings.creativity_label(),
                settings.threshold_label()
            );
        }
        _ => println!("usage: settings <creativity 0-4> <segmentation 0-2>"),
    }
}

fn print_status(state: &Arc<AppState>) {
    let session = state.session.session();
    match session.profile {
        Some(profile) => println!("signed in as {} <{}>", profile.name, profile.email),
        None if session.access_token.is_some() => println!("signed in (profile pending)"),
        None => println!("not signed in"),
    }
    println!("connection: {:?}", state.connection.state());
    match state.jobs.current() {
        Some(job) => println!(
            "job: {} ({:?}, {:?}, started {})",
            job.job_id,
            job.mode,
            job.status,
            job.created_at.format("%H:%M:%S")
        ),
        None => println!("job: none"),
    }
    println!("busy: {}", state.is_loading());
    if let Some(error) = state.last_error() {
        println!("last error: {}", error);
    }
}

fn print_help() {
    println!("commands:");
    println!("  login <token>     sign in with a Google OAuth access token");
    println!("  logout            sign out and forget the tracked job");
    println!("  latest            generate chapters for your most recent upload");
    println!("  manual <url>      generate chapters for a video URL");
    println!("  chapters          show the last locally generated chapters");
    println!("  processed         list processed videos");
    println!("  settings [c t]    show or set generation preferences");
    println!("  status            show session / connection / job state");
    println!("  clear             drop the tracked job");
    println!("  quit              exit");
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or default to INFO for production
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,chapgen=trace,reqwest=info,hyper=info".to_string()
        } else {
            "info,chapgen=info,reqwest=warn,hyper=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        // Human-readable logging for development
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🎬 chapgen client starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    let backend_configured = std::env::var("CHAPGEN_BACKEND_URL").is_ok();
    let ws_configured = std::env::var("CHAPGEN_WS_URL").is_ok();
    tracing::info!(
        "Configuration - Backend URL: {}, WebSocket URL: {}",
        if backend_configured { "env" } else { "default" },
        if ws_configured { "env" } else { "default" }
    );

    Ok(())
}
