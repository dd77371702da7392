use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teamquiz::{
    api, broadcast,
    config::AppConfig,
    feedback::{FeedbackGenerator, LlmFeedbackGenerator, NoFeedback},
    llm,
    questions::{LlmQuestionGenerator, QuestionBank, QuestionRouter},
    state::AppState,
    ws,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teamquiz=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting teamquiz...");

    let config = AppConfig::from_env();

    let bank = match &config.question_bank_path {
        Some(path) => match QuestionBank::from_path(path) {
            Ok(bank) => Some(bank),
            Err(e) => {
                tracing::error!("Failed to load question bank {}: {}", path.display(), e);
                None
            }
        },
        None => {
            tracing::warn!("QUESTION_BANK_PATH not set; matches need document context");
            None
        }
    };

    // Initialize LLM providers
    let llm_config = llm::LlmConfig::from_env();
    let (generator, feedback): (Option<LlmQuestionGenerator>, Arc<dyn FeedbackGenerator>) = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("LLM providers initialized successfully");
            let manager = Arc::new(manager);
            (
                Some(LlmQuestionGenerator::new(
                    manager.clone(),
                    llm_config.default_timeout,
                    llm_config.default_max_tokens,
                )),
                Arc::new(LlmFeedbackGenerator::new(
                    manager,
                    llm_config.default_timeout,
                    llm_config.default_max_tokens,
                )),
            )
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. Generated questions and feedback will not be available.",
                e
            );
            (None, Arc::new(NoFeedback))
        }
    };

    let questions = Arc::new(QuestionRouter::new(bank, generator));
    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState::new(config, questions, feedback));

    // Spawn background task that forces a PASS when a turn runs out of time
    broadcast::spawn_turn_deadline_watcher(state.clone());

    // Spawn background task that deletes abandoned matches
    broadcast::spawn_abandoned_match_sweeper(state.clone());

    let api_routes = Router::new()
        .route("/api/matches/{id}", get(api::get_match))
        .route("/api/join/{code}", get(api::resolve_join_code));

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Listening on http://{}", bind_addr);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
