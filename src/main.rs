use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use kbchat::cli::{Cli, Commands};
use kbchat::{
    directory, utils, AnswerView, ChatBackend, ConversationEngine, HttpBackend, SendOutcome,
    SessionDirectory, SessionSummary, Settings, TurnState,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone())),
        )
        .init();

    let token = Settings::auth_token()?;
    let backend: Arc<dyn ChatBackend> =
        Arc::new(HttpBackend::new(&settings.backend.base_url, &token));
    let directory = Arc::new(SessionDirectory::new(backend.clone()));
    let engine = ConversationEngine::new(
        backend.clone(),
        directory.clone(),
        &settings.backend.base_url,
        &token,
        settings.chat.clone(),
    );

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat {
            session_id,
            knowledge_bases,
            model,
        } => handle_chat(engine, directory, session_id, knowledge_bases, model).await,
        Commands::Sessions => handle_sessions(directory).await,
        Commands::Models => handle_models(backend).await,
        Commands::Kbs => handle_kbs(backend).await,
        Commands::DeleteSession { session_id } => {
            engine.delete_session(&session_id).await?;
            utils::print_success(&format!("Deleted session {}", session_id));
            Ok(())
        }
    }
}

async fn handle_chat(
    engine: ConversationEngine,
    directory: Arc<SessionDirectory>,
    session_id: Option<String>,
    knowledge_bases: Vec<i64>,
    model: Option<String>,
) -> Result<()> {
    match session_id {
        Some(id) => {
            engine.activate_session(&id).await?;
            let count = engine.history().len();
            utils::print_success(&format!("Resumed session {} ({} turns)", id, count));
        }
        None => {
            let id = engine.new_session().expect("no turn can be streaming yet");
            utils::print_success(&format!("New session {}", id));
        }
    }

    if !knowledge_bases.is_empty() {
        engine.set_knowledge_bases(knowledge_bases.into_iter().collect::<BTreeSet<_>>());
        utils::print_info("Knowledge-grounded mode");
    } else {
        utils::print_info("General chat mode (no knowledge bases selected)");
    }
    engine.set_model(model);

    utils::print_header("kbchat");
    utils::print_info("Type your question, /help for commands, Ctrl+C during an answer to stop it\n");

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        utils::print_prompt("You: ");
        flush_stdout();
        let mut input = String::new();
        if reader.read_line(&mut input).await? == 0 {
            return Ok(());
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/help" => {
                println!("Commands:");
                println!("  /sessions      - list past sessions by age");
                println!("  /switch <id>   - switch to another session");
                println!("  /new           - start a fresh session");
                println!("  /delete        - delete the current session");
                println!("  /help          - show this help");
                continue;
            }
            "/sessions" => {
                if directory.refresh().await.is_err() {
                    utils::print_error("Could not fetch sessions");
                }
                print_grouped(&directory.list());
                continue;
            }
            "/new" => {
                if let Some(id) = engine.new_session() {
                    utils::print_success(&format!("New session {}", id));
                }
                continue;
            }
            "/delete" => {
                let id = engine.session_id();
                match engine.delete_session(&id).await {
                    Ok(()) => utils::print_success(&format!(
                        "Deleted {}; now on session {}",
                        id,
                        engine.session_id()
                    )),
                    Err(e) => utils::print_error(&format!("Delete failed: {}", e)),
                }
                continue;
            }
            _ => {}
        }

        if let Some(id) = input.strip_prefix("/switch ") {
            match engine.activate_session(id.trim()).await {
                Ok(true) => utils::print_success(&format!("Switched to {}", id.trim())),
                Ok(false) => utils::print_error("Busy; try again"),
                Err(e) => utils::print_error(&format!("Switch failed: {}", e)),
            }
            continue;
        }

        run_one_turn(&engine, input).await;
    }
}

/// Drive one turn, rendering deltas live with the reasoning segment dimmed.
/// Ctrl+C aborts the turn and reconciles with the server.
async fn run_one_turn(engine: &ConversationEngine, question: &str) {
    utils::print_info("Assistant:");

    let send_engine = engine.clone();
    let question = question.to_string();
    let mut task = tokio::spawn(async move {
        let mut renderer = LiveRenderer::default();
        send_engine
            .send(&question, |delta| renderer.render(delta))
            .await
    });

    let result = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            engine.abort().await;
            println!();
            utils::print_info("(stopped; showing server-side record)");
            task.await
        }
    };

    println!();
    match result {
        Ok(Ok(SendOutcome::Started)) => {
            // After an abort the server's reconciled record replaces
            // whatever was printed live; show it once, re-split.
            if let Some(entry) = engine.history().last() {
                if entry.state == TurnState::Aborted {
                    if let AnswerView::Split(split) = entry.answer_view() {
                        if !split.reasoning.is_empty() {
                            utils::print_reasoning(&format!(
                                "[reasoning] {}\n",
                                split.reasoning.trim()
                            ));
                        }
                        utils::print_answer(split.final_answer);
                        println!();
                    }
                }
            }
        }
        Ok(Ok(SendOutcome::RejectedBusy)) => {
            utils::print_error("A turn is already streaming; stop it first")
        }
        Ok(Ok(SendOutcome::RejectedEmpty)) => {}
        Ok(Err(e)) => utils::print_error(&format!("Turn failed: {} (partial answer kept)", e)),
        Err(join_err) => utils::print_error(&format!("Turn task failed: {}", join_err)),
    }
    println!();
}

/// Incremental render state: re-splits the accumulated buffer on every
/// delta and prints only the not-yet-printed suffix of each segment.
#[derive(Default)]
struct LiveRenderer {
    buffer: String,
    reasoning_printed: usize,
    final_printed: usize,
    reasoning_started: bool,
}

impl LiveRenderer {
    fn render(&mut self, delta: &str) {
        self.buffer.push_str(delta);
        let split = kbchat::core::reasoning::split(&self.buffer);

        // A partially-received "<think" prints as answer text until the
        // marker completes; once it does, restart the answer segment.
        if split.is_reasoning_open {
            self.final_printed = 0;
        }

        if split.reasoning.len() > self.reasoning_printed {
            if !self.reasoning_started {
                utils::print_reasoning("[reasoning] ");
                self.reasoning_started = true;
            }
            utils::print_reasoning(&split.reasoning[self.reasoning_printed..]);
            self.reasoning_printed = split.reasoning.len();
        }
        if split.final_answer.len() > self.final_printed {
            if self.reasoning_started && self.final_printed == 0 {
                println!();
            }
            utils::print_answer(&split.final_answer[self.final_printed..]);
            self.final_printed = split.final_answer.len();
        }
        flush_stdout();
    }
}

async fn handle_sessions(directory: Arc<SessionDirectory>) -> Result<()> {
    if let Err(e) = directory.refresh().await {
        utils::print_error(&format!("Could not fetch sessions: {}", e));
    }
    print_grouped(&directory.list());
    Ok(())
}

fn print_grouped(sessions: &[SessionSummary]) {
    let grouped = directory::group(sessions, Utc::now());
    let buckets = [
        ("Today", &grouped.today),
        ("Last 7 days", &grouped.last_7_days),
        ("Last 30 days", &grouped.last_30_days),
        ("Earlier", &grouped.earlier),
    ];
    for (label, bucket) in buckets {
        if bucket.is_empty() {
            continue;
        }
        utils::print_header(label);
        for session in bucket.iter() {
            println!(
                "  {}  {}  {}",
                session.session_id,
                session.created_at.format("%Y-%m-%d %H:%M"),
                session.question
            );
        }
    }
    if sessions.is_empty() {
        utils::print_info("No sessions");
    }
}

async fn handle_models(backend: Arc<dyn ChatBackend>) -> Result<()> {
    let models = backend.enabled_models().await?;
    utils::print_header("Enabled models");
    for model in models {
        println!("  {}  {}", model.id, model.name);
    }
    Ok(())
}

async fn handle_kbs(backend: Arc<dyn ChatBackend>) -> Result<()> {
    let kbs = backend.user_knowledge_bases().await?;
    utils::print_header("Knowledge bases");
    for kb in kbs {
        println!("  {:>4}  {}  [{}]", kb.id, kb.name, kb.status);
    }
    Ok(())
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}
