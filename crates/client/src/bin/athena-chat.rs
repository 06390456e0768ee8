use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use athena_client::error::{ControllerSnafu, ReadInputSnafu, SetupServiceSnafu};
use athena_client::{
    CancelHandle, ClientError, HttpChatService, ReconciliationController, SessionOutcome,
    SettingsStore, StreamUpdate, TokenStore,
};
use athena_protocol::KnowledgeTier;
use athena_store::{CanonicalId, ConversationStore};
use clap::Parser;
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Send messages to the chat service and print the streamed answers.
#[derive(Debug, Parser)]
#[command(name = "athena-chat", version)]
struct Cli {
    /// Bearer token for the chat service.
    #[arg(long, env = "ATHENA_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Settings file; defaults to the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured service URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Continue an existing conversation instead of starting a new one.
    #[arg(long)]
    conversation: Option<String>,

    /// Search every uploaded document, not just this conversation's.
    #[arg(long)]
    search_all: bool,

    /// Keep knowledge from this conversation beyond the session.
    #[arg(long)]
    persistent: bool,

    /// Message to send. When omitted, each line of stdin is sent in turn.
    message: Vec<String>,
}

/// Process-wide Ctrl-C routing: the first press cancels the running session; a
/// press with nothing running, or a repeat press, stops reading input.
#[derive(Clone, Default)]
struct Interrupts {
    current: Arc<ArcSwapOption<CancelHandle>>,
    shutdown: CancellationToken,
}

impl Interrupts {
    fn listen(&self) {
        let interrupts = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !interrupts.interrupt() {
                    break;
                }
            }
        });
    }

    /// Handles one press. Returns false once input should stop.
    fn interrupt(&self) -> bool {
        match self.current.load_full() {
            Some(session) if session.cancel() => {
                tracing::debug!("interrupt cancelled the running session");
                true
            }
            _ => {
                self.shutdown.cancel();
                false
            }
        }
    }
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let cli = Cli::parse();

    let settings_store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    let mut settings = settings_store.settings().as_ref().clone();
    if let Some(base_url) = &cli.base_url {
        settings.base_url = base_url.clone();
        settings = settings.normalized();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| ClientError::InstallLogging {
            stage: "init-tracing",
            message: error.to_string(),
        })?;

    let interrupts = Interrupts::default();
    interrupts.listen();

    let auth = Arc::new(TokenStore::new(cli.token.clone()));
    let service = HttpChatService::new(&settings, auth.clone()).context(SetupServiceSnafu {
        stage: "build-http-service",
    })?;

    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_updates(updates_rx));
    let mut controller =
        ReconciliationController::new(Arc::new(service), auth.clone()).with_updates(updates_tx);
    let mut store = ConversationStore::new();

    if let Some(conversation_id) = &cli.conversation {
        controller
            .refresh_conversations(&mut store)
            .await
            .context(ControllerSnafu {
                stage: "refresh-conversations",
            })?;
        controller
            .open_conversation(&mut store, &CanonicalId::new(conversation_id.as_str()))
            .await
            .context(ControllerSnafu {
                stage: "open-conversation",
            })?;
    }

    let tier = if cli.persistent {
        KnowledgeTier::Persistent
    } else {
        settings.default_knowledge_tier
    };
    store.set_knowledge_tier(tier);
    store.set_search_all(cli.search_all || settings.default_search_all);

    if cli.message.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = interrupts.shutdown.cancelled() => break,
                line = lines.next_line() => line.context(ReadInputSnafu {
                    stage: "read-stdin-line",
                })?,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            send_one(&mut controller, &mut store, &interrupts, &line).await?;
            if !auth.is_logged_in() || interrupts.shutdown.is_cancelled() {
                break;
            }
        }
    } else if !interrupts.shutdown.is_cancelled() {
        let message = cli.message.join(" ");
        send_one(&mut controller, &mut store, &interrupts, &message).await?;
    }

    drop(controller);
    let _ = printer.await;
    Ok(())
}

async fn send_one(
    controller: &mut ReconciliationController,
    store: &mut ConversationStore,
    interrupts: &Interrupts,
    content: &str,
) -> Result<(), ClientError> {
    let session = controller
        .begin_send(store, content)
        .context(ControllerSnafu { stage: "begin-send" })?;

    interrupts
        .current
        .store(Some(Arc::new(session.cancel_handle())));
    let outcome = controller.drive(store, session).await;
    interrupts.current.store(None);

    if let SessionOutcome::Completed { conversation_id, .. } = &outcome {
        tracing::info!(
            conversation_id = %conversation_id,
            context_tokens = ?store.context_tokens(conversation_id),
            "answer stored"
        );
    }
    Ok(())
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<StreamUpdate>) {
    let mut stdout = std::io::stdout();
    while let Some(update) = updates.recv().await {
        match update {
            StreamUpdate::Started { .. } => {}
            StreamUpdate::Status(label) => eprintln!("[{label}]"),
            StreamUpdate::Token(text) => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            StreamUpdate::Finished(SessionOutcome::Completed { model, .. }) => {
                let _ = writeln!(stdout);
                eprintln!("({model})");
            }
            StreamUpdate::Finished(SessionOutcome::Errored { message }) => {
                let _ = writeln!(stdout);
                eprintln!("error: {message}");
            }
            StreamUpdate::Finished(SessionOutcome::Cancelled) => {
                let _ = writeln!(stdout);
                eprintln!("cancelled");
            }
        }
    }
}
