//! Recall flashcard CLI.
//!
//! Provides the `recall` binary, which keeps decks, cards and reviews in a
//! local SQLite file and syncs them with a recall server. Every command
//! prints its result as JSON on stdout.
//!
//! Exit codes: 0 = success, 1 = bad input or unknown id, 2 = sync failure,
//! 3 = storage or I/O error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use recall_client::{ClientError, FlashcardDb, HttpTransport, ReviewQueue, SyncOutcome};
use recall_core::{CardId, DeckId, ReviewResponse, SchedulerConfig};
use recall_flow::Context;
use recall_storage::SqliteStore;

/// Offline-first flashcards.
#[derive(Parser)]
#[command(name = "recall", about = "Offline-first flashcards")]
struct Cli {
    /// Path to the local database file.
    #[arg(long, global = true, default_value = "recall.db")]
    db: String,

    /// Base URL of the sync server.
    #[arg(long, global = true, default_value = "http://localhost:5002")]
    server: String,

    /// Account on the sync server (default: the server's default account).
    #[arg(long, global = true)]
    account: Option<String>,

    /// JSON file overriding the scheduler coefficients.
    #[arg(long, global = true)]
    scheduler: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage decks.
    Deck {
        #[command(subcommand)]
        action: DeckAction,
    },

    /// Manage cards.
    Card {
        #[command(subcommand)]
        action: CardAction,
    },

    /// Grade a card: 0 = blackout, 1 = incorrect, 2 = difficult, 3 = perfect.
    Review { card: String, grade: u8 },

    /// Show the review queue of a deck.
    Due { deck: String },

    /// Push local changes and pull everyone else's.
    Sync,

    /// Drop all local data and pull the account again.
    Reset,
}

#[derive(Subcommand)]
enum DeckAction {
    Add { name: String },
    List,
    Rename { deck: String, name: String },
    /// Delete a deck with all its cards and reviews.
    Delete { deck: String },
}

#[derive(Subcommand)]
enum CardAction {
    Add {
        deck: String,
        front: String,
        back: String,
    },
    List {
        deck: String,
    },
    Edit {
        card: String,
        front: String,
        back: String,
    },
    Delete {
        card: String,
    },
}

/// A failed command: message for stderr plus exit code.
struct Failure {
    code: i32,
    message: String,
}

impl Failure {
    fn usage(message: impl Into<String>) -> Self {
        Failure {
            code: 1,
            message: message.into(),
        }
    }

    fn io(message: impl Into<String>) -> Self {
        Failure {
            code: 3,
            message: message.into(),
        }
    }
}

impl From<ClientError> for Failure {
    fn from(err: ClientError) -> Self {
        let code = match &err {
            ClientError::NotFound { .. } => 1,
            ClientError::Sync(_) => 2,
            ClientError::Storage(_) => 3,
        };
        Failure {
            code,
            message: err.to_string(),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output).unwrap_or_else(|e| {
                format!("{{\"error\": \"failed to serialize result: {}\"}}", e)
            });
            println!("{}", json);
            0
        }
        Err(failure) => {
            eprintln!("Error: {}", failure.message);
            failure.code
        }
    };
    process::exit(exit_code);
}

fn run(cli: Cli) -> Result<Value, Failure> {
    let config = load_scheduler(cli.scheduler.as_deref())?;
    let store = SqliteStore::new(&cli.db)
        .map_err(|e| Failure::io(format!("failed to open database '{}': {}", cli.db, e)))?;
    let transport = HttpTransport::new(&cli.server, cli.account, HttpTransport::DEFAULT_TIMEOUT)
        .map_err(|e| Failure::io(e.to_string()))?;
    let db = FlashcardDb::new(Context::new(), store, transport, config);

    match cli.command {
        Commands::Deck { action } => run_deck(&db, action),
        Commands::Card { action } => run_card(&db, action),
        Commands::Review { card, grade } => {
            let response = ReviewResponse::try_from(grade).map_err(|e| Failure::usage(e.to_string()))?;
            let state = db.add_review_and_update_learn_state(&CardId::from(card.as_str()), response)?;
            encode(serde_json::to_value(&state))
        }
        Commands::Due { deck } => run_due(&db, DeckId::from(deck.as_str())),
        Commands::Sync => {
            let outcome = block_on(db.sync())??;
            Ok(outcome_json(&db, outcome)?)
        }
        Commands::Reset => {
            let outcome = block_on(db.reset())??;
            Ok(outcome_json(&db, outcome)?)
        }
    }
}

fn run_deck(db: &FlashcardDb, action: DeckAction) -> Result<Value, Failure> {
    match action {
        DeckAction::Add { name } => encode(serde_json::to_value(db.add_deck(&name)?)),
        DeckAction::List => {
            let now = recall_core::now();
            let mut decks = Vec::new();
            for deck in db.get_decks()? {
                let cards = db.cards_in_deck_now(&deck.deck_id)?.len();
                let due = db.overdue_cards(&deck.deck_id, now)?.len();
                let mut entry = encode(serde_json::to_value(&deck))?;
                entry["cards"] = json!(cards);
                entry["due"] = json!(due);
                decks.push(entry);
            }
            Ok(Value::Array(decks))
        }
        DeckAction::Rename { deck, name } => {
            encode(serde_json::to_value(db.rename_deck(&DeckId::from(deck.as_str()), &name)?))
        }
        DeckAction::Delete { deck } => {
            db.delete_deck(&DeckId::from(deck.as_str()))?;
            Ok(json!({ "deleted": deck }))
        }
    }
}

fn run_card(db: &FlashcardDb, action: CardAction) -> Result<Value, Failure> {
    match action {
        CardAction::Add { deck, front, back } => {
            let card = db.add_card(&DeckId::from(deck.as_str()), &front, &back)?;
            encode(serde_json::to_value(&card))
        }
        CardAction::List { deck } => {
            let deck_id = DeckId::from(deck.as_str());
            if db.get_deck(&deck_id)?.is_none() {
                return Err(Failure::usage(format!("deck '{}' not found", deck)));
            }
            encode(serde_json::to_value(db.cards_in_deck_now(&deck_id)?))
        }
        CardAction::Edit { card, front, back } => {
            let card = db.update_card(&CardId::from(card.as_str()), &front, &back)?;
            encode(serde_json::to_value(&card))
        }
        CardAction::Delete { card } => {
            db.delete_card(&CardId::from(card.as_str()))?;
            Ok(json!({ "deleted": card }))
        }
    }
}

/// Drains the deck's review queue into a list.
fn run_due(db: &FlashcardDb, deck_id: DeckId) -> Result<Value, Failure> {
    if db.get_deck(&deck_id)?.is_none() {
        return Err(Failure::usage(format!("deck '{}' not found", deck_id)));
    }
    let now = recall_core::now();
    let queue = ReviewQueue::new(db, deck_id)?;
    let mut cards = Vec::new();
    while let Some(card) = queue.current() {
        let state = db.learn_state(&card.card_id)?;
        let overdue = state.as_ref().is_some_and(|s| s.is_overdue(now));
        cards.push(json!({
            "card": encode(serde_json::to_value(&card))?,
            "learn_state": encode(serde_json::to_value(&state))?,
            "overdue": overdue,
        }));
        queue.next();
    }
    Ok(Value::Array(cards))
}

fn outcome_json(db: &FlashcardDb, outcome: SyncOutcome) -> Result<Value, Failure> {
    let pending = db.count_unsynced()?;
    Ok(match outcome {
        SyncOutcome::Merged(report) => json!({
            "status": "merged",
            "pushed": report.pushed,
            "pulled": report.pulled,
            "high_water_mark": report.high_water_mark,
            "changed_rows": report.changed_rows,
            "recomputed": report.recomputed,
            "pending": pending,
        }),
        SyncOutcome::Offline => json!({ "status": "offline", "pending": pending }),
    })
}

fn load_scheduler(path: Option<&Path>) -> Result<SchedulerConfig, Failure> {
    let Some(path) = path else {
        return Ok(SchedulerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| Failure::io(format!("failed to read '{}': {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| Failure::usage(format!("invalid scheduler config '{}': {}", path.display(), e)))
}

/// Runs `future` on a single-threaded runtime; the client is not `Send`.
fn block_on<F: Future>(future: F) -> Result<F::Output, Failure> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Failure::io(format!("failed to start runtime: {}", e)))?;
    Ok(runtime.block_on(future))
}

fn encode(value: serde_json::Result<Value>) -> Result<Value, Failure> {
    value.map_err(|e| Failure::io(format!("failed to serialize result: {}", e)))
}
