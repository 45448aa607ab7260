//! Servitor CLI
//!
//! The `servitor` command talks to an agent hosted on a basilisk,
//! text-generation-webui or OpenAI-compatible backend.
//!
//! ## Commands
//!
//! - `chat`: line-oriented conversation on stdin/stdout
//! - `ping`: check that the backend is reachable
//! - `tokenize`: show how the backend tokenizes a string

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use servitor_core::{
    ActorInfo, BackendKind, Bridge, ChannelInfo, ChatLine, ContextFormatter,
    EphemeralVectorStore, InferenceDriver, KnowledgeMemory, LineIdGenerator, ServitorConfig,
    Tokenizer, VectorMemory,
};
use servitor_drivers::Backend;
use servitor_state::{SurrealVectorStore, VectorStore};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "servitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with an agent on a stateless text-generation backend", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "SERVITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Backend API, overriding `backend.kind`
    #[arg(short, long, global = true, value_enum, env = "SERVITOR_BACKEND")]
    backend: Option<BackendChoice>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on stdin/stdout; `/reset` clears the window, `/quit` exits
    Chat {
        /// Name the agent sees for you
        #[arg(short, long, default_value = "user")]
        user: String,

        /// Channel id (and name) of the conversation
        #[arg(long, default_value = "terminal")]
        channel: String,

        /// Treat the conversation as a direct message
        #[arg(long)]
        private: bool,

        /// Keep embedded excerpts of the conversation for later recall
        #[arg(long)]
        longterm: bool,

        /// Where long-term excerpts live
        #[arg(long, value_enum, default_value_t = StoreKind::Memory)]
        store: StoreKind,

        /// Text file of reference sections separated by blank lines
        #[arg(long)]
        knowledge: Option<PathBuf>,
    },

    /// Check that the backend answers
    Ping,

    /// Tokenize text with the backend tokenizer
    Tokenize {
        text: String,

        /// Print each token with its string fragment
        #[arg(long)]
        fragments: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Process-local store, lost on exit
    Memory,
    /// SurrealDB at `SURREALDB_URL` (in-memory when unset)
    Surreal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// basilisk JSON API
    Basilisk,
    /// text-generation-webui legacy API
    Textgen,
    /// OpenAI-compatible completions
    #[value(alias = "openai")]
    OpenAi,
}

impl From<BackendChoice> for BackendKind {
    fn from(choice: BackendChoice) -> Self {
        match choice {
            BackendChoice::Basilisk => BackendKind::Basilisk,
            BackendChoice::Textgen => BackendKind::Textgen,
            BackendChoice::OpenAi => BackendKind::OpenAi,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    servitor_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.backend)?;
    let backend = Backend::from_config(&config.backend).context("Failed to create backend driver")?;

    match cli.command {
        Commands::Chat {
            user,
            channel,
            private,
            longterm,
            store,
            knowledge,
        } => {
            let session = ChatSession::new(&user, &channel, private, longterm);
            let options = ChatOptions {
                longterm,
                store,
                knowledge,
            };
            cmd_chat(&config, &backend, session, options).await
        }
        Commands::Ping => cmd_ping(&backend).await,
        Commands::Tokenize { text, fragments } => cmd_tokenize(&backend, &text, fragments).await,
    }
}

/// Load the config file if one was given, then apply environment and
/// command-line overrides.
fn load_config(path: Option<&Path>, backend: Option<BackendChoice>) -> Result<ServitorConfig> {
    let mut config = match path {
        Some(path) => ServitorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServitorConfig::default(),
    }
    .apply_env();
    if let Some(choice) = backend {
        config.backend.kind = choice.into();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Identity of the local speaker and channel.
struct ChatSession {
    user: ActorInfo,
    channel: ChannelInfo,
    persist_longterm: bool,
    ids: LineIdGenerator,
}

impl ChatSession {
    /// Private conversations never reach long-term memory.
    fn new(user: &str, channel: &str, private: bool, longterm: bool) -> Self {
        Self {
            user: ActorInfo::user(user),
            channel: ChannelInfo::new(channel, channel, private),
            persist_longterm: longterm && !private,
            ids: LineIdGenerator::new(),
        }
    }

    fn line(&self, content: &str) -> ChatLine {
        ChatLine::new(
            self.user.clone(),
            self.channel.clone(),
            self.ids.next_id(),
            content,
        )
    }
}

struct ChatOptions {
    longterm: bool,
    store: StoreKind,
    knowledge: Option<PathBuf>,
}

/// Split a knowledge file into sections at blank lines.
fn knowledge_sections(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn cmd_chat(
    config: &ServitorConfig,
    backend: &Backend,
    session: ChatSession,
    options: ChatOptions,
) -> Result<()> {
    let driver = backend.inference();
    if !driver.ping().await {
        warn!(endpoint = backend.endpoint(), "backend did not answer ping");
    }

    let embedder = backend.embedding();
    if embedder.is_none() && (options.longterm || options.knowledge.is_some()) {
        bail!(
            "the {:?} backend cannot embed; --longterm and --knowledge need one that can",
            backend.kind()
        );
    }

    let formatter = Arc::new(ContextFormatter::new(config.formatter.clone()));
    let mut bridge = Bridge::new(
        config.agent.clone(),
        config.bridge.clone(),
        driver,
        formatter.clone(),
    );

    if let (Some(path), Some(embedder)) = (&options.knowledge, &embedder) {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;
        let knowledge = KnowledgeMemory::new(embedder.clone());
        knowledge
            .add(knowledge_sections(&text))
            .await
            .context("Failed to embed knowledge sections")?;
        info!(sections = knowledge.len(), "knowledge loaded");
        bridge = bridge.with_longterm(Arc::new(knowledge));
    }

    if let (true, Some(embedder)) = (options.longterm, embedder) {
        let store: Arc<dyn VectorStore> = match options.store {
            StoreKind::Memory => Arc::new(EphemeralVectorStore::new()),
            StoreKind::Surreal => Arc::new(
                SurrealVectorStore::setup_from_env()
                    .await
                    .context("Failed to connect to vector store")?,
            ),
        };
        let vector = VectorMemory::new(embedder, store, formatter, config.vector.clone());
        bridge = bridge.with_longterm(Arc::new(vector));
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let turns = run_chat(&bridge, &session, stdin, &mut stdout).await?;
    info!(turns, channel = %session.channel.id, "chat finished");
    Ok(())
}

/// Drive one conversation until input ends or `/quit`.
///
/// Returns the number of replies produced.
async fn run_chat<R, W>(
    bridge: &Bridge,
    session: &ChatSession,
    input: R,
    output: &mut W,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    bridge.open(&session.channel);
    let mut lines = input.lines();
    let mut turns = 0;

    while let Some(text) = lines.next_line().await? {
        let text = text.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                bridge.reset(&session.channel.id);
                writeln!(output, "(conversation window cleared)")?;
                continue;
            }
            _ => {}
        }

        let line = session.line(text);
        bridge
            .save(line.clone(), session.persist_longterm)
            .await
            .context("Failed to save input line")?;

        let reply = bridge.infer(&line).await.context("Inference failed")?;
        let shown = bridge.formatter().clean_inference(&reply.message.content);
        writeln!(output, "{}: {}", reply.actor.friendlyname, shown.content)?;
        output.flush()?;

        bridge
            .save(reply, session.persist_longterm)
            .await
            .context("Failed to save reply")?;
        turns += 1;
    }

    Ok(turns)
}

async fn cmd_ping(backend: &Backend) -> Result<()> {
    if backend.inference().ping().await {
        println!("pong from {}", backend.endpoint());
        Ok(())
    } else {
        bail!("no answer from {}", backend.endpoint())
    }
}

/// Only basilisk reports fragments; other backends print plain ids.
async fn cmd_tokenize(backend: &Backend, text: &str, fragments: bool) -> Result<()> {
    let (tokens, pieces) = match backend {
        Backend::Basilisk(driver) => {
            let result = driver
                .tokenize_detailed(text)
                .await
                .context("Tokenize request failed")?;
            (result.tokens, Some(result.fragments))
        }
        other => {
            let tokens = other
                .inference()
                .tokenize(text)
                .await
                .context("Tokenize request failed")?;
            (tokens, None)
        }
    };

    match pieces.filter(|_| fragments) {
        Some(pieces) => {
            for (i, token) in tokens.iter().enumerate() {
                let fragment = pieces.get(i).map(String::as_str).unwrap_or("");
                println!("{token:>8}  {fragment:?}");
            }
        }
        None => {
            if fragments {
                warn!(backend = ?backend.kind(), "backend does not report fragments");
            }
            let ids: Vec<String> = tokens.iter().map(u32::to_string).collect();
            println!("{}", ids.join(" "));
        }
    }
    println!("{} tokens", tokens.len());
    Ok(())
}
