use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hookchat::api::client::Attachment;
use hookchat::app::App;
use hookchat::auth::{decode_credentials, encode_credentials, validate_user};
use hookchat::config::Config;
use hookchat::notify::{preview, Notifier, COMPLETION_TITLE};
use hookchat::state::longwait::{wait_phrase, WaitState, PHRASE_CADENCE};
use hookchat::storage::{ChatStore, FileBackend};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;

const AUTH_KEY: &str = "auth";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("hookchat.toml"));
    let config = Config::load(&config_path)?;
    config.validate()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = ChatStore::new(Box::new(FileBackend::new(FileBackend::default_dir())?));
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", config.app_title);
    login(&config, &store, &mut input).await?;

    let app = App::new(config, store);
    repl(&app, &mut input).await
}

async fn login(config: &Config, store: &ChatStore, input: &mut Input) -> Result<()> {
    if let Some(token) = store.backend().get(AUTH_KEY) {
        if let Some((username, password)) = decode_credentials(&token) {
            if validate_user(&config.users, &username, &password) {
                println!("Logged in as {username}.");
                return Ok(());
            }
        }
        // Stale or revoked token.
        store.backend().remove(AUTH_KEY)?;
    }

    loop {
        let username = prompt(input, "Username: ").await?;
        let password = prompt(input, "Password: ").await?;
        if validate_user(&config.users, &username, &password) {
            store
                .backend()
                .set(AUTH_KEY, &encode_credentials(&username, &password))?;
            println!("Welcome, {username}.");
            return Ok(());
        }
        println!("Invalid credentials, try again.");
    }
}

async fn repl(app: &App, input: &mut Input) -> Result<()> {
    let mut current_chat = match app.chats().first() {
        Some(chat) => chat.id.clone(),
        None => {
            let agent_id = app.config().agents[0].id.clone();
            app.create_chat(&agent_id)?.id
        }
    };
    let mut pending_attachments: Vec<Attachment> = Vec::new();
    let mut pending_previews: Vec<String> = Vec::new();

    println!("Type a message, or /help for commands.");
    loop {
        let line = prompt(input, "> ").await?;
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line.as_str(), "")) {
            ("/quit", _) | ("/exit", _) => return Ok(()),
            ("/help", _) => print_help(),
            ("/agents", _) => {
                for agent in &app.config().agents {
                    println!("  {}  {}", agent.id, agent.name);
                }
            }
            ("/chats", _) => {
                for (index, chat) in app.chats().iter().enumerate() {
                    let marker = if chat.id == current_chat { "*" } else { " " };
                    println!(
                        "{marker} {index}: {} ({} messages)",
                        chat.name,
                        chat.messages.len()
                    );
                }
            }
            ("/new", agent) => {
                let agent_id = if agent.is_empty() {
                    app.config().agents[0].id.clone()
                } else {
                    agent.trim().to_string()
                };
                match app.config().agent_by_id(&agent_id) {
                    Some(_) => {
                        current_chat = app.create_chat(&agent_id)?.id;
                        println!("Started a new chat.");
                    }
                    None => println!("No such agent '{agent_id}'; see /agents."),
                }
            }
            ("/open", index) => match pick_chat(app, index) {
                Some(chat) => {
                    for message in &chat.messages {
                        println!("[{:?}] {}", message.role, message.content);
                    }
                    current_chat = chat.id;
                }
                None => println!("No such chat; see /chats."),
            },
            ("/delete", index) => match pick_chat(app, index) {
                Some(chat) => {
                    app.delete_chat(&chat.id)?;
                    if chat.id == current_chat {
                        current_chat = match app.chats().first() {
                            Some(next) => next.id.clone(),
                            None => app.create_chat(&chat.agent_id)?.id,
                        };
                    }
                    println!("Deleted '{}'.", chat.name);
                }
                None => println!("No such chat; see /chats."),
            },
            ("/file", path) if !path.is_empty() => {
                match load_attachment(Path::new(path.trim())) {
                    Ok(attachment) => {
                        println!(
                            "Attached {} ({} bytes); it goes with your next message.",
                            attachment.file_name,
                            attachment.bytes.len()
                        );
                        if attachment.mime_type.starts_with("image/") {
                            pending_previews.push(format!(
                                "data:{};base64,{}",
                                attachment.mime_type,
                                STANDARD.encode(&attachment.bytes)
                            ));
                        }
                        pending_attachments.push(attachment);
                    }
                    Err(error) => println!("Cannot attach: {error}"),
                }
            }
            ("/file", _) => println!("Usage: /file <path>"),
            ("/logout", _) => {
                app.store().backend().remove(AUTH_KEY)?;
                println!("Logged out.");
                return Ok(());
            }
            _ => {
                let attachments = std::mem::take(&mut pending_attachments);
                let previews = std::mem::take(&mut pending_previews);
                let previews = (!previews.is_empty()).then_some(previews);
                run_send(app, &current_chat, &line, attachments, previews).await;
            }
        }
    }
}

/// One send with live streaming output. While nothing has streamed yet a
/// phrase ticker occupies the status line; the first fragment replaces it.
async fn run_send(
    app: &App,
    chat_id: &str,
    text: &str,
    attachments: Vec<Attachment>,
    previews: Option<Vec<String>>,
) {
    let streaming = Arc::new(AtomicBool::new(false));
    let settled = Arc::new(AtomicBool::new(false));
    let ticker = tokio::spawn(phrase_ticker(
        app.wait_state(),
        Arc::clone(&streaming),
        Arc::clone(&settled),
    ));

    let streaming_cb = Arc::clone(&streaming);
    let mut on_fragment = move |fragment: &str| {
        if !streaming_cb.swap(true, Ordering::SeqCst) {
            print!("\r\x1b[2K");
        }
        print!("{fragment}");
        let _ = std::io::stdout().flush();
    };

    let result = app
        .send_message(chat_id, text, attachments, previews, &mut on_fragment)
        .await;
    settled.store(true, Ordering::SeqCst);
    let _ = ticker.await;

    match result {
        Ok(outcome) => {
            if streaming.load(Ordering::SeqCst) {
                println!();
            } else {
                println!("\r\x1b[2K{}", outcome.text);
            }
            if outcome.long_wait_reached {
                notifier().notify(COMPLETION_TITLE, &preview(&outcome.text));
            }
        }
        Err(error) => println!("\r\x1b[2KRequest failed: {error}"),
    }
}

async fn phrase_ticker(
    wait_rx: watch::Receiver<WaitState>,
    streaming: Arc<AtomicBool>,
    settled: Arc<AtomicBool>,
) {
    let mut interval = tokio::time::interval(PHRASE_CADENCE);
    let mut tick = 0usize;
    loop {
        interval.tick().await;
        if settled.load(Ordering::SeqCst) || streaming.load(Ordering::SeqCst) {
            return;
        }
        let phrase = wait_phrase(*wait_rx.borrow(), tick);
        print!("\r\x1b[2K{phrase}...");
        let _ = std::io::stdout().flush();
        tick += 1;
    }
}

fn pick_chat(app: &App, index: &str) -> Option<hookchat::types::Chat> {
    let index: usize = index.trim().parse().ok()?;
    app.chats().into_iter().nth(index)
}

fn load_attachment(path: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read '{}'", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let mime_type = match path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
    .to_string();
    Ok(Attachment {
        file_name,
        mime_type,
        bytes,
    })
}

fn notifier() -> Box<dyn Notifier> {
    #[cfg(feature = "desktop-notifications")]
    {
        Box::new(hookchat::notify::DesktopNotifier)
    }
    #[cfg(not(feature = "desktop-notifications"))]
    {
        Box::new(hookchat::notify::LogNotifier)
    }
}

async fn prompt(input: &mut Input, label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let line = input
        .next_line()
        .await?
        .context("stdin closed")?;
    Ok(line.trim().to_string())
}

fn print_help() {
    println!("  /agents        list configured agents");
    println!("  /new [agent]   start a chat (defaults to the first agent)");
    println!("  /chats         list chats, newest first");
    println!("  /open <n>      switch to chat n and print its transcript");
    println!("  /delete <n>    delete chat n");
    println!("  /file <path>   attach a file to your next message");
    println!("  /logout        forget the stored login and exit");
    println!("  /quit          exit");
}
