use std::{fs::OpenOptions, sync::Arc, sync::Mutex};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    ChatSession, CoreUpdate, HttpPlatformApi, StoreMutation, StreamEvent, SyncClient, ViewKind,
    REPLY_AUTHOR_DISPLAY_CAP,
};
use shared::domain::{ConversationId, Message, Presence, Ts, UserId};
use storage::SnapshotStore;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod reconnect;

use commands::{Command, USAGE};
use config::{load_settings, Args, Settings};
use reconnect::{spawn_reconnect, RECONNECT_DELAY};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    init_tracing(&settings)?;
    run(settings).await
}

fn init_tracing(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .with_context(|| format!("invalid log filter '{}'", settings.log_filter))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &settings.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file '{}'", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    let api = HttpPlatformApi::new(&settings.api_url, settings.credentials())
        .context("invalid API url")?;
    let (client, mut updates) = SyncClient::new(Arc::new(api));

    let self_user = client
        .authenticate()
        .await
        .context("authentication failed")?;
    let mut live = client
        .connect_live(settings.live_config())
        .await
        .context("failed to open live connection")?;

    let mut session = ChatSession::new(Arc::clone(&client)).with_self_user(self_user);
    session.subscribe(|mutation| debug!(?mutation, "terminal: mutation"));

    let snapshot = open_snapshot(&settings.snapshot_url).await;
    if let Some(store) = &snapshot {
        seed_from_snapshot(store, &client, &mut session).await;
    }

    match client.load_conversations().await {
        Ok(conversations) => {
            let mutations = session.apply(CoreUpdate::ConversationsLoaded(conversations));
            print_mutations(&session, &mutations);
        }
        Err(err) => warn!(error = %err, "terminal: conversation directory unavailable"),
    }
    if let Some(store) = &snapshot {
        save_snapshot(store, &session).await;
    }

    let conversation_id = match &settings.conversation {
        Some(id) => ConversationId::from(id.as_str()),
        None => match session.first_member_conversation() {
            Some(id) => id.clone(),
            None => bail!("no conversation to open; pass --conversation <id>"),
        },
    };
    let mutations = session.open_conversation(conversation_id);
    print_mutations(&session, &mutations);
    println!("{USAGE}");

    let (reconnected_tx, mut reconnected) = mpsc::unbounded_channel();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                let closed = matches!(update, CoreUpdate::Live(StreamEvent::Closed(_)));
                let mutations = session.apply(update);
                print_mutations(&session, &mutations);
                if closed {
                    spawn_reconnect(
                        Arc::clone(&client),
                        settings.live_config(),
                        RECONNECT_DELAY,
                        reconnected_tx.clone(),
                    );
                }
            }
            Some(stream) = reconnected.recv() => {
                std::mem::replace(&mut live, stream).shutdown().await;
                // Events missed while disconnected are only recovered by reloading.
                if let Some(conversation_id) = session.current_conversation().cloned() {
                    let mutations = session.open_conversation(conversation_id);
                    print_mutations(&session, &mutations);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else { break };
                if !handle_line(&mut session, &line) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    live.shutdown().await;
    if let Some(store) = &snapshot {
        save_snapshot(store, &session).await;
    }
    info!("terminal: bye");
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_line(session: &mut ChatSession, line: &str) -> bool {
    let command = match Command::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(usage) => {
            println!("{usage}");
            return true;
        }
    };

    let result = match command {
        Command::Quit => return false,
        Command::Say(text) if session.current_thread().is_some() => session.reply_in_thread(text),
        Command::Say(text) => session.send_message(text),
        Command::Thread(root_id) => session
            .open_thread(root_id)
            .map(|mutations| print_mutations(session, &mutations)),
        Command::Close => {
            let mutations = session.close_thread();
            print_mutations(session, &mutations);
            Ok(())
        }
        Command::Toggle(message_id) => {
            if session.toggle_collapse(&message_id).is_none() {
                println!("no thread root {message_id} in this conversation");
            } else {
                print_visible(session);
            }
            Ok(())
        }
        Command::React { message_id, name } => session.add_reaction(message_id, name),
        Command::Unreact { message_id, name } => session.remove_reaction(message_id, name),
        Command::Edit { message_id, text } => session.edit_message(message_id, text),
        Command::Delete(message_id) => session.delete_message(message_id),
        Command::Read => session
            .mark_read()
            .map(|mutations| print_mutations(session, &mutations)),
        Command::Open(conversation_id) => {
            let mutations = session.open_conversation(conversation_id);
            print_mutations(session, &mutations);
            Ok(())
        }
    };
    if let Err(err) = result {
        println!("error: {err}");
    }
    true
}

async fn open_snapshot(url: &str) -> Option<SnapshotStore> {
    match SnapshotStore::new(url).await {
        Ok(store) => Some(store),
        Err(err) => {
            warn!(error = %err, url, "terminal: snapshot disabled");
            None
        }
    }
}

async fn seed_from_snapshot(store: &SnapshotStore, client: &SyncClient, session: &mut ChatSession) {
    match store.load_conversations().await {
        Ok(conversations) => {
            info!(count = conversations.len(), "terminal: seeded conversations from snapshot");
            session.seed_conversations(conversations);
        }
        Err(err) => warn!(error = %err, "terminal: snapshot conversations unreadable"),
    }
    match store.load_users().await {
        Ok(users) => {
            client.users().seed(users.iter().cloned()).await;
            session.seed_names(users);
        }
        Err(err) => warn!(error = %err, "terminal: snapshot users unreadable"),
    }
}

async fn save_snapshot(store: &SnapshotStore, session: &ChatSession) {
    if let Err(err) = store
        .save_conversations(&session.conversation_snapshot())
        .await
    {
        warn!(error = %err, "terminal: failed to save conversations");
    }
    if let Err(err) = store.save_users(session.known_names()).await {
        warn!(error = %err, "terminal: failed to save users");
    }
}

fn print_mutations(session: &ChatSession, mutations: &[StoreMutation]) {
    for mutation in mutations {
        if let Some(line) = describe(session, mutation) {
            println!("{line}");
        }
    }
}

fn print_visible(session: &ChatSession) {
    for message in session.visible_messages() {
        println!("{}", message_line(session, message, true));
    }
}

fn describe(session: &ChatSession, mutation: &StoreMutation) -> Option<String> {
    match mutation {
        StoreMutation::ConversationOpened { conversation_id } => {
            Some(format!("== {}", conversation_label(session, conversation_id)))
        }
        StoreMutation::HistoryMerged { view: ViewKind::Conversation, .. } => {
            print_visible(session);
            None
        }
        StoreMutation::HistoryMerged { view: ViewKind::Thread, .. } => {
            for message in session.thread_messages() {
                println!("{}", message_line(session, message, false));
            }
            None
        }
        StoreMutation::ThreadOpened { root_id } => {
            Some(format!("-- thread {root_id}; plain lines reply here, /close to leave"))
        }
        StoreMutation::ThreadClosed => Some("-- thread closed".to_string()),
        StoreMutation::Inserted { view, message_id } => {
            let message = find_message(session, *view, message_id)?;
            match session.main_store() {
                Some(store) if *view == ViewKind::Conversation && !store.is_visible(message) => {
                    let root = &message.thread_root_id;
                    Some(format!(
                        "[{root}] new reply ({} in thread)",
                        store.thread_reply_count(root)
                    ))
                }
                _ => Some(message_line(session, message, *view == ViewKind::Conversation)),
            }
        }
        StoreMutation::Edited { view, message_id } => {
            let message = find_message(session, *view, message_id)?;
            Some(message_line(session, message, false))
        }
        StoreMutation::Deleted { message_id, .. } => Some(format!("[{message_id}] deleted")),
        StoreMutation::ReactionsChanged { view, message_id } => {
            let message = find_message(session, *view, message_id)?;
            Some(format!("[{message_id}] reactions:{}", reactions(message)))
        }
        StoreMutation::CollapseToggled { .. } | StoreMutation::UserResolved { .. } => None,
        StoreMutation::ReadStateChanged { conversation_id, unread } => Some(format!(
            "{} {}",
            conversation_label(session, conversation_id),
            if *unread { "has unread messages" } else { "is read" }
        )),
        StoreMutation::MembershipChanged {
            conversation_id,
            user_id,
            joined,
        } => Some(format!(
            "{} {} {}",
            user_label(session, user_id),
            if *joined { "joined" } else { "left" },
            conversation_label(session, conversation_id)
        )),
        StoreMutation::PresenceChanged { user_id, presence } => Some(format!(
            "{} is {}",
            user_label(session, user_id),
            match presence {
                Presence::Active => "active",
                Presence::Away => "away",
                Presence::Unknown => "unknown",
            }
        )),
        StoreMutation::ConversationsLoaded { count } => Some(format!("{count} conversations")),
        StoreMutation::LiveClosed { reason } => {
            Some(format!("live connection lost ({reason}); reconnecting"))
        }
        StoreMutation::Failure { operation, error } => {
            Some(format!("error: {operation} failed: {error}"))
        }
    }
}

fn find_message<'a>(session: &'a ChatSession, view: ViewKind, message_id: &Ts) -> Option<&'a Message> {
    match view {
        ViewKind::Conversation => session.main_store()?.get(message_id),
        ViewKind::Thread => session
            .thread_messages()
            .iter()
            .find(|message| &message.id == message_id),
    }
}

fn conversation_label(session: &ChatSession, conversation_id: &ConversationId) -> String {
    match session.conversation(conversation_id) {
        Some(conversation) if conversation.is_direct() => format!("@{}", conversation.display_name),
        Some(conversation) => format!("#{}", conversation.display_name),
        None => conversation_id.to_string(),
    }
}

fn user_label<'a>(session: &'a ChatSession, user_id: &'a UserId) -> &'a str {
    session.display_name(user_id).unwrap_or(user_id.as_str())
}

fn reactions(message: &Message) -> String {
    message
        .reactions
        .iter()
        .map(|(name, users)| format!(" :{name}: {}", users.len()))
        .collect()
}

fn message_line(session: &ChatSession, message: &Message, with_thread_summary: bool) -> String {
    let author = message
        .author_id
        .as_ref()
        .map_or("unknown", |user_id| user_label(session, user_id));
    let time = message
        .id
        .to_datetime()
        .map(|at| at.format("%H:%M").to_string())
        .unwrap_or_default();
    let indent = if message.is_reply() { "    " } else { "" };

    let mut line = format!("{indent}[{}] {time} {author}: {}", message.id, message.body);
    if message.edited {
        line.push_str(" (edited)");
    }
    if !message.attachments.is_empty() {
        line.push_str(&format!(" [{} attachment(s)]", message.attachments.len()));
    }
    if !message.reactions.is_empty() {
        line.push_str(&format!(" {{{} }}", reactions(message)));
    }

    if with_thread_summary && message.is_thread_root() {
        let (loaded, authors) = session
            .main_store()
            .map(|store| {
                (
                    store.thread_reply_count(&message.id),
                    store.distinct_reply_authors(&message.id, REPLY_AUTHOR_DISPLAY_CAP),
                )
            })
            .unwrap_or_default();
        let count = loaded.max(message.reply_count as usize);
        if count > 0 {
            let names: Vec<&str> = authors
                .iter()
                .map(|user_id| user_label(session, user_id))
                .collect();
            let state = if message.is_collapsed { "+" } else { "-" };
            line.push_str(&format!("\n    {state} {count} replies from {}", names.join(", ")));
        }
    }
    line
}
