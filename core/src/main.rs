/// ChatSync terminal client - main entry point
use chatsync_core::chat_types::SyncUpdate;
use chatsync_core::friends::ConversationDraft;
use chatsync_core::realtime::{RealtimeChannel, WebSocketTransport};
use chatsync_core::{Command, Config, HttpChatApi, Session, SyncController};
use colored::Colorize;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stderr, so it does not interleave with the chat view)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let token = config
        .access_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No session token: pass --token or set CHATSYNC_TOKEN"))?;

    let session = Session::new(token);
    let api = Arc::new(HttpChatApi::new(
        &config.api_base_url,
        session.clone(),
        config.request_timeout,
    ));
    let user = session
        .establish(api.as_ref())
        .await
        .map_err(|e| anyhow::anyhow!("Login failed: {}", e))?;

    let transport = Arc::new(WebSocketTransport::new(&config.realtime_url, config.connect_timeout));
    let channel = RealtimeChannel::new(transport, &config.realtime_namespace, config.connect_timeout);
    if let Err(e) = channel.connect(&session).await {
        // REST keeps working; pushes resume after /reconnect
        warn!("Realtime channel unavailable: {}", e);
    }

    info!("Signed in as {}", user.username);
    print_help();

    let (tx, rx) = mpsc::channel::<Command>(64);
    tokio::spawn(read_commands(tx));

    let controller = SyncController::new(config, session, user, api, channel);
    controller.run(rx, render).await;
    Ok(())
}

async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_command(&line) {
            Some(command) => {
                let stop = matches!(command, Command::Logout | Command::Shutdown);
                if tx.send(command).await.is_err() || stop {
                    break;
                }
            }
            None => print_help(),
        }
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if !line.starts_with('/') {
        return Some(Command::Send(line.to_string()));
    }
    let mut parts = line.splitn(2, ' ');
    let verb = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match verb {
        "/more" => Some(Command::LoadMoreConversations),
        "/open" => match rest.parse::<usize>() {
            Ok(n) if n > 0 => Some(Command::SelectIndex(n - 1)),
            _ if !rest.is_empty() => Some(Command::Select(rest.to_string())),
            _ => None,
        },
        "/friends" => Some(Command::SearchFriends(rest.to_string())),
        "/morefriends" => Some(Command::LoadMoreFriends),
        "/pick" if !rest.is_empty() => Some(Command::ToggleFriend(rest.to_string())),
        "/dm" if !rest.is_empty() => Some(Command::CreateConversation(ConversationDraft::direct(rest))),
        "/group" => Some(Command::CreateGroupWithSelected(rest.to_string())),
        "/reconnect" => Some(Command::Reconnect),
        "/logout" => Some(Command::Logout),
        "/quit" => Some(Command::Shutdown),
        _ => None,
    }
}

fn print_help() {
    println!("{}", "ChatSync".bold());
    println!("  <text>              send to the open conversation");
    println!("  /open <n|id>        open a conversation");
    println!("  /more               load more conversations");
    println!("  /friends [keyword]  search friends");
    println!("  /morefriends        next page of friends");
    println!("  /pick <userId>      select/deselect a friend");
    println!("  /dm <userId>        start a personal chat");
    println!("  /group <name>       create a group with the picked friends");
    println!("  /reconnect          reopen the realtime channel");
    println!("  /logout | /quit");
}

fn render(controller: &SyncController, update: &SyncUpdate) {
    match update {
        SyncUpdate::ConversationsChanged { has_more } => {
            println!("{}", "── Conversations ──".cyan());
            let active = controller.active().map(|c| c.id.as_str());
            for (i, c) in controller.conversations().conversations().iter().enumerate() {
                let marker = if Some(c.id.as_str()) == active { "*" } else { " " };
                println!("{}{:>3}. {} {}", marker, i + 1, c.name, format!("[{}]", c.kind).dimmed());
            }
            if *has_more {
                println!("{}", "     … /more".dimmed());
            }
        }
        SyncUpdate::ActiveConversationChanged { .. } => {
            if let Some(c) = controller.active() {
                println!("{} {} ({})", "── Open:".green(), c.name.bold(), c.kind);
            }
        }
        SyncUpdate::MessagesChanged { .. } => {
            let me = &controller.user().user_id;
            for m in controller.messages().messages().iter().rev().take(20).rev() {
                let time = m.created_at.format("%H:%M");
                let author = if &m.author_id == me {
                    m.author_display_name.blue().bold()
                } else {
                    m.author_display_name.normal()
                };
                let pending = if m.delivered { "" } else { " (sending)" };
                println!("  {} {}: {}{}", time.to_string().dimmed(), author, m.body, pending.dimmed());
            }
        }
        SyncUpdate::FriendsChanged { has_more } => {
            println!("{}", "── Friends ──".cyan());
            let selected = controller.friends().selected();
            for f in controller.friends().friends() {
                let mark = if selected.contains(&f.user_id) { "[x]" } else { "[ ]" };
                println!("  {} {} ({})", mark, f.display_name, f.user_id.dimmed());
            }
            if *has_more {
                println!("{}", "  … /morefriends".dimmed());
            }
        }
        SyncUpdate::Notice { message } => println!("{}", message.red()),
        SyncUpdate::ChannelLost => println!("{}", "Realtime connection lost".yellow()),
        SyncUpdate::ChannelRestored => println!("{}", "Realtime connection restored".green()),
        SyncUpdate::SessionEnded => println!("{}", "Logged out".yellow()),
    }
}
