mod input;
mod render;
mod telemetry;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_live_sync::config::DEFAULT_BASE_URL;
use chat_live_sync::{
    AttachmentSelection, ChatApiClient, ChatEvent, ChatHandle, ChatSyncClient, Draft, Invitee,
    LocalAttachment, SyncConfig,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::input::{Input, HELP};
use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "chat-tail",
    author,
    version,
    about = "Follow a chat room from the terminal"
)]
struct Cli {
    #[arg(long, env = "CHAT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long = "room", env = "CHAT_ROOM_ID")]
    room_id: u64,

    /// Your username in the room; used to tell your messages apart.
    #[arg(long, env = "CHAT_USERNAME", value_parser = non_blank)]
    username: String,

    #[arg(long, env = "CHAT_SESSION_COOKIE", hide_env_values = true)]
    session_cookie: Option<String>,

    #[arg(long, env = "CHAT_CSRF_TOKEN", hide_env_values = true)]
    csrf_token: Option<String>,

    #[arg(long, env = "CHAT_POLL_INTERVAL_MS", default_value_t = 3000)]
    poll_interval_ms: u64,

    /// Seconds between socket reconnect attempts while polling (0 disables).
    #[arg(long, env = "CHAT_RECONNECT_INTERVAL_SECS", default_value_t = 10)]
    reconnect_interval_secs: u64,

    #[arg(long, value_enum, env = "CHAT_LOG_LEVEL", default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Write logs here instead of stderr.
    #[arg(long, env = "CHAT_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invite someone to the room and exit.
    Invite {
        #[arg(long, conflicts_with = "user_id", required_unless_present = "user_id")]
        username: Option<String>,
        #[arg(long)]
        user_id: Option<u64>,
    },
    /// Accept a pending invite and exit.
    Accept { invite_id: u64 },
    /// Decline a pending invite and exit.
    Decline { invite_id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("failed to initialise logging")?;

    let config = build_config(&cli)?;
    match cli.command {
        Some(command) => run_once(&config, command).await,
        None => tail(config).await,
    }
}

fn non_blank(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        Err("must not be empty".into())
    } else {
        Ok(value.to_string())
    }
}

fn build_config(cli: &Cli) -> Result<SyncConfig> {
    let mut builder = SyncConfig::builder(cli.base_url.clone(), cli.room_id)
        .username(cli.username.clone())
        .poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .reconnect_interval(Duration::from_secs(cli.reconnect_interval_secs));
    if let Some(cookie) = &cli.session_cookie {
        builder = builder.session_cookie(cookie.clone());
    }
    if let Some(token) = &cli.csrf_token {
        builder = builder.csrf_token(token.clone());
    }
    builder.build().context("invalid chat configuration")
}

async fn run_once(config: &SyncConfig, command: Command) -> Result<()> {
    let api = ChatApiClient::new(config).context("failed to build api client")?;
    match command {
        Command::Invite { username, user_id } => {
            let invitee = match (username, user_id) {
                (_, Some(id)) => Invitee::UserId(id),
                (Some(name), None) => Invitee::Username(name),
                (None, None) => anyhow::bail!("either --username or --user-id is required"),
            };
            let receipt = api.invite(invitee).await.context("invite failed")?;
            match (receipt.created, receipt.invite_id) {
                (true, Some(id)) => println!("invite #{id} sent"),
                (false, Some(id)) => println!("invite #{id} already pending"),
                _ => println!("invite sent"),
            }
        }
        Command::Accept { invite_id } => {
            api.accept_invite(invite_id)
                .await
                .with_context(|| format!("failed to accept invite #{invite_id}"))?;
            println!("invite #{invite_id} accepted");
        }
        Command::Decline { invite_id } => {
            api.decline_invite(invite_id)
                .await
                .with_context(|| format!("failed to decline invite #{invite_id}"))?;
            println!("invite #{invite_id} declined");
        }
    }
    Ok(())
}

async fn tail(config: SyncConfig) -> Result<()> {
    let api = ChatApiClient::new(&config).context("failed to build api client")?;
    let handle = ChatSyncClient::spawn(config).context("failed to start chat client")?;
    let mut events = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut selection = AttachmentSelection::new();

    eprintln!("type /help for commands");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match input::parse(&line) {
                    Ok(Input::Quit) => break,
                    Ok(command) => {
                        if let Err(err) = dispatch(&handle, &api, &mut selection, command).await {
                            eprintln!("!! {err:#}");
                        }
                    }
                    Err(usage) => eprintln!("{usage}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&handle, event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "chat.tail", skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = handle.shutdown();
    Ok(())
}

async fn dispatch(
    handle: &ChatHandle,
    api: &ChatApiClient,
    selection: &mut AttachmentSelection,
    command: Input,
) -> Result<()> {
    match command {
        Input::Send(text) => {
            handle.submit(Draft::text(text).with_attachments(selection.take()))?;
        }
        Input::Reply(id) => handle.reply(id)?,
        Input::CancelReply => handle.cancel_reply()?,
        Input::Delete(id) => handle.delete(id)?,
        Input::Attach(path) => {
            let file = LocalAttachment::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            for rejection in selection.add(vec![file]) {
                eprintln!("!! {rejection}");
            }
            if let Some(summary) = selection.summary() {
                eprintln!("-- attached: {summary}");
            }
        }
        Input::Detach => {
            selection.take();
        }
        Input::Scroll(px) => handle.scrolled(px)?,
        Input::Bottom => handle.jump_to_bottom()?,
        Input::Dismiss => handle.dismiss_banner()?,
        Input::Invite(username) => {
            let receipt = api.invite(Invitee::Username(username.clone())).await?;
            if receipt.created {
                eprintln!("-- invited {username}");
            } else {
                eprintln!("-- {username} already has a pending invite");
            }
        }
        Input::Accept(id) => {
            api.accept_invite(id).await?;
            eprintln!("-- invite #{id} accepted");
        }
        Input::Decline(id) => {
            api.decline_invite(id).await?;
            eprintln!("-- invite #{id} declined");
        }
        Input::Help => eprintln!("{HELP}"),
        Input::Quit | Input::Empty => {}
    }
    Ok(())
}

fn print_event(handle: &ChatHandle, event: ChatEvent) {
    match event {
        ChatEvent::Inserted {
            message, pending, ..
        } => println!("{}", render::message_line(&message, pending)),
        ChatEvent::Reconciled { id: Some(id), .. } => println!("{}", render::delivered_line(id)),
        ChatEvent::Reconciled { id: None, .. } => {}
        ChatEvent::Refreshed { id } => {
            let snapshot = handle.snapshot();
            if let Some(entry) = snapshot.entries.iter().find(|entry| entry.id() == Some(id)) {
                println!("{}  (edited)", render::message_line(&entry.message, entry.pending));
            }
        }
        ChatEvent::Removed { id } => println!("-- #{id} was deleted"),
        ChatEvent::EchoDropped { client_id } => {
            debug!(target: "chat.tail", %client_id, "echo withdrawn, resending over http");
        }
        ChatEvent::ScrollToBottom => {}
        ChatEvent::UnseenChanged(count) => {
            if let Some(line) = render::unseen_line(count) {
                eprintln!("{line}");
            }
        }
        ChatEvent::ConnectionChanged(state) => eprintln!("{}", render::connection_line(state)),
        ChatEvent::Typing(Some(label)) => eprintln!("   {label}"),
        ChatEvent::Typing(None) => {}
        ChatEvent::ComposeError(error) => eprintln!("!! {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn username_must_not_be_blank() {
        let err = Cli::try_parse_from(["chat-tail", "--room", "3", "--username", "  "])
            .expect_err("blank username");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["chat-tail", "--room", "3", "--username", " ola "])
            .expect("cli");
        assert_eq!(cli.username, "ola");
        assert_eq!(build_config(&cli).expect("config").username, "ola");
    }
}
