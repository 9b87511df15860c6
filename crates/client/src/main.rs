//! Haven terminal client.
//!
//! ```text
//! haven-client room <room_id>
//! haven-client agent <session_id>
//! ```
//!
//! Lines typed on stdin are sent as messages. Commands:
//! `/support <id>`, `/reply <id> <text>`, `/typing on|off`,
//! `/breathe <preset> [seconds]`, `/retry`, `/quit`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use haven_client::{
    logging, AgentRouter, AgentUpdate, AuthSession, BreathingDriver, BreathingPattern,
    BreathingSession, ClientConfig, ClientError, ConnectionManager, Endpoint, HistoryClient,
    RoomRouter, RoomUpdate, SharedSession, TungsteniteTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

const USAGE: &str = "usage: haven-client <room|agent> <id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::DEFAULT_FILTER).context("failed to install logging")?;

    let mut args = std::env::args().skip(1);
    let (mode, id) = match (args.next(), args.next()) {
        (Some(mode), Some(id)) => (mode, id),
        _ => bail!(USAGE),
    };

    let config = ClientConfig::from_env().context("failed to load configuration")?;
    let token = config
        .token
        .clone()
        .context("HAVEN_TOKEN must be set to connect")?;
    let session = SharedSession::new(Some(AuthSession {
        user_id: config.user_id.clone().unwrap_or_default(),
        display_name: None,
        token,
    }));

    match mode.as_str() {
        "room" => run_room(&config, session, &id).await,
        "agent" => run_agent(&config, session, &id).await,
        other => bail!("unknown mode {other:?}; {USAGE}"),
    }
}

async fn run_room(config: &ClientConfig, session: SharedSession, room_id: &str) -> anyhow::Result<()> {
    let endpoint = Endpoint::room(config.ws_url.clone(), room_id, Arc::new(session.clone()));
    let manager = ConnectionManager::connect(config.reconnect.clone(), TungsteniteTransport, endpoint);
    let room = Arc::new(RoomRouter::attach(
        &manager,
        session.user_id().unwrap_or_default(),
        config.typing_ttl,
    ));
    info!(room_id, "Joining room");

    spawn_status_printer(&manager);
    spawn_typing_printer(room.typing().watch());
    spawn_update_printer(room.updates(), print_room_update);

    let history = HistoryClient::new(config.api_url.clone(), Arc::new(session));
    {
        let room = room.clone();
        let room_id = room_id.to_string();
        let limit = config.history_limit;
        spawn_on_connect(&manager, move || {
            let room = room.clone();
            let history = history.clone();
            let room_id = room_id.clone();
            async move {
                match history.room_messages(&room_id, limit).await {
                    Ok(page) => room.bootstrap(page.items),
                    Err(e) => warn!(error = %e.user_message(), "History bootstrap failed"),
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match parse_command(line) {
            Command::Quit => break,
            Command::Retry => {
                manager.force_reconnect();
                Ok(())
            }
            Command::Support(arg) => match arg.parse() {
                Ok(message_id) => room.toggle_support(message_id).map(|sent| {
                    if !sent {
                        println!("  already supported");
                    }
                }),
                Err(_) => {
                    println!("  usage: /support <message_id>");
                    Ok(())
                }
            },
            Command::Reply(arg) => match arg
                .split_once(' ')
                .and_then(|(id, text)| Some((id.parse::<u64>().ok()?, text)))
            {
                Some((message_id, text)) => room.reply(message_id, text),
                None => {
                    println!("  usage: /reply <message_id> <text>");
                    Ok(())
                }
            },
            Command::Typing(on) => room.set_typing(on).map(|_| ()),
            Command::Breathe(arg) => {
                start_breathing(arg);
                Ok(())
            }
            Command::Message(text) => room.send_message(text).map(|_| ()),
            Command::Unknown(cmd) => {
                println!("  unknown command {cmd}");
                Ok(())
            }
        };
        report(result);
    }

    manager.disconnect();
    Ok(())
}

async fn run_agent(config: &ClientConfig, session: SharedSession, session_id: &str) -> anyhow::Result<()> {
    let endpoint = Endpoint::agent_session(config.ws_url.clone(), session_id, Arc::new(session.clone()));
    let manager = ConnectionManager::connect(config.reconnect.clone(), TungsteniteTransport, endpoint);
    let agent = Arc::new(AgentRouter::attach(&manager, "Haven", config.typing_ttl));
    info!(session_id, "Opening agent session");

    spawn_status_printer(&manager);
    spawn_typing_printer(agent.typing().watch());
    spawn_update_printer(agent.updates(), print_agent_update);

    let history = HistoryClient::new(config.api_url.clone(), Arc::new(session));
    {
        let agent = agent.clone();
        let session_id = session_id.to_string();
        let limit = config.history_limit;
        spawn_on_connect(&manager, move || {
            let agent = agent.clone();
            let history = history.clone();
            let session_id = session_id.clone();
            async move {
                match history.agent_history(&session_id, limit).await {
                    Ok(page) => agent.bootstrap(page.items),
                    Err(e) => warn!(error = %e.user_message(), "History bootstrap failed"),
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match parse_command(line.trim()) {
            Command::Quit => break,
            Command::Retry => {
                manager.force_reconnect();
                Ok(())
            }
            Command::Typing(on) => agent.set_typing(on).map(|_| ()),
            Command::Breathe(arg) => {
                start_breathing(arg);
                Ok(())
            }
            Command::Message(text) => agent.send_message(text).map(|_| ()),
            Command::Support(_) | Command::Reply(_) | Command::Unknown(_) => {
                println!("  not available in an agent session");
                Ok(())
            }
        };
        report(result);
    }

    manager.disconnect();
    Ok(())
}

enum Command<'a> {
    Quit,
    Retry,
    Support(&'a str),
    Reply(&'a str),
    Typing(bool),
    Breathe(&'a str),
    Message(&'a str),
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Message(line);
    };
    let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let arg = arg.trim();
    match name {
        "quit" | "q" => Command::Quit,
        "retry" => Command::Retry,
        "support" => Command::Support(arg),
        "reply" => Command::Reply(arg),
        "typing" => Command::Typing(arg != "off"),
        "breathe" => Command::Breathe(arg),
        _ => Command::Unknown(name),
    }
}

fn report(result: Result<(), ClientError>) {
    match result {
        Ok(()) => {}
        Err(ClientError::EmptyMessage) => {}
        Err(e) => println!("! {}", e.user_message()),
    }
}

fn spawn_status_printer(manager: &ConnectionManager) {
    let mut rx = manager.watch();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            match snapshot.last_error() {
                Some(err) if !snapshot.is_connected() => println!("* {} ({err})", snapshot.status),
                _ => println!("* {}", snapshot.status),
            }
            if snapshot.status.needs_manual_retry() {
                println!("  type /retry to reconnect");
            }
        }
    });
}

fn spawn_typing_printer(mut rx: tokio::sync::watch::Receiver<Option<String>>) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let summary = rx.borrow_and_update().clone();
            if let Some(summary) = summary {
                println!("  ({summary})");
            }
        }
    });
}

fn spawn_update_printer<U>(mut rx: broadcast::Receiver<U>, print: fn(&U))
where
    U: Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => print(&update),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Update printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Runs `bootstrap` every time the connection (re)opens.
fn spawn_on_connect<F, Fut>(manager: &ConnectionManager, bootstrap: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut rx = manager.watch();
    tokio::spawn(async move {
        loop {
            let opened = rx.wait_for(|s| s.is_connected()).await.is_ok();
            if !opened {
                break;
            }
            bootstrap().await;
            let closed = rx.wait_for(|s| !s.is_connected()).await.is_ok();
            if !closed {
                break;
            }
        }
    });
}

fn print_room_update(update: &RoomUpdate) {
    match update {
        RoomUpdate::HistoryLoaded { count } => println!("  loaded {count} messages"),
        RoomUpdate::MessageAdded(msg) => {
            println!("[{}] {}: {}", msg.id, msg.author_name, msg.content)
        }
        RoomUpdate::Supported {
            message_id,
            support_count,
            ..
        } => println!("  [{message_id}] supported ({support_count})"),
        RoomUpdate::ReplyAdded { message_id, reply } => {
            println!("  [{message_id}] \u{21b3} {}: {}", reply.author_name, reply.content)
        }
        RoomUpdate::Joined(p) => println!("  {} joined", p.name),
        RoomUpdate::Left(p) => println!("  {} left", p.name),
        RoomUpdate::PendingRolledBack(pending) => {
            println!("! {} message(s) not delivered", pending.len())
        }
        RoomUpdate::Error(message) => println!("! {message}"),
    }
}

fn print_agent_update(update: &AgentUpdate) {
    match update {
        AgentUpdate::HistoryLoaded { count } => println!("  loaded {count} turns"),
        AgentUpdate::Turn(turn) if turn.complete => {
            println!("{:?}: {}", turn.role, turn.content)
        }
        AgentUpdate::Turn(_) => {}
        AgentUpdate::Error(message) => println!("! {message}"),
    }
}

fn start_breathing(arg: &str) {
    let mut parts = arg.split_whitespace();
    let preset = parts.next().unwrap_or("box").to_string();
    let seconds = parts.next().and_then(|s| s.parse().ok()).unwrap_or(60);
    tokio::spawn(async move {
        if let Err(e) = breathe(&preset, Duration::from_secs(seconds)).await {
            println!("! {e}");
        }
    });
}

async fn breathe(preset: &str, total: Duration) -> anyhow::Result<()> {
    let pattern = BreathingPattern::preset(preset)?;
    let driver = BreathingDriver::start(BreathingSession::new(pattern, total)?);
    let mut rx = driver.watch();
    let mut last_phase = None;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        if last_phase != Some(snapshot.phase) {
            println!("  ~ {} ({:.0}s)", snapshot.phase, snapshot.phase_remaining.as_secs_f32().ceil());
            last_phase = Some(snapshot.phase);
        }
        if snapshot.finished {
            println!("  ~ done, {} cycles", snapshot.cycles_completed);
            break;
        }
    }
    Ok(())
}
