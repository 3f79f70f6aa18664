use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use vmt_session::config::SessionConfig;
use vmt_session::model::{MemberRef, Room, SYSTEM_USERNAME};
use vmt_session::persistence::{HttpPersistence, PersistenceError};
use vmt_session::runtime::{SessionCommand, run_session};
use vmt_session::session::{Session, SessionError, SessionOptions, SessionUpdate};
use vmt_session::transport::TransportError;
use vmt_session::transport::ws::{WsTransport, ws_url};

const INBOUND_QUEUE_CAPACITY: usize = 256;
const COMMAND_QUEUE_CAPACITY: usize = 32;
const UPDATE_QUEUE_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("session failed: {0}")]
    Session(#[from] SessionError),
}

#[derive(Parser, Debug)]
#[command(name = "vmt-session", about = "Join a VMT room from the terminal")]
struct Cli {
    #[arg(long, env = "VMT_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "VMT_SESSION_TOKEN")]
    session_token: Option<String>,

    #[arg(long)]
    room_id: String,

    #[arg(long, env = "VMT_USER_ID")]
    user_id: String,

    #[arg(long, env = "VMT_USERNAME")]
    username: String,

    /// Site administrator.
    #[arg(long)]
    admin: bool,

    /// Observe in admin mode (no join, no control).
    #[arg(long)]
    admin_mode: bool,

    /// Temporary room: skip the join handshake.
    #[arg(long)]
    temp: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let persistence = Arc::new(HttpPersistence::new(&cli.base_url, cli.session_token.as_deref())?);
    let room = persistence.fetch_room(&cli.room_id).await?;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
    let transport = Arc::new(WsTransport::connect(&ws_url(&cli.base_url)?, inbound_tx).await?);

    let options = SessionOptions {
        user: MemberRef::new(cli.user_id, cli.username),
        is_admin: cli.admin,
        in_admin_mode: cli.admin_mode,
        temp: cli.temp,
        // No capture surface in a terminal.
        snapshots: false,
        last_message: None,
    };
    let session = Session::new(room, options, transport.clone(), SessionConfig::from_env())?;

    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (updates_tx, mut updates_rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
    let mut driver = tokio::spawn(run_session(
        session,
        inbound_rx,
        commands_rx,
        updates_tx,
        persistence.clone(),
        None,
    ));

    tokio::spawn(async move {
        while let Some(update) = updates_rx.recv().await {
            print_update(&update);
        }
    });

    let persistence = &persistence;
    let room_id = cli.room_id.as_str();
    let reload = move || async move {
        match persistence.fetch_room(room_id).await {
            Ok(room) => Some(room),
            Err(e) => {
                tracing::warn!(error = %e, %room_id, "room reload failed");
                None
            }
        }
    };
    let stdin = BufReader::new(tokio::io::stdin());
    let finished = pump_input(stdin, &commands_tx, &mut driver, reload).await;
    drop(commands_tx);

    let result = match finished {
        Some(result) => result,
        None => driver.await,
    };
    match result {
        Ok(session) => {
            tracing::info!(room_id = %session.room_id(), entries = session.log().len(), "left room");
        }
        Err(e) => tracing::warn!(error = %e, "session driver failed"),
    }
    transport.flush(CLOSE_GRACE).await;
    Ok(())
}

/// One line of terminal input.
#[derive(Debug)]
enum Input {
    Command(SessionCommand),
    /// Fetch the room again and reset the replica.
    Reload,
}

fn parse_input(line: &str) -> Option<Input> {
    if line.is_empty() {
        return None;
    }
    let command = match line.split_once(' ') {
        Some(("/tab", tab_id)) => SessionCommand::ChangeTab(tab_id.trim().to_owned()),
        _ => match line {
            "/control" => SessionCommand::ToggleControl,
            "/quit" => SessionCommand::Leave,
            "/reload" => return Some(Input::Reload),
            _ => SessionCommand::SendMessage { text: line.to_owned(), reference: None },
        },
    };
    Some(Input::Command(command))
}

/// Forward input lines to the driver until the member quits, input ends, or
/// the driver stops on its own (failed join, admin mode flip). Returns the
/// driver's result when it stopped first.
async fn pump_input<R, T, F, Fut>(
    reader: R,
    commands: &mpsc::Sender<SessionCommand>,
    driver: &mut JoinHandle<T>,
    mut reload: F,
) -> Option<Result<T, JoinError>>
where
    R: AsyncBufRead + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<Room>>,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            result = &mut *driver => return Some(result),
            line = lines.next_line() => line,
        };
        let Ok(Some(line)) = line else { return None };
        let command = match parse_input(line.trim()) {
            Some(Input::Command(command)) => command,
            Some(Input::Reload) => match reload().await {
                Some(room) => SessionCommand::ResetRoom(Box::new(room)),
                None => continue,
            },
            None => continue,
        };
        let leaving = matches!(command, SessionCommand::Leave);
        if commands.send(command).await.is_err() || leaving {
            return None;
        }
    }
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::LogAppended(event) if event.user.username == SYSTEM_USERNAME => println!("* {}", event.text),
        SessionUpdate::LogAppended(event) => println!("<{}> {}", event.user.username, event.text),
        SessionUpdate::Notice(notice) => println!("! {notice}"),
        SessionUpdate::ControlChanged(Some(holder)) => println!("# control: {holder}"),
        SessionUpdate::ControlChanged(None) => println!("# control: nobody"),
        SessionUpdate::StatusChanged(status) => println!("# connection: {status:?}"),
        SessionUpdate::MembersChanged(members) => {
            let names: Vec<&str> = members.iter().map(|m| m.username.as_str()).collect();
            println!("# in room: {}", names.join(", "));
        }
        SessionUpdate::TabAdded(tab) => println!("# new tab: {} ({})", tab.name, tab.id),
        SessionUpdate::NavigateAway => println!("# session ended"),
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
