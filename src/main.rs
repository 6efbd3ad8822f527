mod config;
mod display;
mod events;
mod fetch;
mod gh_client;
mod merger;
mod monitor;
mod reviewers;
mod seen;
mod store;
#[cfg(test)]
mod test_utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::bail;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError, error::TryRecvError},
};

use display::Screen;
use events::{EventNotifier, Notification};
use ghmon_core::PullRequestId;
use gh_client::GithubClient;
use monitor::Monitor;

const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(
        alias = "w",
        about = "refreshes periodically and reads commands from stdin; aliased to 'w'"
    )]
    Watch {},
    #[clap(alias = "f", about = "runs one refresh and prints the lists; aliased to 'f'")]
    Once {},
    #[clap(alias = "p", about = "forgets pull requests that are gone; aliased to 'p'")]
    Purge {},
    #[clap(about = "marks a pull request as seen")]
    Seen {
        id: u64,
        #[arg(long, default_value_t = false, help = "mark as unseen instead")]
        unseen: bool,
    },
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(
        short,
        long,
        help = "path to config file, also set by GHMON_CONFIG_FILE env variable"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn drain(screen: &mut Screen, notifications: &mut broadcast::Receiver<Notification>) {
    loop {
        match notifications.try_recv() {
            Ok(notification) => {
                screen.apply(notification);
            }
            Err(TryRecvError::Lagged(skipped)) => {
                log::warn!("Skipped {skipped} notifications");
            }
            Err(_) => break,
        }
    }
}

/// Whether the drained notifications carry an update for `id`.
fn was_updated(
    notifications: &mut broadcast::Receiver<Notification>,
    id: PullRequestId,
) -> bool {
    let mut updated = false;
    loop {
        match notifications.try_recv() {
            Ok(Notification::ItemUpdated(wrapper)) if wrapper.id == id => updated = true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    updated
}

const WATCH_HELP: &str = "commands: r (refresh), p (purge), s <id> (select), u <id> (unseen), q (quit)";

async fn watch(
    mut monitor: Monitor,
    config: &config::Config,
    mut notifications: broadcast::Receiver<Notification>,
) -> anyhow::Result<()> {
    let mut screen = Screen::default();
    let mut seen_timer = monitor.seen_timer(config.seen_delay());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    monitor.spawn_refresh_loop(config.refresh_interval());
    eprintln!("{WATCH_HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let mut words = line.split_whitespace();
                let command = words.next();
                let id = words.next().map(str::parse::<u64>);

                match (command, id) {
                    (None, _) => {}
                    (Some("q"), _) => break,
                    (Some("r"), _) => monitor.request_refresh(),
                    (Some("p"), _) => monitor.purge().await,
                    (Some("s"), Some(Ok(id))) => {
                        seen_timer.select(id);
                        println!("Selected {id}");
                    }
                    (Some("u"), Some(Ok(id))) => {
                        seen_timer.cancel();
                        monitor.mark_seen(id, false).await;
                    }
                    (Some("s" | "u"), Some(Err(e))) => eprintln!(">> ERROR: Invalid id: {e}"),
                    _ => eprintln!(">> ERROR: Unknown command {line:?}, {WATCH_HELP}"),
                }
            }
            notification = notifications.recv() => match notification {
                Ok(Notification::StatusMessage(status)) => {
                    println!("> {status}");
                    screen.apply(Notification::StatusMessage(status));
                }
                Ok(notification) => {
                    if screen.apply(notification) {
                        println!("{}", screen.render());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Skipped {skipped} notifications");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(seen_timer);
    monitor.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .env()
        .init()?;

    let args = Args::parse();
    let config = config::load_config(args.config)?;

    let api = Arc::new(GithubClient::new().await?);
    let user = gh_client::current_user(api.as_ref()).await?;
    log::info!("Monitoring pull requests for {}", user.username);

    let notifier = EventNotifier::new(NOTIFICATION_CAPACITY);
    let mut notifications = notifier.subscribe();
    let monitor = Monitor::start(api, user, &config, notifier).await?;

    match args.command {
        Command::Watch {} => watch(monitor, &config, notifications).await?,
        Command::Once {} => {
            monitor.refresh_once().await;
            monitor.shutdown().await;

            let mut screen = Screen::default();
            drain(&mut screen, &mut notifications);
            println!("{}", screen.render());
        }
        Command::Purge {} => {
            monitor.purge().await;
            monitor.shutdown().await;
        }
        Command::Seen { id, unseen } => {
            monitor.mark_seen(id, !unseen).await;
            monitor.shutdown().await;

            if !was_updated(&mut notifications, id) {
                bail!("No pull request with id {id} is known, run a refresh first");
            }
            let state = if unseen { "unseen" } else { "seen" };
            println!("Marked {id} as {state}");
        }
    };

    Ok(())
}
