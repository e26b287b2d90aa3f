use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};

use jukebot::{
    backend::{soundcloud::SoundCloud, spotify::Spotify, youtube::YouTube, Backend},
    cache::Caches,
    command::{CommandContext, Outcome},
    config::Config,
    player::Player,
    resolver::Resolver,
    supervisor::Supervisor,
    voice::{ChannelId, Loopback},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Step of the relative volume commands, in percentage points.
const VOLUME_STEP: f64 = 10.0;

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Keep this file private when it holds backend credentials.
    ///
    /// [default: built-in defaults]
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<String>,

    /// Voice channel the console plays into
    #[arg(long, default_value_t = 1)]
    channel: u64,

    /// Cap on the simulated play time of every track, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    play_time: u64,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates. The library and the
        // binary share this module path.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Sets up every backend that has the configuration it needs.
fn backends(config: &Config) -> Result<Vec<Arc<dyn Backend>>, Box<dyn Error>> {
    let mut backends: Vec<Arc<dyn Backend>> = vec![Arc::new(YouTube::new(config)?)];

    match config.soundcloud.client_id.clone() {
        Some(client_id) => backends.push(Arc::new(SoundCloud::new(config, client_id)?)),
        None => info!("no SoundCloud client id configured"),
    }

    match config.spotify.credentials() {
        Some((client_id, client_secret)) => backends.push(Arc::new(Spotify::new(
            config,
            client_id.clone(),
            client_secret.clone(),
        )?)),
        None => info!("no Spotify credentials configured"),
    }

    Ok(backends)
}

/// Commands typed on the console, all for one voice channel.
struct Console {
    channel: ChannelId,
    requester: String,
}

impl CommandContext for Console {
    fn channel(&self) -> Option<ChannelId> {
        Some(self.channel)
    }

    fn requester(&self) -> &str {
        &self.requester
    }

    fn output(&self) -> Option<String> {
        Some("console".to_owned())
    }
}

const HELP: &str = "\
play <query>   queue a search or URL
skip | stop | pause | resume
volume <0-100> | up | down
loop | loopqueue | shuffle
remove <n> | jump <n> | clear
queue | np | stats | help";

async fn dispatch(player: &Player, console: &Console, line: &str) -> Option<Outcome> {
    let (command, argument) = line
        .trim()
        .split_once(char::is_whitespace)
        .map_or((line.trim(), ""), |(command, argument)| (command, argument.trim()));

    let position = || argument.parse::<usize>().unwrap_or(0);
    let outcome = match command {
        "" => return None,
        "play" | "p" => player.play(console, argument).await,
        "skip" | "s" => player.skip(console).await,
        "stop" => player.stop(console).await,
        "pause" => player.pause(console).await,
        "resume" => player.resume(console).await,
        "volume" | "vol" => player.set_volume(console, argument).await,
        "up" => player.adjust_volume(console, VOLUME_STEP).await,
        "down" => player.adjust_volume(console, -VOLUME_STEP).await,
        "loop" => player.toggle_loop(console).await,
        "loopqueue" => player.toggle_loop_queue(console).await,
        "shuffle" => player.toggle_shuffle(console).await,
        "remove" => player.remove_song(console, position()).await,
        "jump" => player.jump_to_song(console, position()).await,
        "clear" => player.clear_queue(console).await,
        "queue" | "q" => player.show_queue(console).await,
        "np" => player.show_now_playing(console).await,
        "stats" => {
            for stats in player.resolver().caches().stats() {
                println!("{stats}");
            }
            return None;
        }
        _ => {
            println!("{HELP}");
            return None;
        }
    };

    Some(outcome)
}

/// Main application loop.
///
/// Reads commands from standard input until it closes or the user
/// interrupts the application.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };
    debug!("{config:#?}");

    let caches = Arc::new(Caches::new(&config.cache));
    let resolver = Arc::new(Resolver::new(
        backends(&config)?,
        caches,
        config.backend_timeout,
    ));

    let provider = Arc::new(Loopback::new().with_auto_finish(Duration::from_secs(args.play_time)));
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let (player, signals) = Player::new(config, resolver, provider, Some(events_tx));

    let signal_loop = tokio::spawn(player.clone().run(signals));
    let supervisor = tokio::spawn(Supervisor::new(player.clone()).run());
    let event_log = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => debug!("event: {json}"),
                Err(e) => warn!("cannot serialize event: {e}"),
            }
        }
    });

    let console = Console {
        channel: ChannelId(args.channel),
        requester: whoami(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    let result = loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                break Ok(());
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match dispatch(&player, &console, &line).await {
                        Some(Ok(reply)) => println!("{reply}"),
                        Some(Err(rejection)) => println!("{rejection}"),
                        None => {}
                    },
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                }
            }
        }
    };

    player.shutdown().await;
    supervisor.abort();
    signal_loop.abort();
    event_log.abort();

    result
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "console".to_owned())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
