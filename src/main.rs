use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use clientkit::{
    config::Config,
    http::Client,
    jwt,
    protocol::stomp::Frame,
    session::{Outcome, SessionChannel},
    stomp::StompConnector,
    store::FileStore,
    tokens::TokenStore,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Delay before listening again after the session was lost.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Holds the messaging endpoint and the identity provider settings.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("clientkit.toml"))]
    config: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, Subcommand)]
enum Command {
    /// Show the stored token and its claims
    Token,

    /// Obtain a new access token with the stored refresh token
    Refresh,

    /// Forget the stored tokens
    Logout,

    /// Print messages published to a topic until interrupted
    Listen {
        /// Topic path, subscribed to as `/topic<PATH>`
        path: String,
    },

    /// Send a JSON message to a destination
    Send {
        destination: String,

        /// JSON payload
        json: String,
    },
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

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

async fn show_token(tokens: &TokenStore) -> Result<(), Box<dyn Error>> {
    let Some(auth) = tokens.load().await else {
        println!("no token stored");
        return Ok(());
    };

    println!("token type:  {}", auth.token_type);
    println!("expires in:  {}s", auth.expires_in.as_secs());
    if let Some(scope) = &auth.scope {
        println!("scope:       {scope}");
    }

    match jwt::claims(&auth.access_token) {
        Ok(claims) => {
            if let Some(sub) = &claims.sub {
                println!("subject:     {sub}");
            }
            if let Some(user) = &claims.preferred_username {
                println!("user:        {user}");
            }
            if let Some(expires_at) = claims.expires_at()? {
                let state = if claims.is_expired() { "expired" } else { "valid" };
                println!("expires at:  {expires_at} ({state})");
            }
        }
        Err(e) => warn!("access token is not a JWT: {e}"),
    }

    Ok(())
}

fn print_frame(frame: &Frame) {
    let destination = frame.get(Frame::DESTINATION).unwrap_or("-");
    match frame.body_str() {
        Ok(body) => println!("{destination}: {body}"),
        Err(_) => println!("{destination}: <{} bytes>", frame.body.len()),
    }
}

/// Prints messages on `path` until Ctrl-C, listening again whenever the
/// session is lost.
async fn listen(channel: &SessionChannel<StompConnector>, path: &str) {
    loop {
        let outcome = channel
            .with_session(None, |connection| async move { connection.subscribe(path).await })
            .await;

        if let Outcome::Done(mut subscription) = outcome {
            info!("listening on {}", subscription.destination);
            loop {
                tokio::select! {
                    // Prioritize shutdown signals.
                    biased;

                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down gracefully");
                        return;
                    }

                    frame = subscription.next() => match frame {
                        Some(frame) => print_frame(&frame),
                        None => break,
                    }
                }
            }
            warn!("subscription to {} ended", subscription.destination);
        }

        info!("listening again in {}s", RESUBSCRIBE_DELAY.as_secs());
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                return;
            }

            () = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
        }
    }
}

/// Main application logic.
///
/// # Errors
///
/// Returns an error when the configuration cannot be loaded or the
/// requested command fails.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::from_file(&args.config)?;
    let tokens = TokenStore::new(Arc::new(FileStore::new(&config.store_dir)));

    match args.command {
        Command::Token => show_token(&tokens).await?,

        Command::Refresh => {
            let client = Client::new(&config, tokens)?;
            let auth = client.refresh().await?;
            info!("access token valid for {}s", auth.expires_in.as_secs());
        }

        Command::Logout => {
            let client = Client::new(&config, tokens)?;
            client.logout().await?;
        }

        Command::Listen { path } => {
            let connector = StompConnector::new(&config, tokens);
            let channel = SessionChannel::new(
                connector,
                config.messaging_url.clone(),
                config.heartbeat_interval,
            );
            listen(&channel, &path).await;
            channel.close().await;
        }

        Command::Send { destination, json } => {
            let payload: serde_json::Value = serde_json::from_str(&json)?;
            let connector = StompConnector::new(&config, tokens);
            let channel = SessionChannel::new(
                connector,
                config.messaging_url.clone(),
                config.heartbeat_interval,
            );
            let (target, body) = (destination.as_str(), &payload);
            let outcome = channel
                .with_session(None, |connection| async move {
                    connection.send_json(target, body).await
                })
                .await;
            channel.close().await;
            outcome.into_result()?;
            info!("sent to {destination}");
        }
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
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
