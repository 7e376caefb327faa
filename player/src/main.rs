use std::io::Write as _;
use std::process::ExitCode;

use argh::FromArgs;
use gtp::config::{Config, RelayAddress, DEFAULT_FIELD_SIZE, DEFAULT_HOST, DEFAULT_PORT};
use gtp::coordinator::{validate_guess, Coordinator, GuessSource, DEFAULT_PHASE_TIMEOUT};
use gtp::error::GtpError;
use gtp::field::{FieldConfig, FieldElement};
use gtp::relay::TcpRelayClient;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Join a relay and play Guess the Point against the other connected peers.
#[derive(FromArgs, Debug)]
struct Options {
    /// this player's nickname on the relay
    #[argh(positional)]
    nickname: String,

    /// relay host
    #[argh(option, default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// relay port
    #[argh(option, default = "DEFAULT_PORT")]
    port: u16,

    /// number of players required before the game starts
    #[argh(option, default = "2")]
    players: usize,

    /// side length of the guessable grid
    #[argh(option, default = "DEFAULT_FIELD_SIZE")]
    field: u64,
}

/// Reads the local guesser's coordinates from stdin on their turn,
/// re-prompting on malformed or out-of-range input.
struct StdinGuesses {
    field_size: u64,
}

#[async_trait::async_trait(?Send)]
impl GuessSource for StdinGuesses {
    async fn next_guess(
        &mut self,
        field_size: u64,
    ) -> Result<(FieldElement, FieldElement), GtpError> {
        loop {
            print!("Your guess, \"x y\" in [1, {field_size}]: ");
            std::io::stdout().flush().ok();

            let mut line = String::new();
            let read = tokio::task::spawn_blocking(move || {
                std::io::stdin().read_line(&mut line).map(|_| line)
            })
            .await
            .map_err(|e| {
                GtpError::Transport(std::io::Error::new(std::io::ErrorKind::Other, e))
            })??;

            let mut parts = read.split_whitespace();
            let (x, y) = match (parts.next(), parts.next()) {
                (Some(x), Some(y)) => (x.parse::<i64>(), y.parse::<i64>()),
                _ => {
                    println!("expected two numbers separated by whitespace, try again");
                    continue;
                }
            };
            let (x, y) = match (x, y) {
                (Ok(x), Ok(y)) => (x, y),
                _ => {
                    println!("couldn't parse coordinates as integers, try again");
                    continue;
                }
            };

            match validate_guess(x, y, field_size) {
                Ok(guess) => return Ok(guess),
                Err(GtpError::UserInput(msg)) => {
                    println!("{msg}, try again");
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn exit_code_for(err: &GtpError) -> u8 {
    match err {
        GtpError::Transport(_) => 1,
        GtpError::Handshake(_) => 2,
        GtpError::Timeout(_) => 3,
        GtpError::Malformed(_) => 4,
        GtpError::OutOfRange(_) => 4,
        GtpError::ProtocolViolation(_) => 5,
        GtpError::UserInput(_) => 6,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();
    let options: Options = argh::from_env();

    let config = Config {
        field: FieldConfig::new(gtp::config::DEFAULT_PRIME),
        field_size: options.field,
        players: options.players,
        relay: RelayAddress {
            host: options.host,
            port: options.port,
        },
    };

    let relay = match TcpRelayClient::open(config.relay.socket_addr_string()).await {
        Ok(relay) => relay,
        Err(err) => {
            eprintln!("could not reach relay at {}: {err}", config.relay.socket_addr_string());
            return ExitCode::from(1);
        }
    };

    let mut coordinator = Coordinator::new(
        options.nickname,
        relay,
        StdinGuesses {
            field_size: config.field_size,
        },
        config.field,
        config.field_size,
        DEFAULT_PHASE_TIMEOUT,
        StdRng::from_entropy(),
    );

    let result = tokio::select! {
        result = coordinator.run(config.players) => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, closing the connection");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(winner) => {
            println!("{winner} guessed the point. Game over.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("game aborted: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}
