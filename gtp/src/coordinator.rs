//! The round coordinator: the per-node state machine that drives
//! admission, the outer game loop, and teardown.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::{CryptoRng, RngCore};

use crate::demux::Demultiplexer;
use crate::error::GtpError;
use crate::field::{FieldConfig, FieldElement};
use crate::protocol::{self, PlayerState};
use crate::relay::RelayTransport;

/// How a coordinator obtains the local guesser's next guess. The CLI
/// binary implements this over stdin; tests replay a scripted sequence
/// (see `testing::ScriptedGuesses`).
#[async_trait(?Send)]
pub trait GuessSource {
    async fn next_guess(&mut self, field_size: u64) -> Result<(FieldElement, FieldElement), GtpError>;
}

/// Interval between roster polls while admitting players, matching the
/// source's fixed 3-second poll.
const ADMISSION_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default per-phase deadline (spec default range 120-300s).
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(120);

/// Drives one node through `joining -> starting -> generating ->
/// playing(r, t)* -> done(w)`.
///
/// Generic over its RNG so production code can plug in a CSPRNG seeded
/// from OS entropy (`StdRng::from_entropy()`, per the design note that a
/// non-cryptographic source breaks P2) while tests inject a seeded one to
/// force a specific secret point.
pub struct Coordinator<R: RelayTransport, G: GuessSource, Rng: RngCore + CryptoRng> {
    pub state: PlayerState,
    demux: Demultiplexer<R>,
    guesses: G,
    field: FieldConfig,
    field_size: u64,
    phase_timeout: Duration,
    rng: Rng,
}

impl<R: RelayTransport, G: GuessSource, Rng: RngCore + CryptoRng> Coordinator<R, G, Rng> {
    pub fn new(
        nickname: String,
        relay: R,
        guesses: G,
        field: FieldConfig,
        field_size: u64,
        phase_timeout: Duration,
        rng: Rng,
    ) -> Self {
        Self {
            state: PlayerState::new(nickname),
            demux: Demultiplexer::new(relay, field),
            guesses,
            field,
            field_size,
            phase_timeout,
            rng,
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.phase_timeout
    }

    /// `joining`: connect to the relay and poll the roster until every
    /// expected player has shown up, then fix the canonical player order.
    async fn join(&mut self, expected_players: usize) -> Result<(), GtpError> {
        self.demux
            .relay_mut()
            .connect(&self.state.self_nick)
            .await?;

        log::info!(
            "{}: waiting for {} players",
            self.state.self_nick,
            expected_players
        );

        loop {
            let mut peers = self.demux.relay_mut().list_peers().await?;
            self.demux.absorb_salvaged();

            peers.retain(|p| p != &self.state.self_nick);
            let current = peers.len() + 1;
            log::info!(
                "{}: connected {}/{}",
                self.state.self_nick,
                current,
                expected_players
            );

            if current >= expected_players {
                let mut all_players = peers;
                all_players.push(self.state.self_nick.clone());
                all_players.sort();
                self.state.my_index = all_players
                    .iter()
                    .position(|p| p == &self.state.self_nick)
                    .expect("self nickname must be in its own roster");
                self.state.all_players = all_players;
                return Ok(());
            }

            tokio::time::sleep(ADMISSION_POLL_INTERVAL).await;
        }
    }

    /// Run the whole game to completion, returning the winner's nickname.
    pub async fn run(&mut self, expected_players: usize) -> Result<String, GtpError> {
        self.join(expected_players).await?;

        let deadline = self.deadline();
        protocol::barrier("game_start", &self.state, &mut self.demux, deadline).await?;

        log::info!("{}: generating the secret point", self.state.self_nick);
        let deadline = self.deadline();
        protocol::generate_point(
            &mut self.state,
            &mut self.demux,
            &self.field,
            self.field_size,
            &mut self.rng,
            deadline,
        )
        .await?;
        let deadline = self.deadline();
        protocol::barrier("point_generated", &self.state, &mut self.demux, deadline).await?;

        loop {
            let n = self.state.all_players.len();
            let turn = (self.state.round_number as usize) % n;
            self.state.round_number += 1;
            let guesser = self.state.all_players[turn].clone();
            let is_guesser = guesser == self.state.self_nick;

            log::info!(
                "{}: round {} — {} to guess",
                self.state.self_nick,
                self.state.round_number,
                guesser
            );

            let guessed = if is_guesser {
                let guess = self.guesses.next_guess(self.field_size).await?;
                protocol::announce_start_check(&self.state, &mut self.demux).await?;
                let deadline = self.deadline();
                protocol::equality_check(
                    &guesser,
                    Some(guess),
                    &self.state,
                    &mut self.demux,
                    &self.field,
                    self.field_size,
                    &mut self.rng,
                    deadline,
                )
                .await?
            } else {
                let deadline = self.deadline();
                protocol::await_start_check(&guesser, &mut self.demux, deadline).await?;
                let deadline = self.deadline();
                protocol::equality_check(
                    &guesser,
                    None,
                    &self.state,
                    &mut self.demux,
                    &self.field,
                    self.field_size,
                    &mut self.rng,
                    deadline,
                )
                .await?
            };

            let deadline = self.deadline();
            protocol::barrier(
                &format!("round_{}", self.state.round_number),
                &self.state,
                &mut self.demux,
                deadline,
            )
            .await?;

            if guessed {
                self.state.winner = Some(guesser.clone());
                log::info!("{}: {} guessed the point Q!", self.state.self_nick, guesser);
                self.demux.relay_mut().close().await;
                return Ok(guesser);
            }
        }
    }
}

/// Validate a guess against `[1, field_size]`, the range `spec.md` §4.6
/// requires of the local guesser's input.
pub fn validate_guess(
    x: i64,
    y: i64,
    field_size: u64,
) -> Result<(FieldElement, FieldElement), GtpError> {
    let max = field_size as i64;
    if x < 1 || x > max || y < 1 || y > max {
        return Err(GtpError::UserInput(format!(
            "guess ({x}, {y}) must be within [1, {field_size}]"
        )));
    }
    Ok((x as u64, y as u64))
}
