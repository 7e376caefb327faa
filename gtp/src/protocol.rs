//! The MPC protocol engine: joint point generation, barrier
//! synchronisation, and the three-phase equality check.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rand::{CryptoRng, Rng, RngCore};

use crate::demux::Demultiplexer;
use crate::error::GtpError;
use crate::field::{FieldConfig, FieldElement};
use crate::relay::RelayTransport;
use crate::share;
use crate::wire::{self, MessageKind, MpcMessage};

/// Per-node game state, lifecycle bound to a single game.
#[derive(Clone, Debug)]
pub struct PlayerState {
    pub self_nick: String,
    pub all_players: Vec<String>,
    pub my_index: usize,
    pub inbound_shares_x: HashMap<String, FieldElement>,
    pub inbound_shares_y: HashMap<String, FieldElement>,
    pub my_total_share_x: FieldElement,
    pub my_total_share_y: FieldElement,
    pub round_number: u64,
    pub winner: Option<String>,
}

impl PlayerState {
    pub fn new(self_nick: String) -> Self {
        Self {
            self_nick,
            all_players: Vec::new(),
            my_index: 0,
            inbound_shares_x: HashMap::new(),
            inbound_shares_y: HashMap::new(),
            my_total_share_x: 0,
            my_total_share_y: 0,
            round_number: 0,
            winner: None,
        }
    }

    fn peers(&self) -> Vec<String> {
        self.all_players
            .iter()
            .filter(|p| **p != self.self_nick)
            .cloned()
            .collect()
    }
}

/// Joint generation of the secret point Q (step 4.5.1). Resolves the open
/// question on grid projection as option (b): each party samples its
/// contribution from `[0, field_size)` rather than the full field. The
/// joint sum of those contributions is not itself grid-ranged; folding it
/// back onto `[1, field_size]` is `equality_check`'s job, not this
/// function's (see that function's doc comment).
pub async fn generate_point<R: RelayTransport>(
    state: &mut PlayerState,
    demux: &mut Demultiplexer<R>,
    field: &FieldConfig,
    field_size: u64,
    rng: &mut (impl RngCore + CryptoRng),
    deadline: Instant,
) -> Result<(), GtpError> {
    let n = state.all_players.len();
    let my_x = rng.gen_range(0..field_size);
    let my_y = rng.gen_range(0..field_size);

    let shares_x = share::split(my_x, n, field, rng);
    let shares_y = share::split(my_y, n, field, rng);

    for (j, peer) in state.all_players.iter().enumerate() {
        if peer == &state.self_nick {
            continue;
        }
        let msg = MpcMessage::Share {
            from: state.self_nick.clone(),
            sx: shares_x[j],
            sy: shares_y[j],
        };
        demux
            .relay_mut()
            .send(&[peer.clone()], &wire::encode(&msg)?)
            .await?;
        log::debug!("{}: sent share to {peer}", state.self_nick);
    }

    state
        .inbound_shares_x
        .insert(state.self_nick.clone(), shares_x[state.my_index]);
    state
        .inbound_shares_y
        .insert(state.self_nick.clone(), shares_y[state.my_index]);

    let expected = n.saturating_sub(1);
    while state.inbound_shares_x.len() < expected + 1 {
        let msg = demux
            .await_message(MessageKind::Share, |_| true, deadline)
            .await?;
        if let MpcMessage::Share { from, sx, sy } = msg {
            if state.inbound_shares_x.contains_key(&from) {
                return Err(GtpError::ProtocolViolation(format!(
                    "duplicate share from {from}"
                )));
            }
            log::debug!("{}: received share from {from}", state.self_nick);
            state.inbound_shares_x.insert(from.clone(), sx);
            state.inbound_shares_y.insert(from, sy);
        }
    }

    state.my_total_share_x = field.sum(state.inbound_shares_x.values().copied());
    state.my_total_share_y = field.sum(state.inbound_shares_y.values().copied());
    log::info!(
        "{}: joint point generation complete ({} contributors)",
        state.self_nick,
        state.inbound_shares_x.len()
    );
    Ok(())
}

/// Barrier synchronisation (step 4.5.2): broadcast `barrier{name}`, then
/// wait for one matching frame from each other peer.
pub async fn barrier<R: RelayTransport>(
    name: &str,
    state: &PlayerState,
    demux: &mut Demultiplexer<R>,
    deadline: Instant,
) -> Result<(), GtpError> {
    let peers = state.peers();
    let msg = MpcMessage::Barrier {
        from: state.self_nick.clone(),
        name: name.to_string(),
    };
    demux.relay_mut().send(&peers, &wire::encode(&msg)?).await?;
    log::debug!("{}: sent barrier({name})", state.self_nick);

    let mut seen: HashSet<String> = HashSet::new();
    while seen.len() < peers.len() {
        let name = name.to_string();
        let msg = demux
            .await_message(
                MessageKind::Barrier,
                move |m| matches!(m, MpcMessage::Barrier { name: n, .. } if n == &name),
                deadline,
            )
            .await?;
        if let MpcMessage::Barrier { from, .. } = msg {
            seen.insert(from);
        }
    }
    log::info!("{}: barrier({name}) complete", state.self_nick);
    Ok(())
}

/// Broadcast `start_check{guesser=self}` (step 4.5.3.1, guesser side).
pub async fn announce_start_check<R: RelayTransport>(
    state: &PlayerState,
    demux: &mut Demultiplexer<R>,
) -> Result<(), GtpError> {
    let peers = state.peers();
    let msg = MpcMessage::StartCheck {
        guesser: state.self_nick.clone(),
    };
    demux.relay_mut().send(&peers, &wire::encode(&msg)?).await?;
    log::debug!("{}: announced start_check", state.self_nick);
    Ok(())
}

/// Await `start_check{guesser}` (step 4.5.3.1, non-guesser side).
pub async fn await_start_check<R: RelayTransport>(
    guesser: &str,
    demux: &mut Demultiplexer<R>,
    deadline: Instant,
) -> Result<(), GtpError> {
    let guesser_owned = guesser.to_string();
    demux
        .await_message(
            MessageKind::StartCheck,
            move |m| matches!(m, MpcMessage::StartCheck { guesser: g } if g == &guesser_owned),
            deadline,
        )
        .await?;
    log::debug!("awaited start_check from {guesser}");
    Ok(())
}

/// The three-phase equality check (step 4.5.3, steps 2-5) for round
/// `guesser`. `my_guess` must be `Some` iff `guesser == state.self_nick`.
///
/// Q is generated on the `[0, field_size)` grid per party (see
/// `generate_point`), so the joint sum `Σ my_total_share` a guess is
/// compared against can land anywhere in `[0, n*(field_size-1)]`, not just
/// `[0, field_size)` -- summing n independently-drawn grid coordinates does
/// not itself stay on the grid. The board position everyone agrees Q
/// occupies is therefore the *reduction* of that sum, `(Σ my_total_share mod
/// field_size) + 1`, matching the `[1, field_size]` range guesses are taken
/// in (see the Open Question resolution in `DESIGN.md`). The three-phase
/// reveal below is adapted accordingly: the guesser shares `guess - 1` (its
/// own position in the same `[0, field_size)` domain Q's raw sum lives in),
/// one designated party (`my_index == 0`, the same index on every node)
/// folds a multiple of `field_size` into its local difference so the
/// summed differences never go modularly negative relative to `p`, and the
/// final test reduces the revealed sum mod `field_size` rather than testing
/// it against zero over the full field.
pub async fn equality_check<R: RelayTransport>(
    guesser: &str,
    my_guess: Option<(FieldElement, FieldElement)>,
    state: &PlayerState,
    demux: &mut Demultiplexer<R>,
    field: &FieldConfig,
    field_size: u64,
    rng: &mut (impl RngCore + CryptoRng),
    deadline: Instant,
) -> Result<bool, GtpError> {
    let peers = state.peers();
    let n = state.all_players.len();
    let is_guesser = guesser == state.self_nick;

    let (my_share_gx, my_share_gy) = if is_guesser {
        let (gx, gy) =
            my_guess.expect("equality_check called for the local guesser without a guess");
        let gx0 = gx
            .checked_sub(1)
            .expect("guess must already be validated to [1, field_size]");
        let gy0 = gy
            .checked_sub(1)
            .expect("guess must already be validated to [1, field_size]");
        let shares_gx = share::split(gx0, n, field, rng);
        let shares_gy = share::split(gy0, n, field, rng);

        for (j, peer) in state.all_players.iter().enumerate() {
            if peer == &state.self_nick {
                continue;
            }
            let msg = MpcMessage::GuessShare {
                from: state.self_nick.clone(),
                guesser: guesser.to_string(),
                sx: shares_gx[j],
                sy: shares_gy[j],
            };
            demux
                .relay_mut()
                .send(&[peer.clone()], &wire::encode(&msg)?)
                .await?;
            log::debug!("{}: sent guess_share to {peer}", state.self_nick);
        }
        (shares_gx[state.my_index], shares_gy[state.my_index])
    } else {
        let guesser_owned = guesser.to_string();
        let msg = demux
            .await_message(
                MessageKind::GuessShare,
                move |m| matches!(m, MpcMessage::GuessShare { guesser: g, .. } if g == &guesser_owned),
                deadline,
            )
            .await?;
        match msg {
            MpcMessage::GuessShare { sx, sy, .. } => (sx, sy),
            _ => unreachable!("await_message returned the wrong kind"),
        }
    };

    // A multiple of field_size, folded into exactly one party's local
    // difference so the revealed sum below stays nonnegative and below `p`
    // (both the raw sum and the guess are tiny next to `p`) instead of
    // wrapping around the full field, which would corrupt the `mod
    // field_size` test.
    let bias = field.reduce(field_size.saturating_mul(n as u64));

    let mut my_dx = field.sub(state.my_total_share_x, my_share_gx);
    let mut my_dy = field.sub(state.my_total_share_y, my_share_gy);
    if state.my_index == 0 {
        my_dx = field.add(my_dx, bias);
        my_dy = field.add(my_dy, bias);
    }

    let diff_msg = MpcMessage::DiffShare {
        from: state.self_nick.clone(),
        guesser: guesser.to_string(),
        dx: my_dx,
        dy: my_dy,
    };
    demux
        .relay_mut()
        .send(&peers, &wire::encode(&diff_msg)?)
        .await?;

    let mut sum_dx = my_dx;
    let mut sum_dy = my_dy;
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(state.self_nick.clone());

    while seen.len() < n {
        let guesser_owned = guesser.to_string();
        let msg = demux
            .await_message(
                MessageKind::DiffShare,
                move |m| matches!(m, MpcMessage::DiffShare { guesser: g, .. } if g == &guesser_owned),
                deadline,
            )
            .await?;
        if let MpcMessage::DiffShare { from, dx, dy, .. } = msg {
            if !seen.insert(from.clone()) {
                return Err(GtpError::ProtocolViolation(format!(
                    "duplicate diff_share from {from}"
                )));
            }
            log::debug!("{}: received diff_share from {from}", state.self_nick);
            sum_dx = field.add(sum_dx, dx);
            sum_dy = field.add(sum_dy, dy);
        }
    }

    let guessed = sum_dx % field_size == 0 && sum_dy % field_size == 0;
    log::info!(
        "{}: equality check for {guesser}'s guess -> {guessed}",
        state.self_nick
    );
    Ok(guessed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNetwork;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    async fn generate_for_all(
        field: &FieldConfig,
        field_size: u64,
        states: &mut [PlayerState],
        demuxes: &mut [Demultiplexer<crate::testing::MockRelay>],
    ) {
        let mut rngs: Vec<StdRng> = (0..states.len())
            .map(|i| StdRng::seed_from_u64(100 + i as u64))
            .collect();

        // All parties' generate_point calls are interdependent (each
        // awaits shares the others send), so they must be polled
        // concurrently rather than one after another.
        let futs = states
            .iter_mut()
            .zip(demuxes.iter_mut())
            .zip(rngs.iter_mut())
            .map(|((state, demux), rng)| {
                generate_point(state, demux, field, field_size, rng, deadline())
            });

        for result in futures::future::join_all(futs).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn generation_reconstructs_the_same_point_for_everyone() {
        let field = FieldConfig::new(2_147_483_647);
        let network = MockNetwork::new();
        let players = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];

        let mut states: Vec<PlayerState> = players
            .iter()
            .map(|p| {
                let mut s = PlayerState::new(p.clone());
                s.all_players = {
                    let mut all = players.clone();
                    all.sort();
                    all
                };
                s.my_index = s.all_players.iter().position(|x| x == p).unwrap();
                s
            })
            .collect();

        let mut demuxes: Vec<_> = players
            .iter()
            .map(|p| Demultiplexer::new(network.join(p), field))
            .collect();

        generate_for_all(&field, 5, &mut states, &mut demuxes).await;

        let total_x: u64 = states
            .iter()
            .map(|s| s.my_total_share_x)
            .fold(0, |acc, v| field.add(acc, v));
        let total_y: u64 = states
            .iter()
            .map(|s| s.my_total_share_y)
            .fold(0, |acc, v| field.add(acc, v));

        // P3: combining every party's share of Q reconstructs the same raw
        // sum everywhere. The sum of 3 independently-drawn [0, 5) grid
        // coordinates is itself only bounded by 3 * (5 - 1), not by 5 --
        // `equality_check` is what reduces it back onto the guessable grid.
        let raw_bound = 3 * 5;
        assert!(total_x < raw_bound);
        assert!(total_y < raw_bound);
    }

    #[tokio::test]
    async fn barrier_does_not_complete_until_every_peer_has_sent() {
        // P8: a barrier with two peers outstanding must not return for
        // either of them until both have signalled -- simulated here by
        // having only one of two peers announce the barrier, confirming A
        // times out rather than proceeding, then replaying both peers'
        // frames and confirming the barrier now completes.
        let field = FieldConfig::new(101);
        let network = MockNetwork::new();
        let mut state_a = PlayerState::new("A".to_string());
        state_a.all_players = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        state_a.my_index = 0;
        let mut demux_a = Demultiplexer::new(network.join("A"), field);
        let _demux_b = Demultiplexer::new(network.join("B"), field);
        let _demux_c = Demultiplexer::new(network.join("C"), field);

        network.send_to(
            &["A".to_string()],
            wire::encode(&MpcMessage::Barrier {
                from: "B".into(),
                name: "g".into(),
            })
            .unwrap(),
        );

        let short_deadline = Instant::now() + Duration::from_millis(150);
        let premature = barrier("g", &state_a, &mut demux_a, short_deadline).await;
        assert!(
            matches!(premature, Err(GtpError::Timeout(_))),
            "barrier must not complete with only one of two peers heard from"
        );

        // C's frame still hasn't arrived; B's was already consumed by the
        // timed-out attempt above, so resend both for the real attempt.
        network.send_to(
            &["A".to_string()],
            wire::encode(&MpcMessage::Barrier {
                from: "B".into(),
                name: "g".into(),
            })
            .unwrap(),
        );
        network.send_to(
            &["A".to_string()],
            wire::encode(&MpcMessage::Barrier {
                from: "C".into(),
                name: "g".into(),
            })
            .unwrap(),
        );

        let long_deadline = Instant::now() + Duration::from_secs(2);
        barrier("g", &state_a, &mut demux_a, long_deadline)
            .await
            .expect("barrier must complete once every peer has sent");
    }
}
