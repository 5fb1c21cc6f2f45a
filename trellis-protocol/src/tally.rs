use std::collections::{HashSet, VecDeque};

use trellis_types::primitives::PeerId;

/// What the coordinator should do after a tally update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyDecision {
    /// Keep waiting for in-flight peers.
    Wait,
    /// Quorum reached. Returned exactly once.
    Success,
    /// Every candidate answered without reaching quorum.
    Exhausted,
    /// Contact these leftover peers next.
    Reschedule(Vec<PeerId>),
    /// Reply from a peer that is not awaited, or after the decision.
    Ignored,
}

/// Reply counter for one (operation, keyword) pair.
///
/// Peers move from `leftover` to `in_flight` when contacted and leave
/// `in_flight` when their reply is counted, so a peer can never be counted
/// twice and `completed + failed <= total` always holds.
#[derive(Debug, Clone)]
pub struct ResponseTally {
    batch_size: usize,
    min_ack_responses: usize,
    total: usize,
    completed: usize,
    failed: usize,
    leftover: VecDeque<PeerId>,
    in_flight: HashSet<PeerId>,
    finished: bool,
}

impl ResponseTally {
    /// Build a tally over `candidates`; duplicates are dropped, order kept.
    /// Zero batch size or quorum are treated as one.
    pub fn new(candidates: Vec<PeerId>, batch_size: usize, min_ack_responses: usize) -> Self {
        let mut seen = HashSet::new();
        let leftover: VecDeque<PeerId> = candidates
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();
        Self {
            batch_size: batch_size.max(1),
            min_ack_responses: min_ack_responses.max(1),
            total: leftover.len(),
            completed: 0,
            failed: 0,
            leftover,
            in_flight: HashSet::new(),
            finished: false,
        }
    }

    /// First round: up to `batch_size` peers, or `Exhausted` when there is
    /// nobody to ask.
    pub fn start(&mut self) -> TallyDecision {
        if self.finished {
            return TallyDecision::Ignored;
        }
        if self.total == 0 {
            self.finished = true;
            return TallyDecision::Exhausted;
        }
        let first = self.take(self.batch_size);
        TallyDecision::Reschedule(first)
    }

    /// Count one reply and evaluate the completion rule.
    pub fn record(&mut self, peer: &PeerId, success: bool) -> TallyDecision {
        if self.finished || !self.in_flight.remove(peer) {
            return TallyDecision::Ignored;
        }

        if success {
            self.completed += 1;
            if self.completed == self.min_ack_responses {
                self.finished = true;
                return TallyDecision::Success;
            }
        } else {
            self.failed += 1;
        }

        let round_over = self.failed == self.total
            || (self.failed > 0 && self.failed % self.batch_size == 0)
            || self.in_flight.is_empty();
        if !round_over {
            return TallyDecision::Wait;
        }

        if self.leftover.is_empty() {
            if self.in_flight.is_empty() {
                self.finished = true;
                return TallyDecision::Exhausted;
            }
            return TallyDecision::Wait;
        }

        let room = self.batch_size.saturating_sub(self.in_flight.len());
        if room == 0 {
            return TallyDecision::Wait;
        }
        TallyDecision::Reschedule(self.take(room))
    }

    fn take(&mut self, count: usize) -> Vec<PeerId> {
        let n = count.min(self.leftover.len());
        let batch: Vec<PeerId> = self.leftover.drain(..n).collect();
        self.in_flight.extend(batch.iter().cloned());
        batch
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn leftover_len(&self) -> usize {
        self.leftover.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn min_ack_responses(&self) -> usize {
        self.min_ack_responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peers(n: usize) -> Vec<PeerId> {
        (0..n).map(|i| PeerId::new(format!("p{}", i))).collect()
    }

    fn batch(decision: TallyDecision) -> Vec<PeerId> {
        match decision {
            TallyDecision::Reschedule(b) => b,
            other => panic!("expected a batch, got {:?}", other),
        }
    }

    #[test]
    fn test_quorum_in_first_round_leaves_rest_untouched() {
        let mut tally = ResponseTally::new(peers(10), 4, 2);
        let first = batch(tally.start());
        assert_eq!(first.len(), 4);
        assert_eq!(tally.leftover_len(), 6);

        assert_eq!(tally.record(&first[0], false), TallyDecision::Wait);
        assert_eq!(tally.record(&first[1], true), TallyDecision::Wait);
        assert_eq!(tally.record(&first[2], false), TallyDecision::Wait);
        assert_eq!(tally.record(&first[3], true), TallyDecision::Success);
        assert!(tally.is_finished());
        assert_eq!(tally.leftover_len(), 6);
    }

    #[test]
    fn test_all_fail_exhausts_after_every_round() {
        let mut tally = ResponseTally::new(peers(10), 4, 2);
        let mut round = batch(tally.start());
        let mut contacted = round.len();
        loop {
            let mut last = TallyDecision::Wait;
            for p in &round {
                last = tally.record(p, false);
            }
            match last {
                TallyDecision::Reschedule(next) => {
                    contacted += next.len();
                    round = next;
                }
                TallyDecision::Exhausted => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(contacted, 10);
        assert_eq!(tally.failed(), 10);
        assert!(tally.is_finished());
    }

    #[test]
    fn test_quorum_above_peer_count_terminates() {
        let mut tally = ResponseTally::new(peers(3), 5, 5);
        let first = batch(tally.start());
        assert_eq!(first.len(), 3);
        assert_eq!(tally.record(&first[0], true), TallyDecision::Wait);
        assert_eq!(tally.record(&first[1], true), TallyDecision::Wait);
        assert_eq!(tally.record(&first[2], true), TallyDecision::Exhausted);
        assert_eq!(tally.completed(), 3);
    }

    #[test]
    fn test_duplicate_and_unknown_replies_are_ignored() {
        let mut tally = ResponseTally::new(peers(4), 4, 2);
        let first = batch(tally.start());
        assert_eq!(tally.record(&first[0], true), TallyDecision::Wait);
        assert_eq!(tally.record(&first[0], true), TallyDecision::Ignored);
        assert_eq!(tally.record(&first[0], false), TallyDecision::Ignored);
        assert_eq!(
            tally.record(&PeerId::new("stranger"), true),
            TallyDecision::Ignored
        );
        assert_eq!(tally.completed(), 1);
        assert_eq!(tally.failed(), 0);
    }

    #[test]
    fn test_no_candidates_is_immediately_exhausted() {
        let mut tally = ResponseTally::new(Vec::new(), 4, 1);
        assert_eq!(tally.start(), TallyDecision::Exhausted);
        assert_eq!(tally.start(), TallyDecision::Ignored);
    }

    #[test]
    fn test_reschedule_fills_only_free_slots() {
        // batch 2: after one failure the round is not over; the second
        // failure triggers, and exactly two leftovers go out.
        let mut tally = ResponseTally::new(peers(5), 2, 1);
        let first = batch(tally.start());
        assert_eq!(tally.record(&first[0], false), TallyDecision::Wait);
        let second = batch(tally.record(&first[1], false));
        assert_eq!(second.len(), 2);
        assert_eq!(tally.in_flight_len(), 2);
        // failed=3: neither a batch multiple nor a settled round
        assert_eq!(tally.record(&second[0], false), TallyDecision::Wait);
        let third = batch(tally.record(&second[1], false));
        assert_eq!(third.len(), 1);
        assert_eq!(tally.record(&third[0], true), TallyDecision::Success);
    }

    #[test]
    fn test_duplicate_candidates_are_collapsed() {
        let mut list = peers(3);
        list.push(list[0].clone());
        let tally = ResponseTally::new(list, 4, 1);
        assert_eq!(tally.total(), 3);
    }

    proptest! {
        #[test]
        fn prop_tally_always_decides_once(
            outcomes in proptest::collection::vec(any::<bool>(), 0..30),
            batch_size in 1usize..8,
            min_ack in 1usize..8,
            picks in proptest::collection::vec(any::<usize>(), 64),
        ) {
            let n = outcomes.len();
            let candidates = peers(n);
            let mut tally = ResponseTally::new(candidates.clone(), batch_size, min_ack);
            let index = |p: &PeerId| candidates.iter().position(|c| c == p).unwrap();

            let mut pending: Vec<PeerId> = Vec::new();
            let mut terminal = 0usize;
            let mut successes_seen = 0usize;
            match tally.start() {
                TallyDecision::Reschedule(b) => pending.extend(b),
                TallyDecision::Exhausted => terminal += 1,
                other => prop_assert!(false, "bad start {:?}", other),
            }

            let mut step = 0usize;
            while !pending.is_empty() {
                let pick = picks[step % picks.len()] % pending.len();
                step += 1;
                let peer = pending.swap_remove(pick);
                let ok = outcomes[index(&peer)];
                let before = tally.completed();
                let decision = tally.record(&peer, ok);
                prop_assert!(tally.completed() <= tally.min_ack_responses());
                prop_assert!(tally.completed() + tally.failed() <= tally.total());
                if ok && decision != TallyDecision::Ignored {
                    successes_seen += 1;
                    prop_assert_eq!(tally.completed(), before + 1);
                }
                // replaying the same reply never moves the counters
                let (c, f) = (tally.completed(), tally.failed());
                prop_assert_eq!(tally.record(&peer, ok), TallyDecision::Ignored);
                prop_assert_eq!((tally.completed(), tally.failed()), (c, f));

                match decision {
                    TallyDecision::Success | TallyDecision::Exhausted => {
                        terminal += 1;
                        pending.clear();
                    }
                    TallyDecision::Reschedule(b) => pending.extend(b),
                    _ => {}
                }
            }

            prop_assert_eq!(terminal, 1);
            prop_assert!(tally.is_finished());
            let total_successes = outcomes.iter().filter(|o| **o).count();
            if total_successes >= min_ack {
                prop_assert_eq!(successes_seen, min_ack);
            } else {
                prop_assert!(tally.completed() < tally.min_ack_responses());
            }
        }
    }
}
