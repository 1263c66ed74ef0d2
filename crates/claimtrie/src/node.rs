//! The per-name state machine.
//!
//! A [`Node`] holds every live claim and support for one name, selects the
//! best claim, and accounts for takeovers. Heights only move forward here;
//! rewind happens by replaying a truncated change stream.
//!
//! Activation rules, in the order they fire during [`Node::adjust_to`]:
//! accepted entries whose activation height has come transition to
//! activated; deactivated entries are physically dropped; then, if the
//! winner would change (or there is no active winner), every still-pending
//! entry activates immediately and the takeover height is set. That early
//! activation on takeover is consensus behavior inherited from the first
//! implementation.

use tracing::warn;

use crate::change::{Change, ChangeType};
use crate::claim::Claim;
use crate::types::{ClaimId, Status};

/// State of a single name: claims, supports, and takeover accounting.
#[derive(Clone, Debug, Default)]
pub struct Node {
    /// Claims on the name, insertion order until [`Node::sort_claims`].
    pub claims: Vec<Claim>,
    /// Supports for claims on the name.
    pub supports: Vec<Claim>,
    /// Height at which the current best claim became best.
    pub taken_over_at: i32,
    /// Index of the best claim in `claims`.
    best: Option<usize>,
}

impl Node {
    /// Create an empty node.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current best claim, if any.
    pub fn best_claim(&self) -> Option<&Claim> {
        self.best.map(|i| &self.claims[i])
    }

    /// Whether the node has a best claim that is currently activated.
    pub fn has_active_best(&self) -> bool {
        self.best_claim()
            .is_some_and(|c| c.status == Status::Activated)
    }

    /// Amount of `claim` plus all of its activated supports.
    pub fn effective_amount(&self, claim: &Claim) -> i64 {
        claim.amount
            + self
                .supports
                .iter()
                .filter(|s| s.status == Status::Activated && s.claim_id == claim.claim_id)
                .map(|s| s.amount)
                .sum::<i64>()
    }

    /// Apply one change record with a pre-computed activation delay.
    ///
    /// Spends mark their target deactivated rather than removing it, so a
    /// same-block update can still find the claim; removal happens at the
    /// next height adjustment. Missing targets warn and fall through, the
    /// legacy drop-silently rule.
    pub fn apply_change(&mut self, chg: &Change, delay: i32) {
        match chg.change_type {
            ChangeType::AddClaim => {
                self.claims.push(Claim {
                    claim_id: chg.claim_id,
                    out_point: chg.out_point,
                    amount: chg.amount,
                    value: chg.value.clone(),
                    accepted_at: chg.height,
                    active_at: chg.height + delay,
                    status: Status::Accepted,
                });
            }
            ChangeType::AddSupport => {
                self.supports.push(Claim {
                    claim_id: chg.claim_id,
                    out_point: chg.out_point,
                    amount: chg.amount,
                    value: chg.value.clone(),
                    accepted_at: chg.height,
                    active_at: chg.height + delay,
                    status: Status::Accepted,
                });
            }
            ChangeType::SpendClaim => {
                match self.claims.iter_mut().find(|c| c.claim_id == chg.claim_id) {
                    Some(claim) => claim.status = Status::Deactivated,
                    None => warn!(
                        claim_id = %chg.claim_id,
                        height = chg.height,
                        "spending a claim that is not present",
                    ),
                }
            }
            ChangeType::SpendSupport => {
                match self
                    .supports
                    .iter_mut()
                    .find(|s| s.claim_id == chg.claim_id && s.out_point == chg.out_point)
                {
                    Some(support) => support.status = Status::Deactivated,
                    None => warn!(
                        claim_id = %chg.claim_id,
                        out_point = %chg.out_point,
                        height = chg.height,
                        "spending a support that is not present",
                    ),
                }
            }
            ChangeType::UpdateClaim => {
                match self.claims.iter_mut().find(|c| c.claim_id == chg.claim_id) {
                    Some(claim) if claim.status == Status::Deactivated => {
                        // Identity survives; everything carried by the new
                        // output is replaced. Acceptance height stays, the
                        // claim re-queues for activation.
                        claim.out_point = chg.out_point;
                        claim.amount = chg.amount;
                        claim.value = chg.value.clone();
                        claim.active_at = chg.height + delay;
                        claim.status = Status::Accepted;
                    }
                    _ => warn!(
                        claim_id = %chg.claim_id,
                        height = chg.height,
                        "updating a claim that was not spent this block",
                    ),
                }
            }
        }
    }

    /// Advance activation state to `height`, then walk every scheduled
    /// activation up to `max_height` when one is given.
    pub fn adjust_to(&mut self, height: i32, max_height: Option<i32>) {
        let changed = self.handle_activations(height) > 0;
        self.update_takeover(height, changed);

        let Some(max_height) = max_height else {
            return;
        };
        if max_height <= height {
            return;
        }
        while let Some(h) = self.next_update() {
            if h > max_height {
                break;
            }
            let changed = self.handle_activations(h) > 0;
            self.update_takeover(h, changed);
        }
    }

    /// Next height at which an activation is scheduled.
    pub fn next_update(&self) -> Option<i32> {
        self.claims
            .iter()
            .chain(self.supports.iter())
            .filter(|c| c.status == Status::Accepted)
            .map(|c| c.active_at)
            .min()
    }

    /// Sort claims by (effective amount desc, accepted height asc,
    /// outpoint asc) for deterministic iteration.
    pub fn sort_claims(&mut self) {
        let best_id = self.best.map(|i| self.claims[i].claim_id);

        let amounts: Vec<i64> = self.claims.iter().map(|c| self.effective_amount(c)).collect();
        let mut keyed: Vec<(i64, Claim)> = amounts
            .into_iter()
            .zip(std::mem::take(&mut self.claims))
            .collect();
        keyed.sort_by(|(ea, a), (eb, b)| {
            eb.cmp(ea)
                .then(a.accepted_at.cmp(&b.accepted_at))
                .then(a.out_point.cmp(&b.out_point))
        });
        self.claims = keyed.into_iter().map(|(_, c)| c).collect();

        self.best = self.position_of(best_id);
    }

    /// Activate entries that are due at `height` and drop deactivated ones.
    /// Returns the number of state transitions.
    fn handle_activations(&mut self, height: i32) -> usize {
        let best_id = self.best.map(|i| self.claims[i].claim_id);
        let mut changed = 0;

        for list in [&mut self.claims, &mut self.supports] {
            for entry in list.iter_mut() {
                if entry.status == Status::Accepted && entry.active_at <= height {
                    entry.status = Status::Activated;
                    changed += 1;
                }
            }
            let before = list.len();
            list.retain(|entry| entry.status != Status::Deactivated);
            changed += before - list.len();
        }

        self.best = self.position_of(best_id);
        changed
    }

    /// Activate every pending entry at `height` (takeover acceleration).
    fn activate_all(&mut self, height: i32) -> usize {
        let mut changed = 0;
        for entry in self.claims.iter_mut().chain(self.supports.iter_mut()) {
            if entry.status == Status::Accepted && entry.active_at > height {
                entry.active_at = height;
                entry.status = Status::Activated;
                changed += 1;
            }
        }
        changed
    }

    /// Recompute the best claim and takeover height at `height`.
    fn update_takeover(&mut self, height: i32, refind_best: bool) {
        let mut candidate = if refind_best {
            self.find_best()
        } else {
            self.best
        };

        let has_candidate = candidate.is_some();
        let has_current_winner = self.has_active_best();
        let takeover_happening = !has_candidate
            || !has_current_winner
            || self.claims[candidate.expect("candidate checked above")].claim_id
                != self.claims[self.best.expect("current winner checked above")].claim_id;

        if !takeover_happening {
            return;
        }

        if self.activate_all(height) > 0 {
            candidate = self.find_best();
        }

        match candidate {
            Some(_) => {
                self.best = candidate;
                self.taken_over_at = height;
            }
            // Nothing can win: clear the winner, keep the takeover height.
            None => self.best = None,
        }
    }

    /// Best activated claim by (effective amount, accepted height,
    /// outpoint), or `None` when no claim is activated.
    fn find_best(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, candidate) in self.claims.iter().enumerate() {
            if candidate.status != Status::Activated {
                continue;
            }
            let Some(b) = best else {
                best = Some(i);
                continue;
            };
            let current = &self.claims[b];
            let candidate_amount = self.effective_amount(candidate);
            let current_amount = self.effective_amount(current);
            if candidate_amount > current_amount {
                best = Some(i);
            } else if candidate_amount < current_amount {
                continue;
            } else if candidate.accepted_at < current.accepted_at {
                best = Some(i);
            } else if candidate.accepted_at > current.accepted_at {
                continue;
            } else if candidate.out_point < current.out_point {
                best = Some(i);
            }
        }
        best
    }

    fn position_of(&self, claim_id: Option<ClaimId>) -> Option<usize> {
        claim_id.and_then(|id| self.claims.iter().position(|c| c.claim_id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash256;
    use crate::types::OutPoint;

    fn op(tag: u8, index: u32) -> OutPoint {
        OutPoint::new(Hash256::sha256d(&[tag]), index)
    }

    fn add_claim(name: &[u8], height: i32, o: OutPoint, amount: i64) -> Change {
        Change::new(ChangeType::AddClaim)
            .with_name(name)
            .with_height(height)
            .with_claim_id(ClaimId::from_outpoint(&o))
            .with_out_point(o)
            .with_amount(amount)
    }

    fn add_support(height: i32, o: OutPoint, amount: i64, supported: ClaimId) -> Change {
        Change::new(ChangeType::AddSupport)
            .with_height(height)
            .with_claim_id(supported)
            .with_out_point(o)
            .with_amount(amount)
    }

    #[test]
    fn test_first_claim_takes_over_immediately() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 5, op(1, 0), 10), 0);
        n.adjust_to(5, None);

        assert_eq!(n.taken_over_at, 5);
        assert_eq!(n.best_claim().unwrap().out_point, op(1, 0));
        assert_eq!(n.best_claim().unwrap().status, Status::Activated);
    }

    #[test]
    fn test_pending_claim_activates_on_schedule() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.adjust_to(1, None);
        // Larger claim arrives with a delay of 3.
        n.apply_change(&add_claim(b"a", 10, op(2, 0), 50), 3);
        n.adjust_to(10, None);

        assert_eq!(n.best_claim().unwrap().out_point, op(1, 0));
        assert_eq!(n.next_update(), Some(13));

        n.adjust_to(10, Some(13));
        assert_eq!(n.best_claim().unwrap().out_point, op(2, 0));
        assert_eq!(n.taken_over_at, 13);
        assert_eq!(n.next_update(), None);
    }

    #[test]
    fn test_takeover_activates_all_pending() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.adjust_to(1, None);
        n.apply_change(&add_claim(b"a", 8, op(2, 0), 50), 4);
        n.apply_change(&add_claim(b"a", 8, op(3, 0), 20), 7);
        // Winner is spent; pending claims activate at the takeover.
        n.apply_change(
            &Change::new(ChangeType::SpendClaim)
                .with_height(8)
                .with_claim_id(ClaimId::from_outpoint(&op(1, 0))),
            0,
        );
        n.adjust_to(8, None);

        assert_eq!(n.claims.len(), 2);
        assert_eq!(n.best_claim().unwrap().out_point, op(2, 0));
        assert_eq!(n.taken_over_at, 8);
        assert!(n.claims.iter().all(|c| c.status == Status::Activated));
    }

    #[test]
    fn test_spend_of_missing_claim_is_a_noop() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.apply_change(
            &Change::new(ChangeType::SpendClaim)
                .with_height(1)
                .with_claim_id(ClaimId::from_outpoint(&op(9, 9))),
            0,
        );
        n.adjust_to(1, None);
        assert_eq!(n.claims.len(), 1);
        assert!(n.best_claim().is_some());
    }

    #[test]
    fn test_update_preserves_identity_and_accept_height() {
        let id = ClaimId::from_outpoint(&op(1, 0));
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.adjust_to(1, None);

        n.apply_change(
            &Change::new(ChangeType::SpendClaim)
                .with_height(4)
                .with_claim_id(id),
            0,
        );
        n.apply_change(
            &Change::new(ChangeType::UpdateClaim)
                .with_height(4)
                .with_claim_id(id)
                .with_out_point(op(2, 0))
                .with_amount(25),
            0,
        );
        n.adjust_to(4, None);

        let best = n.best_claim().unwrap();
        assert_eq!(best.claim_id, id);
        assert_eq!(best.out_point, op(2, 0));
        assert_eq!(best.amount, 25);
        assert_eq!(best.accepted_at, 1);
        // Updating the winner is not a takeover.
        assert_eq!(n.taken_over_at, 1);
    }

    #[test]
    fn test_update_without_spend_is_dropped() {
        let id = ClaimId::from_outpoint(&op(1, 0));
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.adjust_to(1, None);

        n.apply_change(
            &Change::new(ChangeType::UpdateClaim)
                .with_height(2)
                .with_claim_id(id)
                .with_out_point(op(2, 0))
                .with_amount(99),
            0,
        );
        n.adjust_to(2, None);

        let best = n.best_claim().unwrap();
        assert_eq!(best.out_point, op(1, 0));
        assert_eq!(best.amount, 10);
    }

    #[test]
    fn test_supports_break_amount_ties() {
        let mut n = Node::new();
        let id2 = ClaimId::from_outpoint(&op(2, 0));
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.apply_change(&add_claim(b"a", 1, op(2, 0), 10), 0);
        n.apply_change(&add_support(1, op(3, 0), 5, id2), 0);
        n.adjust_to(1, None);

        assert_eq!(n.best_claim().unwrap().claim_id, id2);
        let best = n.best_claim().unwrap().clone();
        assert_eq!(n.effective_amount(&best), 15);
    }

    #[test]
    fn test_spent_support_stops_counting() {
        let mut n = Node::new();
        let id1 = ClaimId::from_outpoint(&op(1, 0));
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.apply_change(&add_claim(b"a", 1, op(2, 0), 12), 0);
        n.apply_change(&add_support(1, op(3, 0), 5, id1), 0);
        n.adjust_to(1, None);
        assert_eq!(n.best_claim().unwrap().claim_id, id1);

        n.apply_change(
            &Change::new(ChangeType::SpendSupport)
                .with_height(2)
                .with_claim_id(id1)
                .with_out_point(op(3, 0)),
            0,
        );
        n.adjust_to(2, None);

        assert_eq!(n.best_claim().unwrap().out_point, op(2, 0));
        assert_eq!(n.taken_over_at, 2);
        assert!(n.supports.is_empty());
    }

    #[test]
    fn test_tie_breaks_accepted_then_outpoint() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 10), 0);
        n.adjust_to(1, None);
        n.apply_change(&add_claim(b"a", 2, op(2, 0), 10), 0);
        n.adjust_to(2, None);
        // Same amount: earlier acceptance wins.
        assert_eq!(n.best_claim().unwrap().out_point, op(1, 0));

        let mut n = Node::new();
        let (oa, ob) = if op(1, 0) < op(2, 0) {
            (op(1, 0), op(2, 0))
        } else {
            (op(2, 0), op(1, 0))
        };
        n.apply_change(&add_claim(b"a", 1, ob, 10), 0);
        n.apply_change(&add_claim(b"a", 1, oa, 10), 0);
        n.adjust_to(1, None);
        // Same amount and height: smaller outpoint wins.
        assert_eq!(n.best_claim().unwrap().out_point, oa);
    }

    #[test]
    fn test_sort_claims_keeps_best_handle() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 1, op(1, 0), 5), 0);
        n.apply_change(&add_claim(b"a", 1, op(2, 0), 50), 0);
        n.apply_change(&add_claim(b"a", 1, op(3, 0), 20), 0);
        n.adjust_to(1, None);

        let best_before = n.best_claim().unwrap().claim_id;
        n.sort_claims();
        assert_eq!(n.best_claim().unwrap().claim_id, best_before);
        assert_eq!(n.claims[0].amount, 50);
        assert_eq!(n.claims[1].amount, 20);
        assert_eq!(n.claims[2].amount, 5);
    }

    #[test]
    fn test_all_claims_spent_clears_best_keeps_takeover() {
        let mut n = Node::new();
        n.apply_change(&add_claim(b"a", 3, op(1, 0), 10), 0);
        n.adjust_to(3, None);
        assert_eq!(n.taken_over_at, 3);

        n.apply_change(
            &Change::new(ChangeType::SpendClaim)
                .with_height(7)
                .with_claim_id(ClaimId::from_outpoint(&op(1, 0))),
            0,
        );
        n.adjust_to(7, None);

        assert!(n.best_claim().is_none());
        assert!(n.claims.is_empty());
        assert_eq!(n.taken_over_at, 3);
    }
}
