#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization;
use wakewatch_kernel_contracts::ph1sess::SessionId;
use wakewatch_kernel_contracts::ph1vote::{
    Ballot, BallotReject, ParticipantId, Proposal, ProposalId, ProposalReject, ProposalTally,
    VoteCloseCause, VoteOpenRefuse, VoteOutcome, VoteResult, VotingHandle,
};
use wakewatch_kernel_contracts::MonotonicTimeNs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ph1VoteConfig {
    pub duration_ms: u64,
    pub max_proposal_chars: usize,
    /// Known roster. Empty means nobody can trigger an early all-voted close.
    pub eligible_voters: Vec<ParticipantId>,
}

impl Ph1VoteConfig {
    pub fn mvp_v1() -> Self {
        Self {
            duration_ms: 90_000,
            max_proposal_chars: 50,
            eligible_voters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct OpenBallot {
    handle: VotingHandle,
    proposals: Vec<Proposal>,
    ballots: BTreeMap<ParticipantId, Ballot>,
}

/// Voting engine: one time-boxed ballot at a time.
#[derive(Debug, Clone)]
pub struct Ph1VoteRuntime {
    config: Ph1VoteConfig,
    open: Option<OpenBallot>,
}

impl Ph1VoteRuntime {
    pub fn new(config: Ph1VoteConfig) -> Self {
        Self { config, open: None }
    }

    pub fn config(&self) -> &Ph1VoteConfig {
        &self.config
    }

    pub fn handle(&self) -> Option<VotingHandle> {
        self.open.as_ref().map(|o| o.handle)
    }

    pub fn open(
        &mut self,
        session_id: SessionId,
        duration_ms: u64,
        now: MonotonicTimeNs,
    ) -> Result<VotingHandle, VoteOpenRefuse> {
        if let Some(open) = &self.open {
            return Err(VoteOpenRefuse::AlreadyOpen {
                session_id: open.handle.session_id,
            });
        }
        let handle = VotingHandle {
            session_id,
            opened_at: now,
            deadline: now.plus_ms(duration_ms),
        };
        self.open = Some(OpenBallot {
            handle,
            proposals: Vec::new(),
            ballots: BTreeMap::new(),
        });
        Ok(handle)
    }

    /// Text is NFC-normalized and trimmed before the length check. An author
    /// keeps their first proposal; later ones are refused, never overwritten.
    pub fn propose(
        &mut self,
        author_id: ParticipantId,
        text: &str,
        now: MonotonicTimeNs,
    ) -> Result<ProposalId, ProposalReject> {
        let max_chars = self.config.max_proposal_chars;
        let open = self
            .open
            .as_mut()
            .filter(|o| now < o.handle.deadline)
            .ok_or(ProposalReject::VotingClosed)?;
        if open.proposals.iter().any(|p| p.author_id == author_id) {
            return Err(ProposalReject::DuplicateAuthor);
        }
        let normalized: String = text.nfc().collect();
        let normalized = normalized.trim();
        if normalized.is_empty() {
            return Err(ProposalReject::EmptyText);
        }
        if normalized.chars().count() > max_chars {
            return Err(ProposalReject::TooLong);
        }
        let proposal_id = ProposalId(open.proposals.len() as u32 + 1);
        open.proposals.push(Proposal {
            proposal_id,
            author_id,
            text: normalized.to_string(),
            submitted_at: now,
        });
        Ok(proposal_id)
    }

    /// Last vote wins: a voter's new ballot replaces their previous one.
    pub fn vote(
        &mut self,
        voter_id: ParticipantId,
        proposal_id: ProposalId,
        now: MonotonicTimeNs,
    ) -> Result<(), BallotReject> {
        let open = self
            .open
            .as_mut()
            .filter(|o| now < o.handle.deadline)
            .ok_or(BallotReject::VotingClosed)?;
        if !open.proposals.iter().any(|p| p.proposal_id == proposal_id) {
            return Err(BallotReject::UnknownProposal);
        }
        open.ballots.insert(
            voter_id.clone(),
            Ballot {
                voter_id,
                proposal_id,
                cast_at: now,
            },
        );
        Ok(())
    }

    /// Whether the ballot should close now, and why.
    pub fn is_due(&self, now: MonotonicTimeNs) -> Option<VoteCloseCause> {
        let open = self.open.as_ref()?;
        if now >= open.handle.deadline {
            return Some(VoteCloseCause::Deadline);
        }
        let roster = &self.config.eligible_voters;
        if !roster.is_empty() && roster.iter().all(|v| open.ballots.contains_key(v)) {
            return Some(VoteCloseCause::AllVoted);
        }
        None
    }

    pub fn close(&mut self, now: MonotonicTimeNs, cause: VoteCloseCause) -> Option<VoteResult> {
        let open = self.open.take()?;
        let tallies = tally(&open);
        let outcome = tallies
            .iter()
            .min_by(|a, b| {
                b.votes
                    .cmp(&a.votes)
                    .then(a.submitted_at.cmp(&b.submitted_at))
                    .then(a.proposal_id.cmp(&b.proposal_id))
            })
            .cloned()
            .map(VoteOutcome::Winner)
            .unwrap_or(VoteOutcome::NoProposals);
        Some(VoteResult {
            handle: open.handle,
            closed_at: now,
            cause,
            outcome,
            tallies,
        })
    }

    /// Drops the open ballot and everything cast into it.
    pub fn cancel(&mut self) -> Option<VotingHandle> {
        self.open.take().map(|o| o.handle)
    }

    pub fn tallies(&self) -> Vec<ProposalTally> {
        self.open.as_ref().map(tally).unwrap_or_default()
    }
}

fn tally(open: &OpenBallot) -> Vec<ProposalTally> {
    open.proposals
        .iter()
        .map(|p| ProposalTally {
            proposal_id: p.proposal_id,
            author_id: p.author_id.clone(),
            text: p.text.clone(),
            submitted_at: p.submitted_at,
            votes: open
                .ballots
                .values()
                .filter(|b| b.proposal_id == p.proposal_id)
                .count() as u32,
        })
        .collect()
}
