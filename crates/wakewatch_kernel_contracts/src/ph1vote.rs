#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_token_ascii;
use crate::ph1sess::SessionId;
use crate::{ContractViolation, MonotonicTimeNs, Validate};

pub const PARTICIPANT_ID_MAX_LEN: usize = 64;

/// A remote participant (friend) identity, unique per participant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ParticipantId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token_ascii("participant_id", &self.0, PARTICIPANT_ID_MAX_LEN)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(value: ParticipantId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    pub author_id: ParticipantId,
    pub text: String,
    pub submitted_at: MonotonicTimeNs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter_id: ParticipantId,
    pub proposal_id: ProposalId,
    pub cast_at: MonotonicTimeNs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingHandle {
    pub session_id: SessionId,
    pub opened_at: MonotonicTimeNs,
    pub deadline: MonotonicTimeNs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOpenRefuse {
    AlreadyOpen { session_id: SessionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalReject {
    DuplicateAuthor,
    TooLong,
    EmptyText,
    VotingClosed,
}

impl ProposalReject {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalReject::DuplicateAuthor => "DUPLICATE_AUTHOR",
            ProposalReject::TooLong => "TOO_LONG",
            ProposalReject::EmptyText => "EMPTY_TEXT",
            ProposalReject::VotingClosed => "VOTING_CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BallotReject {
    UnknownProposal,
    VotingClosed,
}

impl BallotReject {
    pub fn as_str(self) -> &'static str {
        match self {
            BallotReject::UnknownProposal => "UNKNOWN_PROPOSAL",
            BallotReject::VotingClosed => "VOTING_CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteCloseCause {
    Deadline,
    AllVoted,
    Forced,
}

impl VoteCloseCause {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteCloseCause::Deadline => "deadline",
            VoteCloseCause::AllVoted => "all_voted",
            VoteCloseCause::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalTally {
    pub proposal_id: ProposalId,
    pub author_id: ParticipantId,
    pub text: String,
    pub submitted_at: MonotonicTimeNs,
    pub votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOutcome {
    Winner(ProposalTally),
    NoProposals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    pub handle: VotingHandle,
    pub closed_at: MonotonicTimeNs,
    pub cause: VoteCloseCause,
    pub outcome: VoteOutcome,
    pub tallies: Vec<ProposalTally>,
}
