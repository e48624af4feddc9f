//! Single-decree-per-slot toy consensus.
//!
//! `r0` is the fixed primary. It assigns sequence numbers to client requests
//! and broadcasts `Propose`. Replicas echo `Accept` to every replica and
//! commit a slot once `2f+1` matching accepts arrived, in slot order. Each
//! replica replies to the client on commit, and a client moves on after
//! `f+1` replies.
//!
//! The eager variant commits the first `Propose` it sees for a slot, which
//! is unsafe as soon as the primary can equivocate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bftlab_core::commit_log::CommitLog;
use bftlab_core::error::ParticipantError;
use bftlab_core::events::{Event, EventKind, NodeId, Outbound};
use bftlab_core::faults::{FaultCatalog, FieldMutator, FieldOp, NetworkFault};
use bftlab_core::participant::{NodeContext, Participant, Role};
use bftlab_core::schedule::ScenarioParameters;
use bftlab_core::value::StateValue;

use crate::invariants::{ConsistencyPredicate, IntegrityPredicate};
use crate::scenario::{ScenarioError, ScenarioFactory, ScenarioSetup};

pub const PRIMARY: &str = "r0";

const VIEW_TIMER: &str = "view-timer";
const CLIENT_RETRY: &str = "client-retry";
const VIEW_TIMEOUT_NS: u64 = 50_000_000;
const CLIENT_RETRY_NS: u64 = 200_000_000;

/// Tolerated faults for `n` replicas.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

fn field_u64(body: &StateValue, key: &str) -> Option<u64> {
    body.get(key).and_then(StateValue::as_u64)
}

pub struct ToyReplica {
    id: NodeId,
    replicas: Vec<NodeId>,
    quorum: usize,
    eager: bool,
    // Primary only.
    next_seq: u64,
    assigned: BTreeMap<(String, u64), StateValue>,
    proposals: BTreeMap<u64, StateValue>,
    accepts: BTreeMap<(u64, StateValue), BTreeSet<NodeId>>,
    decided: BTreeMap<u64, StateValue>,
    next_commit: u64,
    timer_armed: bool,
    log: CommitLog,
}

impl ToyReplica {
    pub fn new(id: impl Into<NodeId>, replicas: Vec<NodeId>, eager: bool) -> Self {
        let quorum = 2 * max_faulty(replicas.len()) + 1;
        Self {
            id: id.into(),
            replicas,
            quorum,
            eager,
            next_seq: 0,
            assigned: BTreeMap::new(),
            proposals: BTreeMap::new(),
            accepts: BTreeMap::new(),
            decided: BTreeMap::new(),
            next_commit: 0,
            timer_armed: false,
            log: CommitLog::new(),
        }
    }

    fn is_primary(&self) -> bool {
        self.id == PRIMARY
    }

    fn broadcast(&self, class: &str, body: &StateValue) -> Vec<Outbound> {
        self.replicas
            .iter()
            .map(|to| Outbound::message(to.clone(), class, body.clone()))
            .collect()
    }

    fn on_request(&mut self, body: &StateValue) -> Vec<Outbound> {
        if !self.is_primary() {
            return Vec::new();
        }
        let (Some(client), Some(request_id)) = (
            body.get("client").and_then(StateValue::as_str),
            field_u64(body, "requestId"),
        ) else {
            return Vec::new();
        };
        let key = (client.to_string(), request_id);
        // Retried requests re-send the original proposal.
        let proposal = match self.assigned.get(&key) {
            Some(proposal) => proposal.clone(),
            None => {
                let proposal = StateValue::map([
                    ("seq", StateValue::from(self.next_seq)),
                    ("value", StateValue::from(format!("{client}:{request_id}"))),
                    ("client", StateValue::from(client)),
                    ("requestId", StateValue::from(request_id)),
                ]);
                self.next_seq += 1;
                self.assigned.insert(key, proposal.clone());
                proposal
            }
        };
        self.broadcast("Propose", &proposal)
    }

    fn on_propose(&mut self, sender: &str, body: &StateValue) -> Result<Vec<Outbound>, ParticipantError> {
        if sender != PRIMARY {
            return Ok(Vec::new());
        }
        let (Some(seq), Some(value)) = (field_u64(body, "seq"), body.get("value")) else {
            return Ok(Vec::new());
        };
        if self.eager {
            // Stale or duplicate slots are ignored.
            if self.log.append(seq, value.clone()).is_err() {
                return Ok(Vec::new());
            }
            return Ok(self.reply(seq, body).into_iter().collect());
        }
        if self.proposals.contains_key(&seq) || self.decided.contains_key(&seq) {
            return Ok(Vec::new());
        }
        self.proposals.insert(seq, body.clone());
        let mut out = self.broadcast("Accept", body);
        if !self.timer_armed {
            self.timer_armed = true;
            out.push(Outbound::timeout(VIEW_TIMER, VIEW_TIMEOUT_NS));
        }
        Ok(out)
    }

    fn on_accept(&mut self, sender: &str, body: &StateValue) -> Result<Vec<Outbound>, ParticipantError> {
        if self.eager {
            return Ok(Vec::new());
        }
        let (Some(seq), Some(value)) = (field_u64(body, "seq"), body.get("value")) else {
            return Ok(Vec::new());
        };
        if seq < self.next_commit || self.decided.contains_key(&seq) {
            return Ok(Vec::new());
        }
        let voters = self.accepts.entry((seq, value.clone())).or_default();
        voters.insert(sender.to_string());
        if voters.len() < self.quorum {
            return Ok(Vec::new());
        }
        self.decided.insert(seq, body.clone());
        self.commit_ready()
    }

    fn commit_ready(&mut self) -> Result<Vec<Outbound>, ParticipantError> {
        let mut out = Vec::new();
        while let Some(body) = self.decided.get(&self.next_commit).cloned() {
            let value = body.get("value").cloned().unwrap_or_default();
            self.log
                .append(self.next_commit, value)
                .map_err(|e| ParticipantError::new(e.to_string()))?;
            out.extend(self.reply(self.next_commit, &body));
            self.proposals.remove(&self.next_commit);
            self.accepts.retain(|(seq, _), _| *seq != self.next_commit);
            self.next_commit += 1;
        }
        if self.timer_armed && self.proposals.is_empty() {
            self.timer_armed = false;
            out.push(Outbound::ClearTimeouts {
                description: Some(VIEW_TIMER.to_string()),
            });
        }
        Ok(out)
    }

    fn reply(&self, seq: u64, body: &StateValue) -> Option<Outbound> {
        let client = body.get("client").and_then(StateValue::as_str)?;
        Some(Outbound::reply(
            client,
            "Reply",
            StateValue::map([
                ("seq", StateValue::from(seq)),
                ("requestId", body.get("requestId").cloned().unwrap_or_default()),
                ("value", body.get("value").cloned().unwrap_or_default()),
            ]),
        ))
    }

    /// Re-sends accepts for every slot still waiting on a quorum.
    fn on_view_timer(&mut self) -> Vec<Outbound> {
        self.timer_armed = false;
        let mut out: Vec<Outbound> = self
            .proposals
            .values()
            .flat_map(|body| self.broadcast("Accept", body))
            .collect();
        if !self.proposals.is_empty() {
            self.timer_armed = true;
            out.push(Outbound::timeout(VIEW_TIMER, VIEW_TIMEOUT_NS));
        }
        out
    }
}

impl Participant for ToyReplica {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        Role::Replica
    }

    fn handle(&mut self, event: &Event, _ctx: &NodeContext) -> Result<Vec<Outbound>, ParticipantError> {
        if let EventKind::Timeout { description, .. } = &event.kind {
            return Ok(match description.as_str() {
                VIEW_TIMER => self.on_view_timer(),
                _ => Vec::new(),
            });
        }
        let Some(payload) = event.payload() else {
            return Ok(Vec::new());
        };
        match payload.class.as_str() {
            "Request" => Ok(self.on_request(&payload.body)),
            "Propose" => self.on_propose(&event.sender_id, &payload.body),
            "Accept" => self.on_accept(&event.sender_id, &payload.body),
            _ => Ok(Vec::new()),
        }
    }

    fn current_state(&self) -> StateValue {
        StateValue::map([
            ("primary", StateValue::from(self.is_primary())),
            ("nextCommit", StateValue::from(self.next_commit)),
            ("committed", StateValue::from(self.log.len())),
            ("pending", StateValue::from(self.proposals.len())),
            ("timerArmed", StateValue::from(self.timer_armed)),
        ])
    }

    fn commit_log(&self) -> Option<&CommitLog> {
        Some(&self.log)
    }
}

pub struct ToyClient {
    id: NodeId,
    reply_quorum: usize,
    total_requests: u64,
    current: u64,
    replies: BTreeSet<NodeId>,
}

impl ToyClient {
    pub fn new(id: impl Into<NodeId>, num_replicas: usize, total_requests: u64) -> Self {
        Self {
            id: id.into(),
            reply_quorum: max_faulty(num_replicas) + 1,
            total_requests,
            current: 0,
            replies: BTreeSet::new(),
        }
    }

    fn done(&self) -> bool {
        self.current >= self.total_requests
    }

    fn send_current(&self) -> Vec<Outbound> {
        vec![
            Outbound::request(
                PRIMARY,
                "Request",
                StateValue::map([
                    ("client", StateValue::from(self.id.as_str())),
                    ("requestId", StateValue::from(self.current)),
                ]),
            ),
            Outbound::timeout(CLIENT_RETRY, CLIENT_RETRY_NS),
        ]
    }
}

impl Participant for ToyClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn start(&mut self, _ctx: &NodeContext) -> Result<Vec<Outbound>, ParticipantError> {
        Ok(if self.done() { Vec::new() } else { self.send_current() })
    }

    fn handle(&mut self, event: &Event, _ctx: &NodeContext) -> Result<Vec<Outbound>, ParticipantError> {
        if self.done() {
            return Ok(Vec::new());
        }
        match &event.kind {
            EventKind::Timeout { description, .. } if description == CLIENT_RETRY => {
                Ok(self.send_current())
            }
            EventKind::ClientReply { payload } => {
                if field_u64(&payload.body, "requestId") != Some(self.current) {
                    return Ok(Vec::new());
                }
                self.replies.insert(event.sender_id.clone());
                if self.replies.len() < self.reply_quorum {
                    return Ok(Vec::new());
                }
                self.replies.clear();
                self.current += 1;
                let mut out = vec![Outbound::ClearTimeouts {
                    description: Some(CLIENT_RETRY.to_string()),
                }];
                if !self.done() {
                    out.extend(self.send_current());
                }
                Ok(out)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn current_state(&self) -> StateValue {
        StateValue::map([
            ("completed", StateValue::from(self.current)),
            ("total", StateValue::from(self.total_requests)),
            ("replies", StateValue::from(self.replies.len())),
        ])
    }

    fn commit_log(&self) -> Option<&CommitLog> {
        None
    }
}

/// Builds `toy-consensus` or `toy-consensus-eager` scenarios.
pub struct ToyConsensusFactory {
    eager: bool,
}

impl ToyConsensusFactory {
    pub fn new() -> Self {
        Self { eager: false }
    }

    pub fn eager() -> Self {
        Self { eager: true }
    }
}

impl Default for ToyConsensusFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioFactory for ToyConsensusFactory {
    fn id(&self) -> &str {
        if self.eager {
            "toy-consensus-eager"
        } else {
            "toy-consensus"
        }
    }

    fn description(&self) -> &str {
        if self.eager {
            "Toy consensus committing on first proposal"
        } else {
            "Toy consensus with 2f+1 accept quorums"
        }
    }

    fn build(&self, parameters: &ScenarioParameters) -> Result<ScenarioSetup, ScenarioError> {
        if parameters.num_replicas == 0 {
            return Err(ScenarioError::InvalidParameters(
                "at least one replica is required".into(),
            ));
        }
        let replicas: Vec<NodeId> = (0..parameters.num_replicas).map(|i| format!("r{i}")).collect();

        let mut participants: Vec<Box<dyn Participant>> = replicas
            .iter()
            .map(|id| Box::new(ToyReplica::new(id.clone(), replicas.clone(), self.eager)) as Box<dyn Participant>)
            .collect();
        for i in 0..parameters.num_clients {
            participants.push(Box::new(ToyClient::new(
                format!("c{i}"),
                replicas.len(),
                u64::from(parameters.requests_per_client),
            )));
        }

        let mut catalog = FaultCatalog::new();
        for id in &replicas {
            catalog.register_fault(NetworkFault::isolate(id))?;
            catalog.register_fault(NetworkFault::heal(id))?;
        }
        catalog.register_fault(NetworkFault::heal_network())?;
        catalog.register_fault(NetworkFault::partition_override())?;
        catalog.register_mutator(Arc::new(FieldMutator::new(
            "propose-corrupt-value",
            "Corrupt proposed value",
            ["Propose"],
            "value",
            FieldOp::Replace(StateValue::from("corrupted")),
        )))?;
        catalog.register_mutator(Arc::new(FieldMutator::new(
            "propose-shift-seq",
            "Shift proposal slot",
            ["Propose"],
            "seq",
            FieldOp::Offset(1),
        )))?;

        Ok(ScenarioSetup {
            participants,
            catalog,
            predicates: vec![Box::new(ConsistencyPredicate), Box::new(IntegrityPredicate)],
        })
    }
}
