//! Property tests for transport bookkeeping.
//!
//! Properties tested:
//! - Every created event has exactly one status
//! - Terminal events never return to `QUEUED`
//! - Mutated events always link to a queued-or-later replacement

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use bftlab_core::prelude::*;

const NODES: [&str; 3] = ["r0", "r1", "r2"];

/// Forwards every `Ping` to the next node and commits everything else.
struct Relay {
    id: String,
    next: String,
    log: CommitLog,
}

impl Participant for Relay {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        Role::Replica
    }

    fn handle(&mut self, event: &Event, _ctx: &NodeContext) -> Result<Vec<Outbound>, ParticipantError> {
        match event.payload().map(|p| p.class.as_str()) {
            Some("Ping") => Ok(vec![Outbound::message(
                self.next.clone(),
                "Pong",
                StateValue::map([("hop", 1_i64)]),
            )]),
            _ => {
                self.log.push(StateValue::from(event.event_id))?;
                Ok(Vec::new())
            }
        }
    }

    fn current_state(&self) -> StateValue {
        StateValue::Null
    }

    fn commit_log(&self) -> Option<&CommitLog> {
        Some(&self.log)
    }
}

#[derive(Clone, Debug)]
enum Op {
    Send(usize, usize),
    Deliver(usize),
    Drop(usize),
    Mutate(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..NODES.len(), 0..NODES.len()).prop_map(|(a, b)| Op::Send(a, b)),
        any::<usize>().prop_map(Op::Deliver),
        any::<usize>().prop_map(Op::Drop),
        any::<usize>().prop_map(Op::Mutate),
    ]
}

fn transport() -> Transport {
    let mut transport = Transport::new(VirtualClock::new(0));
    for (i, id) in NODES.iter().enumerate() {
        transport
            .add_participant(Box::new(Relay {
                id: id.to_string(),
                next: NODES[(i + 1) % NODES.len()].to_string(),
                log: CommitLog::new(),
            }))
            .unwrap();
    }
    transport
}

fn pick(transport: &Transport, index: usize) -> Option<EventId> {
    let queued: Vec<EventId> = transport.queued_events().map(|e| e.event_id).collect();
    if queued.is_empty() {
        None
    } else {
        Some(queued[index % queued.len()])
    }
}

proptest! {
    #[test]
    fn statuses_are_conserved_and_monotonic(ops in prop::collection::vec(op(), 1..60)) {
        let mut transport = transport();
        let mutator: Arc<dyn Mutator> = Arc::new(FieldMutator::new(
            "hop-shift", "Shift hop", ["Pong"], "hop", FieldOp::Offset(1),
        ));
        let mut seen: BTreeMap<EventId, EventStatus> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Send(a, b) => {
                    transport
                        .enqueue(
                            NODES[a],
                            NODES[b],
                            EventKind::Message { payload: Payload::new("Ping", StateValue::Null) },
                        )
                        .unwrap();
                }
                Op::Deliver(i) => {
                    if let Some(id) = pick(&transport, i) {
                        transport.deliver(id).unwrap();
                    }
                }
                Op::Drop(i) => {
                    if let Some(id) = pick(&transport, i) {
                        transport.drop_event(id).unwrap();
                    }
                }
                Op::Mutate(i) => {
                    if let Some(id) = pick(&transport, i) {
                        // Only `Pong` bodies carry the field, anything else is rejected
                        // without touching the event.
                        let before = transport.stats();
                        if transport.mutate(id, mutator.as_ref()).is_err() {
                            prop_assert_eq!(before, transport.stats());
                        }
                    }
                }
            }

            let stats = transport.stats();
            prop_assert!(stats.is_conserved());
            for event in transport.events() {
                if let Some(previous) = seen.get(&event.event_id) {
                    if *previous != EventStatus::Queued {
                        prop_assert_eq!(*previous, event.status);
                    }
                }
                if event.status == EventStatus::Mutated {
                    let replacement = event.replaced_by.and_then(|id| transport.event(id));
                    prop_assert!(replacement.is_some());
                }
                seen.insert(event.event_id, event.status);
            }
        }
    }
}
