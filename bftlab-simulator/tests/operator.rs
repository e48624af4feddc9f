use std::sync::atomic::AtomicBool;

use bftlab_core::prelude::*;
use bftlab_simulator::replay_schedule;
use bftlab_simulator::scenario::{ScenarioController, ScenarioRegistry, ScenarioStatus};
use bftlab_simulator::scheduler::FifoStrategy;

fn controller(registry: &ScenarioRegistry, parameters: ScenarioParameters) -> ScenarioController {
    let mut scenario =
        ScenarioController::new("operator", registry, parameters, Box::new(FifoStrategy::new()))
            .unwrap();
    scenario.start().unwrap();
    scenario
}

fn queued_propose_to(scenario: &ScenarioController, recipient: &str) -> EventId {
    scenario
        .transport()
        .queued_events()
        .find(|e| {
            e.recipient_id == recipient && e.payload().is_some_and(|p| p.class == "Propose")
        })
        .map(|e| e.event_id)
        .unwrap()
}

#[test]
fn isolated_replica_receives_nothing_while_partitioned() {
    let registry = ScenarioRegistry::with_builtin();
    let mut scenario = controller(
        &registry,
        ScenarioParameters {
            budget: 2_000,
            ..ScenarioParameters::default()
        },
    );
    scenario.enable_fault("isolate(r3)").unwrap();

    for _ in 0..2_000 {
        let actions = scenario.available_actions();
        assert!(!actions.iter().any(|a| matches!(
            a,
            Action::DeliverMessageAction { sender_id, recipient_id, .. }
                if recipient_id == "r3" && ["r0", "r1", "r2"].contains(&sender_id.as_str())
        )));
        let Some(next) = actions
            .iter()
            .find(|a| matches!(a.kind(), ActionKind::DeliverMessage | ActionKind::TriggerTimeout))
        else {
            break;
        };
        if scenario.apply_manual(next).unwrap().is_some() {
            break;
        }
    }

    let logs = scenario.transport().commit_logs();
    for replica in ["r0", "r1", "r2"] {
        assert_eq!(logs[replica].len(), 1, "{replica}");
    }
    assert!(logs["r3"].is_empty());
    assert!(scenario
        .transport()
        .queued_events()
        .all(|e| e.recipient_id == "r3"));
    assert!(scenario.broken_invariants().is_empty());
}

#[test]
fn equivocating_primary_breaks_eager_consistency() {
    let registry = ScenarioRegistry::with_builtin();
    let parameters = ScenarioParameters {
        protocol: "toy-consensus-eager".into(),
        faulty_replicas: ["r0".to_string()].into(),
        ..ScenarioParameters::default()
    };
    let mut scenario = controller(&registry, parameters);

    let request = scenario
        .transport()
        .queued_events()
        .find(|e| e.recipient_id == "r0")
        .map(|e| e.event_id)
        .unwrap();
    assert_eq!(scenario.deliver(request).unwrap(), None);

    let to_r1 = queued_propose_to(&scenario, "r1");
    assert_eq!(scenario.mutate(to_r1, "propose-corrupt-value").unwrap(), None);
    let corrupted = scenario.transport().event(to_r1).unwrap().replaced_by.unwrap();
    assert_eq!(scenario.deliver(corrupted).unwrap(), None);

    let to_r2 = queued_propose_to(&scenario, "r2");
    assert_eq!(
        scenario.deliver(to_r2).unwrap(),
        Some(TerminationKind::InvariantBroken)
    );
    assert_eq!(
        scenario.status(),
        ScenarioStatus::Terminated(TerminationKind::InvariantBroken)
    );

    let schedule = scenario.schedule().unwrap().clone();
    assert_eq!(schedule.len(), 4);
    let broken = &schedule.broken_invariants()[0];
    assert_eq!(broken.id, "consistency");
    assert!(broken.explanation.contains("corrupted"));
    assert!(broken.explanation.contains("c0:0"));
    assert!(matches!(
        scenario.deliver(request),
        Err(bftlab_simulator::scenario::ScenarioError::NotRunning(_))
    ));

    let replayed = replay_schedule(&registry, &schedule).unwrap();
    assert_eq!(replayed, schedule);
}

#[test]
fn correct_senders_cannot_be_mutated() {
    let registry = ScenarioRegistry::with_builtin();
    let parameters = ScenarioParameters {
        faulty_replicas: ["r3".to_string()].into(),
        ..ScenarioParameters::default()
    };
    let mut scenario = controller(&registry, parameters);
    let request = scenario
        .transport()
        .queued_events()
        .find(|e| e.recipient_id == "r0")
        .map(|e| e.event_id)
        .unwrap();
    scenario.deliver(request).unwrap();

    let to_r1 = queued_propose_to(&scenario, "r1");
    assert!(scenario.mutate(to_r1, "propose-shift-seq").is_err());
    assert!(scenario.transport().event(to_r1).unwrap().is_queued());
    assert_eq!(scenario.actions().len(), 1);
}

#[test]
fn operator_fault_toggles_replay_identically() {
    let registry = ScenarioRegistry::with_builtin();
    let mut scenario = controller(
        &registry,
        ScenarioParameters {
            budget: 400,
            ..ScenarioParameters::default()
        },
    );
    assert_eq!(scenario.enable_fault("isolate(r3)").unwrap(), None);

    let request = scenario
        .transport()
        .queued_events()
        .find(|e| e.recipient_id == "r0")
        .map(|e| e.event_id)
        .unwrap();
    scenario.deliver(request).unwrap();

    let inject = scenario
        .available_actions()
        .into_iter()
        .find(|a| {
            a.event_id().is_some()
                && matches!(a, Action::FaultInjectionAction { fault_id: Some(f), .. } if f == "isolate(r3)")
        })
        .unwrap();
    assert_eq!(scenario.apply_manual(&inject).unwrap(), None);
    assert_eq!(scenario.disable_fault("isolate(r3)").unwrap(), None);
    assert!(!scenario.faults().is_active("isolate(r3)"));

    let schedule = scenario.run(&AtomicBool::new(false)).unwrap();
    let toggles: Vec<_> = schedule
        .actions()
        .iter()
        .filter_map(Action::fault_toggle)
        .collect();
    assert_eq!(toggles, vec![FaultToggle::Enable, FaultToggle::Disable]);

    let replayed = replay_schedule(&registry, &schedule).unwrap();
    assert_eq!(replayed.termination(), schedule.termination());
    assert_eq!(replayed.fingerprint().unwrap(), schedule.fingerprint().unwrap());
    assert_eq!(replayed, schedule);
}
