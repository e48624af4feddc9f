use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use bftlab_core::action::{Action, ActionKind, FaultToggle};
use bftlab_core::error::{FaultError, TransportError};
use bftlab_core::events::{EventId, NodeId};
use bftlab_core::faults::{FaultLayer, NetworkFault, GST_FAULT_ID};
use bftlab_core::schedule::{BrokenInvariant, ScenarioParameters, Schedule, TerminationKind};
use bftlab_core::time::VirtualClock;
use bftlab_core::transport::Transport;

use super::view::{ScenarioStatus, ScenarioView, ViewHandle};
use super::{ScenarioError, ScenarioRegistry};
use crate::invariants::{BoundedLivenessPredicate, GlobalSnapshot, GstMark, InvariantEngine};
use crate::scheduler::{ExplorationStrategy, ScenarioMetadata, StrategyMetadata};

/// Drives one scenario: `INITIALIZING -> RUNNING -> TERMINATED(kind)`.
///
/// Every step applies due automatic faults, asks the strategy for one
/// enabled action, applies it, evaluates the invariants on a fresh
/// snapshot and appends the action to the schedule. The schedule is frozen
/// when the scenario terminates.
///
/// With a GST grace period configured, a scenario that would stall before
/// global stabilization time declares GST as a recorded step instead, and
/// the bounded liveness predicate watches for progress afterwards.
pub struct ScenarioController {
    scenario_id: String,
    campaign_id: Option<String>,
    description: String,
    parameters: ScenarioParameters,
    transport: Transport,
    faults: FaultLayer,
    engine: InvariantEngine,
    strategy: Box<dyn ExplorationStrategy>,
    faulty: BTreeSet<NodeId>,
    replicas: Vec<NodeId>,
    gst: Option<GstMark>,
    actions: Vec<Action>,
    status: ScenarioStatus,
    step: u64,
    error: Option<String>,
    schedule: Option<Schedule>,
    view: ViewHandle,
}

impl ScenarioController {
    pub fn new(
        scenario_id: impl Into<String>,
        registry: &ScenarioRegistry,
        parameters: ScenarioParameters,
        strategy: Box<dyn ExplorationStrategy>,
    ) -> Result<Self, ScenarioError> {
        let scenario_id = scenario_id.into();
        let factory = registry.get(&parameters.protocol)?;
        let setup = factory.build(&parameters)?;

        let mut catalog = setup.catalog;
        for fault in &parameters.extra_faults {
            catalog.register_fault(fault.clone())?;
        }
        let mut predicates = setup.predicates;
        if let Some(grace_period) = parameters.gst_grace_period {
            catalog.register_fault(NetworkFault::global_stabilization())?;
            predicates.push(Box::new(BoundedLivenessPredicate::new(grace_period)));
        }

        let mut transport = Transport::new(VirtualClock::new(0));
        for participant in setup.participants {
            transport.add_participant(participant)?;
        }
        let replicas: Vec<NodeId> = transport.replica_ids().map(str::to_string).collect();
        if let Some(unknown) = parameters
            .faulty_replicas
            .iter()
            .find(|id| !replicas.contains(*id))
        {
            return Err(ScenarioError::InvalidParameters(format!(
                "faulty replica '{unknown}' is not part of the scenario"
            )));
        }
        let faulty = parameters.faulty_replicas.clone();

        let faults = FaultLayer::new(Arc::new(catalog))
            .with_faulty_nodes(faulty.iter().cloned())
            .with_automatic(parameters.automatic_faults.clone())?
            .with_schedulable(parameters.schedulable_faults.iter().cloned())?;
        let engine = InvariantEngine::new(predicates);

        let description = format!(
            "{} with {} replicas and {} clients, seed {}",
            factory.description(),
            parameters.num_replicas,
            parameters.num_clients,
            parameters.seed
        );
        let view = ViewHandle::new(ScenarioView {
            scenario_id: scenario_id.clone(),
            campaign_id: None,
            status: ScenarioStatus::Initializing,
            step: 0,
            queued: Vec::new(),
            actions: Vec::new(),
            stats: transport.stats(),
            active_faults: Vec::new(),
            predicates: Default::default(),
            broken_invariants: Vec::new(),
            states: transport.participant_states(),
            strategy: strategy.metadata(&scenario_id),
        });

        Ok(Self {
            scenario_id,
            campaign_id: None,
            description,
            parameters,
            transport,
            faults,
            engine,
            strategy,
            faulty,
            replicas,
            gst: None,
            actions: Vec::new(),
            status: ScenarioStatus::Initializing,
            step: 0,
            error: None,
            schedule: None,
            view,
        })
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    pub fn campaign_id(&self) -> Option<&str> {
        self.campaign_id.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &ScenarioParameters {
        &self.parameters
    }

    pub fn status(&self) -> ScenarioStatus {
        self.status
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn faults(&self) -> &FaultLayer {
        &self.faults
    }

    /// Where global stabilization time was reached, if it was.
    pub fn gst(&self) -> Option<GstMark> {
        self.gst
    }

    pub fn broken_invariants(&self) -> &[BrokenInvariant] {
        self.engine.broken()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The frozen schedule, once the scenario has terminated.
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn view(&self) -> ViewHandle {
        self.view.clone()
    }

    pub fn strategy_metadata(&self) -> StrategyMetadata {
        self.strategy.metadata(&self.scenario_id)
    }

    /// Currently enabled actions in the default ordering.
    pub fn available_actions(&mut self) -> Vec<Action> {
        self.transport.available_actions(&self.faults)
    }

    fn metadata(&self) -> ScenarioMetadata {
        ScenarioMetadata {
            scenario_id: self.scenario_id.clone(),
            step: self.step,
            budget: self.parameters.budget,
            seed: self.parameters.seed,
            replicas: self.replicas.clone(),
            after_gst: self.gst.is_some(),
        }
    }

    fn ensure_running(&self) -> Result<(), ScenarioError> {
        match self.status {
            ScenarioStatus::Running => Ok(()),
            ScenarioStatus::Initializing | ScenarioStatus::Terminated(_) => {
                Err(ScenarioError::NotRunning(self.scenario_id.clone()))
            }
        }
    }

    /// Runs the participants' start hooks and moves to `RUNNING`.
    pub fn start(&mut self) -> Result<(), ScenarioError> {
        if self.status != ScenarioStatus::Initializing {
            return Err(ScenarioError::AlreadyStarted(self.scenario_id.clone()));
        }
        let metadata = self.metadata();
        self.strategy.initialize_scenario(&metadata);
        self.status = ScenarioStatus::Running;
        info!(
            scenario_id = %self.scenario_id,
            protocol = %self.parameters.protocol,
            seed = self.parameters.seed,
            budget = self.parameters.budget,
            strategy = self.strategy.id(),
            "Scenario started"
        );

        if let Err(err) = self.transport.start() {
            self.terminate(TerminationKind::Errored, Some(err.to_string()));
            return Ok(());
        }
        if self.parameters.budget == 0 {
            self.terminate(TerminationKind::BudgetExhausted, None);
            return Ok(());
        }
        self.publish();
        Ok(())
    }

    /// Executes one scheduler step. Returns the termination kind once the
    /// scenario has terminated.
    pub fn step(&mut self) -> Result<Option<TerminationKind>, ScenarioError> {
        if let Some(kind) = self.status.termination() {
            return Ok(Some(kind));
        }
        self.ensure_running()?;
        if let Some(kind) = self.fire_automatic_faults() {
            return Ok(Some(kind));
        }

        let enabled = self.transport.available_actions(&self.faults);
        let metadata = self.metadata();
        if let Some(recorded) = self.strategy.pending_toggle(&metadata) {
            return Ok(self.replay_toggle(&recorded));
        }
        if enabled.is_empty() {
            return Ok(self.stall());
        }

        let action = match self.strategy.next_action(&enabled, &metadata) {
            Ok(Some(action)) => action,
            Ok(None) => return Ok(self.stall()),
            Err(err) => {
                return Ok(Some(self.terminate(TerminationKind::Errored, Some(err.to_string()))))
            }
        };
        if !enabled.contains(&action) {
            let reason = format!("strategy chose {action}, which is not enabled");
            return Ok(Some(self.terminate(TerminationKind::Errored, Some(reason))));
        }

        Ok(self.complete_step(action))
    }

    /// Alias of [`step`](Self::step) for operators advancing the scheduler by hand.
    pub fn advance(&mut self) -> Result<Option<TerminationKind>, ScenarioError> {
        self.step()
    }

    /// Steps until termination or until `cancel` is raised between steps.
    /// A cancelled scenario produces no schedule.
    #[instrument(skip_all, fields(scenario_id = %self.scenario_id))]
    pub fn run(&mut self, cancel: &AtomicBool) -> Result<Schedule, ScenarioError> {
        if self.status == ScenarioStatus::Initializing {
            self.start()?;
        }
        while self.status.termination().is_none() {
            if cancel.load(Ordering::Acquire) {
                info!(step = self.step, "Scenario cancelled");
                return Err(ScenarioError::Cancelled(self.scenario_id.clone()));
            }
            self.step()?;
        }
        self.schedule
            .clone()
            .ok_or_else(|| ScenarioError::NotRunning(self.scenario_id.clone()))
    }

    /// Applies an operator-chosen action. It must match an enabled action,
    /// ignoring `action_id`; otherwise the scenario is left untouched.
    pub fn apply_manual(&mut self, action: &Action) -> Result<Option<TerminationKind>, ScenarioError> {
        self.ensure_running()?;
        if let Some(kind) = self.fire_automatic_faults() {
            return Ok(Some(kind));
        }
        let enabled = self.transport.available_actions(&self.faults);
        let Some(matched) = enabled.into_iter().find(|a| a.same_choice(action)) else {
            return Err(ScenarioError::ActionNotEnabled(action.to_string()));
        };
        Ok(self.complete_step(matched))
    }

    /// Delivers a queued message or fires a queued timeout.
    pub fn deliver(&mut self, event_id: EventId) -> Result<Option<TerminationKind>, ScenarioError> {
        self.apply_event_action(event_id, |a| {
            matches!(a.kind(), ActionKind::DeliverMessage | ActionKind::TriggerTimeout)
        })
    }

    pub fn drop_event(&mut self, event_id: EventId) -> Result<Option<TerminationKind>, ScenarioError> {
        self.apply_event_action(event_id, |a| a.kind() == ActionKind::DropMessage)
    }

    pub fn mutate(
        &mut self,
        event_id: EventId,
        mutator_id: &str,
    ) -> Result<Option<TerminationKind>, ScenarioError> {
        if self.faults.catalog().mutator(mutator_id).is_none() {
            return Err(FaultError::UnknownMutator(mutator_id.to_string()).into());
        }
        self.apply_event_action(event_id, |a| {
            matches!(a, Action::FaultInjectionAction { mutator_id: Some(m), .. } if m == mutator_id)
        })
    }

    /// Activates a fault outside the scheduler. The toggle takes a step and
    /// is recorded, so a replay applies it at the same point.
    pub fn enable_fault(&mut self, fault_id: &str) -> Result<Option<TerminationKind>, ScenarioError> {
        self.toggle_fault(fault_id, FaultToggle::Enable)
    }

    /// Deactivates a fault outside the scheduler. Recorded like
    /// [`enable_fault`](Self::enable_fault).
    pub fn disable_fault(&mut self, fault_id: &str) -> Result<Option<TerminationKind>, ScenarioError> {
        self.toggle_fault(fault_id, FaultToggle::Disable)
    }

    fn toggle_fault(
        &mut self,
        fault_id: &str,
        toggle: FaultToggle,
    ) -> Result<Option<TerminationKind>, ScenarioError> {
        self.ensure_running()?;
        if self.faults.catalog().fault(fault_id).is_none() {
            return Err(FaultError::UnknownFault(fault_id.to_string()).into());
        }
        if let Some(kind) = self.fire_automatic_faults() {
            return Ok(Some(kind));
        }
        // A replay derives the enabled set before taking the toggle; the
        // action ids must advance the same way here.
        self.transport.available_actions(&self.faults);
        let action = self.toggle_action(fault_id, toggle)?;
        Ok(self.complete_step(action))
    }

    fn toggle_action(&mut self, fault_id: &str, toggle: FaultToggle) -> Result<Action, FaultError> {
        let fault = self
            .faults
            .catalog()
            .fault(fault_id)
            .ok_or_else(|| FaultError::UnknownFault(fault_id.to_string()))?;
        let node_id = fault.behavior.target_node().map(str::to_string);
        Ok(Action::FaultInjectionAction {
            action_id: self.transport.allocate_action_id(),
            event_id: None,
            fault_id: Some(fault_id.to_string()),
            mutator_id: None,
            node_id,
            toggle: Some(toggle),
        })
    }

    /// Nothing was chosen. Before GST this declares GST as the step's
    /// action; otherwise the scenario stalls.
    fn stall(&mut self) -> Option<TerminationKind> {
        let declare_gst = self.parameters.gst_grace_period.is_some() && !self.faults.gst_reached();
        if !declare_gst {
            return Some(self.terminate(TerminationKind::Stalled, None));
        }
        info!(scenario_id = %self.scenario_id, step = self.step, "Declaring GST");
        match self.toggle_action(GST_FAULT_ID, FaultToggle::Enable) {
            Ok(action) => self.complete_step(action),
            Err(err) => Some(self.terminate(TerminationKind::Errored, Some(err.to_string()))),
        }
    }

    /// Re-applies a recorded operator toggle. The rebuilt action must make
    /// the same choice as the recorded one.
    fn replay_toggle(&mut self, recorded: &Action) -> Option<TerminationKind> {
        let rebuilt = match (recorded, recorded.fault_toggle()) {
            (
                Action::FaultInjectionAction {
                    event_id: None,
                    fault_id: Some(fault_id),
                    ..
                },
                Some(toggle),
            ) => self.toggle_action(fault_id, toggle).map_err(|err| err.to_string()),
            _ => Err(format!("{recorded} is not a fault toggle")),
        };
        match rebuilt {
            Ok(action) if action.same_choice(recorded) => self.complete_step(action),
            Ok(action) => {
                let reason = format!("recorded toggle {recorded} rebuilt as {action}");
                Some(self.terminate(TerminationKind::Errored, Some(reason)))
            }
            Err(reason) => Some(self.terminate(TerminationKind::Errored, Some(reason))),
        }
    }

    /// Enables the automatic faults due at the current step. Each fires once.
    fn fire_automatic_faults(&mut self) -> Option<TerminationKind> {
        for fault_id in self.faults.automatic_faults(self.step) {
            debug!(
                scenario_id = %self.scenario_id,
                step = self.step,
                fault_id = %fault_id,
                "Automatic fault due"
            );
            if let Err(err) = self.faults.enable(&fault_id, &mut self.transport) {
                return Some(self.terminate(TerminationKind::Errored, Some(err.to_string())));
            }
        }
        None
    }

    fn apply_event_action<F>(
        &mut self,
        event_id: EventId,
        wanted: F,
    ) -> Result<Option<TerminationKind>, ScenarioError>
    where
        F: Fn(&Action) -> bool,
    {
        self.ensure_running()?;
        if let Some(kind) = self.fire_automatic_faults() {
            return Ok(Some(kind));
        }
        let event = self
            .transport
            .event(event_id)
            .ok_or(TransportError::EventNotFound(event_id))?;
        if !event.is_queued() {
            return Err(TransportError::EventNotQueued {
                event_id,
                status: event.status,
            }
            .into());
        }
        let enabled = self.transport.available_actions(&self.faults);
        let matched = enabled
            .into_iter()
            .find(|a| a.event_id() == Some(event_id) && wanted(a));
        match matched {
            Some(action) => Ok(self.complete_step(action)),
            None => Err(ScenarioError::ActionNotEnabled(format!(
                "for event {event_id}"
            ))),
        }
    }

    /// Applies an enabled action, evaluates invariants and records the
    /// action. A participant failure still records the action so that a
    /// replay reproduces it.
    fn complete_step(&mut self, action: Action) -> Option<TerminationKind> {
        debug!(scenario_id = %self.scenario_id, step = self.step, %action, "Applying action");
        let applied = self.apply(&action);
        self.actions.push(action);
        self.step += 1;

        if let Err(err) = applied {
            return Some(self.terminate(TerminationKind::Errored, Some(err.to_string())));
        }

        let mut snapshot = GlobalSnapshot::capture(self.step, &self.transport, &self.faulty);
        if self.gst.is_none() && self.faults.gst_reached() {
            self.gst = Some(GstMark {
                step: self.step,
                committed: snapshot.committed(),
            });
        }
        snapshot = snapshot.with_gst(self.gst);
        let evaluation = self.engine.evaluate_all(&snapshot);
        if !evaluation.newly_broken.is_empty() {
            return Some(self.terminate(TerminationKind::InvariantBroken, None));
        }
        if self.step >= self.parameters.budget {
            return Some(self.terminate(TerminationKind::BudgetExhausted, None));
        }
        self.publish();
        None
    }

    fn apply(&mut self, action: &Action) -> Result<(), ScenarioError> {
        match action {
            Action::DeliverMessageAction { event_id, .. }
            | Action::TriggerTimeoutAction { event_id, .. } => {
                self.transport.deliver(*event_id)?;
            }
            Action::DropMessageAction { event_id, .. } => self.transport.drop_event(*event_id)?,
            Action::FaultInjectionAction {
                event_id: None,
                fault_id: Some(fault_id),
                toggle: Some(FaultToggle::Disable),
                ..
            } => self.faults.disable(fault_id, &mut self.transport)?,
            Action::FaultInjectionAction {
                event_id: Some(event_id),
                mutator_id: Some(mutator_id),
                ..
            } => {
                self.faults.mutate(*event_id, mutator_id, &mut self.transport)?;
            }
            Action::FaultInjectionAction {
                event_id: Some(event_id),
                fault_id: Some(fault_id),
                ..
            } => self
                .faults
                .apply_to_event(fault_id, *event_id, &mut self.transport)?,
            Action::FaultInjectionAction {
                event_id: None,
                fault_id: Some(fault_id),
                ..
            } => self.faults.enable(fault_id, &mut self.transport)?,
            Action::FaultInjectionAction { .. } => {
                return Err(ScenarioError::MalformedAction(action.to_string()))
            }
        }
        Ok(())
    }

    fn terminate(&mut self, kind: TerminationKind, error: Option<String>) -> TerminationKind {
        self.status = ScenarioStatus::Terminated(kind);
        let metadata = self.metadata();
        self.strategy.finish_scenario(&metadata, kind);

        match &error {
            Some(reason) => error!(
                scenario_id = %self.scenario_id,
                step = self.step,
                %reason,
                "Scenario errored"
            ),
            None => info!(
                scenario_id = %self.scenario_id,
                step = self.step,
                termination = %kind,
                broken = self.engine.broken().len(),
                "Scenario terminated"
            ),
        }

        self.error = error.clone();
        self.schedule = Some(Schedule::new(
            self.scenario_id.clone(),
            self.parameters.clone(),
            self.actions.clone(),
            self.engine.broken().to_vec(),
            kind,
            error,
        ));
        self.publish();
        kind
    }

    fn publish(&self) {
        self.view.publish(ScenarioView {
            scenario_id: self.scenario_id.clone(),
            campaign_id: self.campaign_id.clone(),
            status: self.status,
            step: self.step,
            queued: self.transport.queued_events().cloned().collect(),
            actions: self.actions.clone(),
            stats: self.transport.stats(),
            active_faults: self.faults.active_faults().map(str::to_string).collect(),
            predicates: self.engine.last_results().clone(),
            broken_invariants: self.engine.broken().to_vec(),
            states: self.transport.participant_states(),
            strategy: self.strategy.metadata(&self.scenario_id),
        });
    }
}

#[cfg(test)]
mod tests {
    use bftlab_core::schedule::{StrategyKind, StrategyParameters};
    use bftlab_core::value::StateValue;
    use tracing_test::traced_test;

    use super::*;
    use crate::scheduler::{FifoStrategy, StrategyFactory};

    fn parameters() -> ScenarioParameters {
        ScenarioParameters {
            budget: 500,
            ..ScenarioParameters::default()
        }
    }

    fn controller(parameters: ScenarioParameters) -> ScenarioController {
        let registry = ScenarioRegistry::with_builtin();
        ScenarioController::new("c0-s0", &registry, parameters, Box::new(FifoStrategy::new()))
            .unwrap()
    }

    #[test]
    fn rejects_unknown_protocol_and_faulty_replica() {
        let registry = ScenarioRegistry::with_builtin();
        let unknown = ScenarioParameters {
            protocol: "paxos".into(),
            ..ScenarioParameters::default()
        };
        assert!(matches!(
            ScenarioController::new("s", &registry, unknown, Box::new(FifoStrategy::new())),
            Err(ScenarioError::UnknownProtocol(_))
        ));

        let bad_faulty = ScenarioParameters {
            faulty_replicas: ["r9".to_string()].into(),
            ..ScenarioParameters::default()
        };
        assert!(matches!(
            ScenarioController::new("s", &registry, bad_faulty, Box::new(FifoStrategy::new())),
            Err(ScenarioError::InvalidParameters(_))
        ));
    }

    #[test]
    fn operator_calls_require_running_scenario() {
        let mut scenario = controller(parameters());
        assert!(matches!(scenario.step(), Err(ScenarioError::NotRunning(_))));
        assert!(matches!(
            scenario.enable_fault("heal-network"),
            Err(ScenarioError::NotRunning(_))
        ));
        scenario.start().unwrap();
        assert!(matches!(scenario.start(), Err(ScenarioError::AlreadyStarted(_))));
    }

    #[test]
    fn rejected_manual_action_leaves_state_unchanged() {
        let mut scenario = controller(parameters());
        scenario.start().unwrap();
        let before = scenario.transport().stats();

        let bogus = Action::DropMessageAction {
            action_id: 0,
            event_id: 999,
            sender_id: "c0".into(),
            recipient_id: "r0".into(),
        };
        assert!(matches!(
            scenario.apply_manual(&bogus),
            Err(ScenarioError::ActionNotEnabled(_))
        ));
        assert!(matches!(
            scenario.deliver(999),
            Err(ScenarioError::Transport(TransportError::EventNotFound(999)))
        ));
        assert!(matches!(
            scenario.mutate(0, "nope"),
            Err(ScenarioError::Fault(FaultError::UnknownMutator(_)))
        ));
        assert_eq!(scenario.transport().stats(), before);
        assert!(scenario.actions().is_empty());
    }

    #[test]
    fn manual_actions_and_fault_toggles_are_recorded() {
        let mut scenario = controller(parameters());
        scenario.start().unwrap();
        scenario.enable_fault("isolate(r3)").unwrap();
        assert!(scenario.faults().is_active("isolate(r3)"));

        let request = scenario
            .transport()
            .queued_events()
            .find(|e| e.recipient_id == "r0")
            .map(|e| e.event_id)
            .unwrap();
        scenario.deliver(request).unwrap();
        scenario.disable_fault("isolate(r3)").unwrap();

        let actions = scenario.actions();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].fault_toggle(), Some(FaultToggle::Enable));
        assert_eq!(actions[1].event_id(), Some(request));
        assert_eq!(actions[2].fault_toggle(), Some(FaultToggle::Disable));
        assert!(actions.windows(2).all(|w| w[0].action_id() < w[1].action_id()));
        let view = scenario.view().latest();
        assert_eq!(view.step, 3);
        assert!(view.active_faults.is_empty());
        assert_eq!(view.status, ScenarioStatus::Running);
        assert!(scenario.transport().have_connectivity("r0", "r3"));
    }

    #[test]
    fn unknown_fault_toggle_is_rejected_without_a_step() {
        let mut scenario = controller(parameters());
        scenario.start().unwrap();
        assert!(matches!(
            scenario.disable_fault("isolate(r9)"),
            Err(ScenarioError::Fault(FaultError::UnknownFault(_)))
        ));
        assert_eq!(scenario.steps_taken(), 0);
    }

    #[test]
    fn fifo_run_commits_on_every_replica() {
        let mut scenario = controller(parameters());
        let schedule = scenario.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(schedule.termination(), TerminationKind::Stalled);
        assert!(!schedule.is_buggy());

        let logs = scenario.transport().commit_logs();
        assert_eq!(logs.len(), 4);
        assert!(logs.values().all(|log| log.len() == 1));
        assert!(scenario.transport().stats().is_conserved());
        assert_eq!(
            scenario.view().latest().status,
            ScenarioStatus::Terminated(TerminationKind::Stalled)
        );
    }

    #[test]
    fn budget_exhaustion_caps_schedule_length() {
        let mut scenario = controller(ScenarioParameters {
            budget: 5,
            ..ScenarioParameters::default()
        });
        let schedule = scenario.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(schedule.termination(), TerminationKind::BudgetExhausted);
        assert_eq!(schedule.len(), 5);
        assert_eq!(scenario.step().unwrap(), Some(TerminationKind::BudgetExhausted));
    }

    #[test]
    fn cancelled_run_produces_no_schedule() {
        let mut scenario = controller(parameters());
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            scenario.run(&cancel),
            Err(ScenarioError::Cancelled(_))
        ));
        assert!(scenario.schedule().is_none());
    }

    #[test]
    fn automatic_fault_fires_before_first_step() {
        let mut scenario = controller(ScenarioParameters {
            automatic_faults: vec![bftlab_core::faults::AutomaticFault::new(0, "isolate(r2)")],
            ..parameters()
        });
        scenario.start().unwrap();
        scenario.step().unwrap();
        assert!(scenario.faults().is_active("isolate(r2)"));
        assert!(!scenario.transport().have_connectivity("r0", "r2"));
    }

    #[test]
    fn strategy_metadata_is_exposed_on_the_view() {
        let factory = StrategyFactory::new(StrategyParameters {
            kind: StrategyKind::Random,
            ..StrategyParameters::default()
        })
        .unwrap();
        let registry = ScenarioRegistry::with_builtin();
        let mut scenario =
            ScenarioController::new("c0-s1", &registry, parameters(), factory.create(11)).unwrap();
        scenario.run(&AtomicBool::new(false)).unwrap();

        let view = scenario.view().latest();
        assert_eq!(view.strategy.strategy, "random");
        assert_eq!(view.strategy.details.get("seed"), Some(&StateValue::from(11_u64)));
        assert_eq!(view.actions.len() as u64, view.strategy.decisions);
        assert!(view.predicates.values().all(|result| result.satisfied));
    }

    #[test]
    fn gst_is_declared_instead_of_stalling() {
        let mut scenario = controller(ScenarioParameters {
            gst_grace_period: Some(50),
            ..parameters()
        });
        let schedule = scenario.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(schedule.termination(), TerminationKind::Stalled);
        assert!(!schedule.is_buggy());

        let last = schedule.actions().last().unwrap();
        assert_eq!(last.fault_toggle(), Some(FaultToggle::Enable));
        assert!(matches!(
            last,
            Action::FaultInjectionAction { fault_id: Some(id), .. } if id == GST_FAULT_ID
        ));
        let gst = scenario.gst().unwrap();
        assert_eq!(gst.step, schedule.len() as u64);
        assert_eq!(gst.committed, 4);
        assert!(scenario.view().latest().predicates["bounded-liveness"].satisfied);
    }

    #[test]
    fn no_commit_within_grace_period_breaks_liveness() {
        let mut scenario = controller(ScenarioParameters {
            gst_grace_period: Some(1),
            ..parameters()
        });
        scenario.start().unwrap();
        scenario.enable_fault(GST_FAULT_ID).unwrap();
        assert_eq!(scenario.gst().map(|g| g.step), Some(1));

        let schedule = scenario.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(schedule.termination(), TerminationKind::InvariantBroken);
        assert_eq!(schedule.len(), 3);
        assert_eq!(scenario.broken_invariants()[0].id, "bounded-liveness");
    }

    #[traced_test]
    #[test]
    fn termination_is_logged() {
        let mut scenario = controller(ScenarioParameters {
            budget: 3,
            ..ScenarioParameters::default()
        });
        scenario.run(&AtomicBool::new(false)).unwrap();
        assert!(logs_contain("Scenario started"));
        assert!(logs_contain("Scenario terminated"));
    }
}
