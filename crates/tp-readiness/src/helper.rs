//! Feature readiness engine
//!
//! A [`ReadinessHelper`] owns the [`Introspectables`] of one proxy object
//! and turns "make these features ready" requests into the minimal set of
//! introspection routines, started in dependency order. Each feature's
//! routine runs at most once at a time; requests overlapping an in-flight
//! feature attach to its outcome.
//!
//! The helper is single-threaded. Introspection routines and completion
//! observers may call back into the helper; such re-entrant calls are
//! folded into the running evaluation pass instead of recursing.
//!
//! The dependency graph must be acyclic. Cycles are not detected and
//! leave the affected requests pending forever.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

use tp_core::{Error, Feature, Features, OperationError, Result, Status};

use crate::introspectable::{IntrospectFn, Introspectables};
use crate::operation::{Outcome, PendingOperation};

struct PendingRequest {
    targets: Features,
    closure: Features,
    operation: PendingOperation,
}

enum DependencyState {
    Ready,
    Waiting,
    Failed(OperationError),
}

#[derive(Default)]
struct Effects {
    start: Vec<(Feature, IntrospectFn)>,
    finish: Vec<(PendingOperation, Outcome)>,
}

struct HelperState {
    object: String,
    introspectables: Introspectables,
    current_status: Status,
    pending_status: Option<Status>,
    interfaces: BTreeSet<String>,
    requested: Features,
    satisfied: Features,
    vacuous: Features,
    missing: BTreeMap<Feature, OperationError>,
    in_flight: Features,
    pending: Vec<PendingRequest>,
    invalidated: Option<OperationError>,
    iterating: bool,
    dirty: bool,
}

impl HelperState {
    fn core_features(&self) -> Features {
        self.introspectables
            .keys()
            .filter(|feature| feature.is_core())
            .copied()
            .collect()
    }

    fn supports(&self, feature: &Feature) -> bool {
        self.introspectables.get(feature).is_some_and(|intro| {
            intro
                .depends_on_interfaces()
                .iter()
                .all(|iface| self.interfaces.contains(iface))
        })
    }

    fn dependency_state(&self, dependency: &Feature) -> DependencyState {
        if self.satisfied.contains(dependency) {
            return DependencyState::Ready;
        }
        if !self.introspectables.contains_key(dependency) {
            return DependencyState::Failed(OperationError::invalid_argument(format!(
                "dependency {} is not registered on {}",
                dependency, self.object
            )));
        }
        if !self.supports(dependency) {
            // Not applicable here, which satisfies dependents vacuously
            return DependencyState::Ready;
        }
        match self.missing.get(dependency) {
            Some(err) => DependencyState::Failed(err.clone()),
            None => DependencyState::Waiting,
        }
    }

    /// Requested features plus everything they transitively depend on
    fn dependency_closure(&self, targets: &Features) -> std::result::Result<Features, OperationError> {
        let mut closure = Features::new();
        let mut queue: Vec<Feature> = targets.iter().copied().collect();

        while let Some(feature) = queue.pop() {
            if !closure.insert(feature) {
                continue;
            }
            let Some(intro) = self.introspectables.get(&feature) else {
                return Err(OperationError::invalid_argument(format!(
                    "feature {} is not registered on {}",
                    feature, self.object
                )));
            };
            if !self.supports(&feature) {
                continue;
            }
            queue.extend(
                intro
                    .depends_on_features()
                    .iter()
                    .filter(|dep| !closure.contains(*dep))
                    .copied(),
            );
        }

        Ok(closure)
    }

    /// Terminal outcome of a request, judged over its whole closure.
    ///
    /// Targets must stay supported. Closure features whose interfaces are
    /// missing count as satisfied; any other closure feature must be ready.
    fn request_outcome(&self, req: &PendingRequest) -> Option<Outcome> {
        if let Some(feature) = req.targets.iter().find(|f| !self.supports(f)) {
            return Some(Err(OperationError::not_implemented(format!(
                "{} does not implement the interfaces required by {}",
                self.object, feature
            ))));
        }

        let mut settled = true;
        for feature in req.closure.iter().filter(|f| self.supports(f)) {
            if let Some(err) = self.missing.get(feature) {
                return Some(Err(err.clone()));
            }
            settled &= self.satisfied.contains(feature);
        }
        settled.then_some(Ok(()))
    }

    /// Drop ready marks of features whose interfaces went away
    fn prune_unsupported(&mut self) {
        let unsupported: Vec<Feature> = self
            .satisfied
            .iter()
            .filter(|feature| !self.supports(feature))
            .copied()
            .collect();
        for feature in unsupported {
            debug!(object = %self.object, feature = %feature, "Interface gone, feature no longer ready");
            self.satisfied.remove(&feature);
            self.vacuous.remove(&feature);
        }
    }

    fn apply_status(&mut self, status: Status) {
        self.current_status = status;
        self.pending_status = None;

        let reset: Vec<Feature> = self
            .vacuous
            .iter()
            .filter(|feature| {
                self.introspectables
                    .get(*feature)
                    .is_some_and(|intro| intro.makes_sense_for(status))
            })
            .copied()
            .collect();

        for feature in &reset {
            self.vacuous.remove(feature);
            self.satisfied.remove(feature);
        }

        info!(
            object = %self.object,
            status = %status,
            reset = reset.len(),
            "Status changed"
        );
    }

    fn compute_effects(&mut self) -> Effects {
        let mut effects = Effects::default();

        if let Some(err) = &self.invalidated {
            effects.finish = self
                .pending
                .drain(..)
                .map(|req| (req.operation, Err(err.clone())))
                .collect();
            return effects;
        }

        // Interfaces may have appeared since a request was made, widening
        // its closure.
        for i in 0..self.pending.len() {
            if let Ok(closure) = self.dependency_closure(&self.pending[i].targets) {
                self.requested.extend(closure.iter().copied());
                self.pending[i].closure = closure;
            }
        }

        loop {
            let mut changed = false;
            let candidates: Vec<Feature> = self
                .requested
                .iter()
                .filter(|&feature| {
                    !self.satisfied.contains(feature)
                        && !self.in_flight.contains(feature)
                        && !self.missing.contains_key(feature)
                        && self.supports(feature)
                })
                .copied()
                .collect();

            for feature in candidates {
                let Some(intro) = self.introspectables.get(&feature) else {
                    continue;
                };

                let mut waiting = false;
                let mut failure = None;
                for dependency in intro.depends_on_features() {
                    match self.dependency_state(dependency) {
                        DependencyState::Ready => {}
                        DependencyState::Waiting => waiting = true,
                        DependencyState::Failed(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }

                if let Some(err) = failure {
                    debug!(
                        object = %self.object,
                        feature = %feature,
                        error = %err,
                        "Dependency failed, failing feature"
                    );
                    self.missing.insert(feature, err);
                    changed = true;
                    continue;
                }
                if waiting {
                    continue;
                }

                if !intro.makes_sense_for(self.current_status) {
                    debug!(
                        object = %self.object,
                        feature = %feature,
                        status = %self.current_status,
                        "Feature does not apply to current status, marking ready"
                    );
                    self.satisfied.insert(feature);
                    self.vacuous.insert(feature);
                    changed = true;
                    continue;
                }

                debug!(object = %self.object, feature = %feature, "Starting introspection");
                self.in_flight.insert(feature);
                effects.start.push((feature, intro.introspect_fn()));
            }

            if !changed {
                break;
            }
        }

        for req in std::mem::take(&mut self.pending) {
            match self.request_outcome(&req) {
                Some(outcome) => effects.finish.push((req.operation, outcome)),
                None => self.pending.push(req),
            }
        }

        effects
    }
}

/// Readiness engine of one proxy object.
///
/// Cloning yields another handle to the same engine; introspection
/// closures should hold a [`WeakReadinessHelper`] instead.
#[derive(Clone)]
pub struct ReadinessHelper {
    state: Rc<RefCell<HelperState>>,
}

/// Non-owning handle to a [`ReadinessHelper`]
#[derive(Clone)]
pub struct WeakReadinessHelper {
    state: Weak<RefCell<HelperState>>,
}

impl WeakReadinessHelper {
    pub fn upgrade(&self) -> Option<ReadinessHelper> {
        self.state.upgrade().map(|state| ReadinessHelper { state })
    }
}

impl ReadinessHelper {
    /// Create an engine for the object named `object` (used in logs and
    /// error messages), starting at `status`.
    pub fn new(object: impl Into<String>, status: Status) -> Self {
        Self {
            state: Rc::new(RefCell::new(HelperState {
                object: object.into(),
                introspectables: Introspectables::new(),
                current_status: status,
                pending_status: None,
                interfaces: BTreeSet::new(),
                requested: Features::new(),
                satisfied: Features::new(),
                vacuous: Features::new(),
                missing: BTreeMap::new(),
                in_flight: Features::new(),
                pending: Vec::new(),
                invalidated: None,
                iterating: false,
                dirty: false,
            })),
        }
    }

    pub fn downgrade(&self) -> WeakReadinessHelper {
        WeakReadinessHelper {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Register feature descriptors.
    ///
    /// A feature that was already requested cannot be registered again;
    /// the whole batch is rejected in that case.
    pub fn add_introspectables(&self, introspectables: Introspectables) -> Result<()> {
        let mut state = self.state.borrow_mut();

        if let Some(feature) = introspectables
            .keys()
            .find(|feature| state.requested.contains(*feature))
        {
            warn!(
                object = %state.object,
                feature = %feature,
                "Introspectable registered after the feature was requested"
            );
            return Err(Error::contract(format!(
                "feature {} of {} was already requested",
                feature, state.object
            )));
        }

        for (feature, introspectable) in introspectables {
            if state.introspectables.insert(feature, introspectable).is_some() {
                debug!(object = %state.object, feature = %feature, "Replaced introspectable");
            }
        }
        Ok(())
    }

    /// Ask for `features` (plus the object's core features) to become ready.
    ///
    /// Fails fast for unregistered features, features whose interfaces
    /// are missing, and invalidated objects. Features that failed before
    /// are introspected again.
    pub fn become_ready(&self, features: &Features) -> PendingOperation {
        let operation = {
            let mut state = self.state.borrow_mut();

            if let Some(err) = &state.invalidated {
                debug!(object = %state.object, "become_ready on invalidated object");
                return PendingOperation::failed(err.clone());
            }

            let mut targets = features.clone();
            targets.extend(state.core_features());

            for feature in &targets {
                if !state.introspectables.contains_key(feature) {
                    return PendingOperation::failed(OperationError::invalid_argument(format!(
                        "feature {} is not registered on {}",
                        feature, state.object
                    )));
                }
                if !state.supports(feature) {
                    return PendingOperation::failed(OperationError::not_implemented(format!(
                        "{} does not implement the interfaces required by {}",
                        state.object, feature
                    )));
                }
            }

            let closure = match state.dependency_closure(&targets) {
                Ok(closure) => closure,
                Err(err) => return PendingOperation::failed(err),
            };

            if closure
                .iter()
                .all(|f| state.satisfied.contains(f) || !state.supports(f))
            {
                return PendingOperation::finished();
            }

            for feature in &closure {
                if state.missing.remove(feature).is_some() {
                    debug!(object = %state.object, feature = %feature, "Retrying failed feature");
                }
            }
            state.requested.extend(closure.iter().copied());

            let operation = PendingOperation::new();
            state.pending.push(PendingRequest {
                targets,
                closure,
                operation: operation.clone(),
            });
            operation
        };

        self.iterate();
        operation
    }

    /// Report the outcome of a feature's introspection routine.
    ///
    /// Completing a feature that is not being introspected is a contract
    /// violation and leaves the state untouched.
    pub fn set_introspect_completed(&self, feature: &Feature, outcome: Outcome) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();

            if !state.in_flight.remove(feature) {
                warn!(
                    object = %state.object,
                    feature = %feature,
                    "Introspection completed for a feature that is not being introspected"
                );
                return Err(Error::contract(format!(
                    "feature {} of {} is not being introspected",
                    feature, state.object
                )));
            }

            match outcome {
                Ok(()) if !state.supports(feature) => {
                    debug!(
                        object = %state.object,
                        feature = %feature,
                        "Introspection succeeded after the feature's interfaces went away"
                    );
                }
                Ok(()) => {
                    debug!(object = %state.object, feature = %feature, "Introspection succeeded");
                    state.satisfied.insert(*feature);
                }
                Err(err) => {
                    debug!(
                        object = %state.object,
                        feature = %feature,
                        error = %err,
                        "Introspection failed"
                    );
                    state.missing.insert(*feature, err);
                }
            }

            if state.in_flight.is_empty() && state.invalidated.is_none() {
                if let Some(status) = state.pending_status.take() {
                    state.apply_status(status);
                }
            }
        }

        self.iterate();
        Ok(())
    }

    /// Shorthand for a successful [`set_introspect_completed`](Self::set_introspect_completed)
    pub fn set_introspect_succeeded(&self, feature: &Feature) -> Result<()> {
        self.set_introspect_completed(feature, Ok(()))
    }

    /// Shorthand for a failed [`set_introspect_completed`](Self::set_introspect_completed)
    pub fn set_introspect_failed(&self, feature: &Feature, error: OperationError) -> Result<()> {
        self.set_introspect_completed(feature, Err(error))
    }

    /// Move the object to a new lifecycle status.
    ///
    /// [`Status::INVALIDATED`] invalidates the helper. Other changes wait
    /// until no introspection is in flight; applying one resets features
    /// that were only vacuously ready but apply to the new status.
    pub fn set_current_status(&self, status: Status) {
        if status.is_invalidated() {
            let object = self.state.borrow().object.clone();
            self.invalidate(OperationError::cancelled(format!(
                "{} was invalidated",
                object
            )));
            return;
        }

        {
            let mut state = self.state.borrow_mut();
            if state.invalidated.is_some() {
                return;
            }
            if state.current_status == status && state.pending_status.is_none() {
                return;
            }
            if !state.in_flight.is_empty() {
                debug!(
                    object = %state.object,
                    status = %status,
                    "Deferring status change until introspection settles"
                );
                state.pending_status = Some(status);
                return;
            }
            state.apply_status(status);
        }

        self.iterate();
    }

    /// Replace the set of remote interfaces the object is known to have
    pub fn set_interfaces<I, N>(&self, interfaces: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        {
            let mut state = self.state.borrow_mut();
            state.interfaces = interfaces.into_iter().map(Into::into).collect();
            state.prune_unsupported();
            debug!(
                object = %state.object,
                interfaces = ?state.interfaces,
                "Interfaces updated"
            );
        }
        self.iterate();
    }

    /// Fail every outstanding and future request with `error`
    pub fn invalidate(&self, error: OperationError) {
        let pending = {
            let mut state = self.state.borrow_mut();
            if state.invalidated.is_some() {
                return;
            }
            info!(object = %state.object, error = %error, "Object invalidated");
            state.invalidated = Some(error.clone());
            state.current_status = Status::INVALIDATED;
            state.pending_status = None;
            std::mem::take(&mut state.pending)
        };

        for req in pending {
            let _ = req.operation.set_finished_with_error(error.clone());
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.borrow().invalidated.is_some()
    }

    pub fn invalidation_reason(&self) -> Option<OperationError> {
        self.state.borrow().invalidated.clone()
    }

    /// Whether every feature in `features` is ready
    pub fn is_ready(&self, features: &Features) -> bool {
        features.is_subset(&self.state.borrow().satisfied)
    }

    pub fn is_feature_ready(&self, feature: &Feature) -> bool {
        self.state.borrow().satisfied.contains(feature)
    }

    /// Whether the feature is registered and its interfaces are present
    pub fn supports(&self, feature: &Feature) -> bool {
        self.state.borrow().supports(feature)
    }

    pub fn core_features(&self) -> Features {
        self.state.borrow().core_features()
    }

    pub fn current_status(&self) -> Status {
        self.state.borrow().current_status
    }

    pub fn interfaces(&self) -> BTreeSet<String> {
        self.state.borrow().interfaces.clone()
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.state.borrow().interfaces.contains(interface)
    }

    /// Every feature requested so far, dependencies included
    pub fn requested_features(&self) -> Features {
        self.state.borrow().requested.clone()
    }

    /// Features that are ready
    pub fn actual_features(&self) -> Features {
        self.state.borrow().satisfied.clone()
    }

    /// Features whose introspection failed
    pub fn missing_features(&self) -> Features {
        self.state.borrow().missing.keys().copied().collect()
    }

    /// Error a failed feature finished with
    pub fn feature_error(&self, feature: &Feature) -> Option<OperationError> {
        self.state.borrow().missing.get(feature).cloned()
    }

    /// Features whose introspection routine is running
    pub fn in_flight_features(&self) -> Features {
        self.state.borrow().in_flight.clone()
    }

    pub fn object(&self) -> String {
        self.state.borrow().object.clone()
    }

    fn iterate(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.iterating {
                state.dirty = true;
                return;
            }
            state.iterating = true;
        }

        loop {
            let effects = {
                let mut state = self.state.borrow_mut();
                state.dirty = false;
                state.compute_effects()
            };

            for (_, introspect) in effects.start {
                introspect(self);
            }
            for (operation, outcome) in effects.finish {
                let _ = operation.finish(outcome);
            }

            let mut state = self.state.borrow_mut();
            if !state.dirty {
                state.iterating = false;
                break;
            }
        }
    }
}

impl fmt::Debug for ReadinessHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ReadinessHelper")
            .field("object", &state.object)
            .field("status", &state.current_status)
            .field("satisfied", &state.satisfied)
            .field("missing", &state.missing)
            .field("in_flight", &state.in_flight)
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspectable::Introspectable;
    use tp_core::{features, ErrorKind};

    const CORE: Feature = Feature::core("Test::Object", 0);
    const A: Feature = Feature::new("Test::Object", 1);
    const B: Feature = Feature::new("Test::Object", 2);
    const HOLD: Feature = Feature::new("Test::Object", 3);
    const LATE: Feature = Feature::new("Test::Object", 4);

    const X: Feature = Feature::new("Test::Plain", 0);
    const Y: Feature = Feature::new("Test::Plain", 1);
    const Z: Feature = Feature::new("Test::Plain", 2);

    const ACTIVE: Status = Status(0);
    const CONNECTED: Status = Status(1);
    const HOLD_IFACE: &str = "org.example.Hold";

    type Log = Rc<RefCell<Vec<Feature>>>;

    fn recorder(log: &Log, feature: Feature) -> impl Fn(&ReadinessHelper) + 'static {
        let log = Rc::clone(log);
        move |_| log.borrow_mut().push(feature)
    }

    fn intro(log: &Log, feature: Feature, deps: &[Feature]) -> Introspectable {
        Introspectable::new(
            [ACTIVE, CONNECTED],
            features(deps),
            Vec::<String>::new(),
            recorder(log, feature),
        )
    }

    /// CORE, A(dep CORE), B(dep CORE), HOLD(dep CORE, needs HOLD_IFACE),
    /// LATE(dep CORE, only meaningful when CONNECTED)
    fn object_helper(log: &Log) -> ReadinessHelper {
        let helper = ReadinessHelper::new("/test/object", ACTIVE);
        let mut table = Introspectables::new();
        table.insert(CORE, intro(log, CORE, &[]));
        table.insert(A, intro(log, A, &[CORE]));
        table.insert(B, intro(log, B, &[CORE]));
        table.insert(
            HOLD,
            Introspectable::new([ACTIVE], features(&[CORE]), [HOLD_IFACE], recorder(log, HOLD)),
        );
        table.insert(
            LATE,
            Introspectable::new(
                [CONNECTED],
                features(&[CORE]),
                Vec::<String>::new(),
                recorder(log, LATE),
            ),
        );
        helper.add_introspectables(table).unwrap();
        helper
    }

    /// X, Y(dep X), Z with no core feature
    fn plain_helper(log: &Log) -> ReadinessHelper {
        let helper = ReadinessHelper::new("/test/plain", ACTIVE);
        let mut table = Introspectables::new();
        table.insert(X, intro(log, X, &[]));
        table.insert(Y, intro(log, Y, &[X]));
        table.insert(Z, intro(log, Z, &[]));
        helper.add_introspectables(table).unwrap();
        helper
    }

    #[test]
    fn test_dependencies_run_before_dependents() {
        let log = Log::default();
        let helper = object_helper(&log);

        let op = helper.become_ready(&features(&[A, B]));
        assert_eq!(*log.borrow(), vec![CORE]);
        assert!(!op.is_finished());

        helper.set_introspect_succeeded(&CORE).unwrap();
        let started: BTreeSet<_> = log.borrow()[1..].iter().copied().collect();
        assert_eq!(started, features(&[A, B]));

        helper.set_introspect_succeeded(&A).unwrap();
        assert!(!op.is_finished());
        helper.set_introspect_succeeded(&B).unwrap();

        assert!(op.is_valid());
        assert!(helper.is_ready(&features(&[CORE, A, B])));
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_core_feature_is_implicit() {
        let log = Log::default();
        let helper = object_helper(&log);

        let op = helper.become_ready(&Features::new());
        assert_eq!(*log.borrow(), vec![CORE]);
        helper.set_introspect_succeeded(&CORE).unwrap();
        assert!(op.is_valid());

        let again = helper.become_ready(&Features::new());
        assert!(again.is_valid());
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_overlapping_requests_share_introspection() {
        let log = Log::default();
        let helper = object_helper(&log);

        let first = helper.become_ready(&features(&[A]));
        let second = helper.become_ready(&features(&[A, B]));
        helper.set_introspect_succeeded(&CORE).unwrap();
        helper.set_introspect_succeeded(&A).unwrap();

        assert!(first.is_valid());
        assert!(!second.is_finished());

        helper.set_introspect_succeeded(&B).unwrap();
        assert!(second.is_valid());

        let count = |f: Feature| log.borrow().iter().filter(|&&x| x == f).count();
        assert_eq!(count(CORE), 1);
        assert_eq!(count(A), 1);
        assert_eq!(count(B), 1);
    }

    #[test]
    fn test_missing_interface_fails_without_introspection() {
        let log = Log::default();
        let helper = object_helper(&log);

        for _ in 0..2 {
            let op = helper.become_ready(&features(&[HOLD]));
            assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));
        }
        assert!(!log.borrow().contains(&HOLD));
        assert!(!helper.supports(&HOLD));
        assert!(!helper.is_feature_ready(&HOLD));
    }

    #[test]
    fn test_interface_becoming_available_enables_feature() {
        let log = Log::default();
        let helper = object_helper(&log);
        helper.set_interfaces([HOLD_IFACE]);

        let op = helper.become_ready(&features(&[HOLD]));
        helper.set_introspect_succeeded(&CORE).unwrap();
        assert_eq!(log.borrow().last(), Some(&HOLD));
        helper.set_introspect_succeeded(&HOLD).unwrap();
        assert!(op.is_valid());
    }

    #[test]
    fn test_interface_removed_fails_outstanding_request() {
        let log = Log::default();
        let helper = object_helper(&log);
        helper.set_interfaces([HOLD_IFACE]);

        let op = helper.become_ready(&features(&[HOLD]));
        helper.set_interfaces(Vec::<String>::new());
        assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));
    }

    #[test]
    fn test_unsupported_dependency_is_vacuously_satisfied() {
        let log = Log::default();
        let helper = ReadinessHelper::new("/test/vacuous", ACTIVE);
        let mut table = Introspectables::new();
        table.insert(
            HOLD,
            Introspectable::new([ACTIVE], Features::new(), [HOLD_IFACE], recorder(&log, HOLD)),
        );
        table.insert(A, intro(&log, A, &[HOLD]));
        helper.add_introspectables(table).unwrap();

        let op = helper.become_ready(&features(&[A]));
        assert_eq!(*log.borrow(), vec![A]);
        helper.set_introspect_succeeded(&A).unwrap();
        assert!(op.is_valid());
        assert!(!helper.is_feature_ready(&HOLD));
    }

    #[test]
    fn test_inapplicable_status_marks_feature_ready_without_running() {
        let log = Log::default();
        let helper = object_helper(&log);

        let op = helper.become_ready(&features(&[LATE]));
        helper.set_introspect_succeeded(&CORE).unwrap();

        assert!(op.is_valid());
        assert!(helper.is_feature_ready(&LATE));
        assert!(!log.borrow().contains(&LATE));
    }

    /// X, and Y(dep X) which only applies once CONNECTED
    fn late_dependent_helper(log: &Log) -> ReadinessHelper {
        let helper = ReadinessHelper::new("/test/late", ACTIVE);
        let mut table = Introspectables::new();
        table.insert(X, intro(log, X, &[]));
        table.insert(
            Y,
            Introspectable::new([CONNECTED], features(&[X]), Vec::<String>::new(), recorder(log, Y)),
        );
        helper.add_introspectables(table).unwrap();
        helper
    }

    #[test]
    fn test_inapplicable_target_waits_for_its_dependencies() {
        let log = Log::default();
        let helper = late_dependent_helper(&log);

        let op = helper.become_ready(&features(&[Y]));
        assert_eq!(*log.borrow(), vec![X]);
        assert!(!op.is_finished());
        assert!(!helper.is_feature_ready(&Y));

        helper.set_introspect_succeeded(&X).unwrap();
        assert!(op.is_valid());
        assert!(helper.is_ready(&features(&[X, Y])));
        assert!(!log.borrow().contains(&Y));
    }

    #[test]
    fn test_inapplicable_target_fails_with_its_dependency() {
        let log = Log::default();
        let helper = late_dependent_helper(&log);

        let op = helper.become_ready(&features(&[Y]));
        helper
            .set_introspect_failed(&X, OperationError::not_available("offline"))
            .unwrap();

        assert_eq!(op.error_kind(), Some(ErrorKind::NotAvailable));
        assert!(!helper.is_feature_ready(&Y));
        assert_eq!(helper.missing_features(), features(&[X, Y]));
    }

    #[test]
    fn test_request_waits_for_whole_closure() {
        let log = Log::default();
        let helper = plain_helper(&log);

        let op = helper.become_ready(&features(&[Y]));
        helper
            .set_introspect_failed(&X, OperationError::not_available("offline"))
            .unwrap();
        assert!(op.is_error());

        let retry = helper.become_ready(&features(&[Y]));
        helper.set_introspect_succeeded(&X).unwrap();
        assert!(!retry.is_finished());
        helper.set_introspect_succeeded(&Y).unwrap();
        assert!(retry.is_valid());
    }

    #[test]
    fn test_removed_interface_unreadies_feature() {
        let log = Log::default();
        let helper = object_helper(&log);
        helper.set_interfaces([HOLD_IFACE]);

        helper.become_ready(&features(&[HOLD]));
        helper.set_introspect_succeeded(&CORE).unwrap();
        helper.set_introspect_succeeded(&HOLD).unwrap();
        assert!(helper.is_feature_ready(&HOLD));

        helper.set_interfaces(Vec::<String>::new());
        assert!(!helper.is_ready(&features(&[HOLD])));
        assert!(!helper.actual_features().contains(&HOLD));
        let op = helper.become_ready(&features(&[HOLD]));
        assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));
        assert!(helper.is_feature_ready(&CORE));
    }

    #[test]
    fn test_completion_after_interface_removal_does_not_ready_feature() {
        let log = Log::default();
        let helper = object_helper(&log);
        helper.set_interfaces([HOLD_IFACE]);

        let op = helper.become_ready(&features(&[HOLD]));
        helper.set_introspect_succeeded(&CORE).unwrap();
        helper.set_interfaces(Vec::<String>::new());
        assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));

        helper.set_introspect_succeeded(&HOLD).unwrap();
        assert!(!helper.is_feature_ready(&HOLD));
    }

    #[test]
    fn test_status_change_reintrospects_vacuous_features() {
        let log = Log::default();
        let helper = object_helper(&log);

        helper.become_ready(&features(&[LATE]));
        helper.set_introspect_succeeded(&CORE).unwrap();
        assert!(helper.is_feature_ready(&LATE));

        helper.set_current_status(CONNECTED);
        assert_eq!(helper.current_status(), CONNECTED);
        assert!(!helper.is_feature_ready(&LATE));
        assert_eq!(log.borrow().last(), Some(&LATE));
        assert!(helper.is_feature_ready(&CORE));

        helper.set_introspect_succeeded(&LATE).unwrap();
        assert!(helper.is_feature_ready(&LATE));
    }

    #[test]
    fn test_status_change_is_deferred_while_in_flight() {
        let log = Log::default();
        let helper = object_helper(&log);

        helper.become_ready(&Features::new());
        helper.set_current_status(CONNECTED);
        assert_eq!(helper.current_status(), ACTIVE);

        helper.set_introspect_succeeded(&CORE).unwrap();
        assert_eq!(helper.current_status(), CONNECTED);
    }

    #[test]
    fn test_double_completion_is_rejected() {
        let log = Log::default();
        let helper = object_helper(&log);

        let op = helper.become_ready(&Features::new());
        helper.set_introspect_succeeded(&CORE).unwrap();
        let err = helper
            .set_introspect_failed(&CORE, OperationError::cancelled("late"))
            .unwrap_err();

        assert!(err.is_contract_violation());
        assert!(op.is_valid());
        assert!(helper.is_feature_ready(&CORE));
        assert!(helper.missing_features().is_empty());
    }

    #[test]
    fn test_invalidation_fails_outstanding_and_future_requests() {
        let log = Log::default();
        let helper = object_helper(&log);

        let op = helper.become_ready(&features(&[A]));
        helper.set_current_status(Status::INVALIDATED);

        assert_eq!(op.error_kind(), Some(ErrorKind::Cancelled));
        assert!(helper.is_invalidated());

        let later = helper.become_ready(&Features::new());
        assert_eq!(later.error_kind(), Some(ErrorKind::Cancelled));

        // the in-flight routine may still report back
        helper.set_introspect_succeeded(&CORE).unwrap();
        assert!(!log.borrow().contains(&A));
    }

    #[test]
    fn test_failure_propagates_to_dependents_only() {
        let log = Log::default();
        let helper = plain_helper(&log);

        let dependent = helper.become_ready(&features(&[Y]));
        let unrelated = helper.become_ready(&features(&[Z]));

        helper
            .set_introspect_failed(
                &X,
                OperationError::new(ErrorKind::Remote("org.example.Error.Down".into()), "down"),
            )
            .unwrap();

        assert_eq!(
            dependent.error_kind(),
            Some(ErrorKind::Remote("org.example.Error.Down".into()))
        );
        assert!(!log.borrow().contains(&Y));
        assert!(!unrelated.is_finished());
        assert_eq!(helper.missing_features(), features(&[X, Y]));

        helper.set_introspect_succeeded(&Z).unwrap();
        assert!(unrelated.is_valid());
    }

    #[test]
    fn test_partial_progress_survives_failed_request() {
        let log = Log::default();
        let helper = plain_helper(&log);

        let op = helper.become_ready(&features(&[X, Z]));
        helper.set_introspect_succeeded(&Z).unwrap();
        helper
            .set_introspect_failed(&X, OperationError::not_available("offline"))
            .unwrap();

        assert_eq!(op.error_kind(), Some(ErrorKind::NotAvailable));
        assert!(helper.is_feature_ready(&Z));
    }

    #[test]
    fn test_reissuing_request_retries_failed_feature() {
        let log = Log::default();
        let helper = plain_helper(&log);

        let first = helper.become_ready(&features(&[X]));
        helper
            .set_introspect_failed(&X, OperationError::not_available("offline"))
            .unwrap();
        assert!(first.is_error());

        let second = helper.become_ready(&features(&[X]));
        assert_eq!(*log.borrow(), vec![X, X]);
        helper.set_introspect_succeeded(&X).unwrap();
        assert!(second.is_valid());
    }

    #[test]
    fn test_unregistered_feature_is_invalid_argument() {
        let log = Log::default();
        let helper = plain_helper(&log);

        let op = helper.become_ready(&features(&[Feature::new("Test::Plain", 99)]));
        assert_eq!(op.error_kind(), Some(ErrorKind::InvalidArgument));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_registration_after_request_is_rejected() {
        let log = Log::default();
        let helper = plain_helper(&log);
        helper.become_ready(&features(&[X]));

        let mut table = Introspectables::new();
        table.insert(X, intro(&log, X, &[]));
        let err = helper.add_introspectables(table).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_synchronous_completion_inside_introspection() {
        let helper = ReadinessHelper::new("/test/sync", ACTIVE);
        let mut table = Introspectables::new();
        table.insert(
            X,
            Introspectable::new([ACTIVE], Features::new(), Vec::<String>::new(), |helper| {
                helper.set_introspect_succeeded(&X).unwrap();
            }),
        );
        table.insert(
            Y,
            Introspectable::new([ACTIVE], features(&[X]), Vec::<String>::new(), |helper| {
                helper.set_introspect_succeeded(&Y).unwrap();
            }),
        );
        helper.add_introspectables(table).unwrap();

        let op = helper.become_ready(&features(&[Y]));
        assert!(op.is_valid());
        assert!(helper.in_flight_features().is_empty());
    }

    #[test]
    fn test_observer_may_issue_new_request() {
        let log = Log::default();
        let helper = plain_helper(&log);

        let follow_up: Rc<RefCell<Option<PendingOperation>>> = Rc::default();
        let op = helper.become_ready(&features(&[X]));
        {
            let helper = helper.clone();
            let follow_up = Rc::clone(&follow_up);
            op.on_finished(move |_| {
                *follow_up.borrow_mut() = Some(helper.become_ready(&features(&[Y])));
            });
        }

        helper.set_introspect_succeeded(&X).unwrap();
        assert_eq!(log.borrow().last(), Some(&Y));
        let follow_up = follow_up.borrow().clone().unwrap();
        assert!(!follow_up.is_finished());
        helper.set_introspect_succeeded(&Y).unwrap();
        assert!(follow_up.is_valid());
    }
}
