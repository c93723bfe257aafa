//! Per-feature introspection descriptors

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use tp_core::{Feature, Features, Status};

use crate::helper::ReadinessHelper;

/// Routine performing the remote work for one feature.
///
/// It receives the owning helper and must eventually call
/// [`ReadinessHelper::set_introspect_completed`] for its feature, either
/// before returning or later from an asynchronous completion. Per-object
/// context is captured by the closure, typically as a `Weak` handle.
pub type IntrospectFn = Rc<dyn Fn(&ReadinessHelper)>;

/// How to make one feature ready
#[derive(Clone)]
pub struct Introspectable {
    makes_sense_for_statuses: BTreeSet<Status>,
    depends_on_features: Features,
    depends_on_interfaces: BTreeSet<String>,
    introspect: IntrospectFn,
}

/// Descriptor table of one object
pub type Introspectables = BTreeMap<Feature, Introspectable>;

impl Introspectable {
    pub fn new<S, I, N, F>(
        makes_sense_for_statuses: S,
        depends_on_features: Features,
        depends_on_interfaces: I,
        introspect: F,
    ) -> Self
    where
        S: IntoIterator<Item = Status>,
        I: IntoIterator<Item = N>,
        N: Into<String>,
        F: Fn(&ReadinessHelper) + 'static,
    {
        Self {
            makes_sense_for_statuses: makes_sense_for_statuses.into_iter().collect(),
            depends_on_features,
            depends_on_interfaces: depends_on_interfaces.into_iter().map(Into::into).collect(),
            introspect: Rc::new(introspect),
        }
    }

    pub fn makes_sense_for_statuses(&self) -> &BTreeSet<Status> {
        &self.makes_sense_for_statuses
    }

    pub fn makes_sense_for(&self, status: Status) -> bool {
        self.makes_sense_for_statuses.contains(&status)
    }

    pub fn depends_on_features(&self) -> &Features {
        &self.depends_on_features
    }

    pub fn depends_on_interfaces(&self) -> &BTreeSet<String> {
        &self.depends_on_interfaces
    }

    pub(crate) fn introspect_fn(&self) -> IntrospectFn {
        Rc::clone(&self.introspect)
    }
}

impl fmt::Debug for Introspectable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Introspectable")
            .field("makes_sense_for_statuses", &self.makes_sense_for_statuses)
            .field("depends_on_features", &self.depends_on_features)
            .field("depends_on_interfaces", &self.depends_on_interfaces)
            .finish_non_exhaustive()
    }
}
