//! Readiness surface shared by proxy objects

use tp_core::Features;

use crate::helper::ReadinessHelper;
use crate::operation::PendingOperation;

/// Implemented by every proxy that owns a [`ReadinessHelper`]
pub trait ReadyObject {
    /// The object's readiness engine
    fn readiness_helper(&self) -> &ReadinessHelper;

    /// Whether `features` and the object's core features are ready
    fn is_ready(&self, features: &Features) -> bool {
        let helper = self.readiness_helper();
        let mut wanted = features.clone();
        wanted.extend(helper.core_features());
        helper.is_ready(&wanted)
    }

    /// Make `features` and the object's core features ready
    fn become_ready(&self, features: &Features) -> PendingOperation {
        self.readiness_helper().become_ready(features)
    }

    fn requested_features(&self) -> Features {
        self.readiness_helper().requested_features()
    }

    fn actual_features(&self) -> Features {
        self.readiness_helper().actual_features()
    }

    fn missing_features(&self) -> Features {
        self.readiness_helper().missing_features()
    }
}
