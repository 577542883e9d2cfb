use super::{ExecutionContext, IntegratorParams, PhysicsModel};
use std::sync::Arc;
use tracing::debug;

/// Factory for execution contexts bound to one model and one integrator
/// parameter set.
///
/// Each worker owns its pool instance, creates its context at initialization,
/// and drops both at teardown. Contexts handed out are exclusively owned by
/// the caller; the pool never retains a reference to them.
pub struct ContextPool {
    model: Arc<dyn PhysicsModel>,
    integrator: IntegratorParams,
}

impl ContextPool {
    pub fn new(model: Arc<dyn PhysicsModel>, integrator: IntegratorParams) -> Self {
        Self { model, integrator }
    }

    pub fn integrator(&self) -> &IntegratorParams {
        &self.integrator
    }

    pub fn model(&self) -> &Arc<dyn PhysicsModel> {
        &self.model
    }

    /// Creates a fresh context for this pool's model and integrator.
    pub fn acquire(&self) -> Box<dyn ExecutionContext> {
        debug!(
            num_particles = self.model.num_particles(),
            timestep_fs = self.integrator.timestep_fs,
            "acquiring execution context"
        );
        self.model.create_context(&self.integrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::AlchemicalHarmonicModel;

    #[test]
    fn acquired_contexts_are_independent() {
        let model = Arc::new(AlchemicalHarmonicModel::two_state_example(2, Some(1)));
        let pool = ContextPool::new(model.clone(), IntegratorParams::new(1.0, 1.0, "V R O R V"));

        let mut first = pool.acquire();
        let second = pool.acquire();

        let reference = model.reference_configuration();
        let mut shifted = reference.clone();
        shifted.positions[0].x += 1.0;
        first.load_configuration(&shifted);

        // Mutating one context leaves the other untouched.
        assert_eq!(second.extract_configuration().unwrap(), reference);
        assert_eq!(first.extract_configuration().unwrap(), shifted);
    }
}
