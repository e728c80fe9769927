//! System Scheduler
//!
//! Six ordered phases; within a phase, systems run in registration order.
//! `Store::tick` executes the five simulation phases; render systems are
//! driven separately by the render loop and receive a shared reference,
//! so the type system enforces that rendering cannot mutate the store.

use std::fmt;

use crate::error::EngineResult;

use super::store::Store;

/// Execution phases of a tick, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Input application and reaction.
    Input,
    /// General game logic.
    Update,
    /// Preparation before the physics step.
    PrePhysics,
    /// The physics step itself.
    Physics,
    /// Reactions to physics results.
    PostPhysics,
    /// Presentation; driven by the render loop, never by `tick`.
    Render,
}

impl Phase {
    /// The five phases `tick` runs, in order.
    pub const SIMULATION: [Phase; 5] = [
        Phase::Input,
        Phase::Update,
        Phase::PrePhysics,
        Phase::Physics,
        Phase::PostPhysics,
    ];

    /// Index into the simulation phase table; None for Render.
    pub(crate) fn sim_index(self) -> Option<usize> {
        match self {
            Phase::Input => Some(0),
            Phase::Update => Some(1),
            Phase::PrePhysics => Some(2),
            Phase::Physics => Some(3),
            Phase::PostPhysics => Some(4),
            Phase::Render => None,
        }
    }
}

/// A simulation system: may mutate the store, may fail the frame.
pub struct System {
    /// Diagnostic name.
    pub name: String,
    /// System body.
    pub run: Box<dyn FnMut(&mut Store) -> EngineResult<()>>,
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "System({})", self.name)
    }
}

/// A render system: observes the store, cannot mutate it.
pub struct RenderSystem {
    /// Diagnostic name.
    pub name: String,
    /// System body.
    pub run: Box<dyn FnMut(&Store)>,
}

impl fmt::Debug for RenderSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderSystem({})", self.name)
    }
}

/// Registered systems grouped by phase.
#[derive(Debug, Default)]
pub struct SystemRegistry {
    simulation: [Vec<System>; 5],
    render: Vec<RenderSystem>,
}

impl SystemRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulation system in the given phase.
    ///
    /// # Panics
    /// Panics if `phase` is `Render`; use [`register_render`] instead.
    ///
    /// [`register_render`]: SystemRegistry::register_render
    pub fn register(
        &mut self,
        phase: Phase,
        name: impl Into<String>,
        run: impl FnMut(&mut Store) -> EngineResult<()> + 'static,
    ) {
        let idx = phase
            .sim_index()
            .expect("render systems are registered via register_render");
        self.simulation[idx].push(System {
            name: name.into(),
            run: Box::new(run),
        });
    }

    /// Register a render system.
    pub fn register_render(&mut self, name: impl Into<String>, run: impl FnMut(&Store) + 'static) {
        self.render.push(RenderSystem {
            name: name.into(),
            run: Box::new(run),
        });
    }

    /// Systems of one simulation phase, in registration order.
    pub(crate) fn phase_mut(&mut self, sim_index: usize) -> &mut Vec<System> {
        &mut self.simulation[sim_index]
    }

    /// Render systems in registration order.
    pub(crate) fn render_mut(&mut self) -> &mut Vec<RenderSystem> {
        &mut self.render
    }

    /// Number of systems registered in a phase.
    pub fn len(&self, phase: Phase) -> usize {
        match phase.sim_index() {
            Some(idx) => self.simulation[idx].len(),
            None => self.render.len(),
        }
    }

    /// Whether no systems are registered at all.
    pub fn is_empty(&self) -> bool {
        self.simulation.iter().all(Vec::is_empty) && self.render.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut sorted = Phase::SIMULATION;
        sorted.sort();
        assert_eq!(sorted, Phase::SIMULATION, "declaration order is phase order");
        assert!(Phase::Render > Phase::PostPhysics);
        assert_eq!(Phase::Render.sim_index(), None);
    }

    #[test]
    fn test_registration_bookkeeping() {
        let mut registry = SystemRegistry::new();
        assert!(registry.is_empty());
        registry.register(Phase::Update, "movement", |_| Ok(()));
        registry.register(Phase::Update, "cooldowns", |_| Ok(()));
        registry.register(Phase::Physics, "integrate", |_| Ok(()));
        registry.register_render("draw", |_| {});

        assert_eq!(registry.len(Phase::Update), 2);
        assert_eq!(registry.len(Phase::Physics), 1);
        assert_eq!(registry.len(Phase::Input), 0);
        assert_eq!(registry.len(Phase::Render), 1);
        assert!(!registry.is_empty());

        // registration order preserved within a phase
        let names: Vec<&str> = registry.phase_mut(1).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["movement", "cooldowns"]);
    }
}
