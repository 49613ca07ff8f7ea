use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

/// A state type with a per-type transition table: the set of states
/// reachable from `self` in one step.
pub trait State: Copy + PartialEq + Debug + 'static {
    fn transitions(&self) -> &'static [Self];
}

/// Guarded state holder shared by every resource type on both sides.
///
/// The initial state set at construction is unconditional. Every later
/// `set` is checked against the current state's table before anything is
/// mutated; a rejected transition leaves the stored state untouched.
#[derive(Debug)]
pub struct Guarded<S: State> {
    state: S,
}

impl<S: State> Guarded<S> {
    pub fn new(initial: S) -> Self {
        Self { state: initial }
    }

    pub fn get(&self) -> S {
        self.state
    }

    pub fn set(&mut self, target: S) -> Result<(), IllegalTransition> {
        if !self.state.transitions().contains(&target) {
            return Err(IllegalTransition {
                from: format!("{:?}", self.state),
                to: format!("{target:?}"),
            });
        }
        self.state = target;
        Ok(())
    }
}
