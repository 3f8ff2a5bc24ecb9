/// Which edges a closure traversal follows.
///
/// The options compose: each one contributes its own edge set at every node,
/// independently of the others and of the direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ClosureRequest {
    /// Follow reverse references (dependents) instead of references.
    pub flip_direction: bool,
    /// For derivations, also follow the outputs present in the store.
    pub include_outputs: bool,
    /// Also follow the deriver of each node, when it is known.
    pub include_derivers: bool,
}

impl ClosureRequest {
    /// Dependencies only.
    pub fn forward() -> Self {
        Self::default()
    }

    /// Dependents only.
    pub fn reverse() -> Self {
        Self {
            flip_direction: true,
            ..Self::default()
        }
    }

    pub fn with_outputs(mut self, include: bool) -> Self {
        self.include_outputs = include;
        self
    }

    pub fn with_derivers(mut self, include: bool) -> Self {
        self.include_derivers = include;
        self
    }
}
