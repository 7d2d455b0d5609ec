use crate::types::Representation;

/// Which algorithm produced an estimate. The guess-based chooser inspects
/// this on the next cycle to know whether it is currently guessing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlgorithmType {
    Bandwidth,
    BufferBased,
    GuessBased,
}

/// The previously emitted estimate, with its provenance.
#[derive(Clone, Debug)]
pub struct LastEstimate {
    pub representation: Representation,
    pub algorithm: AlgorithmType,
}

/// Stores the last estimate emitted for one selection context.
#[derive(Clone, Debug, Default)]
pub struct LastEstimateStorage {
    inner: Option<LastEstimate>,
}

impl LastEstimateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, representation: Representation, algorithm: AlgorithmType) {
        self.inner = Some(LastEstimate {
            representation,
            algorithm,
        });
    }

    pub fn get(&self) -> Option<&LastEstimate> {
        self.inner.as_ref()
    }
}
