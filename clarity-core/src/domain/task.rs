//! Collection tasks: one (instrument, granularity) unit of fetch-and-persist work.

use std::fmt;

use super::{Granularity, Instrument};

/// One fetch-and-persist unit. The persisted file and the ingested table are
/// both keyed by [`CollectionTask::stem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionTask {
    pub instrument: Instrument,
    pub granularity: Granularity,
}

impl CollectionTask {
    pub fn new(instrument: Instrument, granularity: Granularity) -> Self {
        Self { instrument, granularity }
    }

    /// `{ticker}_{granularity}`, used for both the file name and the table name.
    pub fn stem(&self) -> String {
        format!("{}_{}", self.instrument.ticker(), self.granularity)
    }

    /// Name of the table this task ingests into.
    pub fn table_name(&self) -> String {
        self.stem()
    }
}

impl fmt::Display for CollectionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.instrument, self.granularity)
    }
}

/// Full task set for a tick, instrument-major.
pub fn cross_product(
    instruments: &[Instrument],
    granularities: &[Granularity],
) -> Vec<CollectionTask> {
    instruments
        .iter()
        .flat_map(|inst| {
            granularities
                .iter()
                .map(move |g| CollectionTask::new(inst.clone(), g.clone()))
        })
        .collect()
}
