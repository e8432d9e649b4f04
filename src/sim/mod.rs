//! A simulated host.
//!
//! Implements every host trait the engine consumes over an in-memory
//! document, so the engine runs the same way in unit tests, integration
//! tests and the `simulate` command as it would over a real page.

mod element;
mod host;
mod page;

pub use element::{Mutation, SimElement};
pub use host::{SimFetcher, SimScheduler, SimWindow};
pub use page::{
    DescriptorReport, ElementFixture, ElementReport, OutcomeFixture, PageFixture, RectFixture,
    SimError, SimPage, SimulationReport, StepReport, WindowFixture,
};
