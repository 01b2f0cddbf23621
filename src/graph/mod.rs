pub mod routing;
pub mod scheduler;

pub use routing::{EdgeCondition, RoutingTable, Target, Transition, ENTRY_NODE};
pub use scheduler::{Engine, TurnInput, TurnOutcome};
