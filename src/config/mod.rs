pub mod policies;

pub use policies::{Condition, PolicyDocument, PolicyError, PolicyRule};
