/// eval
///
/// Evaluator of a small dynamically typed statement language with reference
/// semantics. Names are bound to values, never contain them: assigning a
/// List to a second name makes both names refer to the same List, and
/// mutating it through one name is visible through the other.
///
/// All values live in the `Store` and are addressed through a `ValueId`.
/// Bindings (in the `Environment`), List elements and Mapping pairs each
/// hold one counted reference. When the last reference disappears the value
/// is reclaimed immediately. Groups of containers that only keep each other
/// alive are found by a cycle scan that runs between statements.
///
/// Programs are handed over as an already parsed `ast::Statement` sequence;
/// there is no text parser.

pub mod ast;
mod env;
mod equality;
mod error;
mod executor;
mod snapshot;
mod store;
mod value;

#[cfg(test)]
mod tests;

pub use env::{Environment, FrameId};
pub use equality::{compare_values, same_identity, value_equal};
pub use error::{ArityMismatch, EvalError, EvalErrorKind, EvalResult};
pub use executor::Evaluator;
pub use snapshot::ValueGroup;
pub use store::{Mutation, Store, StoreStats};
pub use value::{render, MapKey, Mapping, Value, ValueId, ValueKind};
