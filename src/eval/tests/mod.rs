/**
 * eval/tests
 *
 * Tests for the store, the environment and the evaluator. Most of them run a
 * small program through the `Tester` harness and inspect the bindings, the
 * emitted lines and the store afterwards. Programs are built with the
 * helpers in `ast::build`.
 */

mod utils;
mod eval_collections;
mod eval_store;

pub(crate) use utils::Tester; // the testing harness
pub(crate) use crate::eval::ast::build::*;
pub(crate) use crate::eval::ast::{BinaryOperator, Builtin, Expression, Method, Statement, Target, UnaryOperator};
pub(crate) use crate::eval::*;
pub(crate) use crate::config::EvalConfig;
