use crate::config::EvalConfig;
use crate::eval::ast::*;
use crate::eval::*;
use crate::host::BufferHost;

use std::collections::HashMap;

//------------------------------------------------------------------------------
// Interface for running programs
//------------------------------------------------------------------------------

pub(crate) struct Tester {
    test_name: String,
    config: EvalConfig,
    program: Vec<Statement>,
}

impl Tester {
    /// Constructs a new tester, statements are added before running
    pub(crate) fn new<S: ToString>(test_name: S) -> Self {
        Self{
            test_name: test_name.to_string(),
            config: EvalConfig::default(),
            program: Vec::new(),
        }
    }

    /// Utility for quick tests that run a single program and expect it to
    /// complete.
    pub(crate) fn new_program_expect_ok<S: ToString>(test_name: S, program: Vec<Statement>) -> EvalOkTester {
        Self::new(test_name)
            .with_program(program)
            .run()
            .expect_ok()
    }

    /// Utility for quick tests that run a single program and expect it to
    /// fail.
    pub(crate) fn new_program_expect_err<S: ToString>(test_name: S, program: Vec<Statement>) -> EvalErrTester {
        Self::new(test_name)
            .with_program(program)
            .run()
            .expect_err()
    }

    pub(crate) fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn with_statement(mut self, statement: Statement) -> Self {
        self.program.push(statement);
        self
    }

    pub(crate) fn with_program(mut self, program: Vec<Statement>) -> Self {
        self.program.extend(program);
        self
    }

    pub(crate) fn run(self) -> EvalTesterResult {
        let host = BufferHost::new();
        let evaluator = Evaluator::new(self.config)
            .with_host(Box::new(host.clone()));
        let state = EvalState{ test_name: self.test_name, evaluator, host };
        state.execute(&self.program)
    }
}

pub(crate) enum EvalTesterResult {
    Ok(EvalOkTester),
    Err(EvalErrTester),
}

impl EvalTesterResult {
    pub(crate) fn expect_ok(self) -> EvalOkTester {
        match self {
            EvalTesterResult::Ok(v) => v,
            EvalTesterResult::Err(err) => {
                println!("DEBUG: Full error:\n{}", &err.error);
                assert!(
                    false,
                    "[{}] Expected evaluation to succeed, but it failed with: {}",
                    err.state.test_name, &err.error
                );
                unreachable!();
            }
        }
    }

    pub(crate) fn expect_err(self) -> EvalErrTester {
        match self {
            EvalTesterResult::Ok(ok) => {
                assert!(false, "[{}] Expected evaluation to fail, but it succeeded", ok.state.test_name);
                unreachable!();
            },
            EvalTesterResult::Err(err) => err,
        }
    }
}

// The evaluator together with the buffer its `emit`s end up in
struct EvalState {
    test_name: String,
    evaluator: Evaluator,
    host: BufferHost,
}

impl EvalState {
    fn execute(mut self, program: &[Statement]) -> EvalTesterResult {
        match self.evaluator.execute(program) {
            Ok(()) => EvalTesterResult::Ok(EvalOkTester{ state: self }),
            Err(error) => EvalTesterResult::Err(EvalErrTester{ state: self, error }),
        }
    }
}

//------------------------------------------------------------------------------
// Interface for successful evaluation
//------------------------------------------------------------------------------

pub(crate) struct EvalOkTester {
    state: EvalState,
}

impl EvalOkTester {
    /// Runs more statements against the same evaluator
    pub(crate) fn then(self, program: Vec<Statement>) -> EvalTesterResult {
        self.state.execute(&program)
    }

    pub(crate) fn evaluator(&mut self) -> &mut Evaluator {
        &mut self.state.evaluator
    }

    pub(crate) fn id_of(&self, name: &str) -> ValueId {
        match self.state.evaluator.lookup(name) {
            Ok(id) => id,
            Err(err) => {
                assert!(false, "[{}] Expected '{}' to be bound, got: {}", self.state.test_name, name, err);
                unreachable!();
            }
        }
    }

    pub(crate) fn assert_renders(self, name: &str, expected: &str) -> Self {
        let rendered = self.state.evaluator.render_name(name);
        assert_eq!(
            rendered.as_ref().map(|s| s.as_str()), Ok(expected),
            "[{}] Unexpected rendering of '{}'", self.state.test_name, name
        );
        self
    }

    pub(crate) fn assert_ints(self, expected: HashMap<&str, i64>) -> Self {
        for (name, value) in expected {
            let actual = self.state.evaluator.get(name).ok().and_then(|v| v.as_int());
            assert_eq!(
                actual, Some(value),
                "[{}] Expected '{}' to be the Integer {}", self.state.test_name, name, value
            );
        }
        self
    }

    pub(crate) fn assert_unbound(self, name: &str) -> Self {
        let result = self.state.evaluator.lookup(name);
        assert!(
            matches!(result.as_ref().map_err(|e| e.kind()), Err(EvalErrorKind::UnboundName(_))),
            "[{}] Expected '{}' to be unbound, got {:?}", self.state.test_name, name, result
        );
        self
    }

    pub(crate) fn assert_same(self, lhs: &str, rhs: &str) -> Self {
        let (lhs_id, rhs_id) = (self.id_of(lhs), self.id_of(rhs));
        assert!(
            self.state.evaluator.same_identity(lhs_id, rhs_id),
            "[{}] Expected '{}' and '{}' to be the same value", self.state.test_name, lhs, rhs
        );
        self
    }

    pub(crate) fn assert_not_same(self, lhs: &str, rhs: &str) -> Self {
        let (lhs_id, rhs_id) = (self.id_of(lhs), self.id_of(rhs));
        assert!(
            !self.state.evaluator.same_identity(lhs_id, rhs_id),
            "[{}] Expected '{}' and '{}' to be distinct values", self.state.test_name, lhs, rhs
        );
        self
    }

    pub(crate) fn assert_equal(self, lhs: &str, rhs: &str, expected: bool) -> Self {
        let (lhs_id, rhs_id) = (self.id_of(lhs), self.id_of(rhs));
        assert_eq!(
            self.state.evaluator.value_equal(lhs_id, rhs_id), Ok(expected),
            "[{}] Unexpected outcome of '{}' == '{}'", self.state.test_name, lhs, rhs
        );
        self
    }

    pub(crate) fn assert_emitted(self, expected: &[&str]) -> Self {
        let lines = self.state.host.lines();
        assert_eq!(
            lines, expected,
            "[{}] Unexpected emitted lines", self.state.test_name
        );
        self
    }

    pub(crate) fn assert_live(self, expected: usize) -> Self {
        assert_eq!(
            self.state.evaluator.store().live_count(), expected,
            "[{}] Unexpected number of live values", self.state.test_name
        );
        self
    }

    pub(crate) fn live(&self) -> usize {
        self.state.evaluator.store().live_count()
    }
}

//------------------------------------------------------------------------------
// Interface for failed evaluation
//------------------------------------------------------------------------------

pub(crate) struct EvalErrTester {
    state: EvalState,
    error: EvalError,
}

impl EvalErrTester {
    pub(crate) fn assert_kind<F: Fn(&EvalErrorKind) -> bool>(self, f: F) -> Self {
        assert!(
            f(self.error.kind()),
            "[{}] Unexpected error kind: {:?}", self.state.test_name, self.error.kind()
        );
        self
    }

    pub(crate) fn assert_kind_eq(self, expected: EvalErrorKind) -> Self {
        assert_eq!(
            self.error.kind(), &expected,
            "[{}] Unexpected error kind", self.state.test_name
        );
        self
    }

    pub(crate) fn assert_position(self, expected: &[usize]) -> Self {
        assert_eq!(
            self.error.position(), expected,
            "[{}] Unexpected error position", self.state.test_name
        );
        self
    }

    pub(crate) fn assert_msg_has(self, msg: &str) -> Self {
        let full = self.error.to_string();
        assert!(
            full.contains(msg),
            "[{}] Expected error message to contain '{}', got '{}'", self.state.test_name, msg, full
        );
        self
    }

    /// Continues with the state the evaluator was left in; statements that
    /// ran before the error keep their effects.
    pub(crate) fn state(self) -> EvalOkTester {
        EvalOkTester{ state: self.state }
    }
}
