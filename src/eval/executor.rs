use crate::common::*;
use crate::config::{EvalConfig, MAX_SEQUENCE_LEN};
use crate::host::{Host, StdoutHost};
use crate::logging::{DummyLogger, FileLogger, VecLogger};

use super::ast::*;
use super::env::{Environment, FrameId};
use super::equality;
use super::error::ArityMismatch;
use super::snapshot::ValueGroup;
use super::store::{Mutation, Store, StoreStats};
use super::value::*;

macro_rules! debug_log {
    ($format:literal) => {
        enabled_debug_print!(false, "exec", $format);
    };
    ($format:literal, $($args:expr),*) => {
        enabled_debug_print!(false, "exec", $format, $($args),*);
    };
}

/// How a block finished. `Break` and `Continue` travel up to the innermost
/// loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

enum Cursor {
    // Re-reads the list on every step, so the body sees (and is affected by)
    // its own mutations of the list
    List { list: ValueId, next: usize },
    // Owned references to Text characters or Mapping keys
    Snapshot { items: std::vec::IntoIter<ValueId> },
}

/// Runs statement sequences against one store and one environment. Every
/// expression evaluates to an owned reference; the evaluator releases all of
/// them before the statement that created them completes, so between
/// statements only bindings (and the host) hold references.
#[derive(Debug)]
pub struct Evaluator {
    config: EvalConfig,
    store: Store,
    env: Environment,
    frame: FrameId,
    loop_depth: usize,
    logger: Box<dyn Logger>,
    host: Box<dyn Host>,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        let store = Store::new(&config);
        let env = Environment::new();
        let frame = env.global_frame();
        Self{
            config,
            store,
            env,
            frame,
            loop_depth: 0,
            logger: Box::new(DummyLogger),
            host: Box::new(StdoutHost),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Logs to `file`, tagging every line with the configured instance id.
    pub fn with_file_logger(self, file: std::fs::File) -> Self {
        let logger = FileLogger::new(self.config.instance_id, file);
        self.with_logger(Box::new(logger))
    }

    pub fn with_vec_logger(self) -> Self {
        let logger = VecLogger::new(self.config.instance_id);
        self.with_logger(Box::new(logger))
    }

    pub fn with_host(mut self, host: Box<dyn Host>) -> Self {
        self.host = host;
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Executes `program` in the current frame. Statements that completed
    /// before an error keep their effects.
    pub fn execute(&mut self, program: &[Statement]) -> EvalResult<()> {
        debug_log!("Executing {} statement(s) in frame {:?}", program.len(), self.frame);
        self.loop_depth = 0;
        match self.execute_block(program) {
            Ok(flow) => {
                debug_assert_eq!(flow, Flow::Normal, "loop control escaped its loop");
                Ok(())
            },
            Err(err) => {
                log!(self.logger, "Error: {}", err);
                Err(err)
            }
        }
    }

    /// Executes `program` in a fresh frame nested in the current one. The
    /// frame and all of its bindings are released afterwards, also if the
    /// program failed.
    pub fn execute_in_scope(&mut self, program: &[Statement]) -> EvalResult<()> {
        let outer = self.frame;
        let inner = self.env.push_frame(outer);
        log!(self.logger, "Entering scope {} (depth {})", inner.index(), self.env.depth());

        self.frame = inner;
        let result = self.execute(program);
        self.frame = outer;

        let live_before = self.store.live_count();
        let unbound = self.env.unbind_frame(&mut self.store, inner);
        log!(
            self.logger, "Leaving scope {}, {} value(s) reclaimed",
            inner.index(), live_before - self.store.live_count()
        );

        result?;
        unbound
    }

    /// Identity bound to `name` as seen from the current frame. The reference
    /// is borrowed from the binding.
    pub fn lookup(&self, name: &str) -> EvalResult<ValueId> {
        self.env.resolve(self.frame, name)
    }

    pub fn get(&self, name: &str) -> EvalResult<&Value> {
        let id = self.lookup(name)?;
        self.store.get(id)
    }

    /// Binds `name` in the current frame, taking over the caller's
    /// reference (e.g. one returned by `deserialize`).
    pub fn bind(&mut self, name: &str, value: ValueId) -> EvalResult<()> {
        self.env.bind(&mut self.store, self.frame, name, value)
    }

    pub fn render(&self, id: ValueId) -> EvalResult<String> {
        render(&self.store, id, self.config.max_compare_depth)
    }

    pub fn render_name(&self, name: &str) -> EvalResult<String> {
        self.render(self.lookup(name)?)
    }

    pub fn value_equal(&self, lhs: ValueId, rhs: ValueId) -> EvalResult<bool> {
        equality::value_equal(&self.store, lhs, rhs, self.config.max_compare_depth)
    }

    pub fn same_identity(&self, lhs: ValueId, rhs: ValueId) -> bool {
        equality::same_identity(lhs, rhs)
    }

    /// Runs a cycle scan now, returns the number of values it reclaimed.
    pub fn collect_cycles(&mut self) -> usize {
        let reclaimed = self.store.cycle_scan();
        log!(
            self.logger, "Cycle scan reclaimed {} value(s), {} live",
            reclaimed, self.store.live_count()
        );
        reclaimed
    }

    /// Detaches the value `id` (and everything it references) from the store
    /// and encodes it.
    pub fn serialize(&mut self, id: ValueId) -> EvalResult<Vec<u8>> {
        let group = ValueGroup::from_store(&self.store, id)?;
        let bytes = group.to_bytes()?;
        log!(self.logger, "Serialized {} value(s) into {} bytes", group.len(), bytes.len());
        Ok(bytes)
    }

    /// Recreates a serialized value in the store. The returned reference is
    /// owned by the caller, typically handed to `bind`.
    pub fn deserialize(&mut self, bytes: &[u8]) -> EvalResult<ValueId> {
        let group = ValueGroup::from_bytes(bytes)?;
        let id = group.into_store(&mut self.store)?;
        log!(self.logger, "Deserialized {} value(s) as {}", group.len(), id);
        Ok(id)
    }

    //--------------------------------------------------------------------------
    // Statements
    //--------------------------------------------------------------------------

    fn execute_block(&mut self, block: &[Statement]) -> EvalResult<Flow> {
        for (idx, statement) in block.iter().enumerate() {
            let flow = self.execute_statement(statement)
                .map_err(|err| err.at_statement(idx))?;

            // Statement boundary: no temporaries alive, safe to scan
            if self.store.scan_due() {
                self.collect_cycles();
            }

            if flow != Flow::Normal {
                return Ok(flow);
            }
        }

        Ok(Flow::Normal)
    }

    fn execute_statement(&mut self, statement: &Statement) -> EvalResult<Flow> {
        match statement {
            Statement::Expression(expr) => {
                let value = self.eval_expr(expr)?;
                self.store.release(value)?;
            },
            Statement::Assign(targets, value) => {
                for target in targets {
                    check_target(target, false)?;
                }
                let value = self.eval_expr(value)?;
                let mut assigned = Ok(());
                for target in targets {
                    assigned = self.assign(target, value);
                    if assigned.is_err() {
                        break;
                    }
                }
                self.release_after(assigned, &[value])?;
            },
            Statement::AugAssign(target, op, value) => {
                self.aug_assign(target, *op, value)?;
            },
            Statement::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            },
            Statement::If{ branches, otherwise } => {
                for (test, body) in branches {
                    if self.eval_truthy(test)? {
                        return self.execute_block(body);
                    }
                }
                return self.execute_block(otherwise);
            },
            Statement::While{ test, body, otherwise } => {
                return self.execute_while(test, body, otherwise);
            },
            Statement::For{ target, iterable, body, otherwise } => {
                return self.execute_for(target, iterable, body, otherwise);
            },
            Statement::Break => {
                if self.loop_depth == 0 {
                    return Err(EvalErrorKind::ControlFlowOutsideLoop("break").into());
                }
                return Ok(Flow::Break);
            },
            Statement::Continue => {
                if self.loop_depth == 0 {
                    return Err(EvalErrorKind::ControlFlowOutsideLoop("continue").into());
                }
                return Ok(Flow::Continue);
            },
            Statement::Pass => {},
            Statement::Global(names) => {
                for name in names {
                    self.env.declare_global(self.frame, name);
                }
            },
            Statement::Nonlocal(names) => {
                for name in names {
                    self.env.declare_nonlocal(self.frame, name)?;
                }
            },
            Statement::Emit(values) => self.emit(values)?,
        }

        Ok(Flow::Normal)
    }

    fn execute_while(&mut self, test: &Expression, body: &[Statement], otherwise: &[Statement]) -> EvalResult<Flow> {
        loop {
            if !self.eval_truthy(test)? {
                return self.execute_block(otherwise);
            }

            self.loop_depth += 1;
            let flow = self.execute_block(body);
            self.loop_depth -= 1;
            if flow? == Flow::Break {
                return Ok(Flow::Normal);
            }
        }
    }

    fn execute_for(&mut self, target: &Target, iterable: &Expression, body: &[Statement], otherwise: &[Statement]) -> EvalResult<Flow> {
        check_target(target, false)?;
        let iterable = self.eval_expr(iterable)?;
        let cursor = self.start_iteration(iterable);
        let mut cursor = self.release_on_err(cursor, &[iterable])?;

        let result = self.run_for(target, &mut cursor, body, otherwise);
        let finished = match cursor {
            Cursor::Snapshot{ items } => self.store.release_all(items),
            Cursor::List{ .. } => Ok(()),
        };
        let flow = self.release_after(result, &[iterable])?;
        finished?;

        Ok(flow)
    }

    fn run_for(&mut self, target: &Target, cursor: &mut Cursor, body: &[Statement], otherwise: &[Statement]) -> EvalResult<Flow> {
        loop {
            let item = match self.next_item(cursor)? {
                Some(item) => item,
                None => return self.execute_block(otherwise),
            };
            let assigned = self.assign(target, item);
            self.release_after(assigned, &[item])?;

            self.loop_depth += 1;
            let flow = self.execute_block(body);
            self.loop_depth -= 1;
            if flow? == Flow::Break {
                return Ok(Flow::Normal);
            }
        }
    }

    fn start_iteration(&mut self, iterable: ValueId) -> EvalResult<Cursor> {
        if self.store.kind(iterable)? == ValueKind::List {
            return Ok(Cursor::List{ list: iterable, next: 0 });
        }

        let items = self.iterate_snapshot(iterable)?;
        Ok(Cursor::Snapshot{ items: items.into_iter() })
    }

    /// Next element of the iteration as an owned reference.
    fn next_item(&mut self, cursor: &mut Cursor) -> EvalResult<Option<ValueId>> {
        match cursor {
            Cursor::List{ list, next } => {
                let item = self.store.get(*list)?
                    .as_list()
                    .and_then(|items| items.get(*next).copied());
                if let Some(item) = item {
                    self.store.retain(item)?;
                    *next += 1;
                }
                Ok(item)
            },
            Cursor::Snapshot{ items } => Ok(items.next()),
        }
    }

    fn emit(&mut self, values: &[Expression]) -> EvalResult<()> {
        let values = self.eval_exprs(values)?;
        let max_depth = self.config.max_compare_depth;
        let rendered: EvalResult<Vec<String>> = values.iter()
            .map(|value| render(&self.store, *value, max_depth))
            .collect();
        let rendered = self.release_after(rendered, &values)?;

        self.host.emit(&rendered.join(" "));
        Ok(())
    }

    //--------------------------------------------------------------------------
    // Targets
    //--------------------------------------------------------------------------

    /// Assigns the borrowed `value` to `target`, retaining it wherever it is
    /// stored.
    fn assign(&mut self, target: &Target, value: ValueId) -> EvalResult<()> {
        match target {
            Target::Name(name) => {
                self.store.retain(value)?;
                self.env.bind(&mut self.store, self.frame, name, value)
            },
            Target::Index(subject, index) => {
                let (subject, index) = self.eval_pair(subject, index)?;
                let stored = self.store_index(subject, index, value);
                self.release_after(stored, &[subject, index])
            },
            Target::Slice(subject, from, to) => {
                let subject = self.eval_expr(subject)?;
                let bounds = self.eval_bounds(from.as_ref(), to.as_ref());
                let (from, to) = self.release_on_err(bounds, &[subject])?;
                let stored = self.store_slice(subject, from, to, value);
                self.release_after(stored, &[subject])
            },
            Target::Sequence(targets) => {
                let items = self.iterate_snapshot(value)?;
                let assigned = self.unpack(targets, &items);
                self.release_after(assigned, &items)
            },
            Target::Starred(_) => {
                Err(EvalErrorKind::InvalidTarget("starred assignment target must be in a sequence").into())
            },
        }
    }

    /// Distributes `items` over `targets` left to right. A starred target
    /// receives a new List with whatever the plain targets leave over.
    fn unpack(&mut self, targets: &[Target], items: &[ValueId]) -> EvalResult<()> {
        let star = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        let star = match star {
            Some(star) => star,
            None => {
                if items.len() != targets.len() {
                    let arity = ArityMismatch{ expected: targets.len(), got: items.len(), starred: false };
                    return Err(EvalErrorKind::UnpackArity(arity).into());
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, *item)?;
                }
                return Ok(());
            }
        };

        let plain = targets.len() - 1;
        if items.len() < plain {
            let arity = ArityMismatch{ expected: plain, got: items.len(), starred: true };
            return Err(EvalErrorKind::UnpackArity(arity).into());
        }

        let trailing = targets.len() - star - 1;
        let middle_end = items.len() - trailing;
        for (target, item) in targets[..star].iter().zip(&items[..star]) {
            self.assign(target, *item)?;
        }

        let middle = items[star..middle_end].to_vec();
        for item in &middle {
            self.store.retain(*item)?;
        }
        let middle = self.store.allocate(Value::List(middle));
        match &targets[star] {
            Target::Starred(name) => self.env.bind(&mut self.store, self.frame, name, middle)?,
            _ => unreachable!("position of starred target"),
        }

        for (target, item) in targets[star + 1..].iter().zip(&items[middle_end..]) {
            self.assign(target, *item)?;
        }
        Ok(())
    }

    /// `target op= value`. A List combined with `+` or `*` is changed in
    /// place and keeps its identity, everything else is rebound to the
    /// result of the plain operator.
    fn aug_assign(&mut self, target: &Target, op: BinaryOperator, value: &Expression) -> EvalResult<()> {
        if op == BinaryOperator::LogicalAnd || op == BinaryOperator::LogicalOr {
            return Err(EvalErrorKind::InvalidArgument(
                format!("'{}' has no augmented assignment form", op.symbol())
            ).into());
        }

        match target {
            Target::Name(name) => {
                let current = self.env.resolve(self.frame, name)?;
                // Kept alive while the right hand side runs, it may rebind
                self.store.retain(current)?;
                let rhs = self.eval_expr(value);
                let rhs = self.release_on_err(rhs, &[current])?;
                let result = self.combine(op, current, rhs);
                let result = self.release_after(result, &[current, rhs])?;
                self.env.bind(&mut self.store, self.frame, name, result)
            },
            Target::Index(subject, index) => {
                let (subject, index) = self.eval_pair(subject, index)?;
                let updated = self.aug_assign_index(subject, index, op, value);
                self.release_after(updated, &[subject, index])
            },
            Target::Slice(subject, from, to) => {
                let subject = self.eval_expr(subject)?;
                let bounds = self.eval_bounds(from.as_ref(), to.as_ref());
                let (from, to) = self.release_on_err(bounds, &[subject])?;
                let updated = self.aug_assign_slice(subject, from, to, op, value);
                self.release_after(updated, &[subject])
            },
            Target::Sequence(_) | Target::Starred(_) => {
                Err(EvalErrorKind::InvalidTarget("illegal expression for augmented assignment").into())
            },
        }
    }

    fn aug_assign_index(&mut self, subject: ValueId, index: ValueId, op: BinaryOperator, value: &Expression) -> EvalResult<()> {
        let current = self.read_index(subject, index)?;
        let rhs = self.eval_expr(value);
        let rhs = self.release_on_err(rhs, &[current])?;
        let result = self.combine(op, current, rhs);
        let result = self.release_after(result, &[current, rhs])?;
        let stored = self.store_index(subject, index, result);
        self.release_after(stored, &[result])
    }

    fn aug_assign_slice(&mut self, subject: ValueId, from: Option<i64>, to: Option<i64>, op: BinaryOperator, value: &Expression) -> EvalResult<()> {
        let current = self.read_slice(subject, from, to)?;
        let rhs = self.eval_expr(value);
        let rhs = self.release_on_err(rhs, &[current])?;
        let result = self.combine(op, current, rhs);
        let result = self.release_after(result, &[current, rhs])?;
        let stored = self.store_slice(subject, from, to, result);
        self.release_after(stored, &[result])
    }

    /// Result of `current op rhs` as used by augmented assignment, as an
    /// owned reference.
    fn combine(&mut self, op: BinaryOperator, current: ValueId, rhs: ValueId) -> EvalResult<ValueId> {
        if self.store.kind(current)? == ValueKind::List {
            match op {
                BinaryOperator::Add => {
                    let items = self.iterate_snapshot(rhs)?;
                    let extended = self.store.mutate_in_place(current, Mutation::Extend(items.clone()));
                    self.release_after(extended, &items)?;
                    self.store.retain(current)?;
                    return Ok(current);
                },
                BinaryOperator::Multiply => {
                    if let Some(times) = self.store.get(rhs)?.as_int() {
                        self.store.mutate_in_place(current, Mutation::Repeat(repeat_count(times)))?;
                        self.store.retain(current)?;
                        return Ok(current);
                    }
                },
                _ => {},
            }
        }

        apply_binary_operator(&mut self.store, op, current, rhs, self.config.max_compare_depth)
    }

    fn delete(&mut self, target: &Target) -> EvalResult<()> {
        match target {
            Target::Name(name) => self.env.unbind(&mut self.store, self.frame, name),
            Target::Index(subject, index) => {
                let (subject, index) = self.eval_pair(subject, index)?;
                let deleted = self.delete_index(subject, index);
                self.release_after(deleted, &[subject, index])
            },
            Target::Slice(subject, from, to) => {
                let subject = self.eval_expr(subject)?;
                let bounds = self.eval_bounds(from.as_ref(), to.as_ref());
                let (from, to) = self.release_on_err(bounds, &[subject])?;
                let deleted = self.splice(subject, from, to, &[]);
                self.release_after(deleted, &[subject])
            },
            Target::Sequence(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            },
            Target::Starred(_) => Err(EvalErrorKind::InvalidTarget("cannot delete starred").into()),
        }
    }

    fn delete_index(&mut self, subject: ValueId, index: ValueId) -> EvalResult<()> {
        let removed = match self.store.kind(subject)? {
            ValueKind::List => {
                let idx = normalize_index(ValueKind::List, self.int_arg(index, "index")?, self.list_len(subject)?)?;
                self.store.mutate_in_place(subject, Mutation::Remove(idx))?
            },
            ValueKind::Mapping => {
                let key = MapKey::from_value(self.store.get(index)?)?;
                self.store.mutate_in_place(subject, Mutation::MapRemove(key))?
            },
            kind => return Err(EvalErrorKind::ImmutableTarget(kind).into()),
        };

        if let Some(removed) = removed {
            self.store.release(removed)?;
        }
        Ok(())
    }

    fn store_index(&mut self, subject: ValueId, index: ValueId, value: ValueId) -> EvalResult<()> {
        match self.store.kind(subject)? {
            ValueKind::List => {
                let idx = normalize_index(ValueKind::List, self.int_arg(index, "index")?, self.list_len(subject)?)?;
                self.store.mutate_in_place(subject, Mutation::Replace(idx, value))?;
            },
            ValueKind::Mapping => {
                self.store.mutate_in_place(subject, Mutation::MapInsert{ key: index, value })?;
            },
            kind => return Err(EvalErrorKind::ImmutableTarget(kind).into()),
        }

        Ok(())
    }

    /// `subject[from:to] = value`: the range is replaced by the elements of
    /// any iterable, so an empty one deletes and a zero width range inserts.
    fn store_slice(&mut self, subject: ValueId, from: Option<i64>, to: Option<i64>, value: ValueId) -> EvalResult<()> {
        // Snapshot first, `value` may be `subject` itself
        let items = self.iterate_snapshot(value)?;
        let spliced = self.splice(subject, from, to, &items);
        self.release_after(spliced, &items)
    }

    fn splice(&mut self, subject: ValueId, from: Option<i64>, to: Option<i64>, items: &[ValueId]) -> EvalResult<()> {
        let kind = self.store.kind(subject)?;
        if kind != ValueKind::List {
            if kind.is_mutable() {
                return Err(EvalError::type_mismatch("slice assignment", kind, None));
            }
            return Err(EvalErrorKind::ImmutableTarget(kind).into());
        }

        let (start, end) = slice_bounds(self.list_len(subject)?, from, to);
        self.store.mutate_in_place(subject, Mutation::Splice{ start, end, items: items.to_vec() })?;
        Ok(())
    }

    //--------------------------------------------------------------------------
    // Expressions
    //--------------------------------------------------------------------------

    fn eval_expr(&mut self, expr: &Expression) -> EvalResult<ValueId> {
        match expr {
            Expression::Literal(literal) => Ok(self.store.allocate(literal_value(literal))),
            Expression::Variable(name) => {
                let value = self.env.resolve(self.frame, name)?;
                self.store.retain(value)?;
                Ok(value)
            },
            Expression::List(items) => {
                let items = self.eval_exprs(items)?;
                Ok(self.store.allocate(Value::List(items)))
            },
            Expression::Mapping(pairs) => {
                let mapping = self.store.allocate(Value::Mapping(Mapping::default()));
                for (key, value) in pairs {
                    let pair = self.eval_pair(key, value);
                    let (key, value) = self.release_on_err(pair, &[mapping])?;
                    let inserted = self.store.mutate_in_place(mapping, Mutation::MapInsert{ key, value });
                    let inserted = self.release_after(inserted, &[key, value]);
                    self.release_on_err(inserted, &[mapping])?;
                }
                Ok(mapping)
            },
            Expression::Binary(lhs, op, rhs) => self.eval_binary(lhs, *op, rhs),
            Expression::Unary(op, operand) => {
                let operand = self.eval_expr(operand)?;
                let result = apply_unary_operator(&mut self.store, *op, operand);
                self.release_after(result, &[operand])
            },
            Expression::Index(subject, index) => {
                let (subject, index) = self.eval_pair(subject, index)?;
                let result = self.read_index(subject, index);
                self.release_after(result, &[subject, index])
            },
            Expression::Slice(subject, from, to) => {
                let subject = self.eval_expr(subject)?;
                let bounds = self.eval_bounds(from.as_deref(), to.as_deref());
                let (from, to) = self.release_on_err(bounds, &[subject])?;
                let result = self.read_slice(subject, from, to);
                self.release_after(result, &[subject])
            },
            Expression::Call(builtin, args) => {
                let args = self.eval_exprs(args)?;
                let result = self.call_builtin(*builtin, &args);
                self.release_after(result, &args)
            },
            Expression::Method(subject, method, args) => {
                let subject = self.eval_expr(subject)?;
                let args = self.eval_exprs(args);
                let args = self.release_on_err(args, &[subject])?;
                let result = self.call_method(subject, *method, &args);
                let result = self.release_after(result, &args);
                self.release_after(result, &[subject])
            },
        }
    }

    fn eval_exprs(&mut self, exprs: &[Expression]) -> EvalResult<Vec<ValueId>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let value = self.eval_expr(expr);
            let value = self.release_on_err(value, &values)?;
            values.push(value);
        }
        Ok(values)
    }

    fn eval_pair(&mut self, first: &Expression, second: &Expression) -> EvalResult<(ValueId, ValueId)> {
        let first = self.eval_expr(first)?;
        let second = self.eval_expr(second);
        let second = self.release_on_err(second, &[first])?;
        Ok((first, second))
    }

    fn eval_truthy(&mut self, expr: &Expression) -> EvalResult<bool> {
        let value = self.eval_expr(expr)?;
        let truthy = self.store.get(value).map(|v| v.is_truthy());
        self.release_after(truthy, &[value])
    }

    fn eval_bounds(&mut self, from: Option<&Expression>, to: Option<&Expression>) -> EvalResult<(Option<i64>, Option<i64>)> {
        let from = self.eval_bound(from)?;
        let to = self.eval_bound(to)?;
        Ok((from, to))
    }

    // Nil and a missing bound both mean "up to the end"
    fn eval_bound(&mut self, expr: Option<&Expression>) -> EvalResult<Option<i64>> {
        let expr = match expr {
            Some(expr) => expr,
            None => return Ok(None),
        };

        let value = self.eval_expr(expr)?;
        let bound = match self.store.get(value) {
            Ok(Value::Nil) => Ok(None),
            Ok(Value::Int(v)) => Ok(Some(*v)),
            Ok(other) => Err(EvalError::type_mismatch("slice index", other.kind(), None)),
            Err(err) => Err(err),
        };
        self.release_after(bound, &[value])
    }

    fn eval_binary(&mut self, lhs: &Expression, op: BinaryOperator, rhs: &Expression) -> EvalResult<ValueId> {
        use BinaryOperator as BO;

        match op {
            BO::LogicalAnd | BO::LogicalOr => {
                // Yields one of the operands, not a Bool
                let lhs = self.eval_expr(lhs)?;
                let truthy = self.store.get(lhs).map(|v| v.is_truthy());
                let truthy = self.release_on_err(truthy, &[lhs])?;
                if truthy == (op == BO::LogicalOr) {
                    return Ok(lhs);
                }
                self.store.release(lhs)?;
                self.eval_expr(rhs)
            },
            _ => {
                let (lhs, rhs) = self.eval_pair(lhs, rhs)?;
                let result = apply_binary_operator(&mut self.store, op, lhs, rhs, self.config.max_compare_depth);
                self.release_after(result, &[lhs, rhs])
            },
        }
    }

    fn read_index(&mut self, subject: ValueId, index: ValueId) -> EvalResult<ValueId> {
        match self.store.get(subject)? {
            Value::List(items) => {
                let idx = normalize_index(ValueKind::List, self.int_arg(index, "index")?, items.len())?;
                let item = items[idx];
                self.store.retain(item)?;
                Ok(item)
            },
            Value::Text(text) => {
                let len = text.chars().count();
                let idx = normalize_index(ValueKind::Text, self.int_arg(index, "index")?, len)?;
                let character = text.chars().nth(idx).map(|c| c.to_string()).unwrap_or_default();
                Ok(self.store.allocate(Value::Text(character)))
            },
            Value::Mapping(mapping) => {
                let hashed = MapKey::from_value(self.store.get(index)?)?;
                match mapping.get(&hashed) {
                    Some((_, value)) => {
                        self.store.retain(value)?;
                        Ok(value)
                    },
                    None => Err(EvalErrorKind::KeyNotFound(hashed.to_string()).into()),
                }
            },
            other => Err(EvalErrorKind::NotIndexable(other.kind()).into()),
        }
    }

    fn read_slice(&mut self, subject: ValueId, from: Option<i64>, to: Option<i64>) -> EvalResult<ValueId> {
        match self.store.get(subject)? {
            Value::List(items) => {
                let (start, end) = slice_bounds(items.len(), from, to);
                let sliced = items[start..end].to_vec();
                for item in &sliced {
                    self.store.retain(*item)?;
                }
                Ok(self.store.allocate(Value::List(sliced)))
            },
            Value::Text(text) => {
                let chars: Vec<char> = text.chars().collect();
                let (start, end) = slice_bounds(chars.len(), from, to);
                let sliced: String = chars[start..end].iter().collect();
                Ok(self.store.allocate(Value::Text(sliced)))
            },
            other => Err(EvalErrorKind::NotIndexable(other.kind()).into()),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: &[ValueId]) -> EvalResult<ValueId> {
        let max_depth = self.config.max_compare_depth;
        if builtin == Builtin::Range {
            check_arity(builtin.name(), args, 1, 3)?;
            return self.build_range(args);
        }

        check_arity(builtin.name(), args, 1, 1)?;
        let arg = args[0];
        match builtin {
            Builtin::Len => {
                let len = match self.store.get(arg)? {
                    Value::Text(text) => text.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Mapping(mapping) => mapping.len(),
                    other => return Err(EvalError::type_mismatch("len()", other.kind(), None)),
                };
                Ok(self.store.allocate(Value::Int(len as i64)))
            },
            Builtin::Copy => self.store.copy_shallow(arg),
            Builtin::DeepCopy => self.store.copy_deep(arg, max_depth),
            Builtin::List => {
                let items = self.iterate_snapshot(arg)?;
                Ok(self.store.allocate(Value::List(items)))
            },
            Builtin::Text => {
                let rendered = render(&self.store, arg, max_depth)?;
                Ok(self.store.allocate(Value::Text(rendered)))
            },
            Builtin::Range => unreachable!(),
        }
    }

    fn build_range(&mut self, args: &[ValueId]) -> EvalResult<ValueId> {
        let mut bounds = Vec::with_capacity(args.len());
        for arg in args {
            bounds.push(self.int_arg(*arg, "range()")?);
        }
        let (start, stop, step) = match bounds.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, step] => (*start, *stop, *step),
            _ => unreachable!("arity checked by caller"),
        };
        if step == 0 {
            return Err(EvalErrorKind::InvalidArgument("range() step must not be zero".to_string()).into());
        }

        let span = if step > 0 { stop as i128 - start as i128 } else { start as i128 - stop as i128 };
        let stride = (step as i128).abs();
        let count = if span > 0 { (span + stride - 1) / stride } else { 0 };
        if count > MAX_SEQUENCE_LEN as i128 {
            return Err(EvalErrorKind::InvalidArgument(
                format!("range() of {} elements exceeds the limit of {}", count, MAX_SEQUENCE_LEN)
            ).into());
        }

        let mut items = Vec::with_capacity(count as usize);
        let mut current = start;
        while (step > 0 && current < stop) || (step < 0 && current > stop) {
            items.push(self.store.allocate(Value::Int(current)));
            current = match current.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(self.store.allocate(Value::List(items)))
    }

    fn call_method(&mut self, subject: ValueId, method: Method, args: &[ValueId]) -> EvalResult<ValueId> {
        let kind = self.store.kind(subject)?;
        let expected = match method {
            Method::Append | Method::Extend | Method::Insert | Method::Pop => ValueKind::List,
            Method::Keys | Method::Values | Method::Get => ValueKind::Mapping,
        };
        if kind != expected {
            return Err(EvalError::type_mismatch(method.name(), kind, None));
        }

        match method {
            Method::Append => {
                check_arity(method.name(), args, 1, 1)?;
                self.store.mutate_in_place(subject, Mutation::Append(args[0]))?;
            },
            Method::Extend => {
                check_arity(method.name(), args, 1, 1)?;
                let items = self.iterate_snapshot(args[0])?;
                let extended = self.store.mutate_in_place(subject, Mutation::Extend(items.clone()));
                self.release_after(extended, &items)?;
            },
            Method::Insert => {
                check_arity(method.name(), args, 2, 2)?;
                let len = self.list_len(subject)?;
                let idx = clamp_index(self.int_arg(args[0], "insert()")?, len);
                self.store.mutate_in_place(subject, Mutation::Insert(idx, args[1]))?;
            },
            Method::Pop => {
                check_arity(method.name(), args, 0, 1)?;
                let idx = match args.first() {
                    Some(idx) => self.int_arg(*idx, "pop()")?,
                    None => -1,
                };
                let idx = normalize_index(ValueKind::List, idx, self.list_len(subject)?)?;
                let removed = self.store.mutate_in_place(subject, Mutation::Remove(idx))?;
                return Ok(removed.expect("removal hands out the element"));
            },
            Method::Keys | Method::Values => {
                check_arity(method.name(), args, 0, 0)?;
                let ids: Vec<ValueId> = match self.store.get(subject)?.as_mapping() {
                    Some(mapping) if method == Method::Keys => mapping.keys().collect(),
                    Some(mapping) => mapping.values().collect(),
                    None => Vec::new(),
                };
                for id in &ids {
                    self.store.retain(*id)?;
                }
                return Ok(self.store.allocate(Value::List(ids)));
            },
            Method::Get => {
                check_arity(method.name(), args, 1, 2)?;
                let hashed = MapKey::from_value(self.store.get(args[0])?)?;
                let found = self.store.get(subject)?
                    .as_mapping()
                    .and_then(|mapping| mapping.get(&hashed))
                    .map(|(_, value)| value)
                    .or_else(|| args.get(1).copied());
                if let Some(found) = found {
                    self.store.retain(found)?;
                    return Ok(found);
                }
            },
        }

        Ok(self.store.allocate(Value::Nil))
    }

    //--------------------------------------------------------------------------
    // Utilities
    //--------------------------------------------------------------------------

    /// Elements of any iterable as owned references. Text yields new single
    /// character Texts, a Mapping its keys.
    fn iterate_snapshot(&mut self, id: ValueId) -> EvalResult<Vec<ValueId>> {
        let items: Vec<ValueId> = match self.store.get(id)? {
            Value::List(items) => items.clone(),
            Value::Mapping(mapping) => mapping.keys().collect(),
            Value::Text(text) => {
                let characters: Vec<String> = text.chars().map(|c| c.to_string()).collect();
                let store = &mut self.store;
                return Ok(characters.into_iter()
                    .map(|c| store.allocate(Value::Text(c)))
                    .collect());
            },
            other => return Err(EvalErrorKind::NotIterable(other.kind()).into()),
        };

        for item in &items {
            self.store.retain(*item)?;
        }
        Ok(items)
    }

    fn int_arg(&self, id: ValueId, op: &'static str) -> EvalResult<i64> {
        match self.store.get(id)? {
            Value::Int(v) => Ok(*v),
            other => Err(EvalError::type_mismatch(op, other.kind(), None)),
        }
    }

    fn list_len(&self, id: ValueId) -> EvalResult<usize> {
        Ok(self.store.get(id)?.as_list().map(|items| items.len()).unwrap_or(0))
    }

    /// Releases the owned temporaries in `owned` and passes `result` on. The
    /// error in `result` takes precedence over a failing release.
    fn release_after<T>(&mut self, result: EvalResult<T>, owned: &[ValueId]) -> EvalResult<T> {
        let released = self.store.release_all(owned.iter().copied());
        let value = result?;
        released?;
        Ok(value)
    }

    fn release_on_err<T>(&mut self, result: EvalResult<T>, owned: &[ValueId]) -> EvalResult<T> {
        if result.is_err() {
            let _ = self.store.release_all(owned.iter().copied());
        }
        result
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Nil => Value::Nil,
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Int(v) => Value::Int(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::Text(v) => Value::Text(v.clone()),
    }
}

/// Rejects malformed targets before the right hand side is evaluated.
fn check_target(target: &Target, in_sequence: bool) -> EvalResult<()> {
    match target {
        Target::Sequence(targets) => {
            let starred = targets.iter().filter(|t| matches!(t, Target::Starred(_))).count();
            if starred > 1 {
                return Err(EvalErrorKind::MultipleStarTargets.into());
            }
            for target in targets {
                check_target(target, true)?;
            }
        },
        Target::Starred(_) if !in_sequence => {
            return Err(EvalErrorKind::InvalidTarget("starred assignment target must be in a sequence").into());
        },
        _ => {},
    }

    Ok(())
}

fn check_arity(name: &str, args: &[ValueId], min: usize, max: usize) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
        return Err(EvalErrorKind::InvalidArgument(
            format!("{}() takes {} argument(s), {} given", name, expected, args.len())
        ).into());
    }
    Ok(())
}

/// Resolves a possibly negative element index.
fn normalize_index(kind: ValueKind, index: i64, len: usize) -> EvalResult<usize> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    if adjusted < 0 || adjusted >= len as i64 {
        return Err(EvalErrorKind::IndexOutOfRange{ kind, index, len }.into());
    }
    Ok(adjusted as usize)
}

// Insertion position: out of range positions clamp to either end
fn clamp_index(index: i64, len: usize) -> usize {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    adjusted.max(0).min(len as i64) as usize
}

/// Slice bounds clamped into `0..=len`, with `end` never before `start`.
fn slice_bounds(len: usize, from: Option<i64>, to: Option<i64>) -> (usize, usize) {
    let clamp = |bound: i64| -> usize {
        let adjusted = if bound < 0 { bound + len as i64 } else { bound };
        adjusted.max(0).min(len as i64) as usize
    };
    let start = from.map(clamp).unwrap_or(0);
    let end = to.map(clamp).unwrap_or(len);
    (start, end.max(start))
}
