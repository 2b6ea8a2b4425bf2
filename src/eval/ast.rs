/// Statement and expression tree handed to the evaluator by a program
/// loader. The evaluator never parses text; the `build` functions at the
/// bottom of this file keep hand-constructed programs readable.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Remainder,
    Power,
    Equality,
    Inequality,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Is,
    IsNot,
    In,
    NotIn,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        use BinaryOperator as BO;
        match self {
            BO::Add => "+",
            BO::Subtract => "-",
            BO::Multiply => "*",
            BO::Divide => "/",
            BO::FloorDivide => "//",
            BO::Remainder => "%",
            BO::Power => "**",
            BO::Equality => "==",
            BO::Inequality => "!=",
            BO::LessThan => "<",
            BO::LessThanEqual => "<=",
            BO::GreaterThan => ">",
            BO::GreaterThanEqual => ">=",
            BO::Is => "is",
            BO::IsNot => "is not",
            BO::In => "in",
            BO::NotIn => "not in",
            BO::LogicalAnd => "and",
            BO::LogicalOr => "or",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOperator {
    Positive,
    Negative,
    LogicalNot,
}

impl UnaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Positive => "unary +",
            UnaryOperator::Negative => "unary -",
            UnaryOperator::LogicalNot => "not",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Builtin {
    /// Element count of a Text, List or Mapping
    Len,
    /// New container sharing the element identities
    Copy,
    /// Fully independent copy of a nested structure
    DeepCopy,
    /// Materializes any iterable into a new List
    List,
    /// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`
    Range,
    /// Rendered form of any value as Text
    Text,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Copy => "copy",
            Builtin::DeepCopy => "deepcopy",
            Builtin::List => "list",
            Builtin::Range => "range",
            Builtin::Text => "text",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    // List
    Append,
    Extend,
    Insert,
    Pop,
    // Mapping
    Keys,
    Values,
    Get,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Append => "append",
            Method::Extend => "extend",
            Method::Insert => "insert",
            Method::Pop => "pop",
            Method::Keys => "keys",
            Method::Values => "values",
            Method::Get => "get",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Variable(String),
    List(Vec<Expression>),
    Mapping(Vec<(Expression, Expression)>),
    Binary(Box<Expression>, BinaryOperator, Box<Expression>),
    Unary(UnaryOperator, Box<Expression>),
    Index(Box<Expression>, Box<Expression>),
    Slice(Box<Expression>, Option<Box<Expression>>, Option<Box<Expression>>),
    Call(Builtin, Vec<Expression>),
    Method(Box<Expression>, Method, Vec<Expression>),
}

/// Left-hand side of an assignment, deletion or `for` loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index(Expression, Expression),
    Slice(Expression, Option<Expression>, Option<Expression>),
    Sequence(Vec<Target>),
    /// Only valid directly inside a `Sequence`
    Starred(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Expression(Expression),
    /// `t1 = t2 = ... = value`, targets assigned left to right
    Assign(Vec<Target>, Expression),
    AugAssign(Target, BinaryOperator, Expression),
    Delete(Vec<Target>),
    If {
        branches: Vec<(Expression, Vec<Statement>)>,
        otherwise: Vec<Statement>,
    },
    While {
        test: Expression,
        body: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    For {
        target: Target,
        iterable: Expression,
        body: Vec<Statement>,
        otherwise: Vec<Statement>,
    },
    Break,
    Continue,
    Pass,
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Emit(Vec<Expression>),
}

//------------------------------------------------------------------------------
// Builders
//------------------------------------------------------------------------------

pub mod build {
    use super::*;

    pub fn nil() -> Expression { Expression::Literal(Literal::Nil) }
    pub fn boolean(v: bool) -> Expression { Expression::Literal(Literal::Bool(v)) }
    pub fn int(v: i64) -> Expression { Expression::Literal(Literal::Int(v)) }
    pub fn float(v: f64) -> Expression { Expression::Literal(Literal::Float(v)) }
    pub fn text<S: ToString>(v: S) -> Expression { Expression::Literal(Literal::Text(v.to_string())) }
    pub fn var<S: ToString>(name: S) -> Expression { Expression::Variable(name.to_string()) }

    pub fn list<I: IntoIterator<Item = Expression>>(items: I) -> Expression {
        Expression::List(items.into_iter().collect())
    }

    pub fn ints(values: &[i64]) -> Expression {
        list(values.iter().map(|v| int(*v)))
    }

    pub fn mapping<I: IntoIterator<Item = (Expression, Expression)>>(pairs: I) -> Expression {
        Expression::Mapping(pairs.into_iter().collect())
    }

    pub fn binary(lhs: Expression, op: BinaryOperator, rhs: Expression) -> Expression {
        Expression::Binary(Box::new(lhs), op, Box::new(rhs))
    }

    pub fn add(lhs: Expression, rhs: Expression) -> Expression { binary(lhs, BinaryOperator::Add, rhs) }
    pub fn mul(lhs: Expression, rhs: Expression) -> Expression { binary(lhs, BinaryOperator::Multiply, rhs) }
    pub fn eq(lhs: Expression, rhs: Expression) -> Expression { binary(lhs, BinaryOperator::Equality, rhs) }
    pub fn is(lhs: Expression, rhs: Expression) -> Expression { binary(lhs, BinaryOperator::Is, rhs) }
    pub fn lt(lhs: Expression, rhs: Expression) -> Expression { binary(lhs, BinaryOperator::LessThan, rhs) }

    pub fn not(operand: Expression) -> Expression {
        Expression::Unary(UnaryOperator::LogicalNot, Box::new(operand))
    }

    pub fn neg(operand: Expression) -> Expression {
        Expression::Unary(UnaryOperator::Negative, Box::new(operand))
    }

    pub fn index(subject: Expression, idx: Expression) -> Expression {
        Expression::Index(Box::new(subject), Box::new(idx))
    }

    pub fn slice(subject: Expression, from: Option<Expression>, to: Option<Expression>) -> Expression {
        Expression::Slice(Box::new(subject), from.map(Box::new), to.map(Box::new))
    }

    pub fn call(builtin: Builtin, args: Vec<Expression>) -> Expression {
        Expression::Call(builtin, args)
    }

    pub fn method(subject: Expression, method: Method, args: Vec<Expression>) -> Expression {
        Expression::Method(Box::new(subject), method, args)
    }

    pub fn name<S: ToString>(name: S) -> Target { Target::Name(name.to_string()) }
    pub fn starred<S: ToString>(name: S) -> Target { Target::Starred(name.to_string()) }
    pub fn index_target(subject: Expression, idx: Expression) -> Target { Target::Index(subject, idx) }

    pub fn slice_target(subject: Expression, from: Option<Expression>, to: Option<Expression>) -> Target {
        Target::Slice(subject, from, to)
    }

    pub fn names(names: &[&str]) -> Target {
        Target::Sequence(names.iter().map(|n| {
            match n.strip_prefix('*') {
                Some(starred_name) => starred(starred_name),
                None => name(n),
            }
        }).collect())
    }

    pub fn assign<S: ToString>(target: S, value: Expression) -> Statement {
        Statement::Assign(vec![name(target)], value)
    }

    pub fn assign_to(target: Target, value: Expression) -> Statement {
        Statement::Assign(vec![target], value)
    }

    pub fn aug_assign(target: Target, op: BinaryOperator, value: Expression) -> Statement {
        Statement::AugAssign(target, op, value)
    }

    pub fn expr(expression: Expression) -> Statement {
        Statement::Expression(expression)
    }

    pub fn emit(values: Vec<Expression>) -> Statement {
        Statement::Emit(values)
    }

    pub fn if_else(test: Expression, body: Vec<Statement>, otherwise: Vec<Statement>) -> Statement {
        Statement::If{ branches: vec![(test, body)], otherwise }
    }

    pub fn while_loop(test: Expression, body: Vec<Statement>, otherwise: Vec<Statement>) -> Statement {
        Statement::While{ test, body, otherwise }
    }

    pub fn for_loop(target: Target, iterable: Expression, body: Vec<Statement>, otherwise: Vec<Statement>) -> Statement {
        Statement::For{ target, iterable, body, otherwise }
    }
}
