///////////////////// PRELUDE /////////////////////

pub(crate) use crate::eval::{EvalError, EvalErrorKind, EvalResult};
pub(crate) use crate::logging::Logger;

pub(crate) use core::{
    cmp::Ordering,
    fmt::Debug,
};
pub(crate) use indexmap::IndexMap;
pub(crate) use std::{
    collections::{HashMap, HashSet, VecDeque},
    io::Write,
};

pub type InstanceId = u32;
