use serde::{Deserialize, Serialize};

use crate::common::*;

use super::store::{Mutation, Store};
use super::value::{Mapping, Value, ValueId};

/// A value detached from its store, together with everything it references.
/// References become indices into `values`, so shared elements stay shared
/// and cycles survive the round trip.
///
/// Entry 0 is always the root. Identities of immutable values are not
/// preserved beyond sharing within the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueGroup {
    values: Vec<GroupValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum GroupValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<u32>),
    Mapping(Vec<(u32, u32)>),
}

impl GroupValue {
    fn is_container(&self) -> bool {
        match self {
            GroupValue::List(_) | GroupValue::Mapping(_) => true,
            _ => false,
        }
    }
}

impl ValueGroup {
    /// Collects `root` and everything reachable from it, breadth first.
    pub fn from_store(store: &Store, root: ValueId) -> EvalResult<Self> {
        let mut indices: HashMap<ValueId, u32> = HashMap::new();
        let mut order = vec![root];
        indices.insert(root, 0);

        let mut children = Vec::new();
        let mut next = 0;
        while next < order.len() {
            let id = order[next];
            next += 1;

            children.clear();
            store.get(id)?.push_children(&mut children);
            for child in &children {
                if !indices.contains_key(child) {
                    indices.insert(*child, order.len() as u32);
                    order.push(*child);
                }
            }
        }

        let mut values = Vec::with_capacity(order.len());
        for id in &order {
            let detached = match store.get(*id)? {
                Value::Nil => GroupValue::Nil,
                Value::Bool(v) => GroupValue::Bool(*v),
                Value::Int(v) => GroupValue::Int(*v),
                Value::Float(v) => GroupValue::Float(*v),
                Value::Text(v) => GroupValue::Text(v.clone()),
                Value::List(items) => GroupValue::List(
                    items.iter().map(|item| indices[item]).collect()
                ),
                Value::Mapping(mapping) => GroupValue::Mapping(
                    mapping.pairs().map(|(_, key, value)| (indices[&key], indices[&value])).collect()
                ),
            };
            values.push(detached);
        }

        Ok(Self{ values })
    }

    /// Number of values in the group.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_bytes(&self) -> EvalResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> EvalResult<Self> {
        let group: ValueGroup = bincode::deserialize(bytes)?;
        group.validate()?;
        Ok(group)
    }

    /// Allocates the group's values in `store`. Returns an owned reference to
    /// the root; every other value is only referenced from within the group.
    pub fn into_store(&self, store: &mut Store) -> EvalResult<ValueId> {
        self.validate()?;

        // Containers start out empty so references in any direction can be
        // wired up afterwards
        let ids: Vec<ValueId> = self.values.iter()
            .map(|value| {
                let allocated = match value {
                    GroupValue::Nil => Value::Nil,
                    GroupValue::Bool(v) => Value::Bool(*v),
                    GroupValue::Int(v) => Value::Int(*v),
                    GroupValue::Float(v) => Value::Float(*v),
                    GroupValue::Text(v) => Value::Text(v.clone()),
                    GroupValue::List(_) => Value::List(Vec::new()),
                    GroupValue::Mapping(_) => Value::Mapping(Mapping::default()),
                };
                store.allocate(allocated)
            })
            .collect();

        for (value, id) in self.values.iter().zip(&ids) {
            match value {
                GroupValue::List(items) => {
                    let items = items.iter().map(|idx| ids[*idx as usize]).collect();
                    store.mutate_in_place(*id, Mutation::Extend(items))?;
                },
                GroupValue::Mapping(pairs) => {
                    for (key, value) in pairs {
                        let key = ids[*key as usize];
                        let value = ids[*value as usize];
                        store.mutate_in_place(*id, Mutation::MapInsert{ key, value })?;
                    }
                },
                _ => {},
            }
        }

        // Drop the references held since allocation. Anything reachable from
        // the root stays alive through its parents.
        store.release_all(ids[1..].iter().copied())?;
        Ok(ids[0])
    }

    fn validate(&self) -> EvalResult<()> {
        let invalid = |reason: &str| -> EvalError {
            EvalErrorKind::Serialization(format!("invalid value group: {}", reason)).into()
        };

        if self.values.is_empty() {
            return Err(invalid("no root value"));
        }
        let in_range = |idx: &u32| (*idx as usize) < self.values.len();
        for value in &self.values {
            match value {
                GroupValue::List(items) => {
                    if !items.iter().all(|idx| in_range(idx)) {
                        return Err(invalid("element index out of range"));
                    }
                },
                GroupValue::Mapping(pairs) => {
                    for (key, value) in pairs {
                        if !in_range(key) || !in_range(value) {
                            return Err(invalid("pair index out of range"));
                        }
                        if self.values[*key as usize].is_container() {
                            return Err(invalid("mapping key refers to a container"));
                        }
                    }
                },
                _ => {},
            }
        }

        Ok(())
    }
}
