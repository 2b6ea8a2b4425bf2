use crate::common::*;
use crate::config::{EvalConfig, SMALL_INT_RANGE};

use super::value::{repeated_len, Mapping, MapKey, Value, ValueId, ValueKind};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    refcount: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    // Bumped every time the slot is reclaimed, so stale `ValueId`s can be
    // told apart from the slot's current occupant.
    generation: u32,
    entry: Option<Entry>,
}

/// Counters the store keeps over its lifetime. `reclaimed` includes values
/// reclaimed by cycle scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub allocated: u64,
    pub reclaimed: u64,
    pub reclaimed_by_scan: u64,
    pub scans: u64,
}

/// In-place changes to a List or Mapping. Identities passed in are borrowed:
/// the store retains whatever it starts referencing and releases whatever it
/// stops referencing.
#[derive(Debug, Clone)]
pub enum Mutation {
    Append(ValueId),
    Extend(Vec<ValueId>),
    Insert(usize, ValueId),
    Replace(usize, ValueId),
    /// Removes the element and hands the list's reference to the caller.
    Remove(usize),
    /// Replaces `start..end` with `items`, may change the length.
    Splice { start: usize, end: usize, items: Vec<ValueId> },
    Repeat(usize),
    MapInsert { key: ValueId, value: ValueId },
    /// Removes the pair and hands the value's reference to the caller.
    MapRemove(MapKey),
}

/// Owns every value. Everything else (bindings, list slots, mapping pairs)
/// holds a counted `ValueId`.
///
/// Reclamation is eager: once a reference count drops to zero the value is
/// reclaimed and its children released. Self-referencing containers never
/// reach zero; those are found by `cycle_scan`, which the executor runs
/// between statements once `scan_due` returns true.
#[derive(Debug, Clone)]
pub struct Store {
    slots: Vec<Slot>,
    free_slots: VecDeque<u32>,
    live: usize,
    small_ints: HashMap<i64, ValueId>,
    intern_small_ints: bool,
    scan_threshold: usize,
    allocs_since_scan: usize,
    stats: StoreStats,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(&EvalConfig::default())
    }
}

impl Store {
    pub fn new(config: &EvalConfig) -> Self {
        Self{
            slots: Vec::with_capacity(64),
            free_slots: VecDeque::new(),
            live: 0,
            small_ints: HashMap::new(),
            intern_small_ints: config.intern_small_ints,
            scan_threshold: config.cycle_scan_threshold,
            allocs_since_scan: 0,
            stats: StoreStats::default(),
        }
    }

    /// Creates a value with a reference count of 1, owned by the caller.
    /// Children of a List or Mapping are taken over as they are: the caller
    /// must already own one reference per child slot.
    pub fn allocate(&mut self, value: Value) -> ValueId {
        if self.intern_small_ints {
            if let Value::Int(v) = value {
                if SMALL_INT_RANGE.contains(&v) {
                    if let Some(cached) = self.small_ints.get(&v).copied() {
                        self.slot_entry_mut(cached).refcount += 1;
                        return cached;
                    }
                    // The cache keeps one reference of its own
                    let id = self.allocate_slot(value);
                    self.slot_entry_mut(id).refcount += 1;
                    self.small_ints.insert(v, id);
                    return id;
                }
            }
        }

        self.allocate_slot(value)
    }

    fn allocate_slot(&mut self, value: Value) -> ValueId {
        let entry = Entry{ value, refcount: 1 };
        self.live += 1;
        self.stats.allocated += 1;
        self.allocs_since_scan += 1;

        if let Some(index) = self.free_slots.pop_front() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.entry.is_none());
            slot.entry = Some(entry);
            return ValueId{ index, generation: slot.generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot{ generation: 0, entry: Some(entry) });
        ValueId{ index, generation: 0 }
    }

    pub fn retain(&mut self, id: ValueId) -> EvalResult<()> {
        self.entry_mut(id)?.refcount += 1;
        Ok(())
    }

    /// Drops one reference. Reclaiming a container releases its children,
    /// which may cascade; this is done with a worklist rather than recursion.
    pub fn release(&mut self, id: ValueId) -> EvalResult<()> {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let entry = self.entry_mut(id)?;
            debug_assert!(entry.refcount > 0);
            entry.refcount -= 1;
            if entry.refcount == 0 {
                let value = self.reclaim(id);
                value.push_children(&mut pending);
            }
        }

        Ok(())
    }

    pub fn release_all(&mut self, ids: impl IntoIterator<Item = ValueId>) -> EvalResult<()> {
        for id in ids {
            self.release(id)?;
        }
        Ok(())
    }

    fn reclaim(&mut self, id: ValueId) -> Value {
        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take().expect("reclaiming a free slot");
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push_back(id.index);
        self.live -= 1;
        self.stats.reclaimed += 1;
        entry.value
    }

    pub fn get(&self, id: ValueId) -> EvalResult<&Value> {
        self.entry(id).map(|e| &e.value)
    }

    pub fn kind(&self, id: ValueId) -> EvalResult<ValueKind> {
        self.get(id).map(|v| v.kind())
    }

    pub fn refcount(&self, id: ValueId) -> EvalResult<u32> {
        self.entry(id).map(|e| e.refcount)
    }

    pub fn is_alive(&self, id: ValueId) -> bool {
        self.entry(id).is_ok()
    }

    /// Number of values currently allocated.
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    fn entry(&self, id: ValueId) -> EvalResult<&Entry> {
        match self.slots.get(id.index as usize) {
            Some(Slot{ generation, entry: Some(entry) }) if *generation == id.generation => Ok(entry),
            _ => Err(EvalErrorKind::UseAfterFree(id).into()),
        }
    }

    fn entry_mut(&mut self, id: ValueId) -> EvalResult<&mut Entry> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot{ generation, entry: Some(entry) }) if *generation == id.generation => Ok(entry),
            _ => Err(EvalErrorKind::UseAfterFree(id).into()),
        }
    }

    // Only for identities the store itself knows to be alive
    fn slot_entry(&self, id: ValueId) -> &Entry {
        self.slots[id.index as usize].entry.as_ref().expect("value was reclaimed")
    }

    fn slot_entry_mut(&mut self, id: ValueId) -> &mut Entry {
        self.slots[id.index as usize].entry.as_mut().expect("interned value was reclaimed")
    }

    /// Applies `mutation` to the List or Mapping `id`. Returns the reference
    /// handed to the caller by `Remove` and `MapRemove`, `None` otherwise.
    pub fn mutate_in_place(&mut self, id: ValueId, mutation: Mutation) -> EvalResult<Option<ValueId>> {
        use Mutation as M;

        // Validate before touching any reference count, so a failed mutation
        // leaves the store exactly as it was. Collect what the target will
        // start referencing while at it.
        let target = self.get(id)?;
        let kind = target.kind();
        if !kind.is_mutable() {
            return Err(EvalErrorKind::ImmutableTarget(kind).into());
        }

        let mut to_retain = Vec::new();
        let mut map_key = None;
        match (&mutation, target) {
            (M::Append(elem), Value::List(_)) => to_retain.push(*elem),
            (M::Extend(new_items), Value::List(_)) => to_retain.extend_from_slice(new_items),
            (M::Insert(_, elem), Value::List(_)) => to_retain.push(*elem),
            (M::Replace(idx, _), Value::List(items)) |
            (M::Remove(idx), Value::List(items)) => {
                if *idx >= items.len() {
                    return Err(EvalErrorKind::IndexOutOfRange{ kind, index: *idx as i64, len: items.len() }.into());
                }
                if let M::Replace(_, elem) = &mutation {
                    to_retain.push(*elem);
                }
            },
            (M::Splice{ start, end, items: new_items }, Value::List(items)) => {
                debug_assert!(start <= end && *end <= items.len());
                to_retain.extend_from_slice(new_items);
            },
            (M::Repeat(times), Value::List(items)) => {
                // Repetition shares element identities: one more reference
                // per element per extra copy
                if repeated_len(items.len(), *times)? != 0 {
                    for _ in 1..*times {
                        to_retain.extend_from_slice(items);
                    }
                }
            },
            (M::MapInsert{ key, value }, Value::Mapping(mapping)) => {
                let hashed = MapKey::from_value(self.get(*key)?)?;
                if mapping.get(&hashed).is_none() {
                    to_retain.push(*key);
                }
                to_retain.push(*value);
                map_key = Some(hashed);
            },
            (M::MapRemove(key), Value::Mapping(mapping)) => {
                if mapping.get(key).is_none() {
                    return Err(EvalErrorKind::KeyNotFound(key.to_string()).into());
                }
            },
            _ => return Err(EvalError::type_mismatch("in-place mutation", kind, None)),
        }

        for retained in &to_retain {
            self.retain(*retained)?;
        }

        let mut to_release = Vec::new();
        let mut handed_out = None;
        let entry = self.entry_mut(id)?;
        match (mutation, &mut entry.value) {
            (M::Append(elem), Value::List(items)) => items.push(elem),
            (M::Extend(new_items), Value::List(items)) => items.extend(new_items),
            (M::Insert(idx, elem), Value::List(items)) => {
                let idx = idx.min(items.len());
                items.insert(idx, elem);
            },
            (M::Replace(idx, elem), Value::List(items)) => {
                to_release.push(std::mem::replace(&mut items[idx], elem));
            },
            (M::Remove(idx), Value::List(items)) => {
                handed_out = Some(items.remove(idx));
            },
            (M::Splice{ start, end, items: new_items }, Value::List(items)) => {
                let end = end.min(items.len());
                let start = start.min(end);
                to_release.extend(items.splice(start..end, new_items));
            },
            (M::Repeat(times), Value::List(items)) => {
                if times == 0 {
                    to_release.extend(items.drain(..));
                } else if !items.is_empty() {
                    let original = items.clone();
                    for _ in 1..times {
                        items.extend_from_slice(&original);
                    }
                }
            },
            (M::MapInsert{ key, value }, Value::Mapping(mapping)) => {
                let map_key = map_key.expect("key hashed during validation");
                // An existing pair keeps its original key, only the value
                // is replaced
                if let Some(old_value) = mapping.insert(map_key, key, value) {
                    to_release.push(old_value);
                }
            },
            (M::MapRemove(key), Value::Mapping(mapping)) => {
                let (old_key, old_value) = mapping.remove(&key).expect("key checked during validation");
                to_release.push(old_key);
                handed_out = Some(old_value);
            },
            _ => unreachable!("mutation validated above"),
        }

        self.release_all(to_release)?;
        Ok(handed_out)
    }

    /// Whether enough allocations happened since the last scan that the
    /// executor should run one at its next statement boundary.
    pub fn scan_due(&self) -> bool {
        self.scan_threshold != 0 && self.allocs_since_scan >= self.scan_threshold
    }

    /// Reclaims groups of containers that are only referenced from within
    /// the group. Returns the number of values reclaimed.
    ///
    /// Works on reference counts only, no roots needed: for every container
    /// subtract the references coming from other containers. Whatever keeps
    /// a positive count is referenced from outside (a binding, the executor,
    /// the host), and so is everything reachable from it. The remaining
    /// containers are garbage.
    pub fn cycle_scan(&mut self) -> usize {
        self.stats.scans += 1;
        self.allocs_since_scan = 0;

        let mut external: HashMap<ValueId, i64> = HashMap::new();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = &slot.entry {
                if entry.value.kind().is_mutable() {
                    let id = ValueId{ index: index as u32, generation: slot.generation };
                    external.insert(id, entry.refcount as i64);
                }
            }
        }

        let mut children = Vec::new();
        for id in external.keys().copied().collect::<Vec<_>>() {
            children.clear();
            self.slot_entry(id).value.push_children(&mut children);
            for child in &children {
                if let Some(count) = external.get_mut(child) {
                    *count -= 1;
                }
            }
        }

        let mut reachable = HashSet::new();
        let mut pending: Vec<ValueId> = external.iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| *id)
            .collect();
        while let Some(id) = pending.pop() {
            if !reachable.insert(id) {
                continue;
            }
            children.clear();
            self.slot_entry(id).value.push_children(&mut children);
            pending.extend(children.iter().filter(|c| external.contains_key(*c)));
        }

        let garbage: HashSet<ValueId> = external.keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();

        // Free the garbage directly, references between garbage containers
        // disappear with them. References to survivors are released normally.
        let mut to_release = Vec::new();
        for id in &garbage {
            let value = self.reclaim(*id);
            children.clear();
            value.push_children(&mut children);
            to_release.extend(children.iter().filter(|c| !garbage.contains(*c)));
        }
        self.stats.reclaimed_by_scan += garbage.len() as u64;

        for id in to_release {
            // Survivors are alive by construction
            let _ = self.release(id);
        }

        garbage.len()
    }

    /// Shallow copy: a new container referencing the same element
    /// identities. Immutable values are returned as they are (with an extra
    /// reference).
    pub fn copy_shallow(&mut self, id: ValueId) -> EvalResult<ValueId> {
        let copied = match self.get(id)? {
            Value::List(items) => Value::List(items.clone()),
            Value::Mapping(mapping) => Value::Mapping(mapping.clone()),
            _ => {
                self.retain(id)?;
                return Ok(id);
            },
        };

        let mut children = Vec::new();
        copied.push_children(&mut children);
        for child in children {
            self.retain(child)?;
        }
        Ok(self.allocate(copied))
    }

    /// Recursive copy. Shared and self-referencing structure is preserved
    /// within the copy, immutable values are shared with the original.
    pub fn copy_deep(&mut self, id: ValueId, max_depth: usize) -> EvalResult<ValueId> {
        let mut memo = HashMap::new();
        self.copy_deep_inner(id, &mut memo, 0, max_depth)
    }

    fn copy_deep_inner(&mut self, id: ValueId, memo: &mut HashMap<ValueId, ValueId>, depth: usize, max_depth: usize) -> EvalResult<ValueId> {
        if let Some(copied) = memo.get(&id).copied() {
            self.retain(copied)?;
            return Ok(copied);
        }

        // Placeholder first, so self references resolve to the copy
        let (copied, placeholder) = match self.get(id)? {
            Value::List(items) => (items.clone(), Value::List(Vec::new())),
            Value::Mapping(mapping) => (mapping.ordered_ids(), Value::Mapping(Mapping::default())),
            _ => {
                self.retain(id)?;
                return Ok(id);
            },
        };
        if depth >= max_depth {
            return Err(EvalErrorKind::RecursionLimit(max_depth).into());
        }

        let target = self.allocate(placeholder);
        memo.insert(id, target);

        let mut new_children = Vec::with_capacity(copied.len());
        for child in copied {
            match self.copy_deep_inner(child, memo, depth + 1, max_depth) {
                Ok(new_child) => new_children.push(new_child),
                Err(err) => {
                    let _ = self.release_all(new_children);
                    let _ = self.release(target);
                    return Err(err);
                }
            }
        }

        if let Value::List(items) = &mut self.entry_mut(target)?.value {
            *items = new_children;
            return Ok(target);
        }

        // Mapping children come as key, value pairs in insertion order
        let mut pairs = Vec::with_capacity(new_children.len() / 2);
        for pair in new_children.chunks(2) {
            let hashed = MapKey::from_value(self.get(pair[0])?)?;
            pairs.push((hashed, pair[0], pair[1]));
        }
        if let Value::Mapping(mapping) = &mut self.entry_mut(target)?.value {
            for (hashed, key, value) in pairs {
                mapping.insert(hashed, key, value);
            }
        }

        Ok(target)
    }
}
