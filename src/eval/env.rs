use crate::common::*;

use super::store::Store;
use super::value::ValueId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Frame {
    parent: Option<FrameId>,
    bindings: HashMap<String, ValueId>,
    // Names declared `global` or `nonlocal` in this frame, with the frame
    // that reads and writes of that name are redirected to
    redirects: HashMap<String, FrameId>,
}

impl Frame {
    fn new(parent: Option<FrameId>) -> Self {
        Self{ parent, bindings: HashMap::new(), redirects: HashMap::new() }
    }
}

/// Maps names to value identities, one frame per lexical scope. Frames form
/// a stack rooted in the global frame: a new frame may only be pushed on
/// top of the current innermost frame, and only the innermost frame can be
/// unbound.
///
/// Every binding owns one reference to its value. The environment never
/// owns values itself, so every operation that drops a binding takes the
/// `Store` to release through.
#[derive(Debug, Clone)]
pub struct Environment {
    frames: Vec<Frame>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self{ frames: vec![Frame::new(None)] }
    }

    pub fn global_frame(&self) -> FrameId {
        FrameId(0)
    }

    pub fn innermost_frame(&self) -> FrameId {
        FrameId((self.frames.len() - 1) as u32)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Opens a new scope whose reads fall through to `parent`.
    pub fn push_frame(&mut self, parent: FrameId) -> FrameId {
        debug_assert_eq!(parent, self.innermost_frame(), "frames must nest");
        self.frames.push(Frame::new(Some(parent)));
        self.innermost_frame()
    }

    /// Binds `name` in `frame` (or in the frame a `global`/`nonlocal`
    /// declaration redirects it to). Takes over the caller's reference to
    /// `value`; the previously bound value, if any, loses one reference.
    /// The old value itself is never touched.
    pub fn bind(&mut self, store: &mut Store, frame: FrameId, name: &str, value: ValueId) -> EvalResult<()> {
        let target = self.write_frame(frame, name);
        let previous = self.frames[target.index()].bindings.insert(name.to_string(), value);
        if let Some(previous) = previous {
            store.release(previous)?;
        }

        Ok(())
    }

    /// Looks up `name` starting at `frame` and walking outwards. The
    /// returned identity is borrowed from the binding.
    pub fn resolve(&self, frame: FrameId, name: &str) -> EvalResult<ValueId> {
        let mut current = Some(frame);
        while let Some(frame_id) = current {
            let frame = &self.frames[frame_id.index()];
            if let Some(redirect) = frame.redirects.get(name) {
                return self.frames[redirect.index()].bindings.get(name)
                    .copied()
                    .ok_or_else(|| EvalError::unbound_name(name));
            }
            if let Some(value) = frame.bindings.get(name) {
                return Ok(*value);
            }
            current = frame.parent;
        }

        Err(EvalError::unbound_name(name))
    }

    pub fn is_bound(&self, frame: FrameId, name: &str) -> bool {
        self.resolve(frame, name).is_ok()
    }

    /// Removes a single binding, as done by `del name`. Like a write, this
    /// only looks at `frame` itself (or its redirect target).
    pub fn unbind(&mut self, store: &mut Store, frame: FrameId, name: &str) -> EvalResult<()> {
        let target = self.write_frame(frame, name);
        match self.frames[target.index()].bindings.remove(name) {
            Some(previous) => store.release(previous),
            None => Err(EvalError::unbound_name(name)),
        }
    }

    /// Closes the innermost scope, releasing every binding it holds. The
    /// global frame is never discarded, only emptied.
    pub fn unbind_frame(&mut self, store: &mut Store, frame: FrameId) -> EvalResult<()> {
        debug_assert_eq!(frame, self.innermost_frame(), "only the innermost frame can be unbound");
        let bindings = if frame == self.global_frame() {
            self.frames[0].redirects.clear();
            std::mem::take(&mut self.frames[0].bindings)
        } else {
            match self.frames.pop() {
                Some(frame) => frame.bindings,
                None => return Ok(()),
            }
        };

        // Release everything even if one release fails, then report the
        // first failure
        let mut result = Ok(());
        for (_, value) in bindings {
            if let Err(err) = store.release(value) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// `global name`: reads and writes of `name` in `frame` go to the global
    /// frame. A no-op in the global frame itself.
    pub fn declare_global(&mut self, frame: FrameId, name: &str) {
        let global = self.global_frame();
        if frame != global {
            self.frames[frame.index()].redirects.insert(name.to_string(), global);
        }
    }

    /// `nonlocal name`: reads and writes of `name` in `frame` go to the
    /// nearest enclosing non-global frame that binds it.
    pub fn declare_nonlocal(&mut self, frame: FrameId, name: &str) -> EvalResult<()> {
        let mut current = self.frames[frame.index()].parent;
        while let Some(candidate) = current {
            if candidate == self.global_frame() {
                break;
            }
            let candidate_frame = &self.frames[candidate.index()];
            if candidate_frame.bindings.contains_key(name) {
                self.frames[frame.index()].redirects.insert(name.to_string(), candidate);
                return Ok(());
            }
            current = candidate_frame.parent;
        }

        Err(EvalErrorKind::NoNonlocalBinding(name.to_string()).into())
    }

    /// Names bound directly in `frame`, sorted.
    pub fn names(&self, frame: FrameId) -> Vec<&str> {
        let mut names: Vec<&str> = self.frames[frame.index()].bindings.keys()
            .map(|n| n.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn write_frame(&self, frame: FrameId, name: &str) -> FrameId {
        match self.frames[frame.index()].redirects.get(name) {
            Some(redirect) => *redirect,
            None => frame,
        }
    }
}
