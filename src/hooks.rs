//! Ordered multicast callback lists for session and render events.

use crate::protocol::{InputFrame, Resolution};

/// Token returned by [`Observers::add`], used to remove the callback later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Callbacks fired in registration order.
pub struct Observers<Arg> {
    entries: Vec<(ObserverId, Box<dyn FnMut(&Arg)>)>,
    next_id: u64,
}

impl<Arg> Default for Observers<Arg> {
    fn default() -> Self {
        Observers { entries: Vec::new(), next_id: 0 }
    }
}

impl<Arg> Observers<Arg> {
    pub fn add(&mut self, callback: impl FnMut(&Arg) + 'static) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(callback)));
        id
    }

    /// Removes one callback. Returns false if the id was already removed.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn emit(&mut self, arg: &Arg) {
        for (_, callback) in &mut self.entries {
            callback(arg);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<Arg> std::fmt::Debug for Observers<Arg> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("len", &self.entries.len()).finish()
    }
}

/// Snapshot handed to render observers each frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    pub frame_index: u64,
    pub input: InputFrame,
    pub resolution: Resolution,
}

/// Callback lists around the per-frame render sequence.
#[derive(Debug, Default)]
pub struct RenderHooks {
    /// Before any pass of the frame runs.
    pub pre_render: Observers<FrameContext>,
    pub pre_background: Observers<FrameContext>,
    pub post_background: Observers<FrameContext>,
    pub pre_foreground: Observers<FrameContext>,
    pub post_foreground: Observers<FrameContext>,
    /// After the frame's output has been submitted.
    pub post_render: Observers<FrameContext>,
}
