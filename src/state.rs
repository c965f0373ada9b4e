/// Presence of a single tracked entity, remembering the previous observation
/// so only transitions report as changed.
#[derive(Debug, Clone)]
pub struct PresenceState {
    present: bool,
    was: bool,
    initial: bool,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceState {
    pub fn new() -> Self {
        PresenceState {
            present: false,
            was: false,
            initial: true,
        }
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn changed(&self) -> bool {
        self.present != self.was
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// Records a new observation. The first observation after construction
    /// or [`reset`](Self::reset) always reports as changed.
    pub fn set(&mut self, present: bool) {
        if self.initial {
            self.was = !present;
            self.initial = false;
        } else {
            self.was = self.present;
        }
        self.present = present;
    }

    /// Treat the next [`set`](Self::set) as a first observation. The current
    /// value is left alone.
    pub fn reset(&mut self) {
        self.initial = true;
    }
}
