use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFlag {
    ChannelChange,
    KeyAdd,
    KeyDelete,
    StopWordEdit,
}

impl GateFlag {
    pub const ALL: [GateFlag; 4] = [
        GateFlag::ChannelChange,
        GateFlag::KeyAdd,
        GateFlag::KeyDelete,
        GateFlag::StopWordEdit,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Paused,
    Active,
}

#[derive(Default)]
struct GateFlags {
    channel_change: AtomicBool,
    key_add: AtomicBool,
    key_delete: AtomicBool,
    stop_word_edit: AtomicBool,
}

/// Configuration-dialog flags shared between the control plane (writer) and
/// the dispatcher (reader). Cloning shares the same flags.
#[derive(Clone, Default)]
pub struct Gate {
    flags: Arc<GateFlags>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, flag: GateFlag) -> &AtomicBool {
        match flag {
            GateFlag::ChannelChange => &self.flags.channel_change,
            GateFlag::KeyAdd => &self.flags.key_add,
            GateFlag::KeyDelete => &self.flags.key_delete,
            GateFlag::StopWordEdit => &self.flags.stop_word_edit,
        }
    }

    pub fn set(&self, flag: GateFlag, value: bool) {
        self.flag(flag).store(value, Ordering::SeqCst);
    }

    pub fn is_set(&self, flag: GateFlag) -> bool {
        self.flag(flag).load(Ordering::SeqCst)
    }

    /// Raises `flag` and lowers every other one; dialogs are mutually exclusive.
    pub fn enter(&self, flag: GateFlag) {
        for f in GateFlag::ALL {
            self.set(f, f == flag);
        }
    }

    pub fn clear_all(&self) {
        for f in GateFlag::ALL {
            self.set(f, false);
        }
    }

    /// The dialog currently open, if any.
    pub fn active(&self) -> Option<GateFlag> {
        GateFlag::ALL.into_iter().find(|f| self.is_set(*f))
    }

    pub fn mode(&self) -> RelayMode {
        if self.active().is_some() {
            RelayMode::Paused
        } else {
            RelayMode::Active
        }
    }
}
