//! Stack slots.
//!
//! Offsets are assigned late, by the stack-layout stage: locals and spill
//! slots get negative frame-relative offsets, incoming arguments positive
//! ones above the frame header.

use core::fmt;

/// The kind of a stack slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StackSlotKind {
    /// A method local or address-taken temporary.
    Local,
    /// A register-allocator spill slot.
    Spill,
    /// An incoming argument in the caller's frame.
    IncomingArg,
}

impl fmt::Display for StackSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Spill => "spill",
            Self::IncomingArg => "incoming_arg",
        })
    }
}

/// Contents of a stack slot.
#[derive(Clone, Debug)]
pub struct StackSlotData {
    /// The kind.
    pub kind: StackSlotKind,
    /// Size in bytes.
    pub size: u32,
    /// Frame-relative byte offset, once the stack-layout stage has run.
    pub offset: Option<i32>,
}

impl StackSlotData {
    /// Create stack slot data with an unassigned offset.
    pub fn new(kind: StackSlotKind, size: u32) -> Self {
        Self {
            kind,
            size,
            offset: None,
        }
    }
}

impl fmt::Display for StackSlotData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.size)?;
        if let Some(offset) = self.offset {
            write!(f, ", offset {offset}")?;
        }
        Ok(())
    }
}
