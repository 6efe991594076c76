use crate::proc::{InstructionKind, Procedure};
use crate::slot::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Instruction index of the `Call`.
    pub index: usize,
    pub slot: Slot,
    /// Nothing but `NoOp`s run after this call, so it may replace the caller's frame.
    pub tail: bool,
}

/// Per-instruction analysis of a single procedure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcSummary {
    pub kinds: Vec<InstructionKind>,
    pub calls: Vec<CallSite>,
}

impl ProcSummary {
    pub fn of(proc: &Procedure) -> Self {
        let instructions = proc.instructions();
        let kinds = instructions.iter().map(|i| i.kind()).collect();
        let calls = instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instruction)| {
                instruction.call_target().map(|slot| CallSite {
                    index,
                    slot,
                    tail: is_tail_call(proc, index),
                })
            })
            .collect();
        Self { kinds, calls }
    }

    pub fn call_at(&self, index: usize) -> Option<&CallSite> {
        self.calls.iter().find(|site| site.index == index)
    }
}

/// A call is in tail position when every later instruction is a `NoOp`.
///
/// When the call is the taken branch of a preceding `IfElse`, the instruction
/// right after it is the skipped branch and is left out of the check.
/// An index past the end is never a tail call.
pub fn is_tail_call(proc: &Procedure, index: usize) -> bool {
    let instructions = proc.instructions();
    let len = instructions.len();
    if index >= len {
        return false;
    }
    let after_ifelse = index > 0 && instructions[index - 1].kind() == InstructionKind::IfElse;
    let start = if after_ifelse && index + 1 < len {
        index + 2
    } else {
        index + 1
    };
    instructions[start.min(len)..].iter().all(|i| i.is_noop())
}
