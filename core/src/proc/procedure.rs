use std::fmt;

use serde::{Deserialize, Serialize};

use super::instruction::Instruction;

/// Upper bound on instructions per procedure.
///
/// Kept below `u8::MAX` so a one-byte instruction counter never wraps to zero on a full buffer.
pub const MAX_INSTRUCTIONS: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcError {
    CapacityExceeded { limit: usize, requested: usize },
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::CapacityExceeded { limit, requested } => {
                write!(f, "procedure holds at most {} instructions, got {}", limit, requested)
            }
        }
    }
}

impl std::error::Error for ProcError {}

/// Ordered, bounded sequence of instructions.
///
/// Only the instructions actually pushed are kept, so the used count and the
/// executable range always agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Instruction>", into = "Vec<Instruction>")]
pub struct Procedure {
    instructions: Vec<Instruction>,
}

impl Procedure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instructions(instructions: Vec<Instruction>) -> Result<Self, ProcError> {
        if instructions.len() > MAX_INSTRUCTIONS {
            return Err(ProcError::CapacityExceeded {
                limit: MAX_INSTRUCTIONS,
                requested: instructions.len(),
            });
        }
        Ok(Self { instructions })
    }

    pub fn push(&mut self, instruction: Instruction) -> Result<(), ProcError> {
        if self.instructions.len() >= MAX_INSTRUCTIONS {
            return Err(ProcError::CapacityExceeded {
                limit: MAX_INSTRUCTIONS,
                requested: self.instructions.len() + 1,
            });
        }
        self.instructions.push(instruction);
        Ok(())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Drop every instruction (and the parameter names they own) while keeping the buffer.
    pub fn clear(&mut self) {
        self.instructions.clear();
    }

    /// Take `other`'s instructions into this procedure's existing buffer.
    pub fn refill(&mut self, other: Procedure) {
        self.instructions.clear();
        self.instructions.extend(other.instructions);
    }
}

impl TryFrom<Vec<Instruction>> for Procedure {
    type Error = ProcError;

    fn try_from(value: Vec<Instruction>) -> Result<Self, Self::Error> {
        Procedure::from_instructions(value)
    }
}

impl From<Procedure> for Vec<Instruction> {
    fn from(value: Procedure) -> Self {
        value.instructions
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{:>3}: {}", idx, instruction)?;
        }
        Ok(())
    }
}
