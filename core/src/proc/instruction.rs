use std::fmt;

use serde::{Deserialize, Serialize};

use crate::slot::Slot;

/// Addressable unit an instruction concerns (local or remote).
pub type Node = u16;

/// Comparison used by `Block` and `IfElse` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl ComparisonOp {
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            ComparisonOp::Eq => lhs == rhs,
            ComparisonOp::Ne => lhs != rhs,
            ComparisonOp::Lt => lhs < rhs,
            ComparisonOp::Gt => lhs > rhs,
            ComparisonOp::Le => lhs <= rhs,
            ComparisonOp::Ge => lhs >= rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Gt => ">",
            ComparisonOp::Le => "<=",
            ComparisonOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "++")]
    Inc,
    #[serde(rename = "--")]
    Dec,
    #[serde(rename = "!")]
    Not,
    #[serde(rename = "-")]
    Neg,
    /// Identity, a plain copy.
    #[serde(rename = "idt")]
    Idt,
    /// Identity where the operand is local and the result lives on the instruction's node.
    #[serde(rename = "rmt")]
    Rmt,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Inc => "++",
            UnaryOp::Dec => "--",
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::Idt => "idt",
            UnaryOp::Rmt => "rmt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "<<")]
    Shl,
    #[serde(rename = ">>")]
    Shr,
    #[serde(rename = "&")]
    And,
    #[serde(rename = "|")]
    Or,
    #[serde(rename = "^")]
    Xor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
        }
    }
}

/// Comparison over two named parameters gating a `Block` or `IfElse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub lhs: String,
    pub op: ComparisonOp,
    pub rhs: String,
}

impl Condition {
    pub fn new(lhs: impl Into<String>, op: ComparisonOp, rhs: impl Into<String>) -> Self {
        Self {
            lhs: lhs.into(),
            op,
            rhs: rhs.into(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }
}

/// Tag of an [`Instruction`], used by analysis summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    Block,
    IfElse,
    Set,
    Unary,
    Binary,
    Call,
    NoOp,
}

/// One step of a stored procedure.
///
/// `Block` and `IfElse` share the [`Condition`] layout and differ by tag only.
/// Parameter names are owned by the instruction, so cloning an instruction
/// duplicates them independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Wait until the condition holds.
    Block {
        #[serde(default)]
        node: Node,
        cond: Condition,
    },
    /// Run the next instruction when the condition holds, otherwise the one after it.
    IfElse {
        #[serde(default)]
        node: Node,
        cond: Condition,
    },
    Set {
        #[serde(default)]
        node: Node,
        param: String,
        value: String,
    },
    Unary {
        #[serde(default)]
        node: Node,
        #[serde(rename = "unop")]
        op: UnaryOp,
        param: String,
        result: String,
    },
    Binary {
        #[serde(default)]
        node: Node,
        #[serde(rename = "binop")]
        op: BinaryOp,
        lhs: String,
        rhs: String,
        result: String,
    },
    Call {
        #[serde(default)]
        node: Node,
        slot: Slot,
    },
    NoOp {
        #[serde(default)]
        node: Node,
    },
}

impl Instruction {
    pub fn node(&self) -> Node {
        match self {
            Instruction::Block { node, .. }
            | Instruction::IfElse { node, .. }
            | Instruction::Set { node, .. }
            | Instruction::Unary { node, .. }
            | Instruction::Binary { node, .. }
            | Instruction::Call { node, .. }
            | Instruction::NoOp { node } => *node,
        }
    }

    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::Block { .. } => InstructionKind::Block,
            Instruction::IfElse { .. } => InstructionKind::IfElse,
            Instruction::Set { .. } => InstructionKind::Set,
            Instruction::Unary { .. } => InstructionKind::Unary,
            Instruction::Binary { .. } => InstructionKind::Binary,
            Instruction::Call { .. } => InstructionKind::Call,
            Instruction::NoOp { .. } => InstructionKind::NoOp,
        }
    }

    /// Slot invoked by a `Call`, `None` for every other variant.
    pub fn call_target(&self) -> Option<Slot> {
        match self {
            Instruction::Call { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Instruction::NoOp { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Block { node, cond } => write!(f, "block {} @{}", cond, node),
            Instruction::IfElse { node, cond } => write!(f, "ifelse {} @{}", cond, node),
            Instruction::Set { node, param, value } => write!(f, "set {} = {} @{}", param, value, node),
            Instruction::Unary {
                node,
                op,
                param,
                result,
            } => write!(f, "unop {} {} -> {} @{}", op.symbol(), param, result, node),
            Instruction::Binary {
                node,
                op,
                lhs,
                rhs,
                result,
            } => write!(f, "binop {} {} {} -> {} @{}", lhs, op.symbol(), rhs, result, node),
            Instruction::Call { node, slot } => write!(f, "call {} @{}", slot, node),
            Instruction::NoOp { node } => write!(f, "noop @{}", node),
        }
    }
}
