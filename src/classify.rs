//! Classification of control-transfer instructions by static shape.
//!
//! Instrumentation hosts expose the shape of an instruction through their
//! own predicate APIs. An adapter answers those predicates once, at code
//! preparation time, fills in a [CtiShape], and gets back the single
//! [BranchKind] that governs every later execution of that instruction.
//! Nothing here ever looks at run-time values.

use crate::branch::BranchKind;

/// The static shape of a control-transfer instruction.
///
/// These fields are the answers an adapter collects from its framework's
/// instruction predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtiShape {
    /// The instruction can fall through to the next sequential instruction.
    pub has_fallthrough: bool,

    /// The instruction is a procedure call.
    pub is_call: bool,

    /// The instruction is a return.
    pub is_return: bool,

    /// The target is computed from a register or memory operand.
    pub is_indirect: bool,

    /// Encoded instruction length in bytes, zero if unknown.
    pub ilen: u8,
}

impl CtiShape {
    fn is_conditional(&self) -> bool {
        self.has_fallthrough
    }
    fn is_direct_jump(&self) -> bool {
        !self.is_indirect && !self.is_call && !self.is_return
    }
    fn is_direct_call(&self) -> bool {
        !self.is_indirect && self.is_call
    }
    fn is_indirect_call(&self) -> bool {
        self.is_indirect && self.is_call
    }
}

/// Map an instruction shape to exactly one [BranchKind].
///
/// Checked in order, first match wins:
///
/// 1. Anything with a fall-through path is a conditional branch. In this
///    model conditional branches are always direct.
/// 2. A direct unconditional non-call is a direct jump.
/// 3. A direct call.
/// 4. A return (always indirect, target known only at run-time).
/// 5. An indirect call.
/// 6. Everything left is an indirect jump.
pub fn classify(shape: &CtiShape) -> BranchKind {
    if shape.is_conditional() {
        BranchKind::DirectBranch
    } else if shape.is_direct_jump() {
        BranchKind::DirectJump
    } else if shape.is_direct_call() {
        BranchKind::DirectCall
    } else if shape.is_return {
        BranchKind::Return
    } else if shape.is_indirect_call() {
        BranchKind::IndirectCall
    } else {
        BranchKind::IndirectJump
    }
}
