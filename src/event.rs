//! Run-time control-flow events and their encoding into [TraceRecord]s.

use crate::branch::{BranchFlags, BranchKind, Outcome, TraceRecord};

/// One executed control-transfer instruction, as observed by a host
/// callback at the moment it runs.
///
/// There is one variant per [BranchKind], carrying only the fields legal
/// for that kind: a conditional branch is the only event with an outcome,
/// everything else transfers control unconditionally. Illegal combinations
/// (a not-taken call, an indirect conditional branch) cannot be built.
///
/// Events are transient: they are encoded and appended to a sink
/// immediately, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtiEvent {
    /// A direct conditional branch. `tgt` is the branch target, whether or
    /// not the branch was taken.
    Branch { pc: u64, tgt: u64, outcome: Outcome, ilen: u8 },

    /// A direct unconditional jump.
    JumpDirect { pc: u64, tgt: u64, ilen: u8 },

    /// An indirect jump; `tgt` is the destination computed at run-time.
    JumpIndirect { pc: u64, tgt: u64, ilen: u8 },

    /// A direct call.
    CallDirect { pc: u64, tgt: u64, ilen: u8 },

    /// An indirect call; `tgt` is the destination computed at run-time.
    CallIndirect { pc: u64, tgt: u64, ilen: u8 },

    /// A return; `tgt` is the resolved return address.
    Return { pc: u64, tgt: u64, ilen: u8 },
}

impl CtiEvent {
    /// Assemble an event from a preparation-time [BranchKind] and the
    /// values observed at execution time.
    ///
    /// Host callbacks deliver a taken indicator for every instruction;
    /// it is meaningful only for conditional branches and is ignored for
    /// the kinds that always transfer control.
    pub fn observe(kind: BranchKind, pc: u64, tgt: u64, outcome: Outcome, ilen: u8) -> Self {
        match kind {
            BranchKind::DirectBranch => Self::Branch { pc, tgt, outcome, ilen },
            BranchKind::DirectJump   => Self::JumpDirect { pc, tgt, ilen },
            BranchKind::IndirectJump => Self::JumpIndirect { pc, tgt, ilen },
            BranchKind::DirectCall   => Self::CallDirect { pc, tgt, ilen },
            BranchKind::IndirectCall => Self::CallIndirect { pc, tgt, ilen },
            BranchKind::Return       => Self::Return { pc, tgt, ilen },
        }
    }

    pub fn kind(&self) -> BranchKind {
        match self {
            Self::Branch { .. }       => BranchKind::DirectBranch,
            Self::JumpDirect { .. }   => BranchKind::DirectJump,
            Self::JumpIndirect { .. } => BranchKind::IndirectJump,
            Self::CallDirect { .. }   => BranchKind::DirectCall,
            Self::CallIndirect { .. } => BranchKind::IndirectCall,
            Self::Return { .. }       => BranchKind::Return,
        }
    }

    pub fn pc(&self) -> u64 {
        match self {
            Self::Branch { pc, .. }
            | Self::JumpDirect { pc, .. }
            | Self::JumpIndirect { pc, .. }
            | Self::CallDirect { pc, .. }
            | Self::CallIndirect { pc, .. }
            | Self::Return { pc, .. } => *pc,
        }
    }

    /// Encode this event as a fixed-width [TraceRecord].
    ///
    /// Encoding never fails. For a not-taken conditional branch the
    /// record's target is the fall-through address `pc + ilen`; in every
    /// other case it is the observed transfer destination.
    pub fn encode(&self) -> TraceRecord {
        match *self {
            Self::Branch { pc, tgt, outcome, ilen } => {
                let tgt = match outcome {
                    Outcome::T => tgt,
                    Outcome::N => pc + ilen as u64,
                };
                TraceRecord {
                    pc,
                    tgt,
                    flags: BranchFlags::build(BranchKind::DirectBranch, outcome, ilen),
                }
            }
            Self::JumpDirect { pc, tgt, ilen }
            | Self::JumpIndirect { pc, tgt, ilen }
            | Self::CallDirect { pc, tgt, ilen }
            | Self::CallIndirect { pc, tgt, ilen }
            | Self::Return { pc, tgt, ilen } => TraceRecord {
                pc,
                tgt,
                flags: BranchFlags::build(self.kind(), Outcome::T, ilen),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn taken_branch() {
        let ev = CtiEvent::Branch {
            pc: 0x1000,
            tgt: 0x1010,
            outcome: Outcome::T,
            ilen: 2,
        };
        let rec = ev.encode();
        assert_eq!(rec.pc, 0x1000);
        assert_eq!(rec.tgt, 0x1010);
        assert!(rec.flags.is_brn() && rec.flags.is_taken());
        assert_eq!(rec.ilen(), 2);
    }

    #[test]
    fn not_taken_branch_records_fallthrough() {
        let ev = CtiEvent::Branch {
            pc: 0x1000,
            tgt: 0x1010,
            outcome: Outcome::N,
            ilen: 2,
        };
        let rec = ev.encode();
        assert_eq!(rec.pc, 0x1000);
        assert_eq!(rec.tgt, 0x1002);
        assert!(rec.flags.is_brn());
        assert!(!rec.flags.is_taken());
        assert_eq!(rec.ilen(), 2);
    }

    #[test]
    fn indirect_call() {
        let ev = CtiEvent::CallIndirect { pc: 0x2000, tgt: 0x3000, ilen: 3 };
        let rec = ev.encode();
        assert_eq!((rec.pc, rec.tgt), (0x2000, 0x3000));
        assert!(rec.flags.is_call() && rec.flags.is_indirect() && rec.flags.is_taken());
    }

    #[test]
    fn ret() {
        let ev = CtiEvent::Return { pc: 0x4000, tgt: 0x4050, ilen: 1 };
        let rec = ev.encode();
        assert_eq!((rec.pc, rec.tgt), (0x4000, 0x4050));
        assert!(rec.flags.is_ret() && rec.flags.is_indirect() && rec.flags.is_taken());
    }

    /// Unconditional events always encode TAKEN, whatever the host's taken
    /// indicator said at observation time.
    #[test]
    fn observe_ignores_outcome_for_unconditional() {
        for kind in [
            BranchKind::DirectJump,
            BranchKind::IndirectJump,
            BranchKind::DirectCall,
            BranchKind::IndirectCall,
            BranchKind::Return,
        ] {
            let ev = CtiEvent::observe(kind, 0x5000, 0x6000, Outcome::N, 5);
            let rec = ev.encode();
            assert!(rec.flags.is_taken(), "{:?}", kind);
            assert_eq!(rec.tgt, 0x6000);
            assert_eq!(rec.kind().unwrap(), kind);
        }
    }

    #[test]
    fn observe_branch_keeps_outcome() {
        let ev = CtiEvent::observe(BranchKind::DirectBranch, 0x10, 0x40, Outcome::N, 2);
        assert_eq!(
            ev,
            CtiEvent::Branch { pc: 0x10, tgt: 0x40, outcome: Outcome::N, ilen: 2 }
        );
    }
}
