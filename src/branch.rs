//! Types for representing control-flow events and trace records.

use crate::errors::TraceError;

/// A branch outcome.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    /// Not taken
    N = 0,
    /// Taken
    T = 1,
}

impl Outcome {
    pub fn from_bool(b: bool) -> Self {
        match b {
            true => Self::T,
            false => Self::N,
        }
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::T => "t",
            Self::N => "n",
        };
        write!(f, "{}", s)
    }
}

impl std::ops::Not for Outcome {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Self::N => Self::T,
            Self::T => Self::N,
        }
    }
}

impl From<bool> for Outcome {
    fn from(x: bool) -> Self {
        match x {
            true => Self::T,
            false => Self::N,
        }
    }
}
impl From<Outcome> for bool {
    fn from(x: Outcome) -> bool {
        match x {
            Outcome::T => true,
            Outcome::N => false,
        }
    }
}

/// The different kinds of control-flow instructions.
///
/// The discriminant of each variant is the set of flag bits implied by the
/// kind, so converting a kind into [BranchFlags] is a cast.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BranchKind {
    /// A direct conditional branch instruction.
    DirectBranch = BranchFlags::BRN_FLAG,

    /// A direct unconditional jump instruction.
    DirectJump   = BranchFlags::JMP_FLAG,

    /// An indirect unconditional jump instruction.
    IndirectJump = BranchFlags::JMP_FLAG | BranchFlags::IND_FLAG,

    /// A direct procedure call instruction.
    DirectCall   = BranchFlags::CALL_FLAG,

    /// An indirect procedure call instruction.
    IndirectCall = BranchFlags::CALL_FLAG | BranchFlags::IND_FLAG,

    /// A return instruction.
    /// The target always comes from a saved return address at run-time.
    Return       = BranchFlags::RET_FLAG | BranchFlags::IND_FLAG,
}

impl BranchKind {
    const DIRECT_BRANCH: u32 = BranchFlags::BRN_FLAG;
    const DIRECT_JUMP: u32   = BranchFlags::JMP_FLAG;
    const INDIRECT_JUMP: u32 = BranchFlags::JMP_FLAG | BranchFlags::IND_FLAG;
    const DIRECT_CALL: u32   = BranchFlags::CALL_FLAG;
    const INDIRECT_CALL: u32 = BranchFlags::CALL_FLAG | BranchFlags::IND_FLAG;
    const RETURN: u32        = BranchFlags::RET_FLAG | BranchFlags::IND_FLAG;

    /// Returns 'true' if instructions of this kind unconditionally transfer
    /// control (everything except a conditional branch).
    pub fn is_unconditional(&self) -> bool {
        !matches!(self, Self::DirectBranch)
    }
}

impl TryFrom<u32> for BranchKind {
    type Error = TraceError;
    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x & 0b1_1111 {
            Self::DIRECT_BRANCH => Ok(Self::DirectBranch),
            Self::DIRECT_JUMP   => Ok(Self::DirectJump),
            Self::INDIRECT_JUMP => Ok(Self::IndirectJump),
            Self::DIRECT_CALL   => Ok(Self::DirectCall),
            Self::INDIRECT_CALL => Ok(Self::IndirectCall),
            Self::RETURN        => Ok(Self::Return),
            _ => Err(TraceError::BadRecord(x)),
        }
    }
}

/// Packed flag bits describing a recorded control-flow event.
///
/// NOTE: The bit positions are the wire contract shared with every producer
/// and decoder of this trace format. Do not rearrange them.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BranchFlags(pub u32);
impl BranchFlags {
    pub const BRN_FLAG: u32   = 1 << 0;
    pub const JMP_FLAG: u32   = 1 << 1;
    pub const CALL_FLAG: u32  = 1 << 2;
    pub const RET_FLAG: u32   = 1 << 3;
    pub const IND_FLAG: u32   = 1 << 4;
    pub const TAKEN_FLAG: u32 = 1 << 5;

    /// 4-bit instruction length
    const ILEN_MASK: u32 = 0b1111_0000_0000_0000_0000_0000_0000_0000;
    const ILEN_SHIFT: u32 = 28;

    /// The largest instruction length representable in the ILEN field.
    pub const MAX_ILEN: u8 = 15;

    /// Pack a kind, an outcome, and a static instruction length.
    ///
    /// Lengths above [Self::MAX_ILEN] saturate; an unknown length is
    /// recorded as zero.
    pub fn build(kind: BranchKind, outcome: Outcome, ilen: u8) -> Self {
        let mut bits = kind as u32;
        if outcome == Outcome::T {
            bits |= Self::TAKEN_FLAG;
        }
        bits |= (ilen.min(Self::MAX_ILEN) as u32) << Self::ILEN_SHIFT;
        Self(bits)
    }

    pub fn ilen(&self) -> u8 {
        ((self.0 & Self::ILEN_MASK) >> Self::ILEN_SHIFT) as u8
    }

    pub fn is_brn(&self) -> bool { self.0 & Self::BRN_FLAG != 0 }
    pub fn is_jmp(&self) -> bool { self.0 & Self::JMP_FLAG != 0 }
    pub fn is_call(&self) -> bool { self.0 & Self::CALL_FLAG != 0 }
    pub fn is_ret(&self) -> bool { self.0 & Self::RET_FLAG != 0 }
    pub fn is_direct(&self) -> bool { self.0 & Self::IND_FLAG == 0 }
    pub fn is_indirect(&self) -> bool { self.0 & Self::IND_FLAG != 0 }
    pub fn is_taken(&self) -> bool { self.0 & Self::TAKEN_FLAG != 0 }

    /// Recover the [BranchKind] encoded in the low bits.
    pub fn kind(&self) -> Result<BranchKind, TraceError> {
        self.0.try_into()
    }
}

/// A record of one executed control-flow instruction.
///
/// NOTE: The in-memory layout mirrors the struct written by the
/// instrumentation clients; the wire form is [TraceRecord::SIZE] bytes with
/// little-endian fields and four bytes of trailing padding. A trace file is
/// nothing but these records back to back, with no header and no terminator.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TraceRecord {
    /// The program counter value for this instruction
    pub pc: u64,

    /// The target address evaluated for this instruction
    pub tgt: u64,

    pub flags: BranchFlags,
}

impl TraceRecord {
    /// The wire size of a record in bytes.
    pub const SIZE: usize = 24;

    /// Serialize this record into its wire form.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.pc.to_le_bytes());
        buf[8..16].copy_from_slice(&self.tgt.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.0.to_le_bytes());
        buf
    }

    /// Deserialize a record from its wire form, rejecting flag bits that do
    /// not name exactly one kind.
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Result<Self, TraceError> {
        let pc = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let tgt = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let bits = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let _ = BranchKind::try_from(bits)?;
        Ok(Self { pc, tgt, flags: BranchFlags(bits) })
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::from_bool(self.flags.is_taken())
    }
    pub fn kind(&self) -> Result<BranchKind, TraceError> {
        self.flags.kind()
    }
    pub fn ilen(&self) -> u8 {
        self.flags.ilen()
    }

    /// Returns 'true' if this is a conditional instruction.
    pub fn is_conditional(&self) -> bool {
        self.flags.is_brn()
    }

    /// Returns 'true' if this is an unconditional instruction.
    pub fn is_unconditional(&self) -> bool {
        !self.flags.is_brn()
    }

    /// Returns 'true' if this instruction directly specifies the target.
    pub fn is_direct(&self) -> bool {
        self.flags.is_direct()
    }

    /// Returns 'true' if this instruction indirectly specifies the target.
    pub fn is_indirect(&self) -> bool {
        self.flags.is_indirect()
    }

    /// Returns 'true' if this is a "call" or "return".
    pub fn is_procedural(&self) -> bool {
        self.flags.is_call() || self.flags.is_ret()
    }
}
