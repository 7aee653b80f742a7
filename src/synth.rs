//! Synthetic control-flow programs.
//!
//! A [TraceAssembler] builds a small program out of branches, jumps, calls,
//! and returns, then unrolls it into the exact stream of [CtiEvent]s a host
//! framework would deliver while the program ran. This is how sessions and
//! sinks get driven end to end without a real instrumentation runtime, and
//! how interesting outcome patterns are produced for predictor research.

use crate::branch::{BranchKind, Outcome};
use crate::event::CtiEvent;

/// A compiled stream of control-flow events.
pub struct SyntheticTrace {
    pub events: Vec<CtiEvent>,
}

/// An identifier for a particular [EmitterOp].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Label(usize);
impl Label {
    pub fn new(id: usize) -> Self { Self(id) }
    pub fn id(&self) -> usize { self.0 }
}

/// A map from labels to indexes.
#[derive(Debug)]
pub struct LabelDb {
    data: Vec<Option<usize>>,
    next: usize,
}
impl LabelDb {
    pub fn new() -> Self {
        Self { data: Vec::new(), next: 0 }
    }

    /// Allocate a new label
    pub fn alloc(&mut self) -> Label {
        let res = Label::new(self.next);
        self.data.push(None);
        self.next += 1;
        res
    }

    /// Bind a label to some index
    pub fn define(&mut self, label: &Label, idx: usize) {
        self.data[label.id()] = Some(idx);
    }

    /// Resolve a label
    pub fn resolve(&self, label: &Label) -> Option<usize> {
        self.data[label.id()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmitterLoc {
    /// A label to be resolved into an index at compile-time.
    Label(Label),

    /// An index pointing to some [EmitterOp].
    Index(usize),
}
impl EmitterLoc {
    fn get_index(&self) -> usize {
        if let Self::Index(idx) = self {
            *idx
        } else {
            panic!("Unresolved label {:?}", self);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchTarget {
    /// A single fixed target location
    Direct(EmitterLoc),

    /// A list of target locations, cycled once per execution
    Indirect(Vec<EmitterLoc>),
}
impl BranchTarget {
    /// Select the target for the `ctr`th execution of the owning op.
    fn select(&self, ctr: usize) -> &EmitterLoc {
        match self {
            Self::Direct(loc) => loc,
            Self::Indirect(locs) => &locs[ctr % locs.len()],
        }
    }
    fn is_indirect(&self) -> bool {
        matches!(self, Self::Indirect(_))
    }
}

/// A pre-determined pattern of outcomes associated with a conditional branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchPattern {
    /// A branch whose outcome is always 'taken'.
    AlwaysTaken,

    /// A branch whose outcome is always 'not-taken'.
    NeverTaken,

    /// A branch whose outcome is only periodically "taken".
    /// Otherwise, the branch is "not-taken" by default.
    TakenPeriodic(usize),

    /// A branch whose outcome is only periodically "not-taken".
    /// Otherwise, the branch is "taken" by default.
    NotTakenPeriodic(usize),

    /// A branch with an arbitrary pattern of outcomes.
    Pattern(&'static [Outcome]),

    /// A branch with a uniformly random outcome.
    Random,
}
impl BranchPattern {
    /// Generate a branch outcome for the `ctr`th execution.
    pub fn outcome(&self, ctr: usize) -> Outcome {
        match self {
            Self::AlwaysTaken => Outcome::T,
            Self::NeverTaken => Outcome::N,
            Self::TakenPeriodic(p) => {
                if ctr % p == (p - 1) { Outcome::T } else { Outcome::N }
            }
            Self::NotTakenPeriodic(p) => {
                if ctr % p == (p - 1) { Outcome::N } else { Outcome::T }
            }
            Self::Pattern(p) => p[ctr % p.len()],
            Self::Random => rand::random::<bool>().into(),
        }
    }
}

/// An instruction in the IR.
///
/// Conditional branches are always direct in this model, so [EmitterOp::Branch]
/// takes a bare location rather than a [BranchTarget].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmitterOp {
    /// A conditional branch with a single target and a pattern of outcomes.
    Branch(EmitterLoc, BranchPattern),

    /// An unconditional jump, direct or indirect.
    Jump(BranchTarget),

    /// A procedure call, direct or indirect.
    Call(BranchTarget),

    /// A return to the most recent unreturned call.
    Ret,
}
impl EmitterOp {
    /// Returns the number of "bytes" that correspond to this instruction.
    /// The sizes are arbitrary but distinct, so fall-through addresses and
    /// the ILEN field are meaningful in compiled traces.
    pub fn size(&self) -> usize {
        match self {
            Self::Branch(_, _) => 2,
            Self::Jump(t) | Self::Call(t) => {
                if t.is_indirect() { 3 } else { 5 }
            }
            Self::Ret => 1,
        }
    }

    /// Return the [BranchKind] for this op.
    pub fn kind(&self) -> BranchKind {
        match self {
            Self::Branch(_, _) => BranchKind::DirectBranch,
            Self::Jump(t) => {
                if t.is_indirect() { BranchKind::IndirectJump } else { BranchKind::DirectJump }
            }
            Self::Call(t) => {
                if t.is_indirect() { BranchKind::IndirectCall } else { BranchKind::DirectCall }
            }
            Self::Ret => BranchKind::Return,
        }
    }
}

/// Used to assemble and compile a synthetic program.
#[derive(Debug)]
pub struct TraceAssembler {
    /// The list of [EmitterOp]s.
    ops: Vec<EmitterOp>,

    /// The list of program counter values corresponding to each [EmitterOp].
    pcs: Vec<usize>,

    /// State tracking the program counter value during assembly.
    cursor: usize,

    /// Map from some [Label] to an [EmitterOp] index.
    labels: LabelDb,
}

impl TraceAssembler {
    /// Create a new assembler with the provided base address.
    pub fn new(base: usize) -> Self {
        Self {
            ops: Vec::new(),
            pcs: Vec::new(),
            cursor: base,
            labels: LabelDb::new(),
        }
    }

    /// Create a new label.
    pub fn create_label(&mut self) -> Label {
        self.labels.alloc()
    }

    /// Bind a label to the current point in the program.
    pub fn bind_label(&mut self, label: Label) {
        let off = self.ops.len();
        self.labels.define(&label, off);
    }

    fn push_op(&mut self, op: EmitterOp) {
        let op_size = op.size();
        self.ops.push(op);
        self.pcs.push(self.cursor);
        self.cursor += op_size;
    }

    /// Emit a conditional direct branch to the provided [Label].
    pub fn branch_to_label(&mut self, tgt: Label, pat: BranchPattern) {
        self.push_op(EmitterOp::Branch(EmitterLoc::Label(tgt), pat));
    }

    /// Emit an unconditional direct jump to the provided [Label].
    pub fn jump_to_label(&mut self, tgt: Label) {
        self.push_op(EmitterOp::Jump(
            BranchTarget::Direct(EmitterLoc::Label(tgt)),
        ));
    }

    /// Emit an indirect jump cycling through the provided [Label]s.
    pub fn jump_indirect(&mut self, tgts: &[Label]) {
        assert!(!tgts.is_empty());
        self.push_op(EmitterOp::Jump(BranchTarget::Indirect(
            tgts.iter().map(|t| EmitterLoc::Label(*t)).collect(),
        )));
    }

    /// Emit a direct call to the provided [Label].
    pub fn call_to_label(&mut self, tgt: Label) {
        self.push_op(EmitterOp::Call(
            BranchTarget::Direct(EmitterLoc::Label(tgt)),
        ));
    }

    /// Emit an indirect call cycling through the provided [Label]s.
    pub fn call_indirect(&mut self, tgts: &[Label]) {
        assert!(!tgts.is_empty());
        self.push_op(EmitterOp::Call(BranchTarget::Indirect(
            tgts.iter().map(|t| EmitterLoc::Label(*t)).collect(),
        )));
    }

    /// Emit a return to the most recent unreturned call.
    pub fn ret(&mut self) {
        self.push_op(EmitterOp::Ret);
    }

    /// Increment the program counter by some value.
    pub fn pad(&mut self, len: usize) {
        self.cursor += len;
    }

    /// Increment and align the program counter to some power of two.
    pub fn pad_align(&mut self, aln: usize) {
        assert!(aln.is_power_of_two());
        let mask = aln - 1;
        self.cursor = (self.cursor + mask) & !mask;
    }

    /// Explicitly set the program counter to a particular value.
    pub fn pad_until(&mut self, next_pc: usize) {
        assert!(next_pc > self.cursor);
        self.cursor = next_pc;
    }
}

impl TraceAssembler {
    /// Rewrite occurences of [EmitterLoc::Label] into [EmitterLoc::Index].
    /// This function will panic when encountering an undefined label.
    fn rewrite_labels(&mut self) {
        let mut locs: Vec<&mut EmitterLoc> = Vec::new();
        for op in self.ops.iter_mut() {
            match op {
                EmitterOp::Branch(ref mut loc, _) => locs.push(loc),
                EmitterOp::Jump(tgt) | EmitterOp::Call(tgt) => match tgt {
                    BranchTarget::Direct(ref mut loc) => locs.push(loc),
                    BranchTarget::Indirect(ref mut ls) => locs.extend(ls.iter_mut()),
                },
                EmitterOp::Ret => {}
            }
        }

        for loc in locs {
            if let EmitterLoc::Label(lab) = loc {
                if let Some(idx) = self.labels.resolve(lab) {
                    *loc = EmitterLoc::Index(idx);
                } else {
                    panic!("Undefined label {:?}", lab);
                }
            }
        }
    }

    /// Unroll this program into the event stream a host would observe.
    ///
    /// The walk keeps one execution counter per op (driving outcome
    /// patterns and indirect target selection) and a return-address stack.
    /// It halts after `max_events`, when control runs off the end of the
    /// program, or when a return executes with an empty stack.
    pub fn compile(&mut self, max_events: usize) -> SyntheticTrace {
        self.rewrite_labels();

        let num_ops = self.ops.len();
        let mut ctr = vec![0usize; num_ops];
        let mut stack: Vec<(usize, u64)> = Vec::new();
        let mut events = Vec::new();
        let mut cur = 0;

        'main: loop {
            if (events.len() >= max_events) || (cur >= num_ops) {
                break 'main;
            }

            let op = &self.ops[cur];
            let pc = self.pcs[cur] as u64;
            let ilen = op.size() as u8;
            let count = ctr[cur];
            ctr[cur] += 1;

            match op {
                EmitterOp::Branch(loc, pat) => {
                    let outcome = pat.outcome(count);
                    let tgt_idx = loc.get_index();
                    let tgt = self.pcs[tgt_idx] as u64;
                    events.push(CtiEvent::observe(op.kind(), pc, tgt, outcome, ilen));
                    cur = match outcome {
                        Outcome::T => tgt_idx,
                        Outcome::N => cur + 1,
                    };
                }
                EmitterOp::Jump(target) => {
                    let tgt_idx = target.select(count).get_index();
                    let tgt = self.pcs[tgt_idx] as u64;
                    events.push(CtiEvent::observe(op.kind(), pc, tgt, Outcome::T, ilen));
                    cur = tgt_idx;
                }
                EmitterOp::Call(target) => {
                    let tgt_idx = target.select(count).get_index();
                    let tgt = self.pcs[tgt_idx] as u64;
                    stack.push((cur + 1, pc + ilen as u64));
                    events.push(CtiEvent::observe(op.kind(), pc, tgt, Outcome::T, ilen));
                    cur = tgt_idx;
                }
                EmitterOp::Ret => {
                    let Some((resume, ret_addr)) = stack.pop() else {
                        break 'main;
                    };
                    events.push(CtiEvent::observe(op.kind(), pc, ret_addr, Outcome::T, ilen));
                    cur = resume;
                }
            }
        }

        SyntheticTrace { events }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branch_patterns() {
        let p = BranchPattern::TakenPeriodic(4);
        let outcomes: Vec<_> = (0..8).map(|i| p.outcome(i)).collect();
        assert_eq!(
            outcomes,
            [
                Outcome::N, Outcome::N, Outcome::N, Outcome::T,
                Outcome::N, Outcome::N, Outcome::N, Outcome::T,
            ]
        );
        assert_eq!(BranchPattern::AlwaysTaken.outcome(17), Outcome::T);
        assert_eq!(BranchPattern::NeverTaken.outcome(17), Outcome::N);
    }

    #[test]
    fn loop_with_branch() {
        let mut e = TraceAssembler::new(0x1000);
        let top = e.create_label();
        let out = e.create_label();
        e.bind_label(top);
        e.branch_to_label(out, BranchPattern::TakenPeriodic(3));
        e.jump_to_label(top);
        e.bind_label(out);
        e.ret();

        let t = e.compile(64);
        // Two not-taken branches each followed by a backwards jump, then
        // the taken branch, then the bottom return halts on empty stack.
        assert_eq!(t.events.len(), 5);
        assert!(matches!(
            t.events[0],
            CtiEvent::Branch { outcome: Outcome::N, .. }
        ));
        assert!(matches!(t.events[1], CtiEvent::JumpDirect { .. }));
        assert!(matches!(
            t.events[4],
            CtiEvent::Branch { outcome: Outcome::T, .. }
        ));
    }

    #[test]
    fn call_and_return_addresses() {
        let mut e = TraceAssembler::new(0x4000);
        let func = e.create_label();
        e.call_to_label(func);
        e.ret();
        e.bind_label(func);
        e.ret();

        let t = e.compile(16);
        // The second return pops an empty stack and halts without an event
        assert_eq!(t.events.len(), 2);

        let CtiEvent::CallDirect { pc, tgt, ilen } = t.events[0] else {
            panic!("expected call, got {:?}", t.events[0]);
        };
        assert_eq!(pc, 0x4000);
        assert_eq!(ilen, 5);

        // The callee returns to the instruction after the call site
        let CtiEvent::Return { pc: ret_pc, tgt: ret_tgt, .. } = t.events[1] else {
            panic!("expected return, got {:?}", t.events[1]);
        };
        assert_eq!(ret_pc, tgt);
        assert_eq!(ret_tgt, 0x4000 + 5);
    }

    #[test]
    fn indirect_targets_cycle() {
        let mut e = TraceAssembler::new(0x100);
        let top = e.create_label();
        let a = e.create_label();
        let b = e.create_label();
        e.bind_label(top);
        e.jump_indirect(&[a, b]);
        e.bind_label(a);
        e.jump_to_label(top);
        e.bind_label(b);
        e.ret();

        let t = e.compile(16);
        let indirect_tgts: Vec<u64> = t
            .events
            .iter()
            .filter_map(|ev| match ev {
                CtiEvent::JumpIndirect { tgt, .. } => Some(*tgt),
                _ => None,
            })
            .collect();
        assert_eq!(indirect_tgts.len(), 2);
        assert_ne!(indirect_tgts[0], indirect_tgts[1]);
    }

    #[test]
    fn padding_moves_pcs() {
        let mut e = TraceAssembler::new(0x1000);
        let top = e.create_label();
        e.bind_label(top);
        e.branch_to_label(top, BranchPattern::NeverTaken);
        e.pad_align(0x100);
        e.branch_to_label(top, BranchPattern::NeverTaken);

        let t = e.compile(2);
        assert_eq!(t.events[0].pc(), 0x1000);
        assert_eq!(t.events[1].pc(), 0x1100);
    }
}
