//! Node operation codes.
//!
//! [`NodeOp`] is the closed vocabulary of netlist cells. Codes are persisted
//! in node records, so variants are only ever appended; existing codes are
//! never renumbered.
//!
//! Per-op properties live in one static table indexed by the code rather
//! than in scattered `match` arms:
//!
//! | property       | ops                               |
//! |----------------|-----------------------------------|
//! | pipelined      | `Latch`, `FFlop`, `AFlop`, `Memory` |
//! | graph boundary | `GraphIo`                         |
//! | instance       | `Sub`                             |
//! | constant       | `Const`                           |
//!
//! Pipelined cells produce values from a previous evaluation, so the
//! topological iterators do not order them against their inputs.

use lgdb_store::FixedCodec;
use serde::{Deserialize, Serialize};

/// Operation performed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum NodeOp {
    /// Not yet typed.
    #[default]
    Invalid = 0,
    GraphIo = 1,
    Sum = 2,
    Mult = 3,
    Div = 4,
    Mod = 5,
    Not = 6,
    Join = 7,
    Pick = 8,
    And = 9,
    Or = 10,
    Xor = 11,
    Equals = 12,
    LessThan = 13,
    GreaterThan = 14,
    LessEqual = 15,
    GreaterEqual = 16,
    ShiftLeft = 17,
    ShiftRight = 18,
    LogicShiftRight = 19,
    Mux = 20,
    Tristate = 21,
    Latch = 22,
    FFlop = 23,
    AFlop = 24,
    Memory = 25,
    Const = 26,
    Sub = 27,
}

struct OpTraits {
    mnemonic: &'static str,
    pipelined: bool,
}

const fn comb(mnemonic: &'static str) -> OpTraits {
    OpTraits {
        mnemonic,
        pipelined: false,
    }
}

const fn seq(mnemonic: &'static str) -> OpTraits {
    OpTraits {
        mnemonic,
        pipelined: true,
    }
}

static TRAITS: [OpTraits; 28] = [
    comb("?"),
    comb("io"),
    comb("sum"),
    comb("mult"),
    comb("div"),
    comb("mod"),
    comb("not"),
    comb("join"),
    comb("pick"),
    comb("and"),
    comb("or"),
    comb("xor"),
    comb("eq"),
    comb("lt"),
    comb("gt"),
    comb("le"),
    comb("ge"),
    comb("shl"),
    comb("sra"),
    comb("shr"),
    comb("mux"),
    comb("tri"),
    seq("latch"),
    seq("fflop"),
    seq("aflop"),
    seq("mem"),
    comb("c"),
    comb("g"),
];

const ALL: [NodeOp; 28] = [
    NodeOp::Invalid,
    NodeOp::GraphIo,
    NodeOp::Sum,
    NodeOp::Mult,
    NodeOp::Div,
    NodeOp::Mod,
    NodeOp::Not,
    NodeOp::Join,
    NodeOp::Pick,
    NodeOp::And,
    NodeOp::Or,
    NodeOp::Xor,
    NodeOp::Equals,
    NodeOp::LessThan,
    NodeOp::GreaterThan,
    NodeOp::LessEqual,
    NodeOp::GreaterEqual,
    NodeOp::ShiftLeft,
    NodeOp::ShiftRight,
    NodeOp::LogicShiftRight,
    NodeOp::Mux,
    NodeOp::Tristate,
    NodeOp::Latch,
    NodeOp::FFlop,
    NodeOp::AFlop,
    NodeOp::Memory,
    NodeOp::Const,
    NodeOp::Sub,
];

impl NodeOp {
    /// Plain combinational cells: everything between `Sum` and `Tristate`.
    pub const COMBINATIONAL: [NodeOp; 20] = [
        NodeOp::Sum,
        NodeOp::Mult,
        NodeOp::Div,
        NodeOp::Mod,
        NodeOp::Not,
        NodeOp::Join,
        NodeOp::Pick,
        NodeOp::And,
        NodeOp::Or,
        NodeOp::Xor,
        NodeOp::Equals,
        NodeOp::LessThan,
        NodeOp::GreaterThan,
        NodeOp::LessEqual,
        NodeOp::GreaterEqual,
        NodeOp::ShiftLeft,
        NodeOp::ShiftRight,
        NodeOp::LogicShiftRight,
        NodeOp::Mux,
        NodeOp::Tristate,
    ];

    /// Every op, in code order.
    pub fn all() -> &'static [NodeOp] {
        &ALL
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Inverse of [`code`](Self::code). `None` for codes this build does not know.
    pub fn from_code(code: u16) -> Option<NodeOp> {
        ALL.get(code as usize).copied()
    }

    fn traits(self) -> &'static OpTraits {
        &TRAITS[self as usize]
    }

    /// Short name used in debug names and dumps.
    pub fn mnemonic(self) -> &'static str {
        self.traits().mnemonic
    }

    pub fn is_pipelined(self) -> bool {
        self.traits().pipelined
    }

    pub fn is_graph_io(self) -> bool {
        self == NodeOp::GraphIo
    }

    pub fn is_sub(self) -> bool {
        self == NodeOp::Sub
    }

    pub fn is_const(self) -> bool {
        self == NodeOp::Const
    }
}

impl FixedCodec for NodeOp {
    const SIZE: usize = 2;

    fn encode(&self, out: &mut [u8]) {
        self.code().encode(out);
    }

    /// Unknown codes decode as `Invalid`.
    fn decode(bytes: &[u8]) -> Self {
        NodeOp::from_code(u16::decode(bytes)).unwrap_or(NodeOp::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_table_positions() {
        for (i, op) in NodeOp::all().iter().enumerate() {
            assert_eq!(op.code() as usize, i);
            assert_eq!(NodeOp::from_code(i as u16), Some(*op));
        }
        assert_eq!(NodeOp::from_code(28), None);
    }

    #[test]
    fn stable_codes() {
        // Persisted graphs depend on these values.
        assert_eq!(NodeOp::GraphIo.code(), 1);
        assert_eq!(NodeOp::FFlop.code(), 23);
        assert_eq!(NodeOp::Const.code(), 26);
        assert_eq!(NodeOp::Sub.code(), 27);
    }

    #[test]
    fn pipelined_ops() {
        let pipelined: Vec<NodeOp> = NodeOp::all()
            .iter()
            .copied()
            .filter(|op| op.is_pipelined())
            .collect();
        assert_eq!(
            pipelined,
            vec![NodeOp::Latch, NodeOp::FFlop, NodeOp::AFlop, NodeOp::Memory]
        );
    }

    #[test]
    fn combinational_ops_have_no_special_traits() {
        for op in NodeOp::COMBINATIONAL {
            assert!(!op.is_pipelined(), "{op:?}");
            assert!(!op.is_graph_io() && !op.is_sub() && !op.is_const(), "{op:?}");
        }
    }

    #[test]
    fn codec_roundtrip_and_unknown() {
        assert_eq!(NodeOp::decode(&NodeOp::Mux.to_bytes()), NodeOp::Mux);
        assert_eq!(NodeOp::decode(&999u16.to_bytes()), NodeOp::Invalid);
    }

    #[test]
    fn serde_roundtrip() {
        let json = serde_json::to_string(&NodeOp::FFlop).unwrap();
        assert_eq!(json, "\"FFlop\"");
        let back: NodeOp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, NodeOp::FFlop);
    }
}
