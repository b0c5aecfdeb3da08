/// Rank of a participant on the torus (0-indexed).
pub type Rank = u32;

/// All-to-All algorithm variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// Pipelined full-ring rotations, one dimension sweep at a time.
    Baseline,
    /// Bidirectional half-ring rotations over all dimensions at once.
    HalfRing,
    /// HalfRing that folds traffic away from a failed link inside its ring.
    FoldedRing,
    /// HalfRing plus bypass and relay-chain lanes around failed links.
    Mate,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Baseline,
        Algorithm::HalfRing,
        Algorithm::FoldedRing,
        Algorithm::Mate,
    ];

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Algorithm::Baseline => "baseline",
            Algorithm::HalfRing => "halfring",
            Algorithm::FoldedRing => "folded",
            Algorithm::Mate => "mate",
        }
    }

    /// Whether the variant tolerates declared link failures.
    pub const fn tolerates_failures(self) -> bool {
        matches!(self, Algorithm::FoldedRing | Algorithm::Mate)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" | "ring" => Ok(Algorithm::Baseline),
            "halfring" | "half-ring" | "half_ring" => Ok(Algorithm::HalfRing),
            "folded" | "foldedring" | "folded-ring" => Ok(Algorithm::FoldedRing),
            "mate" => Ok(Algorithm::Mate),
            other => Err(format!("unknown algorithm '{other}'")),
        }
    }
}

/// Travel direction along one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sign {
    /// Towards the predecessor (coordinate - 1).
    Minus,
    /// Towards the successor (coordinate + 1).
    Plus,
}

impl Sign {
    pub const fn flip(self) -> Sign {
        match self {
            Sign::Minus => Sign::Plus,
            Sign::Plus => Sign::Minus,
        }
    }

    pub const fn as_offset(self) -> isize {
        match self {
            Sign::Minus => -1,
            Sign::Plus => 1,
        }
    }
}

/// One neighbour port of a torus node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Direction {
    pub dim: usize,
    pub sign: Sign,
}

impl Direction {
    pub const fn new(dim: usize, sign: Sign) -> Self {
        Self { dim, sign }
    }

    /// Index into the neighbour array: `[pred_0, succ_0, pred_1, succ_1, ...]`.
    pub const fn port(self) -> usize {
        2 * self.dim
            + match self.sign {
                Sign::Minus => 0,
                Sign::Plus => 1,
            }
    }

    pub const fn from_port(port: usize) -> Self {
        let sign = if port % 2 == 0 { Sign::Minus } else { Sign::Plus };
        Self {
            dim: port / 2,
            sign,
        }
    }
}

/// Conventional axis letter for a dimension index (X, Y, Z, W, then `D4`, ...).
pub fn dim_name(dim: usize) -> String {
    match dim {
        0 => "X".into(),
        1 => "Y".into(),
        2 => "Z".into(),
        3 => "W".into(),
        d => format!("D{d}"),
    }
}
