//! Torus topology model.
//!
//! Ranks are laid out row-major with dimension 0 varying fastest: on a 4×4
//! torus rank `x + 4·y` sits at coordinate `(x, y)`, so rank 1 is rank 0's
//! successor in X and rank 4 its successor in Y. Every dimension wraps.

mod link;

pub use link::{Link, LinkFailures};

use crate::error::{Result, TorexError};
use crate::types::{Direction, Rank, Sign};

/// Immutable shape of a D-dimensional torus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TorusShape {
    extents: Vec<usize>,
    world_size: u32,
}

impl TorusShape {
    /// Build a shape from per-dimension extents.
    pub fn new(extents: impl Into<Vec<usize>>) -> Result<Self> {
        let extents = extents.into();
        if extents.is_empty() {
            return Err(TorexError::InvalidShape(
                "at least one dimension is required".into(),
            ));
        }
        if let Some(d) = extents.iter().position(|&e| e == 0) {
            return Err(TorexError::InvalidShape(format!(
                "dimension {d} has zero extent"
            )));
        }
        let world = extents
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(e))
            .and_then(|w| u32::try_from(w).ok())
            .ok_or_else(|| TorexError::InvalidShape(format!("{extents:?} overflows u32 ranks")))?;
        Ok(Self {
            extents,
            world_size: world,
        })
    }

    pub fn ndims(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn extent(&self, dim: usize) -> usize {
        self.extents[dim]
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// Node degree: two ports per dimension.
    pub fn degree(&self) -> usize {
        2 * self.ndims()
    }

    pub fn check_rank(&self, rank: Rank) -> Result<()> {
        if rank < self.world_size {
            Ok(())
        } else {
            Err(TorexError::InvalidRank {
                rank,
                world_size: self.world_size,
            })
        }
    }

    fn stride(&self, dim: usize) -> usize {
        self.extents[..dim].iter().product()
    }

    /// Coordinate of `rank` in dimension `dim`. `rank` must be in range.
    pub(crate) fn coord_in(&self, rank: Rank, dim: usize) -> usize {
        (rank as usize / self.stride(dim)) % self.extents[dim]
    }

    /// Full coordinate of `rank`.
    pub fn coord(&self, rank: Rank) -> Result<Vec<usize>> {
        self.check_rank(rank)?;
        Ok((0..self.ndims()).map(|d| self.coord_in(rank, d)).collect())
    }

    /// Rank at a coordinate.
    pub fn rank_of(&self, coord: &[usize]) -> Result<Rank> {
        if coord.len() != self.ndims() {
            return Err(TorexError::InvalidShape(format!(
                "coordinate {coord:?} has {} dimensions, torus has {}",
                coord.len(),
                self.ndims()
            )));
        }
        let mut rank = 0usize;
        for (d, (&c, &n)) in coord.iter().zip(&self.extents).enumerate() {
            if c >= n {
                return Err(TorexError::InvalidShape(format!(
                    "coordinate {c} out of range for dimension {d} (extent {n})"
                )));
            }
            rank += c * self.stride(d);
        }
        Ok(rank as Rank)
    }

    /// Move `offset` positions around the ring of `dim`, wrapping.
    pub(crate) fn shift(&self, rank: Rank, dim: usize, offset: isize) -> Rank {
        let n = self.extents[dim] as isize;
        let c = self.coord_in(rank, dim) as isize;
        let moved = (c + offset).rem_euclid(n);
        (rank as isize + (moved - c) * self.stride(dim) as isize) as Rank
    }

    /// The rank that shares every coordinate with `rank` except `dim`, which is `value`.
    pub(crate) fn with_coord(&self, rank: Rank, dim: usize, value: usize) -> Rank {
        let c = self.coord_in(rank, dim) as isize;
        (rank as isize + (value as isize - c) * self.stride(dim) as isize) as Rank
    }

    /// Hops needed to walk from `from` to coordinate `to` in the `+` direction.
    pub(crate) fn forward_distance(&self, from: Rank, to: usize, dim: usize) -> usize {
        let n = self.extents[dim];
        (to + n - self.coord_in(from, dim)) % n
    }

    /// Neighbour of `rank` through one port.
    pub fn neighbor(&self, rank: Rank, dir: Direction) -> Result<Rank> {
        self.check_rank(rank)?;
        if dir.dim >= self.ndims() {
            return Err(TorexError::InvalidShape(format!(
                "dimension {} out of range for a {}-D torus",
                dir.dim,
                self.ndims()
            )));
        }
        Ok(self.shift(rank, dir.dim, dir.sign.as_offset()))
    }

    /// Neighbour set ordered `[pred_0, succ_0, pred_1, succ_1, ...]`.
    ///
    /// For a 2D torus this is `[left, right, up, down]`.
    pub fn neighbors(&self, rank: Rank) -> Result<Vec<Rank>> {
        self.check_rank(rank)?;
        Ok((0..self.degree())
            .map(|port| {
                let dir = Direction::from_port(port);
                self.shift(rank, dir.dim, dir.sign.as_offset())
            })
            .collect())
    }

    /// Every predecessor, then every successor: `[pred_0, pred_1, ...,
    /// succ_0, succ_1, ...]`, i.e. `[left, up, right, down]` on a 2D torus.
    pub fn neighbors_grouped(&self, rank: Rank) -> Result<Vec<Rank>> {
        let by_port = self.neighbors(rank)?;
        let (preds, succs): (Vec<_>, Vec<_>) = (0..self.degree())
            .map(Direction::from_port)
            .partition(|dir| dir.sign == Sign::Minus);
        Ok(preds
            .into_iter()
            .chain(succs)
            .map(|dir| by_port[dir.port()])
            .collect())
    }

    /// Members of the ring through `rank` along `dim`, ordered by coordinate.
    pub fn ring(&self, rank: Rank, dim: usize) -> Vec<Rank> {
        (0..self.extents[dim])
            .map(|c| self.with_coord(rank, dim, c))
            .collect()
    }

    /// Dimension along which `a` and `b` are neighbours, if any.
    pub fn adjacency(&self, a: Rank, b: Rank) -> Option<usize> {
        if a == b || !self.contains(a) || !self.contains(b) {
            return None;
        }
        (0..self.ndims()).find(|&d| {
            self.extents[d] > 1
                && (self.shift(a, d, 1) == b || self.shift(a, d, -1) == b)
        })
    }

    pub fn contains(&self, rank: Rank) -> bool {
        rank < self.world_size
    }

    /// Links traversed by walking `hops` steps from `from` along `dim`.
    pub(crate) fn walk(
        &self,
        from: Rank,
        dim: usize,
        sign: Sign,
        hops: usize,
    ) -> impl Iterator<Item = (Rank, Rank)> + '_ {
        (0..hops).map(move |h| {
            let a = self.shift(from, dim, sign.as_offset() * h as isize);
            (a, self.shift(a, dim, sign.as_offset()))
        })
    }
}

impl std::fmt::Display for TorusShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.extents.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("x"))
    }
}

impl std::str::FromStr for TorusShape {
    type Err = TorexError;

    /// Parse `"4x4"`, `"4,4"` or `"4x4x2"`.
    fn from_str(s: &str) -> Result<Self> {
        let extents = s
            .split(|c| c == 'x' || c == 'X' || c == ',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .map_err(|e| TorexError::InvalidShape(format!("'{s}': {e}")))
            })
            .collect::<Result<Vec<usize>>>()?;
        Self::new(extents)
    }
}
