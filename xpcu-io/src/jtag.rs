use std::{
    collections::VecDeque,
    fmt::Display,
    ops::{Index, IndexMut},
    sync::LazyLock,
};

use strum::VariantArray;

use crate::units::Bits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::VariantArray)]
#[repr(u8)]
pub enum State {
    TestLogicReset,
    RunTestIdle,
    SelectDR,
    CaptureDR,
    ShiftDR,
    Exit1DR,
    PauseDR,
    Exit2DR,
    UpdateDR,
    SelectIR,
    CaptureIR,
    ShiftIR,
    Exit1IR,
    PauseIR,
    Exit2IR,
    UpdateIR,
}

/// The states one TCK leads to, with TMS low and high.
pub struct Edges([State; 2]);

impl State {
    /// State reached after clocking `path` from `self`.
    pub fn follow(self, path: Path) -> State {
        path.into_iter().fold(self, |cur, tms| GRAPH[cur][tms])
    }
}

/// A TMS sequence, stored MSB first: the first bit clocked is the highest of
/// the `len` used bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Path {
    path: u8,
    pub len: u8,
}

impl Path {
    /// Transition to TLR, from any state
    pub const RESET: Self = Self { path: 0xff, len: 5 };
    /// Transition to RTI, from any state
    pub const IDLE: Self = Self { path: 0x3e, len: 6 };

    /// The path in clocking order, LSB first, as taken by
    /// [`crate::Backend::shift_tms`].
    pub const fn as_clocked(self) -> u8 {
        self.path.reverse_bits() >> (8 - self.len)
    }

    pub const fn bits(self) -> Bits<usize> {
        Bits(self.len as usize)
    }

    const fn push(self, tms: bool) -> Self {
        Self {
            path: self.path << 1 | tms as u8,
            len: self.len + 1,
        }
    }
}

pub struct Graph<T>(pub [T; State::VARIANTS.len()]);

/// IEEE 1149.1 figure 6-1, in [`State`] order.
pub const GRAPH: Graph<Edges> = {
    use State::*;
    Graph([
        Edges([RunTestIdle, TestLogicReset]),
        Edges([RunTestIdle, SelectDR]),
        Edges([CaptureDR, SelectIR]),
        Edges([ShiftDR, Exit1DR]),
        Edges([ShiftDR, Exit1DR]),
        Edges([PauseDR, UpdateDR]),
        Edges([PauseDR, Exit2DR]),
        Edges([ShiftDR, UpdateDR]),
        Edges([RunTestIdle, SelectDR]),
        Edges([CaptureIR, TestLogicReset]),
        Edges([ShiftIR, Exit1IR]),
        Edges([ShiftIR, Exit1IR]),
        Edges([PauseIR, UpdateIR]),
        Edges([PauseIR, Exit2IR]),
        Edges([ShiftIR, UpdateIR]),
        Edges([RunTestIdle, SelectDR]),
    ])
};

/// Shortest TMS path between every pair of states. A state's path to itself
/// is the shortest non-empty loop.
pub static PATHS: LazyLock<Graph<Graph<Path>>> = LazyLock::new(|| {
    let mut ret = Graph(
        [const { Graph([Path { path: 0, len: 0 }; State::VARIANTS.len()]) }; State::VARIANTS.len()],
    );
    for start in State::VARIANTS {
        for end in State::VARIANTS {
            ret[*start][*end] = get_path(*start, *end);
        }
    }
    ret
});

impl<T> Index<State> for Graph<T> {
    type Output = T;
    fn index(&self, index: State) -> &Self::Output {
        self.0.index(index as u8 as usize)
    }
}

impl<T> IndexMut<State> for Graph<T> {
    fn index_mut(&mut self, index: State) -> &mut Self::Output {
        self.0.index_mut(index as u8 as usize)
    }
}

impl Index<bool> for Edges {
    type Output = State;
    fn index(&self, index: bool) -> &Self::Output {
        self.0.index(index as u8 as usize)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write as _;
        for bit in *self {
            f.write_char(if bit { '1' } else { '0' })?;
        }
        Ok(())
    }
}

fn get_path(start: State, end: State) -> Path {
    let empty = Path { path: 0, len: 0 };
    let mut possible_paths = VecDeque::from([(empty, start)]);

    while let Some((cur_path, cur_end)) = possible_paths.pop_front() {
        if cur_path.len > 0 && cur_end == end {
            return cur_path;
        }
        for tms in [false, true] {
            possible_paths.push_back((cur_path.push(tms), GRAPH[cur_end][tms]));
        }
    }

    // the TAP graph is strongly connected
    unreachable!("no path from {start:?} to {end:?}")
}

impl IntoIterator for Path {
    type Item = bool;
    type IntoIter = PathIter;
    fn into_iter(self) -> Self::IntoIter {
        PathIter(self, 0)
    }
}

pub struct PathIter(Path, u8);
impl Iterator for PathIter {
    type Item = bool;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.1;
        self.1 = self.1.saturating_add(1);
        if idx < self.0.len {
            Some(self.0.path >> (self.0.len - idx - 1) & 1 == 1)
        } else {
            None
        }
    }
}
