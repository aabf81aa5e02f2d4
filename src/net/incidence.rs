//! 库所 × 迁移邻接矩阵：每个单元至多记录一条弧（输入矩阵与输出矩阵各一份）。
use std::fmt;

use smallvec::SmallVec;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};

type SmallRow<T> = SmallVec<[T; 4]>;

#[derive(Clone, PartialEq)]
pub struct Incidence<T> {
    rows: IndexVec<PlaceId, SmallRow<T>>,
    cols: usize,
}

impl<T> Incidence<T>
where
    T: Clone,
{
    pub fn new(places: usize, transitions: usize, default: T) -> Self {
        let mut rows = IndexVec::new();
        for _ in 0..places {
            rows.push(SmallRow::from_elem(default.clone(), transitions));
        }
        Self {
            rows,
            cols: transitions,
        }
    }

    pub fn push_place_with_default(&mut self, default: T) -> PlaceId {
        let mut row = SmallRow::new();
        row.resize(self.cols, default);
        self.rows.push(row)
    }

    pub fn push_transition_with_default(&mut self, default: T) -> TransitionId {
        let next = self.cols;
        for row in self.rows.iter_mut() {
            row.push(default.clone());
        }
        self.cols += 1;
        TransitionId::from_usize(next)
    }

    pub fn places(&self) -> usize {
        self.rows.len()
    }

    pub fn transitions(&self) -> usize {
        self.cols
    }

    pub fn set(&mut self, place: PlaceId, transition: TransitionId, value: T) {
        self.rows[place][transition.index()] = value;
    }

    pub fn get(&self, place: PlaceId, transition: TransitionId) -> &T {
        &self.rows[place][transition.index()]
    }

    /// 某个变迁对应的单元格，按库所升序。
    pub fn column(&self, transition: TransitionId) -> impl Iterator<Item = (PlaceId, &T)> {
        let col = transition.index();
        self.rows
            .iter_enumerated()
            .map(move |(place, row)| (place, &row[col]))
    }

    pub fn row(&self, place: PlaceId) -> impl Iterator<Item = (TransitionId, &T)> {
        self.rows[place]
            .iter()
            .enumerate()
            .map(|(idx, value)| (TransitionId::from_usize(idx), value))
    }

    pub fn fill_row(&mut self, place: PlaceId, value: T) {
        for cell in self.rows[place].iter_mut() {
            *cell = value.clone();
        }
    }

    pub fn fill_column(&mut self, transition: TransitionId, value: T) {
        let col = transition.index();
        for row in self.rows.iter_mut() {
            row[col] = value.clone();
        }
    }
}

impl<T> fmt::Debug for Incidence<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incidence")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growing_keeps_matrix_rectangular() {
        let mut matrix: Incidence<Option<u8>> = Incidence::new(1, 1, None);
        let p1 = matrix.push_place_with_default(None);
        let t1 = matrix.push_transition_with_default(None);
        matrix.set(p1, t1, Some(9));

        assert_eq!(matrix.places(), 2);
        assert_eq!(matrix.transitions(), 2);
        assert_eq!(*matrix.get(p1, t1), Some(9));
        assert_eq!(
            matrix
                .column(t1)
                .filter_map(|(p, cell)| cell.map(|v| (p, v)))
                .collect::<Vec<_>>(),
            vec![(p1, 9)]
        );

        matrix.fill_column(t1, None);
        assert!(matrix.row(p1).all(|(_, cell)| cell.is_none()));
    }
}
