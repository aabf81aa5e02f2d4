//! 强类型索引向量：以标识符安全访问顺序容器，删除元素时以 `None` 占位保持标识稳定。
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// 可用作 [`IndexVec`] 下标的标识符类型。
pub trait Idx: Copy + Eq + PartialEq + Ord + fmt::Debug {
    fn index(self) -> usize;
    fn from_usize(idx: usize) -> Self;
}

/// 以强类型标识符为下标的向量。
#[derive(Clone, PartialEq)]
pub struct IndexVec<I, T> {
    data: Vec<T>,
    _marker: PhantomData<I>,
}

impl<I, T> IndexVec<I, T>
where
    I: Idx,
{
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn push(&mut self, value: T) -> I {
        let idx = self.data.len();
        self.data.push(value);
        I::from_usize(idx)
    }

    /// 下一次 `push` 将分配的标识符。
    pub fn next_index(&self) -> I {
        I::from_usize(self.data.len())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(idx, value)| (I::from_usize(idx), value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.data.iter_mut()
    }

    pub fn get(&self, index: I) -> Option<&T> {
        self.data.get(index.index())
    }

    pub fn get_mut(&mut self, index: I) -> Option<&mut T> {
        self.data.get_mut(index.index())
    }

    pub fn resize_with(&mut self, len: usize, f: impl FnMut() -> T) {
        self.data.resize_with(len, f);
    }
}

impl<I, T> IndexVec<I, Option<T>>
where
    I: Idx,
{
    /// 仍持有元素的槽位，跳过墓碑。
    pub fn iter_live(&self) -> impl Iterator<Item = (I, &T)> {
        self.iter_enumerated()
            .filter_map(|(idx, slot)| slot.as_ref().map(|value| (idx, value)))
    }

    pub fn live(&self, index: I) -> Option<&T> {
        self.get(index).and_then(Option::as_ref)
    }

    pub fn live_mut(&mut self, index: I) -> Option<&mut T> {
        self.get_mut(index).and_then(Option::as_mut)
    }

    /// 取出元素并留下墓碑，后续标识符含义不变。
    pub fn take(&mut self, index: I) -> Option<T> {
        self.get_mut(index).and_then(Option::take)
    }

    pub fn live_count(&self) -> usize {
        self.data.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<I, T> Default for IndexVec<I, T>
where
    I: Idx,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, T> fmt::Debug for IndexVec<I, T>
where
    I: Idx,
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}

impl<I, T> Index<I> for IndexVec<I, T>
where
    I: Idx,
{
    type Output = T;

    fn index(&self, index: I) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<I, T> IndexMut<I> for IndexVec<I, T>
where
    I: Idx,
{
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

impl<I, T> From<Vec<T>> for IndexVec<I, T>
where
    I: Idx,
{
    fn from(value: Vec<T>) -> Self {
        Self::from_vec(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ids::PlaceId;

    #[test]
    fn take_leaves_tombstone_and_keeps_ids() {
        let mut vec: IndexVec<PlaceId, Option<&str>> = IndexVec::new();
        let a = vec.push(Some("a"));
        let b = vec.push(Some("b"));
        let c = vec.push(Some("c"));

        assert_eq!(vec.take(b), Some("b"));
        assert_eq!(vec.take(b), None);
        assert_eq!(vec.live_count(), 2);
        assert_eq!(vec.live(c), Some(&"c"));
        assert_eq!(
            vec.iter_live().map(|(id, _)| id).collect::<Vec<_>>(),
            vec![a, c]
        );
        assert_eq!(vec.next_index(), PlaceId::new(3));
    }
}
