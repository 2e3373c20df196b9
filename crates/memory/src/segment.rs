//! Append-only storage split into shared segments.
//!
//! Cloning a [`Segmented`] copies only the segment pointers. Appends go into
//! the last segment while it is uniquely owned and start a new one once a
//! clone shares it, so a snapshot taken before a write never sees the write.

use std::sync::Arc;

#[derive(Debug)]
pub struct Segmented<T> {
    segments: Vec<Arc<Vec<T>>>,
    /// Position of each segment's first element
    starts: Vec<usize>,
    len: usize,
}

impl<T> Clone for Segmented<T> {
    fn clone(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            starts: self.starts.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for Segmented<T> {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            starts: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Segmented<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        if items.is_empty() {
            return Self::new();
        }
        Self {
            len: items.len(),
            segments: vec![Arc::new(items)],
            starts: vec![0],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segment and offset holding element `index`.
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.len {
            return None;
        }
        let segment = self.starts.partition_point(|&start| start <= index).checked_sub(1)?;
        Some((segment, index - self.starts[segment]))
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        let (segment, offset) = self.locate(index)?;
        self.segments[segment].get(offset)
    }

    /// `len` contiguous elements from `start`, if they sit in one segment.
    pub fn slice(&self, start: usize, len: usize) -> Option<&[T]> {
        let (segment, offset) = self.locate(start)?;
        self.segments[segment].get(offset..offset + len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.segments.iter().flat_map(|segment| segment.iter())
    }

    pub fn segments(&self) -> impl Iterator<Item = &[T]> {
        self.segments.iter().map(|segment| segment.as_slice())
    }

    /// Elements from position `from` to the end.
    pub fn tail(&self, from: usize) -> impl Iterator<Item = &T> {
        self.iter().skip(from)
    }
}

impl<T: Clone> Segmented<T> {
    pub fn push(&mut self, item: T) {
        self.extend_from_slice(std::slice::from_ref(&item));
    }

    pub fn extend_from_slice(&mut self, items: &[T]) {
        if items.is_empty() {
            return;
        }
        match self.segments.last_mut().and_then(Arc::get_mut) {
            Some(owned) => owned.extend_from_slice(items),
            None => {
                self.starts.push(self.len);
                self.segments.push(Arc::new(items.to_vec()));
            }
        }
        self.len += items.len();
    }

    /// Keep only the first `len` elements.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        while self.starts.last().is_some_and(|&start| start >= len) {
            self.starts.pop();
            self.segments.pop();
        }
        if let (Some(&start), Some(last)) = (self.starts.last(), self.segments.last_mut()) {
            Arc::make_mut(last).truncate(len - start);
        }
        self.len = len;
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_after_a_clone_start_a_new_segment() {
        let mut items = Segmented::from_vec(vec![1, 2, 3]);
        items.push(4);
        assert_eq!(items.segment_count(), 1);

        let before = items.clone();
        items.extend_from_slice(&[5, 6]);
        items.push(7);
        assert_eq!(items.segment_count(), 2);
        assert_eq!(before.len(), 4);
        assert_eq!(items.to_vec(), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(items.get(4), Some(&5));
        assert_eq!(items.get(7), None);
    }

    #[test]
    fn slices_stay_within_a_segment() {
        let mut items = Segmented::from_vec(vec![0.0f32; 4]);
        let shared = items.clone();
        items.extend_from_slice(&[1.0, 1.0]);
        assert_eq!(items.slice(4, 2), Some(&[1.0, 1.0][..]));
        assert_eq!(items.slice(2, 2), Some(&[0.0, 0.0][..]));
        assert_eq!(items.slice(3, 2), None);
        drop(shared);
    }

    #[test]
    fn truncate_drops_whole_and_partial_segments() {
        let mut items = Segmented::from_vec(vec![1, 2]);
        let _shared = items.clone();
        items.extend_from_slice(&[3, 4]);
        let _shared = items.clone();
        items.extend_from_slice(&[5, 6]);

        items.truncate(3);
        assert_eq!(items.to_vec(), vec![1, 2, 3]);
        assert_eq!(items.segment_count(), 2);
        items.push(9);
        assert_eq!(items.tail(2).copied().collect::<Vec<_>>(), vec![3, 9]);
    }
}
