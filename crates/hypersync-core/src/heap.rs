//! Binary min-heap with external index tracking.
//!
//! Elements do not know their own position, so the heap reports every
//! position change through [`HeapContext::index_changed`]. Owners keep
//! that index next to the element's state and use it for O(log n)
//! [`IndexedHeap::remove`] and [`IndexedHeap::fix`]. An element leaving
//! the heap is reported with `None`.
//!
//! The context is passed to every mutating call instead of being stored,
//! so the comparison can read state owned by the caller (for example a
//! task table sitting next to the heap in the same struct).

/// Ordering and position bookkeeping for heap elements.
pub trait HeapContext<T> {
    /// Whether `a` must sit closer to the root than `b`.
    fn less(&self, a: &T, b: &T) -> bool;

    /// `item` moved to `index`, or left the heap when `index` is `None`.
    fn index_changed(&mut self, item: &T, index: Option<usize>);
}

/// A [`HeapContext`] built from two closures.
pub struct FnContext<L, F> {
    less: L,
    on_index: F,
}

impl<L, F> FnContext<L, F> {
    /// Combine a comparison and an index callback.
    pub fn new(less: L, on_index: F) -> Self {
        Self { less, on_index }
    }
}

impl<T, L, F> HeapContext<T> for FnContext<L, F>
where
    L: Fn(&T, &T) -> bool,
    F: FnMut(&T, Option<usize>),
{
    fn less(&self, a: &T, b: &T) -> bool {
        (self.less)(a, b)
    }

    fn index_changed(&mut self, item: &T, index: Option<usize>) {
        (self.on_index)(item, index)
    }
}

/// Array-backed binary min-heap.
#[derive(Debug, Clone)]
pub struct IndexedHeap<T> {
    items: Vec<T>,
}

impl<T> Default for IndexedHeap<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> IndexedHeap<T> {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a heap from arbitrary elements, reporting every final index.
    pub fn from_vec<C: HeapContext<T>>(items: Vec<T>, ctx: &mut C) -> Self {
        let mut heap = Self { items };
        for (i, item) in heap.items.iter().enumerate() {
            ctx.index_changed(item, Some(i));
        }
        let n = heap.items.len();
        for i in (0..n / 2).rev() {
            heap.down(i, n, ctx);
        }
        heap
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the heap is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The minimum element.
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Element at a heap position.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Elements in heap (not sorted) order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Insert an element.
    pub fn push<C: HeapContext<T>>(&mut self, item: T, ctx: &mut C) {
        let i = self.items.len();
        self.items.push(item);
        ctx.index_changed(&self.items[i], Some(i));
        self.up(i, ctx);
    }

    /// Remove and return the minimum element.
    pub fn pop<C: HeapContext<T>>(&mut self, ctx: &mut C) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let n = self.items.len() - 1;
        if n > 0 {
            self.swap(0, n, ctx);
            self.down(0, n, ctx);
        }
        let item = self.items.pop()?;
        ctx.index_changed(&item, None);
        Some(item)
    }

    /// Remove and return the element at `index`.
    pub fn remove<C: HeapContext<T>>(&mut self, index: usize, ctx: &mut C) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let n = self.items.len() - 1;
        if n != index {
            self.swap(index, n, ctx);
            if !self.down(index, n, ctx) {
                self.up(index, ctx);
            }
        }
        let item = self.items.pop()?;
        ctx.index_changed(&item, None);
        Some(item)
    }

    /// Restore heap order after the element at `index` changed its key.
    pub fn fix<C: HeapContext<T>>(&mut self, index: usize, ctx: &mut C) {
        if index >= self.items.len() {
            return;
        }
        if !self.down(index, self.items.len(), ctx) {
            self.up(index, ctx);
        }
    }

    fn swap<C: HeapContext<T>>(&mut self, i: usize, j: usize, ctx: &mut C) {
        self.items.swap(i, j);
        ctx.index_changed(&self.items[i], Some(i));
        ctx.index_changed(&self.items[j], Some(j));
    }

    fn up<C: HeapContext<T>>(&mut self, mut j: usize, ctx: &mut C) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !ctx.less(&self.items[j], &self.items[parent]) {
                break;
            }
            self.swap(parent, j, ctx);
            j = parent;
        }
    }

    /// Sift down within `items[..n]`. Returns whether the element moved.
    fn down<C: HeapContext<T>>(&mut self, start: usize, n: usize, ctx: &mut C) -> bool {
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && ctx.less(&self.items[right], &self.items[left]) {
                child = right;
            }
            if !ctx.less(&self.items[child], &self.items[i]) {
                break;
            }
            self.swap(i, child, ctx);
            i = child;
        }
        i > start
    }
}
