//! Binary heap over a plain `Vec`, ordered by a caller-supplied closure.
//!
//! The ordering lives in a closure rather than an `Ord` impl: `below(a, b)`
//! returns true when `a` must sit lower in the heap than `b`. The root is the
//! element no other element sits above.

/// Restores the heap property for the subtree rooted at `root`, considering
/// only `heap[..len]`.
pub(crate) fn heap_sift_down<T, F>(heap: &mut [T], mut root: usize, len: usize, below: &F)
where
    F: Fn(&T, &T) -> bool,
{
    loop {
        let left = 2 * root + 1;
        if left >= len {
            return;
        }
        let right = left + 1;
        let mut top = left;
        if right < len && below(&heap[left], &heap[right]) {
            top = right;
        }
        if !below(&heap[root], &heap[top]) {
            return;
        }
        heap.swap(root, top);
        root = top;
    }
}

/// Turns `heap` into a heap in O(n).
pub(crate) fn heap_make<T, F>(heap: &mut [T], below: &F)
where
    F: Fn(&T, &T) -> bool,
{
    let len = heap.len();
    for root in (0..len / 2).rev() {
        heap_sift_down(heap, root, len, below);
    }
}

/// A min-heap of merge entries.
///
/// Not stable on its own: entries `below` considers equal come out in no
/// particular order, so the closure must break ties itself.
pub(crate) struct MergeHeap<T, F> {
    items: Vec<T>,
    below: F,
}

impl<T, F> MergeHeap<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    /// Builds a heap from `items`. `below(a, b)` is true when `a` comes out
    /// after `b`.
    pub(crate) fn new(mut items: Vec<T>, below: F) -> Self {
        heap_make(&mut items, &below);
        Self { items, below }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// The next entry to come out.
    pub(crate) fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Removes the root.
    pub(crate) fn pop(&mut self) -> Option<T> {
        let last = self.items.len().checked_sub(1)?;
        self.items.swap(0, last);
        let top = self.items.pop();
        let len = self.items.len();
        heap_sift_down(&mut self.items, 0, len, &self.below);
        top
    }

    /// Replaces the root with `item` in one sift. Cheaper than pop + push.
    /// Pushes onto an empty heap.
    pub(crate) fn replace_top(&mut self, item: T) -> Option<T> {
        match self.items.first_mut() {
            None => {
                self.items.push(item);
                None
            }
            Some(root) => {
                let old = std::mem::replace(root, item);
                let len = self.items.len();
                heap_sift_down(&mut self.items, 0, len, &self.below);
                Some(old)
            }
        }
    }
}
