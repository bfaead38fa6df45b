//! Lazy-sequence adapters.
//!
//! The whole execution model is pull-based: every step returns a finite,
//! non-restartable iterator, and composition happens by concatenating and
//! deferring those iterators rather than by buffering their elements.

/// A finite, non-restartable concatenation of boxed iterators.
///
/// Exhausts each inner sequence in order with a single forward pass.
/// Once an inner sequence has been drained it is dropped and never
/// rewound.
pub struct Concat<'a, T> {
    sequences: std::vec::IntoIter<Box<dyn Iterator<Item = T> + 'a>>,
    current: Option<Box<dyn Iterator<Item = T> + 'a>>,
}

impl<'a, T> Concat<'a, T> {
    /// Creates a concatenation over the given sequences.
    #[must_use]
    pub fn new(sequences: Vec<Box<dyn Iterator<Item = T> + 'a>>) -> Self {
        Self {
            sequences: sequences.into_iter(),
            current: None,
        }
    }
}

impl<T> Iterator for Concat<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if self.current.is_none() {
                self.current = Some(self.sequences.next()?);
            }
            match self.current.as_mut().and_then(Iterator::next) {
                Some(item) => return Some(item),
                None => self.current = None,
            }
        }
    }
}

/// An iterator whose underlying sequence is built on first pull.
///
/// Defers side effects of sequence construction until a consumer actually
/// asks for an element, which is what keeps composite steps lazy.
pub struct LazyIter<'a, T> {
    thunk: Option<Box<dyn FnOnce() -> Box<dyn Iterator<Item = T> + 'a> + 'a>>,
    inner: Option<Box<dyn Iterator<Item = T> + 'a>>,
}

impl<T> Iterator for LazyIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.inner.is_none() {
            self.inner = Some((self.thunk.take()?)());
        }
        self.inner.as_mut().and_then(Iterator::next)
    }
}

/// Wraps a thunk producing an iterator into a lazily-started iterator.
pub fn lazy<'a, T, F>(thunk: F) -> LazyIter<'a, T>
where
    F: FnOnce() -> Box<dyn Iterator<Item = T> + 'a> + 'a,
{
    LazyIter {
        thunk: Some(Box::new(thunk)),
        inner: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_preserves_order() {
        let concat = Concat::new(vec![
            Box::new(vec![1, 2].into_iter()) as Box<dyn Iterator<Item = i32>>,
            Box::new(std::iter::empty()),
            Box::new(vec![3].into_iter()),
        ]);
        assert_eq!(concat.collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_concat_empty() {
        let mut concat: Concat<'_, i32> = Concat::new(Vec::new());
        assert_eq!(concat.next(), None);
        assert_eq!(concat.next(), None);
    }

    #[test]
    fn test_lazy_defers_construction() {
        let mut built = false;
        {
            let _iter = lazy(|| {
                built = true;
                Box::new(std::iter::once(1)) as Box<dyn Iterator<Item = i32>>
            });
        }
        assert!(!built);

        let mut iter = lazy(|| {
            Box::new(vec![1, 2].into_iter()) as Box<dyn Iterator<Item = i32>>
        });
        assert_eq!(iter.next(), Some(1));
        assert_eq!(iter.next(), Some(2));
        assert_eq!(iter.next(), None);
    }
}
