//! Entry filters for range cursors.
//!
//! A filter has two roles. [`EntryFilter::accept`] decides whether a visited
//! entry is surfaced at all; rejected entries are not returned, do not count
//! against the cursor's capacity and are never deleted. [`EntryFilter::resolve`]
//! transforms the value of an accepted entry before the caller sees it.

/// Predicate and value transform applied to every entry a cursor visits
pub trait EntryFilter {
    /// Whether the entry is surfaced (and, with `DELETE`, removed)
    fn accept(&self, key: &[u8], value: &[u8]) -> bool {
        let _ = (key, value);
        true
    }

    /// The value handed to the caller for an accepted entry
    fn resolve(&self, key: &[u8], value: &[u8]) -> Vec<u8> {
        let _ = key;
        value.to_vec()
    }
}

/// Accepts every entry and returns values unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl EntryFilter for AcceptAll {}

type AcceptFn<'a> = Box<dyn Fn(&[u8], &[u8]) -> bool + 'a>;
type ResolveFn<'a> = Box<dyn Fn(&[u8], &[u8]) -> Vec<u8> + 'a>;

/// Filter assembled from closures.
///
/// ```rust,ignore
/// let filter = FnFilter::new()
///     .with_accept(|key, _| key.starts_with(b"user/"))
///     .with_resolve(|_, value| value[..4].to_vec());
/// ```
#[derive(Default)]
pub struct FnFilter<'a> {
    accept: Option<AcceptFn<'a>>,
    resolve: Option<ResolveFn<'a>>,
}

impl<'a> FnFilter<'a> {
    /// Create a filter that accepts everything and resolves to the stored value
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the predicate
    pub fn with_accept(mut self, accept: impl Fn(&[u8], &[u8]) -> bool + 'a) -> Self {
        self.accept = Some(Box::new(accept));
        self
    }

    /// Set the value transform
    pub fn with_resolve(mut self, resolve: impl Fn(&[u8], &[u8]) -> Vec<u8> + 'a) -> Self {
        self.resolve = Some(Box::new(resolve));
        self
    }

    /// Box the filter for a cursor
    pub fn boxed(self) -> Box<dyn EntryFilter + 'a> {
        Box::new(self)
    }
}

impl EntryFilter for FnFilter<'_> {
    fn accept(&self, key: &[u8], value: &[u8]) -> bool {
        self.accept.as_ref().map_or(true, |accept| accept(key, value))
    }

    fn resolve(&self, key: &[u8], value: &[u8]) -> Vec<u8> {
        match &self.resolve {
            Some(resolve) => resolve(key, value),
            None => value.to_vec(),
        }
    }
}

impl<F: EntryFilter + ?Sized> EntryFilter for Box<F> {
    fn accept(&self, key: &[u8], value: &[u8]) -> bool {
        (**self).accept(key, value)
    }

    fn resolve(&self, key: &[u8], value: &[u8]) -> Vec<u8> {
        (**self).resolve(key, value)
    }
}

impl<F: EntryFilter + ?Sized> EntryFilter for &F {
    fn accept(&self, key: &[u8], value: &[u8]) -> bool {
        (**self).accept(key, value)
    }

    fn resolve(&self, key: &[u8], value: &[u8]) -> Vec<u8> {
        (**self).resolve(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_is_identity() {
        assert!(AcceptAll.accept(b"k", b"v"));
        assert_eq!(AcceptAll.resolve(b"k", b"v"), b"v".to_vec());
    }

    #[test]
    fn test_fn_filter() {
        let filter = FnFilter::new()
            .with_accept(|key, _| key.starts_with(b"a"))
            .with_resolve(|key, value| [key, value].concat());

        assert!(filter.accept(b"ab", b""));
        assert!(!filter.accept(b"ba", b""));
        assert_eq!(filter.resolve(b"k", b"v"), b"kv".to_vec());
    }

    #[test]
    fn test_fn_filter_borrows_state() {
        let banned = vec![b"b".to_vec()];
        let filter = FnFilter::new().with_accept(|key, _| !banned.iter().any(|b| b == key));
        let boxed: Box<dyn EntryFilter + '_> = filter.boxed();

        assert!(boxed.accept(b"a", b""));
        assert!(!boxed.accept(b"b", b""));
        assert_eq!(boxed.resolve(b"a", b"1"), b"1".to_vec());
    }
}
