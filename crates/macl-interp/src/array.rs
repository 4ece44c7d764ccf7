//! The associative array type and its fat iterator.
//!
//! Arrays map string keys to values in sorted key order and are always
//! handled through a shared [`ArrayPtr`]: assigning an array to another
//! variable aliases the same body, and mutation through any handle is
//! visible through all of them. A revision counter tracks structural
//! changes (a key appearing or disappearing) so that an in-flight
//! iterator can detect that its footing moved and fail deterministically
//! instead of skipping or repeating entries.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use crate::error::{ExecError, ExecResult};
use crate::value::Value;

/// Separator between the components of a multi-dimensional array key.
pub const ARRAY_DIM_SEP: &str = "\u{1c}";

/// Shared, mutable handle to an array body.
pub type ArrayPtr = Rc<RefCell<Array>>;

/// An array body: ordered string-keyed map plus a structural revision.
#[derive(Debug, Default)]
pub struct Array {
    entries: BTreeMap<String, Value>,
    /// Bumped on every structural change. Value updates under an
    /// existing key do not count.
    revision: u64,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the body in a shared handle.
    pub fn into_ptr(self) -> ArrayPtr {
        Rc::new(RefCell::new(self))
    }

    /// Insert or update. Returns `true` if the key was new.
    pub fn insert(&mut self, key: String, value: Value) -> bool {
        let is_new = self.entries.insert(key, value).is_none();
        if is_new {
            self.revision += 1;
        }
        is_new
    }

    /// Look up a key, cloning the stored value.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a key. Returns `true` if it was present.
    pub fn erase(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.revision += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn first_key(&self) -> Option<String> {
        self.entries.keys().next().cloned()
    }

    fn next_key_after(&self, key: &str) -> Option<String> {
        self.entries
            .range::<str, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    // ── Set operations ───────────────────────────────────────────

    /// Union. On a shared key the right operand's value wins.
    pub fn union(&self, other: &Array) -> Array {
        let mut out = Array::new();
        for (k, v) in self.entries() {
            out.insert(k.to_string(), v.clone());
        }
        for (k, v) in other.entries() {
            out.insert(k.to_string(), v.clone());
        }
        out
    }

    /// Keys present here but not in `other`.
    pub fn difference(&self, other: &Array) -> Array {
        let mut out = Array::new();
        for (k, v) in self.entries() {
            if !other.contains_key(k) {
                out.insert(k.to_string(), v.clone());
            }
        }
        out
    }

    /// Keys present in both. Values are taken from `other`.
    pub fn intersection(&self, other: &Array) -> Array {
        let mut out = Array::new();
        for (k, v) in other.entries() {
            if self.contains_key(k) {
                out.insert(k.to_string(), v.clone());
            }
        }
        out
    }

    /// Keys present in exactly one of the two arrays.
    pub fn symmetric_difference(&self, other: &Array) -> Array {
        let mut out = self.difference(other);
        for (k, v) in other.entries() {
            if !self.contains_key(k) {
                out.insert(k.to_string(), v.clone());
            }
        }
        out
    }

    /// Is every key of `self` present in `other`?
    pub fn is_subset_of(&self, other: &Array) -> bool {
        self.keys().all(|k| other.contains_key(k))
    }
}

/// Build one key string from subscript components. Multi-dimensional
/// subscripts join their components with [`ARRAY_DIM_SEP`].
pub fn make_array_key(components: &[Value]) -> ExecResult<String> {
    let mut parts = Vec::with_capacity(components.len());
    for component in components {
        match component {
            Value::Int(n) => parts.push(n.to_string()),
            Value::Str(s) => parts.push(s.clone()),
            _ => return Err(ExecError::BadArrayKey),
        }
    }
    Ok(parts.join(ARRAY_DIM_SEP))
}

/// A fat array iterator: the array handle it walks, the key it will
/// yield next, and the revision of the body it was bound to. Carrying
/// the handle makes the at-end question answerable without any outside
/// context; carrying the revision makes invalidation detectable.
#[derive(Debug, Clone)]
pub struct ArrayIterator {
    array: ArrayPtr,
    cursor: Option<String>,
    revision: u64,
}

impl ArrayIterator {
    /// Bind an iterator to the array's current first key and revision.
    pub fn first(array: ArrayPtr) -> Self {
        let (cursor, revision) = {
            let body = array.borrow();
            (body.first_key(), body.revision())
        };
        Self {
            array,
            cursor,
            revision,
        }
    }

    /// Whether the traversal is exhausted.
    pub fn at_end(&self) -> bool {
        self.cursor.is_none()
    }

    /// Does this iterator walk the same array body as `array`?
    pub fn same_array(&self, array: &ArrayPtr) -> bool {
        Rc::ptr_eq(&self.array, array)
    }

    /// Yield the current key and move to the following one.
    ///
    /// Returns `Ok(None)` once exhausted. Fails if the array has been
    /// structurally modified since the iterator was bound — the cursor
    /// may no longer name a live position, so continuing would skip or
    /// repeat entries.
    pub fn next(&mut self) -> ExecResult<Option<String>> {
        if self.revision != self.array.borrow().revision() {
            return Err(ExecError::InvalidIterator);
        }
        let Some(key) = self.cursor.take() else {
            return Ok(None);
        };
        self.cursor = self.array.borrow().next_key_after(&key);
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArrayPtr {
        let mut a = Array::new();
        a.insert("a".into(), Value::from(1));
        a.insert("b".into(), Value::from(2));
        a.insert("c".into(), Value::from(3));
        a.into_ptr()
    }

    #[test]
    fn test_insert_lookup_erase() {
        let mut a = Array::new();
        assert!(a.insert("k".into(), Value::from(10)));
        assert_eq!(a.lookup("k").unwrap().as_int().unwrap(), 10);
        // Update of an existing key is not an insert
        assert!(!a.insert("k".into(), Value::from(11)));
        assert_eq!(a.lookup("k").unwrap().as_int().unwrap(), 11);
        assert!(a.erase("k"));
        assert!(!a.erase("k"));
        assert!(a.lookup("k").is_none());
        assert_eq!(a.len(), 0);
    }

    #[test]
    fn test_revision_tracks_structure_only() {
        let mut a = Array::new();
        let r0 = a.revision();
        a.insert("k".into(), Value::from(1));
        let r1 = a.revision();
        assert_ne!(r0, r1);
        // Value update: no structural change
        a.insert("k".into(), Value::from(2));
        assert_eq!(a.revision(), r1);
        a.erase("k");
        assert_ne!(a.revision(), r1);
        // Clearing an already-empty array is not a change
        let r2 = a.revision();
        a.clear();
        assert_eq!(a.revision(), r2);
    }

    #[test]
    fn test_aliasing_through_two_handles() {
        let first = sample();
        let second = Rc::clone(&first);
        second.borrow_mut().insert("d".into(), Value::from(4));
        assert_eq!(first.borrow().len(), 4);
        assert_eq!(first.borrow().lookup("d").unwrap().as_int().unwrap(), 4);
    }

    #[test]
    fn test_keys_sorted() {
        let mut a = Array::new();
        a.insert("zebra".into(), Value::Unset);
        a.insert("apple".into(), Value::Unset);
        a.insert("mango".into(), Value::Unset);
        let keys: Vec<_> = a.keys().collect();
        assert_eq!(keys, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_iterator_walks_in_order() {
        let mut it = ArrayIterator::first(sample());
        assert_eq!(it.next().unwrap().as_deref(), Some("a"));
        assert_eq!(it.next().unwrap().as_deref(), Some("b"));
        assert_eq!(it.next().unwrap().as_deref(), Some("c"));
        assert!(it.at_end());
        assert_eq!(it.next().unwrap(), None);
    }

    #[test]
    fn test_iterator_invalidated_by_insert() {
        let arr = sample();
        let mut it = ArrayIterator::first(Rc::clone(&arr));
        assert_eq!(it.next().unwrap().as_deref(), Some("a"));
        arr.borrow_mut().insert("d".into(), Value::from(4));
        assert_eq!(it.next().unwrap_err(), ExecError::InvalidIterator);
    }

    #[test]
    fn test_iterator_invalidated_by_erase() {
        // Two-entry array, erase the entry the cursor sits on
        let mut a = Array::new();
        a.insert("a".into(), Value::from(1));
        a.insert("b".into(), Value::from(2));
        let arr = a.into_ptr();
        let mut it = ArrayIterator::first(Rc::clone(&arr));
        assert_eq!(it.next().unwrap().as_deref(), Some("a"));
        arr.borrow_mut().erase("b");
        assert_eq!(it.next().unwrap_err(), ExecError::InvalidIterator);
    }

    #[test]
    fn test_iterator_value_update_does_not_invalidate() {
        let arr = sample();
        let mut it = ArrayIterator::first(Rc::clone(&arr));
        assert_eq!(it.next().unwrap().as_deref(), Some("a"));
        arr.borrow_mut().insert("b".into(), Value::from(99));
        assert_eq!(it.next().unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_iterator_empty_array() {
        let mut it = ArrayIterator::first(Array::new().into_ptr());
        assert!(it.at_end());
        assert_eq!(it.next().unwrap(), None);
    }

    #[test]
    fn test_same_array() {
        let a = sample();
        let b = sample();
        let it = ArrayIterator::first(Rc::clone(&a));
        assert!(it.same_array(&a));
        assert!(!it.same_array(&b));
    }

    #[test]
    fn test_union_right_wins() {
        let mut left = Array::new();
        left.insert("a".into(), Value::from(1));
        left.insert("b".into(), Value::from(2));
        let mut right = Array::new();
        right.insert("b".into(), Value::from(20));
        right.insert("c".into(), Value::from(30));
        let u = left.union(&right);
        assert_eq!(u.len(), 3);
        assert_eq!(u.lookup("b").unwrap().as_int().unwrap(), 20);
    }

    #[test]
    fn test_difference_and_symmetric_difference() {
        let mut left = Array::new();
        left.insert("a".into(), Value::from(1));
        left.insert("b".into(), Value::from(2));
        let mut right = Array::new();
        right.insert("b".into(), Value::from(20));
        right.insert("c".into(), Value::from(30));

        let d = left.difference(&right);
        assert_eq!(d.keys().collect::<Vec<_>>(), vec!["a"]);

        let s = left.symmetric_difference(&right);
        assert_eq!(s.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_intersection_takes_right_values() {
        let mut left = Array::new();
        left.insert("a".into(), Value::from(1));
        left.insert("b".into(), Value::from(2));
        let mut right = Array::new();
        right.insert("b".into(), Value::from(20));
        right.insert("c".into(), Value::from(30));
        let i = left.intersection(&right);
        assert_eq!(i.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(i.lookup("b").unwrap().as_int().unwrap(), 20);
    }

    #[test]
    fn test_subset() {
        let mut small = Array::new();
        small.insert("a".into(), Value::Unset);
        let mut big = Array::new();
        big.insert("a".into(), Value::from(1));
        big.insert("b".into(), Value::from(2));
        assert!(small.is_subset_of(&big));
        assert!(!big.is_subset_of(&small));
        assert!(Array::new().is_subset_of(&small));
    }

    #[test]
    fn test_make_array_key() {
        let key = make_array_key(&[Value::from(3), Value::from("x")]).unwrap();
        assert_eq!(key, format!("3{ARRAY_DIM_SEP}x"));
        assert_eq!(make_array_key(&[Value::from("solo")]).unwrap(), "solo");
        assert_eq!(
            make_array_key(&[Value::Unset]).unwrap_err(),
            ExecError::BadArrayKey
        );
    }
}
