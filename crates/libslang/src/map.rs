//! Ordered map with duplicate-definition validation.
//!
//! `SlangHashMap` wraps [`IndexMap`] to keep insertion order (field order of a
//! struct, argument order of a macro branch) and remembers the source span of
//! every value so a duplicate insertion reports both definition sites.

use std::{hash::Hash, marker::PhantomData};

use indexmap::{Equivalent, IndexMap};

use crate::{
    error::CompileError,
    nom_tools::{Span, ToRange},
};

/// Values stored in a [`SlangHashMap`] must expose their definition span.
pub trait ValueTrait<'base> {
    /// Returns the span where this value was defined.
    fn get_span(&self) -> Span<'base>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Value<'base, V: ValueTrait<'base>> {
    value: V,
    position: std::ops::Range<usize>,
    marker: PhantomData<&'base ()>,
}

/// An insertion-ordered map that can reject duplicate keys with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlangHashMap<'base, K: Hash + Eq, V: ValueTrait<'base>> {
    map: IndexMap<K, Value<'base, V>>,
}

impl<'base, K, V> Default for SlangHashMap<'base, K, V>
where
    K: Hash + Eq,
    V: ValueTrait<'base>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'base, K, V> SlangHashMap<'base, K, V>
where
    K: Hash + Eq,
    V: ValueTrait<'base>,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    /// Inserts without validation, returning the previous value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let position = value.get_span().to_range();
        self.map
            .insert(
                key,
                Value {
                    value,
                    position,
                    marker: PhantomData,
                },
            )
            .map(|item| item.value)
    }

    /// Inserts a key-value pair, failing if the key is already present.
    ///
    /// The error carries both the new and the original definition positions.
    pub fn validate_insert(&mut self, key: K, value: V) -> Result<(), CompileError> {
        let span = value.get_span();
        let position = span.to_range();

        match self.map.insert(
            key,
            Value {
                value,
                position: position.clone(),
                marker: PhantomData,
            },
        ) {
            Some(old) => Err(CompileError::redefinition(
                span.text.to_string(),
                position,
                old.position,
                span.state.file.clone(),
            )),
            None => Ok(()),
        }
    }

    /// Gets a reference to the value for the key.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.map.get(key).map(|item| &item.value)
    }

    /// Returns true if the map contains the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.map.contains_key(key)
    }

    /// Returns the index of the key in insertion order.
    pub fn get_index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.map.get_index_of(key)
    }

    /// Returns an iterator over the keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + use<'_, 'base, K, V> {
        self.map.keys()
    }

    /// Returns an iterator over the values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> + use<'_, 'base, K, V> {
        self.map.values().map(|item| &item.value)
    }

    /// Returns an iterator over key-value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + use<'_, 'base, K, V> {
        self.map.iter().map(|item| (item.0, &item.1.value))
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::SourceFile, nom_tools::State};

    #[derive(Debug, Clone, PartialEq)]
    struct Entry<'base>(Span<'base>);

    impl<'base> ValueTrait<'base> for Entry<'base> {
        fn get_span(&self) -> Span<'base> {
            self.0.clone()
        }
    }

    fn span(state: &State, text: &'static str, position: std::ops::Range<usize>) -> Span<'static> {
        Span::new(text, position, state.clone())
    }

    #[test]
    fn duplicate_insert_reports_both_positions() {
        let state = State::new(SourceFile::new(vec!["test".into()], "a a".to_string()));
        let mut map = SlangHashMap::new();

        map.validate_insert("a", Entry(span(&state, "a", 0..1))).unwrap();
        let error = map.validate_insert("a", Entry(span(&state, "a", 2..3))).unwrap_err();

        match error {
            CompileError::Redefinition(inner) => {
                assert_eq!(inner.previous_position, 0..1);
                assert_eq!(inner.position, 2..3);
            }
            other => panic!("expected redefinition error, got {other:?}"),
        }
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let state = State::new(SourceFile::new(vec!["test".into()], "x y z".to_string()));
        let mut map = SlangHashMap::new();
        map.validate_insert("x", Entry(span(&state, "x", 0..1))).unwrap();
        map.validate_insert("y", Entry(span(&state, "y", 2..3))).unwrap();
        map.validate_insert("z", Entry(span(&state, "z", 4..5))).unwrap();

        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
        assert_eq!(map.get_index_of("y"), Some(1));
    }
}
