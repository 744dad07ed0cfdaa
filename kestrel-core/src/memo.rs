// Canonicalizing construction: symbol/keyword interning and memoized
// numeric/character constructors. Everything here is owned by one Runtime,
// so two runtimes never share instances.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use num_complex::Complex64;

use crate::value::{Keyword, Symbol, Value};

// RUST CONCEPT: A generic memo table
// K is whatever the constructor was called with, V is the built instance.
// V: Clone because callers get their own handle (an Rc clone) back.
pub struct Memo<K, V> {
    table: HashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.table.get(key).cloned()
    }

    /// Returns the cached instance for `key`, building it on the first call.
    pub fn get_or_build(&mut self, key: K, build: impl FnOnce(&K) -> V) -> V {
        if let Some(existing) = self.table.get(&key) {
            return existing.clone();
        }
        let value = build(&key);
        self.table.insert(key, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for Memo<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// Symbol and keyword pools. The readable and unreadable pools are separate:
// the same text in both yields two different symbols.
#[derive(Default)]
pub struct Interner {
    readable: Memo<String, Symbol>,
    unreadable: Memo<String, Symbol>,
    keywords: Memo<String, Keyword>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(&mut self, text: &str) -> Symbol {
        // Lookup by &str first so the common hit path does not allocate
        if let Some(existing) = self.readable.get(text) {
            return existing;
        }
        self.readable
            .get_or_build(text.to_string(), |name| Symbol::new(name, false))
    }

    pub fn unreadable_symbol(&mut self, text: &str) -> Symbol {
        if let Some(existing) = self.unreadable.get(text) {
            return existing;
        }
        self.unreadable
            .get_or_build(text.to_string(), |name| Symbol::new(name, true))
    }

    pub fn keyword(&mut self, text: &str) -> Keyword {
        if let Some(existing) = self.keywords.get(text) {
            return existing;
        }
        self.keywords
            .get_or_build(text.to_string(), |name| Keyword::new(name))
    }

    pub fn symbol_count(&self) -> usize {
        self.readable.len() + self.unreadable.len()
    }
}

// Memoized constructors for the small immutable numerics. Flonums and
// complexes are keyed by their bit patterns so -0.0 and 0.0 (and every
// NaN payload) stay distinct, exactly like eqv? sees them.
#[derive(Default)]
pub struct ConstructorCache {
    fixnums: Memo<i64, Value>,
    flonums: Memo<u64, Value>,
    chars: Memo<char, Value>,
    complexes: Memo<(u64, u64), Value>,
}

impl ConstructorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixnum(&mut self, n: i64) -> Value {
        self.fixnums.get_or_build(n, |&n| Value::fixnum(n))
    }

    pub fn flonum(&mut self, f: f64) -> Value {
        self.flonums
            .get_or_build(f.to_bits(), |&bits| Value::flonum(f64::from_bits(bits)))
    }

    pub fn char(&mut self, c: char) -> Value {
        self.chars.get_or_build(c, |&c| Value::char(c))
    }

    pub fn complex(&mut self, re: f64, im: f64) -> Value {
        self.complexes
            .get_or_build((re.to_bits(), im.to_bits()), |&(re, im)| {
                Value::complex(Complex64::new(f64::from_bits(re), f64::from_bits(im)))
            })
    }

    pub fn len(&self) -> usize {
        self.fixnums.len() + self.flonums.len() + self.chars.len() + self.complexes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_builds_once() {
        let mut memo: Memo<u32, std::rc::Rc<u32>> = Memo::new();
        let mut builds = 0;
        let a = memo.get_or_build(7, |&k| {
            builds += 1;
            std::rc::Rc::new(k)
        });
        let b = memo.get_or_build(7, |&k| {
            builds += 1;
            std::rc::Rc::new(k)
        });
        assert!(std::rc::Rc::ptr_eq(&a, &b));
        assert_eq!(builds, 1);
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_symbol_pools_are_separate() {
        let mut interner = Interner::new();
        let a = interner.symbol("foo");
        let b = interner.symbol("foo");
        let hidden = interner.unreadable_symbol("foo");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&hidden));
        assert!(hidden.is_unreadable());
        assert_eq!(interner.symbol_count(), 2);
    }

    #[test]
    fn test_keywords_interned() {
        let mut interner = Interner::new();
        let a = interner.keyword("size");
        let b = interner.keyword("size");
        assert!(a.ptr_eq(&b));
        assert_eq!(a.name(), "size");
    }

    #[test]
    fn test_memoized_numerics_are_identical() {
        let mut cache = ConstructorCache::new();
        let a = cache.fixnum(5);
        let b = cache.fixnum(5);
        assert!(a.ptr_eq(&b), "Expected identical fixnums, got {:?} and {:?}", a, b);

        let x = cache.flonum(1.5);
        let y = cache.flonum(1.5);
        assert!(x.ptr_eq(&y));

        let pos = cache.flonum(0.0);
        let neg = cache.flonum(-0.0);
        assert!(!pos.ptr_eq(&neg));

        let c1 = cache.char('λ');
        let c2 = cache.char('λ');
        assert!(c1.ptr_eq(&c2));

        let z1 = cache.complex(1.0, 2.0);
        let z2 = cache.complex(1.0, 2.0);
        assert!(z1.ptr_eq(&z2));
        assert_eq!(cache.len(), 6);
    }
}
