// Weak references over std::rc::Weak.
//
// Reduced fidelity: reference counting never reclaims cycles, so a weakly
// held value that sits in a cycle stays alive. Immediates and other values
// with no heap payload worth tracking are held strongly.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::equal;
use crate::value::{BoxValue, Closure, MPair, MString, Pair, Value, Vector};

// RUST CONCEPT: Downgrading a closed enum
// Each trackable heap variant keeps a Weak to the same payload; upgrade()
// rebuilds the Value if the payload is still alive.
#[derive(Clone)]
pub enum WeakValue {
    Strong(Value),
    Pair(Weak<Pair>),
    MPair(Weak<MPair>),
    Vector(Weak<Vector>),
    Box(Weak<BoxValue>),
    String(Weak<MString>),
    Closure(Weak<Closure>),
}

impl WeakValue {
    pub fn new(value: &Value) -> Self {
        match value {
            Value::Pair(p) => WeakValue::Pair(Rc::downgrade(p)),
            Value::MPair(p) => WeakValue::MPair(Rc::downgrade(p)),
            Value::Vector(v) => WeakValue::Vector(Rc::downgrade(v)),
            Value::Box(b) => WeakValue::Box(Rc::downgrade(b)),
            Value::String(s) => WeakValue::String(Rc::downgrade(s)),
            Value::Closure(c) => WeakValue::Closure(Rc::downgrade(c)),
            other => WeakValue::Strong(other.clone()),
        }
    }

    pub fn upgrade(&self) -> Option<Value> {
        match self {
            WeakValue::Strong(v) => Some(v.clone()),
            WeakValue::Pair(w) => w.upgrade().map(Value::Pair),
            WeakValue::MPair(w) => w.upgrade().map(Value::MPair),
            WeakValue::Vector(w) => w.upgrade().map(Value::Vector),
            WeakValue::Box(w) => w.upgrade().map(Value::Box),
            WeakValue::String(w) => w.upgrade().map(Value::String),
            WeakValue::Closure(w) => w.upgrade().map(Value::Closure),
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            WeakValue::Strong(_) => true,
            WeakValue::Pair(w) => w.strong_count() > 0,
            WeakValue::MPair(w) => w.strong_count() > 0,
            WeakValue::Vector(w) => w.strong_count() > 0,
            WeakValue::Box(w) => w.strong_count() > 0,
            WeakValue::String(w) => w.strong_count() > 0,
            WeakValue::Closure(w) => w.strong_count() > 0,
        }
    }
}

pub struct WeakBox {
    target: WeakValue,
}

impl WeakBox {
    pub fn new(value: &Value) -> Self {
        Self {
            target: WeakValue::new(value),
        }
    }

    pub fn get(&self) -> Option<Value> {
        self.target.upgrade()
    }
}

// The value is kept only while the key is alive; it is dropped the first
// time a read notices the key is gone.
pub struct Ephemeron {
    key: WeakValue,
    value: RefCell<Option<Value>>,
}

impl Ephemeron {
    pub fn new(key: &Value, value: Value) -> Self {
        Self {
            key: WeakValue::new(key),
            value: RefCell::new(Some(value)),
        }
    }

    pub fn get(&self) -> Option<Value> {
        if self.key.is_live() {
            self.value.borrow().clone()
        } else {
            self.value.borrow_mut().take();
            None
        }
    }
}

/// eq?-keyed table whose keys do not keep entries alive.
#[derive(Default)]
pub struct WeakKeyTable {
    entries: RefCell<Vec<(WeakValue, Value)>>,
}

impl WeakKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(&self) {
        self.entries.borrow_mut().retain(|(k, _)| k.is_live());
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.purge();
        self.entries
            .borrow()
            .iter()
            .find(|(k, _)| k.upgrade().is_some_and(|live| equal::eq(&live, key)))
            .map(|(_, v)| v.clone())
    }

    pub fn set(&mut self, key: &Value, value: Value) {
        self.purge();
        let mut entries = self.entries.borrow_mut();
        for (k, v) in entries.iter_mut() {
            if k.upgrade().is_some_and(|live| equal::eq(&live, key)) {
                *v = value;
                return;
            }
        }
        entries.push((WeakValue::new(key), value));
    }

    pub fn len(&self) -> usize {
        self.purge();
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.purge();
        self.entries
            .borrow()
            .iter()
            .filter_map(|(k, v)| k.upgrade().map(|k| (k, v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_box_follows_liveness() {
        let target = Value::cons(Value::fixnum(1), Value::Null);
        let weak = WeakBox::new(&target);
        assert!(weak.get().is_some());
        drop(target);
        assert!(weak.get().is_none());
    }

    #[test]
    fn test_immediates_are_strong() {
        let weak = WeakBox::new(&Value::fixnum(42));
        assert_eq!(weak.get().and_then(|v| v.as_fixnum()), Some(42));
    }

    #[test]
    fn test_ephemeron_drops_value_with_key() {
        let key = Value::string("k");
        let eph = Ephemeron::new(&key, Value::fixnum(1));
        assert_eq!(eph.get().and_then(|v| v.as_fixnum()), Some(1));
        drop(key);
        assert!(eph.get().is_none());
    }

    #[test]
    fn test_weak_table_forgets_dead_keys() {
        let mut table = WeakKeyTable::new();
        let a = Value::new_box(Value::Void, false);
        let b = Value::new_box(Value::Void, false);
        table.set(&a, Value::fixnum(1));
        table.set(&b, Value::fixnum(2));
        table.set(&a, Value::fixnum(3));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a).and_then(|v| v.as_fixnum()), Some(3));
        drop(b);
        assert_eq!(table.len(), 1);
    }
}
