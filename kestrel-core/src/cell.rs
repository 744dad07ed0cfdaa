// Mutable cells for set!-able variables and global slots.
//
// A cell that holds a fixnum keeps the raw i64, and later fixnum writes
// update it in place. Reads always hand back a boxed Value.

use std::cell::RefCell;

use crate::value::Value;

#[derive(Debug)]
enum Slot {
    Boxed(Value),
    Fixnum(i64),
}

#[derive(Debug)]
pub struct Cell {
    slot: RefCell<Slot>,
}

impl Cell {
    pub fn new(value: Value) -> Self {
        debug_assert!(!matches!(value, Value::Cell(_)), "cells never nest");
        Self {
            slot: RefCell::new(Self::slot_for(value)),
        }
    }

    fn slot_for(value: Value) -> Slot {
        match value {
            Value::Fixnum(n) => Slot::Fixnum(*n),
            other => Slot::Boxed(other),
        }
    }

    pub fn get(&self) -> Value {
        match &*self.slot.borrow() {
            Slot::Boxed(v) => v.clone(),
            Slot::Fixnum(n) => Value::fixnum(*n),
        }
    }

    pub fn set(&self, value: Value) {
        debug_assert!(!matches!(value, Value::Cell(_)), "cells never nest");
        let mut slot = self.slot.borrow_mut();
        if let (Slot::Fixnum(raw), Value::Fixnum(n)) = (&mut *slot, &value) {
            *raw = **n;
            return;
        }
        *slot = Self::slot_for(value);
    }

    pub fn is_unboxed(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Fixnum(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Boxed(Value::Undefined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cell = Cell::new(Value::fixnum(3));
        assert!(cell.is_unboxed());
        cell.set(Value::fixnum(7));
        assert!(matches!(cell.get(), Value::Fixnum(ref n) if **n == 7), "Expected 7, got {:?}", cell.get());
    }

    #[test]
    fn test_switches_representation() {
        let cell = Cell::new(Value::fixnum(1));
        cell.set(Value::string("one"));
        assert!(!cell.is_unboxed());
        assert_eq!(cell.get().display_string(), "one");
        cell.set(Value::fixnum(2));
        assert!(cell.is_unboxed());
        assert_eq!(cell.get().as_fixnum(), Some(2));
    }

    #[test]
    fn test_undefined_slot() {
        let cell = Cell::new(Value::Undefined);
        assert!(cell.is_undefined());
        cell.set(Value::Null);
        assert!(!cell.is_undefined());
    }
}
