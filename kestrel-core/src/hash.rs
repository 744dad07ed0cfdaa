// Hash tables under the eq?, eqv? and equal? policies.
//
// eq and eqv tables are native hash maps keyed by wrappers that implement
// the right equality. equal tables are an ordered entry list scanned by a
// continuation-passing loop, because comparing two keys may have to call a
// proxy handler.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::cont::{Cont, ContKind, Values};
use crate::equal::{self, equal_hash, equal_sync};
use crate::error::RuntimeError;
use crate::interpreter::Step;
use crate::value::{Aggregate, Value};
use crate::weak::WeakKeyTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Eq,
    Eqv,
    Equal,
    WeakEq,
}

impl HashKind {
    // Printed after '#'
    pub fn prefix(&self) -> &'static str {
        match self {
            HashKind::Eq | HashKind::WeakEq => "hasheq",
            HashKind::Eqv => "hasheqv",
            HashKind::Equal => "hash",
        }
    }
}

fn hash_identity<H: Hasher>(v: &Value, state: &mut H) {
    match v.heap_addr() {
        Some(addr) => addr.hash(state),
        None => {
            std::mem::discriminant(v).hash(state);
            if let Value::Bool(b) = v {
                b.hash(state);
            }
        }
    }
}

// RUST CONCEPT: Newtype keys
// Wrapping Value lets each table pick its own Eq/Hash without Value itself
// committing to one notion of equality.
#[derive(Clone)]
pub struct EqKey(pub Value);

impl PartialEq for EqKey {
    fn eq(&self, other: &Self) -> bool {
        equal::eq(&self.0, &other.0)
    }
}

impl Eq for EqKey {}

impl Hash for EqKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Fixnum(n) => (0u8, **n).hash(state),
            Value::Char(c) => (1u8, **c).hash(state),
            other => {
                2u8.hash(state);
                hash_identity(other, state);
            }
        }
    }
}

#[derive(Clone)]
pub struct EqvKey(pub Value);

impl PartialEq for EqvKey {
    fn eq(&self, other: &Self) -> bool {
        equal::eqv(&self.0, &other.0)
    }
}

impl Eq for EqvKey {}

fn canonical_bits(f: f64) -> u64 {
    if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() }
}

impl Hash for EqvKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Fixnum(n) => (0u8, **n).hash(state),
            Value::Char(c) => (1u8, **c).hash(state),
            Value::Bignum(n) => (3u8, &**n).hash(state),
            Value::Flonum(f) => (4u8, canonical_bits(**f)).hash(state),
            Value::Rational(r) => (5u8, &**r).hash(state),
            Value::Complex(z) => (6u8, canonical_bits(z.re), canonical_bits(z.im)).hash(state),
            other => {
                2u8.hash(state);
                hash_identity(other, state);
            }
        }
    }
}

/// What a lookup does when the key is absent.
#[derive(Clone)]
pub enum MissPolicy {
    Fail,
    Default(Value),
    // call this thunk in tail position
    Thunk(Value),
    // deliver zero values
    Report,
}

impl MissPolicy {
    fn apply(self, key: &Value, cont: Cont) -> Result<Step, RuntimeError> {
        match self {
            MissPolicy::Fail => Err(RuntimeError::User(format!(
                "hash-ref: no value found for key\n  key: {}",
                key
            ))),
            MissPolicy::Default(v) => Ok(Step::plug1(v, cont)),
            MissPolicy::Thunk(f) => Ok(Step::Apply {
                callee: f,
                args: Vec::new(),
                cont,
            }),
            MissPolicy::Report => Ok(Step::Plug {
                vals: Values::none(),
                cont,
            }),
        }
    }
}

struct EqualEntry {
    key: Value,
    value: Value,
    // structural hash of an immutable, proxy-free key
    hash: Option<u64>,
}

enum Store {
    Eq(HashMap<EqKey, Value>),
    Eqv(HashMap<EqvKey, Value>),
    Equal(Vec<EqualEntry>),
    Weak(WeakKeyTable),
}

pub struct HashTable {
    kind: HashKind,
    store: RefCell<Store>,
}

impl HashTable {
    pub fn new(kind: HashKind) -> Self {
        let store = match kind {
            HashKind::Eq => Store::Eq(HashMap::new()),
            HashKind::Eqv => Store::Eqv(HashMap::new()),
            HashKind::Equal => Store::Equal(Vec::new()),
            HashKind::WeakEq => Store::Weak(WeakKeyTable::new()),
        };
        Self {
            kind,
            store: RefCell::new(store),
        }
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        match &*self.store.borrow() {
            Store::Eq(map) => map.len(),
            Store::Eqv(map) => map.len(),
            Store::Equal(entries) => entries.len(),
            Store::Weak(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live entries. Equal tables keep insertion order.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        match &*self.store.borrow() {
            Store::Eq(map) => map.iter().map(|(k, v)| (k.0.clone(), v.clone())).collect(),
            Store::Eqv(map) => map.iter().map(|(k, v)| (k.0.clone(), v.clone())).collect(),
            Store::Equal(entries) => entries
                .iter()
                .map(|e| (e.key.clone(), e.value.clone()))
                .collect(),
            Store::Weak(table) => table.entries(),
        }
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    // Some(answer) when no scan is needed
    fn native_get(&self, key: &Value) -> Option<Option<Value>> {
        match &*self.store.borrow() {
            Store::Eq(map) => Some(map.get(&EqKey(key.clone())).cloned()),
            Store::Eqv(map) => Some(map.get(&EqvKey(key.clone())).cloned()),
            Store::Weak(table) => Some(table.get(key)),
            Store::Equal(_) => None,
        }
    }

    // true when handled without a scan
    fn native_set(&self, key: &Value, value: &Value) -> bool {
        match &mut *self.store.borrow_mut() {
            Store::Eq(map) => {
                map.insert(EqKey(key.clone()), value.clone());
                true
            }
            Store::Eqv(map) => {
                map.insert(EqvKey(key.clone()), value.clone());
                true
            }
            Store::Weak(table) => {
                table.set(key, value.clone());
                true
            }
            Store::Equal(_) => false,
        }
    }

    // (key, stored hash) of entry `index` in an equal table
    fn equal_entry(&self, index: usize) -> Option<(Value, Option<u64>)> {
        match &*self.store.borrow() {
            Store::Equal(entries) => entries.get(index).map(|e| (e.key.clone(), e.hash)),
            _ => None,
        }
    }

    fn equal_value(&self, index: usize) -> Option<Value> {
        match &*self.store.borrow() {
            Store::Equal(entries) => entries.get(index).map(|e| e.value.clone()),
            _ => None,
        }
    }

    fn equal_replace(&self, index: usize, value: Value) -> bool {
        match &mut *self.store.borrow_mut() {
            Store::Equal(entries) => match entries.get_mut(index) {
                Some(entry) => {
                    entry.value = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    fn equal_append(&self, key: Value, value: Value, hash: Option<u64>) {
        if let Store::Equal(entries) = &mut *self.store.borrow_mut() {
            entries.push(EqualEntry { key, value, hash });
        }
    }
}

impl Aggregate for HashTable {
    fn element_count(&self) -> usize {
        self.len()
    }

    fn is_immutable(&self) -> bool {
        false
    }
}

/// Looks `key` up and delivers the value, or applies `miss`.
pub fn ref_step(
    table: &Rc<HashTable>,
    key: Value,
    miss: MissPolicy,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    match table.native_get(&key) {
        Some(Some(value)) => Ok(Step::plug1(value, cont)),
        Some(None) => miss.apply(&key, cont),
        None => {
            let hash = equal_hash(&key);
            equal_ref_loop(table.clone(), 0, key, hash, miss, cont)
        }
    }
}

/// Inserts or replaces; delivers void.
pub fn set_step(
    table: &Rc<HashTable>,
    key: Value,
    value: Value,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    if table.native_set(&key, &value) {
        return Ok(Step::plug1(Value::Void, cont));
    }
    let hash = equal_hash(&key);
    equal_set_loop(table.clone(), 0, key, value, hash, cont)
}

// RUST CONCEPT: A scan loop that can suspend
// Keys that can be compared without running user code are handled inline.
// The first comparison that needs a proxy handler parks the loop position in
// a HashRef frame; the frame's handler resumes at index + 1 on a miss.
pub(crate) fn equal_ref_loop(
    table: Rc<HashTable>,
    mut index: usize,
    key: Value,
    hash: Option<u64>,
    miss: MissPolicy,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    while let Some((candidate, stored)) = table.equal_entry(index) {
        if let (Some(probe), Some(stored)) = (hash, stored) {
            if probe != stored {
                index += 1;
                continue;
            }
        }
        match equal_sync(&candidate, &key) {
            Some(true) => return ref_found(table, index, key, hash, miss, cont),
            Some(false) => index += 1,
            None => {
                let cont = cont.push(ContKind::HashRef {
                    table,
                    index,
                    key: key.clone(),
                    hash,
                    miss,
                });
                return equal::equal_step(candidate, key, cont);
            }
        }
    }
    miss.apply(&key, cont)
}

fn ref_found(
    table: Rc<HashTable>,
    index: usize,
    key: Value,
    hash: Option<u64>,
    miss: MissPolicy,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    match table.equal_value(index) {
        Some(value) => Ok(Step::plug1(value, cont)),
        // the table shrank while a handler ran
        None => equal_ref_loop(table, index + 1, key, hash, miss, cont),
    }
}

// A suspended comparison finished
pub(crate) fn resume_ref(
    table: Rc<HashTable>,
    index: usize,
    key: Value,
    hash: Option<u64>,
    miss: MissPolicy,
    vals: Values,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    if vals.check_one()?.is_true() {
        ref_found(table, index, key, hash, miss, cont)
    } else {
        equal_ref_loop(table, index + 1, key, hash, miss, cont)
    }
}

pub(crate) fn equal_set_loop(
    table: Rc<HashTable>,
    mut index: usize,
    key: Value,
    value: Value,
    hash: Option<u64>,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    while let Some((candidate, stored)) = table.equal_entry(index) {
        if let (Some(probe), Some(stored)) = (hash, stored) {
            if probe != stored {
                index += 1;
                continue;
            }
        }
        match equal_sync(&candidate, &key) {
            Some(true) => {
                table.equal_replace(index, value);
                return Ok(Step::plug1(Value::Void, cont));
            }
            Some(false) => index += 1,
            None => {
                let cont = cont.push(ContKind::HashSet {
                    table,
                    index,
                    key: key.clone(),
                    value,
                    hash,
                });
                return equal::equal_step(candidate, key, cont);
            }
        }
    }
    table.equal_append(key, value, hash);
    Ok(Step::plug1(Value::Void, cont))
}

pub(crate) fn resume_set(
    table: Rc<HashTable>,
    index: usize,
    key: Value,
    value: Value,
    hash: Option<u64>,
    vals: Values,
    cont: Cont,
) -> Result<Step, RuntimeError> {
    if vals.check_one()?.is_true() && table.equal_replace(index, value.clone()) {
        Ok(Step::plug1(Value::Void, cont))
    } else {
        equal_set_loop(table, index + 1, key, value, hash, cont)
    }
}
