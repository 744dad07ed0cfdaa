use std::cell::{Cell as StdCell, Ref, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::BigRational;
use num_traits::{One, ToPrimitive};

use crate::ast::CaseLambda;
use crate::cell::Cell;
use crate::cont::Cont;
use crate::env::Env;
use crate::error::RuntimeError;
use crate::hash::HashTable;
use crate::interpreter::{Runtime, Step};
use crate::weak::{Ephemeron, WeakBox};

// RUST CONCEPT: One closed enum for the whole value universe
// Every heap value sits behind an Rc, so a Value is a small handle that is
// cheap to clone and whose identity (the Rc pointer) is meaningful for eq?.
// Fixnums, flonums, characters and complexes are boxed as well: that is what
// makes memoized construction observable and unboxed storage (cells, pairs,
// vectors) worth having.
#[derive(Clone)]
pub enum Value {
    Void,
    Null,
    Bool(bool),
    Undefined, // unsafe-undefined

    Fixnum(Rc<i64>),
    Bignum(Rc<BigInt>),
    Flonum(Rc<f64>),
    Rational(Rc<BigRational>),
    Complex(Rc<Complex64>),

    Char(Rc<char>),
    String(Rc<MString>),
    Bytes(Rc<MBytes>),
    Symbol(Symbol),
    Keyword(Keyword),

    Pair(Rc<Pair>),
    MPair(Rc<MPair>),
    Vector(Rc<Vector>),
    Box(Rc<BoxValue>),
    Hash(Rc<HashTable>),

    Closure(Rc<Closure>),
    Continuation(Cont),
    Primitive(Rc<Primitive>),
    Parameter(Rc<Parameter>),

    Proxy(Rc<Proxy>),

    Port(Rc<Port>),
    Thread(Rc<ThreadHandle>),
    Semaphore(Rc<Semaphore>),
    Regexp(Rc<Regexp>),
    WeakBox(Rc<WeakBox>),
    Ephemeron(Rc<Ephemeron>),
    MarkSet(Cont),

    // Storage for set!-able variables. Only ever found inside frames and
    // global slots, never handed to user code.
    Cell(Rc<Cell>),
}

// ---------------------------------------------------------------------------
// Interned atoms

#[derive(Debug)]
pub struct SymbolData {
    name: Rc<str>,
    unreadable: bool,
}

// RUST CONCEPT: Identity-based Eq/Hash
// Symbols come out of the interner, so comparing the Rc pointer is the same
// as comparing text within one pool and keeps the pools apart.
#[derive(Clone)]
pub struct Symbol(Rc<SymbolData>);

impl Symbol {
    pub(crate) fn new(name: &str, unreadable: bool) -> Self {
        Symbol(Rc::new(SymbolData {
            name: name.into(),
            unreadable,
        }))
    }

    /// A symbol no interner knows about: never eq? to anything read.
    pub fn uninterned(name: &str) -> Self {
        Self::new(name, false)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_unreadable(&self) -> bool {
        self.0.unreadable
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

#[derive(Clone)]
pub struct Keyword(Rc<str>);

impl Keyword {
    pub(crate) fn new(name: &str) -> Self {
        Keyword(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn ptr_eq(&self, other: &Keyword) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keyword({})", self.name())
    }
}

// ---------------------------------------------------------------------------
// Aggregates

// RUST CONCEPT: Two representations behind one type
// A pair whose car is a fixnum can keep the integer inline. car() rebuilds
// the boxed fixnum, so nothing outside this type can tell the two apart.
#[derive(Debug)]
pub enum Pair {
    Fixnum { car: i64, cdr: Value },
    Boxed { car: Value, cdr: Value },
}

impl Pair {
    pub fn new(car: Value, cdr: Value, specialize: bool) -> Self {
        if specialize {
            if let Value::Fixnum(n) = &car {
                return Pair::Fixnum { car: **n, cdr };
            }
        }
        Pair::Boxed { car, cdr }
    }

    pub fn car(&self) -> Value {
        match self {
            Pair::Fixnum { car, .. } => Value::fixnum(*car),
            Pair::Boxed { car, .. } => car.clone(),
        }
    }

    pub fn cdr(&self) -> &Value {
        match self {
            Pair::Fixnum { cdr, .. } | Pair::Boxed { cdr, .. } => cdr,
        }
    }

    pub fn is_specialized(&self) -> bool {
        matches!(self, Pair::Fixnum { .. })
    }

    fn release_children(&mut self, pending: &mut Vec<Value>) {
        match self {
            Pair::Fixnum { cdr, .. } => defer_release(cdr, pending),
            Pair::Boxed { car, cdr } => {
                defer_release(car, pending);
                defer_release(cdr, pending);
            }
        }
    }
}

// RUST CONCEPT: Iterative drop
// Nesting through car, cdr, vector slots or box contents would otherwise be
// freed by one native recursive drop per level. Each aggregate hands its
// last-owner children to a work list instead, and the loop below unwraps
// them one at a time, so every nested drop sees only empty slots.

fn defer_release(slot: &mut Value, pending: &mut Vec<Value>) {
    let last_owner = match &*slot {
        Value::Pair(rc) => Rc::strong_count(rc) == 1,
        Value::MPair(rc) => Rc::strong_count(rc) == 1,
        Value::Vector(rc) => Rc::strong_count(rc) == 1,
        Value::Box(rc) => Rc::strong_count(rc) == 1,
        _ => false,
    };
    if last_owner {
        pending.push(std::mem::replace(slot, Value::Null));
    }
}

fn release_all(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Pair(rc) => {
                if let Ok(mut pair) = Rc::try_unwrap(rc) {
                    pair.release_children(&mut pending);
                }
            }
            Value::MPair(rc) => {
                if let Ok(mut pair) = Rc::try_unwrap(rc) {
                    pair.release_children(&mut pending);
                }
            }
            Value::Vector(rc) => {
                if let Ok(mut vector) = Rc::try_unwrap(rc) {
                    vector.release_children(&mut pending);
                }
            }
            Value::Box(rc) => {
                if let Ok(mut b) = Rc::try_unwrap(rc) {
                    b.release_children(&mut pending);
                }
            }
            _ => {}
        }
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_children(&mut pending);
        release_all(pending);
    }
}

#[derive(Debug)]
pub struct MPair {
    pub car: RefCell<Value>,
    pub cdr: RefCell<Value>,
}

impl MPair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Self {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    fn release_children(&mut self, pending: &mut Vec<Value>) {
        defer_release(self.car.get_mut(), pending);
        defer_release(self.cdr.get_mut(), pending);
    }
}

impl Drop for MPair {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_children(&mut pending);
        release_all(pending);
    }
}

#[derive(Debug)]
pub struct MString {
    text: RefCell<String>,
    immutable: bool,
}

impl MString {
    pub fn new(text: &str, immutable: bool) -> Self {
        Self {
            text: RefCell::new(text.to_string()),
            immutable,
        }
    }

    pub fn text(&self) -> Ref<'_, String> {
        self.text.borrow()
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn push_str(&self, s: &str) {
        self.text.borrow_mut().push_str(s);
    }
}

#[derive(Debug)]
pub struct MBytes {
    bytes: RefCell<Vec<u8>>,
    immutable: bool,
}

impl MBytes {
    pub fn new(bytes: Vec<u8>, immutable: bool) -> Self {
        Self {
            bytes: RefCell::new(bytes),
            immutable,
        }
    }

    pub fn bytes(&self) -> Ref<'_, Vec<u8>> {
        self.bytes.borrow()
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn set(&self, index: usize, byte: u8) -> bool {
        match self.bytes.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct BoxValue {
    value: RefCell<Value>,
    immutable: bool,
}

impl BoxValue {
    pub fn new(value: Value, immutable: bool) -> Self {
        Self {
            value: RefCell::new(value),
            immutable,
        }
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    fn release_children(&mut self, pending: &mut Vec<Value>) {
        defer_release(self.value.get_mut(), pending);
    }
}

impl Drop for BoxValue {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_children(&mut pending);
        release_all(pending);
    }
}

// RUST CONCEPT: Storage strategies
// A vector of nothing but fixnums (or flonums) stores raw numbers. The first
// write that does not fit switches the vector to generic storage for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStrategy {
    Fixnum,
    Flonum,
    Object,
}

#[derive(Debug)]
enum VectorStorage {
    Fixnum(Vec<i64>),
    Flonum(Vec<f64>),
    Object(Vec<Value>),
}

#[derive(Debug)]
pub struct Vector {
    storage: RefCell<VectorStorage>,
    immutable: bool,
}

impl Vector {
    pub fn new(elems: Vec<Value>, immutable: bool, specialize: bool) -> Self {
        let storage = if specialize && !elems.is_empty() {
            if elems.iter().all(|v| matches!(v, Value::Fixnum(_))) {
                VectorStorage::Fixnum(elems.iter().filter_map(Value::as_fixnum).collect())
            } else if elems.iter().all(|v| matches!(v, Value::Flonum(_))) {
                VectorStorage::Flonum(
                    elems
                        .iter()
                        .filter_map(|v| match v {
                            Value::Flonum(f) => Some(**f),
                            _ => None,
                        })
                        .collect(),
                )
            } else {
                VectorStorage::Object(elems)
            }
        } else {
            VectorStorage::Object(elems)
        };
        Self {
            storage: RefCell::new(storage),
            immutable,
        }
    }

    pub fn filled(len: usize, fill: &Value, specialize: bool) -> Self {
        let storage = match fill {
            Value::Fixnum(n) if specialize => VectorStorage::Fixnum(vec![**n; len]),
            Value::Flonum(f) if specialize => VectorStorage::Flonum(vec![**f; len]),
            _ => VectorStorage::Object(vec![fill.clone(); len]),
        };
        Self {
            storage: RefCell::new(storage),
            immutable: false,
        }
    }

    pub fn len(&self) -> usize {
        match &*self.storage.borrow() {
            VectorStorage::Fixnum(v) => v.len(),
            VectorStorage::Flonum(v) => v.len(),
            VectorStorage::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn strategy(&self) -> VectorStrategy {
        match &*self.storage.borrow() {
            VectorStorage::Fixnum(_) => VectorStrategy::Fixnum,
            VectorStorage::Flonum(_) => VectorStrategy::Flonum,
            VectorStorage::Object(_) => VectorStrategy::Object,
        }
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        match &*self.storage.borrow() {
            VectorStorage::Fixnum(v) => v.get(index).map(|&n| Value::fixnum(n)),
            VectorStorage::Flonum(v) => v.get(index).map(|&f| Value::flonum(f)),
            VectorStorage::Object(v) => v.get(index).cloned(),
        }
    }

    /// Returns false when `index` is out of range.
    pub fn set(&self, index: usize, value: Value) -> bool {
        if index >= self.len() {
            return false;
        }
        let mut storage = self.storage.borrow_mut();
        match (&mut *storage, &value) {
            (VectorStorage::Fixnum(v), Value::Fixnum(n)) => {
                v[index] = **n;
                return true;
            }
            (VectorStorage::Flonum(v), Value::Flonum(f)) => {
                v[index] = **f;
                return true;
            }
            _ => {}
        }
        // a value the strategy cannot hold generalizes the storage
        let mut generic: Vec<Value> = match &mut *storage {
            VectorStorage::Fixnum(v) => v.iter().map(|&n| Value::fixnum(n)).collect(),
            VectorStorage::Flonum(v) => v.iter().map(|&f| Value::flonum(f)).collect(),
            VectorStorage::Object(v) => std::mem::take(v),
        };
        generic[index] = value;
        *storage = VectorStorage::Object(generic);
        true
    }

    pub fn to_vec(&self) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    fn release_children(&mut self, pending: &mut Vec<Value>) {
        if let VectorStorage::Object(items) = self.storage.get_mut() {
            for item in items.iter_mut() {
                defer_release(item, pending);
            }
        }
    }
}

impl Drop for Vector {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_children(&mut pending);
        release_all(pending);
    }
}

// ---------------------------------------------------------------------------
// Callables

// RUST CONCEPT: Arity as data
// Accepted counts are a finite list plus an optional "at least N" tail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Arity {
    pub counts: Vec<usize>,
    pub at_least: Option<usize>,
}

impl Arity {
    pub fn exactly(n: usize) -> Self {
        Self {
            counts: vec![n],
            at_least: None,
        }
    }

    pub fn at_least(n: usize) -> Self {
        Self {
            counts: Vec::new(),
            at_least: Some(n),
        }
    }

    pub fn between(lo: usize, hi: usize) -> Self {
        Self {
            counts: (lo..=hi).collect(),
            at_least: None,
        }
    }

    pub fn accepts(&self, n: usize) -> bool {
        self.counts.contains(&n) || self.at_least.is_some_and(|min| n >= min)
    }

    /// The "at least" threshold, or -1 when there is none.
    pub fn at_least_code(&self) -> i64 {
        self.at_least.map_or(-1, |n| n as i64)
    }

    pub fn union(&self, other: &Arity) -> Arity {
        let mut counts = self.counts.clone();
        for &n in &other.counts {
            if !counts.contains(&n) {
                counts.push(n);
            }
        }
        counts.sort_unstable();
        let at_least = match (self.at_least, other.at_least) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(min) = at_least {
            counts.retain(|&n| n < min);
        }
        Arity { counts, at_least }
    }

    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.counts.iter().map(|n| n.to_string()).collect();
        if let Some(min) = self.at_least {
            parts.push(format!("at least {}", min));
        }
        match parts.len() {
            0 => "nothing".to_string(),
            1 => parts.remove(0),
            _ => {
                let last = parts.pop().unwrap_or_default();
                format!("{} or {}", parts.join(", "), last)
            }
        }
    }
}

// RUST CONCEPT: Capability traits
// The variant stays closed; callability and aggregate-ness are exposed
// through traits the relevant payloads implement.
pub trait Callable {
    fn arity(&self) -> Arity;
    fn procedure_name(&self) -> Option<&str>;
}

pub trait Aggregate {
    fn element_count(&self) -> usize;
    fn is_immutable(&self) -> bool;
}

pub struct Closure {
    pub lambda: Rc<CaseLambda>,
    // One captured environment per arm
    pub envs: Vec<Env>,
}

impl Callable for Closure {
    fn arity(&self) -> Arity {
        self.lambda.arity.clone()
    }

    fn procedure_name(&self) -> Option<&str> {
        self.lambda.name.as_deref()
    }
}

pub type SimpleFn = fn(&mut Runtime, &[Value]) -> Result<Value, RuntimeError>;
pub type ControlFn = fn(&mut Runtime, Vec<Value>, Cont) -> Result<Step, RuntimeError>;

// Simple primitives compute one value and never call back into user code.
// Control primitives get the continuation and return the next step, which is
// how apply, call/cc, equal? and friends stay inside the trampoline.
#[derive(Clone, Copy)]
pub enum PrimCode {
    Simple(SimpleFn),
    Control(ControlFn),
}

pub struct Primitive {
    pub name: &'static str,
    pub arity: Arity,
    pub code: PrimCode,
}

impl Callable for Primitive {
    fn arity(&self) -> Arity {
        self.arity.clone()
    }

    fn procedure_name(&self) -> Option<&str> {
        Some(self.name)
    }
}

pub struct Parameter {
    pub value: RefCell<Value>,
    pub guard: Option<Value>,
}

impl Callable for Parameter {
    fn arity(&self) -> Arity {
        Arity::between(0, 1)
    }

    fn procedure_name(&self) -> Option<&str> {
        Some("parameter-procedure")
    }
}

impl Callable for Cont {
    fn arity(&self) -> Arity {
        Arity::at_least(0)
    }

    fn procedure_name(&self) -> Option<&str> {
        None
    }
}

// ---------------------------------------------------------------------------
// Proxies

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyTarget {
    Box,
    Vector,
}

// A chaperone or impersonator around a box or vector. Reads go through
// ref_handler, writes through set_handler, both called via the trampoline.
pub struct Proxy {
    pub inner: Value,
    pub ref_handler: Value,
    pub set_handler: Value,
    pub chaperone: bool,
    pub target: ProxyTarget,
}

// ---------------------------------------------------------------------------
// Opaque leaves

#[derive(Debug)]
pub enum Port {
    StringOutput(RefCell<String>),
    Console,
}

#[derive(Debug)]
pub struct ThreadHandle {
    pub id: u64,
}

#[derive(Debug)]
pub struct Semaphore {
    count: StdCell<i64>,
}

impl Semaphore {
    pub fn new(count: i64) -> Self {
        Self {
            count: StdCell::new(count),
        }
    }

    pub fn post(&self) {
        self.count.set(self.count.get() + 1);
    }

    /// Without other threads a wait on zero can never be satisfied.
    pub fn try_wait(&self) -> bool {
        let n = self.count.get();
        if n > 0 {
            self.count.set(n - 1);
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> i64 {
        self.count.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexpKind {
    Regexp,
    Pregexp,
    ByteRegexp,
    BytePregexp,
}

#[derive(Debug)]
pub struct Regexp {
    pub source: String,
    pub kind: RegexpKind,
}

// ---------------------------------------------------------------------------
// Construction and inspection

impl Value {
    // RUST CONCEPT: Uncached constructors
    // These always allocate. Canonical instances come from the runtime's
    // ConstructorCache instead.
    pub fn fixnum(n: i64) -> Value {
        Value::Fixnum(Rc::new(n))
    }

    pub fn flonum(f: f64) -> Value {
        Value::Flonum(Rc::new(f))
    }

    pub fn char(c: char) -> Value {
        Value::Char(Rc::new(c))
    }

    pub fn complex(z: Complex64) -> Value {
        Value::Complex(Rc::new(z))
    }

    // Demotes to a fixnum when the integer fits
    pub fn integer(n: BigInt) -> Value {
        match n.to_i64() {
            Some(small) => Value::fixnum(small),
            None => Value::Bignum(Rc::new(n)),
        }
    }

    pub fn rational(r: BigRational) -> Value {
        if r.denom().is_one() {
            Value::integer(r.numer().clone())
        } else {
            Value::Rational(Rc::new(r))
        }
    }

    pub fn string(text: &str) -> Value {
        Value::String(Rc::new(MString::new(text, false)))
    }

    pub fn immutable_string(text: &str) -> Value {
        Value::String(Rc::new(MString::new(text, true)))
    }

    pub fn bytes(bytes: Vec<u8>, immutable: bool) -> Value {
        Value::Bytes(Rc::new(MBytes::new(bytes, immutable)))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair::new(car, cdr, true)))
    }

    pub fn cons_with(car: Value, cdr: Value, specialize: bool) -> Value {
        Value::Pair(Rc::new(Pair::new(car, cdr, specialize)))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Self::list_with(items, Value::Null, true)
    }

    pub fn list_with(items: Vec<Value>, tail: Value, specialize: bool) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons_with(item, acc, specialize))
    }

    pub fn vector(items: Vec<Value>, specialize: bool) -> Value {
        Value::Vector(Rc::new(Vector::new(items, false, specialize)))
    }

    pub fn new_box(value: Value, immutable: bool) -> Value {
        Value::Box(Rc::new(BoxValue::new(value, immutable)))
    }

    pub fn new_cell(value: Value) -> Value {
        Value::Cell(Rc::new(Cell::new(value)))
    }

    // RUST CONCEPT: Get the type name of a value
    // Used in contract-violation messages and Debug output
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Undefined => "unsafe-undefined",
            Value::Fixnum(_) => "fixnum",
            Value::Bignum(_) => "bignum",
            Value::Flonum(_) => "flonum",
            Value::Rational(_) => "rational",
            Value::Complex(_) => "complex",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::Pair(_) => "pair",
            Value::MPair(_) => "mpair",
            Value::Vector(_) => "vector",
            Value::Box(_) => "box",
            Value::Hash(_) => "hash",
            Value::Closure(_) => "procedure",
            Value::Continuation(_) => "continuation",
            Value::Primitive(_) => "primitive",
            Value::Parameter(_) => "parameter",
            Value::Proxy(_) => "proxy",
            Value::Port(_) => "port",
            Value::Thread(_) => "thread",
            Value::Semaphore(_) => "semaphore",
            Value::Regexp(_) => "regexp",
            Value::WeakBox(_) => "weak-box",
            Value::Ephemeron(_) => "ephemeron",
            Value::MarkSet(_) => "continuation-mark-set",
            Value::Cell(_) => "cell",
        }
    }

    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Fixnum(_)
                | Value::Bignum(_)
                | Value::Flonum(_)
                | Value::Rational(_)
                | Value::Complex(_)
        )
    }

    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Value::Fixnum(n) => Some(**n),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Strips any number of proxy layers.
    pub fn unwrap_proxy(&self) -> &Value {
        let mut current = self;
        while let Value::Proxy(p) = current {
            current = &p.inner;
        }
        current
    }

    pub fn is_procedure(&self) -> bool {
        self.as_callable().is_some()
    }

    pub fn as_callable(&self) -> Option<&dyn Callable> {
        match self {
            Value::Closure(c) => Some(&**c),
            Value::Primitive(p) => Some(&**p),
            Value::Parameter(p) => Some(&**p),
            Value::Continuation(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_aggregate(&self) -> Option<&dyn Aggregate> {
        match self {
            Value::Pair(p) => Some(&**p),
            Value::MPair(p) => Some(&**p),
            Value::Vector(v) => Some(&**v),
            Value::Box(b) => Some(&**b),
            Value::Hash(h) => Some(&**h),
            _ => None,
        }
    }

    pub fn arity(&self) -> Option<Arity> {
        self.as_callable().map(|c| c.arity())
    }

    pub fn is_immutable(&self) -> bool {
        match self {
            Value::String(s) => s.is_immutable(),
            Value::Bytes(b) => b.is_immutable(),
            Value::Proxy(p) => p.inner.is_immutable(),
            Value::Closure(_)
            | Value::Primitive(_)
            | Value::Continuation(_)
            | Value::Parameter(_) => true,
            other => match other.as_aggregate() {
                Some(agg) => agg.is_immutable(),
                None => !matches!(
                    other,
                    Value::Port(_)
                        | Value::Thread(_)
                        | Value::Semaphore(_)
                        | Value::WeakBox(_)
                        | Value::Ephemeron(_)
                        | Value::Cell(_)
                ),
            },
        }
    }

    // RUST CONCEPT: Convert a proper list to a Vec
    // None when the list is improper
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Value::Null => return Some(items),
                Value::Pair(p) => {
                    items.push(p.car());
                    current = p.cdr();
                }
                _ => return None,
            }
        }
    }

    /// Identity comparison on the handle itself.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Void, Value::Void)
            | (Value::Null, Value::Null)
            | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Continuation(a), Value::Continuation(b))
            | (Value::MarkSet(a), Value::MarkSet(b)) => a.ptr_eq(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.ptr_eq(b),
            (Value::Keyword(a), Value::Keyword(b)) => a.ptr_eq(b),
            _ => match (self.heap_addr(), other.heap_addr()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    // Address of the Rc payload for heap variants
    pub(crate) fn heap_addr(&self) -> Option<usize> {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
            Rc::as_ptr(rc) as *const u8 as usize
        }
        let a = match self {
            Value::Fixnum(r) => addr(r),
            Value::Bignum(r) => addr(r),
            Value::Flonum(r) => addr(r),
            Value::Rational(r) => addr(r),
            Value::Complex(r) => addr(r),
            Value::Char(r) => addr(r),
            Value::String(r) => addr(r),
            Value::Bytes(r) => addr(r),
            Value::Symbol(s) => s.addr(),
            Value::Keyword(k) => k.addr(),
            Value::Pair(r) => addr(r),
            Value::MPair(r) => addr(r),
            Value::Vector(r) => addr(r),
            Value::Box(r) => addr(r),
            Value::Hash(r) => addr(r),
            Value::Closure(r) => addr(r),
            Value::Continuation(k) | Value::MarkSet(k) => k.addr(),
            Value::Primitive(r) => addr(r),
            Value::Parameter(r) => addr(r),
            Value::Proxy(r) => addr(r),
            Value::Port(r) => addr(r),
            Value::Thread(r) => addr(r),
            Value::Semaphore(r) => addr(r),
            Value::Regexp(r) => addr(r),
            Value::WeakBox(r) => addr(r),
            Value::Ephemeron(r) => addr(r),
            Value::Cell(r) => addr(r),
            Value::Void | Value::Null | Value::Bool(_) | Value::Undefined => return None,
        };
        Some(a)
    }

    /// `display` rendering: strings and characters appear raw.
    pub fn display_string(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = render(self, &mut out, false);
        out
    }
}

impl Aggregate for Pair {
    fn element_count(&self) -> usize {
        2
    }

    fn is_immutable(&self) -> bool {
        true
    }
}

impl Aggregate for MPair {
    fn element_count(&self) -> usize {
        2
    }

    fn is_immutable(&self) -> bool {
        false
    }
}

impl Aggregate for Vector {
    fn element_count(&self) -> usize {
        self.len()
    }

    fn is_immutable(&self) -> bool {
        self.immutable
    }
}

impl Aggregate for BoxValue {
    fn element_count(&self) -> usize {
        1
    }

    fn is_immutable(&self) -> bool {
        self.immutable
    }
}

// ---------------------------------------------------------------------------
// Printing

fn format_flonum(f: f64) -> String {
    if f.is_nan() {
        "+nan.0".to_string()
    } else if f.is_infinite() {
        let text = if f > 0.0 { "+inf.0" } else { "-inf.0" };
        text.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn char_name(c: char) -> Option<&'static str> {
    match c {
        ' ' => Some("space"),
        '\n' => Some("newline"),
        '\t' => Some("tab"),
        '\r' => Some("return"),
        '\0' => Some("nul"),
        _ => None,
    }
}

fn write_escaped(out: &mut impl fmt::Write, text: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in text.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\t' => out.write_str("\\t")?,
            '\r' => out.write_str("\\r")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn write_bytes(out: &mut impl fmt::Write, bytes: &[u8]) -> fmt::Result {
    out.write_str("#\"")?;
    for &b in bytes {
        match b {
            b'"' => out.write_str("\\\"")?,
            b'\\' => out.write_str("\\\\")?,
            0x20..=0x7e => out.write_char(b as char)?,
            _ => write!(out, "\\{:o}", b)?,
        }
    }
    out.write_char('"')
}

// RUST CONCEPT: One renderer, two modes
// `write` mode quotes strings and characters, `display` mode does not.
// Identity of the aggregates a printed value can loop back through
fn node_id(value: &Value) -> Option<usize> {
    match value {
        Value::Pair(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
        Value::MPair(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
        Value::Vector(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
        Value::Box(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
        Value::Hash(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
        Value::Cell(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
        _ => None,
    }
}

fn children(value: &Value) -> Vec<Value> {
    match value {
        Value::Pair(p) => vec![p.car(), p.cdr().clone()],
        Value::MPair(p) => vec![p.car.borrow().clone(), p.cdr.borrow().clone()],
        Value::Vector(v) => v.to_vec(),
        Value::Box(b) => vec![b.get()],
        Value::Hash(h) => h.entries().into_iter().flat_map(|(k, v)| [k, v]).collect(),
        Value::Cell(c) => vec![c.get()],
        _ => Vec::new(),
    }
}

// Aggregates that are reachable from themselves. Only these get a
// `#n=` label; shared but acyclic structure prints in full each time.
fn cycle_targets(root: &Value) -> HashSet<usize> {
    enum Visit {
        Enter(Value),
        Leave(usize),
    }

    let mut cyclic = HashSet::new();
    if node_id(root).is_none() {
        return cyclic;
    }
    let mut seen = HashSet::new();
    let mut on_path = HashSet::new();
    let mut stack = vec![Visit::Enter(root.clone())];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Leave(id) => {
                on_path.remove(&id);
            }
            Visit::Enter(value) => {
                let Some(id) = node_id(&value) else { continue };
                if on_path.contains(&id) {
                    cyclic.insert(id);
                    continue;
                }
                if !seen.insert(id) {
                    continue;
                }
                on_path.insert(id);
                stack.push(Visit::Leave(id));
                stack.extend(children(&value).into_iter().map(Visit::Enter));
            }
        }
    }
    cyclic
}

enum Piece {
    Value(Value),
    // the rest of a list after an element has been printed
    Tail(Value),
    Text(&'static str),
}

// RUST CONCEPT: Printing without native recursion
// Pending output lives on an explicit stack, so nesting depth is bounded by
// the heap rather than the thread stack.
fn render(value: &Value, out: &mut impl fmt::Write, write: bool) -> fmt::Result {
    let cyclic = cycle_targets(value);
    let mut labels: HashMap<usize, usize> = HashMap::new();
    let mut stack = vec![Piece::Value(value.clone())];

    while let Some(piece) = stack.pop() {
        let value = match piece {
            Piece::Text(text) => {
                out.write_str(text)?;
                continue;
            }
            Piece::Tail(rest) => {
                match rest {
                    Value::Null => {}
                    Value::Pair(next) if !cyclic.contains(&(Rc::as_ptr(&next) as *const () as usize)) => {
                        out.write_char(' ')?;
                        stack.push(Piece::Tail(next.cdr().clone()));
                        stack.push(Piece::Value(next.car()));
                    }
                    other => {
                        out.write_str(" . ")?;
                        stack.push(Piece::Value(other));
                    }
                }
                continue;
            }
            Piece::Value(value) => value,
        };

        if let Some(id) = node_id(&value).filter(|id| cyclic.contains(id)) {
            if let Some(n) = labels.get(&id) {
                write!(out, "#{}#", n)?;
                continue;
            }
            let n = labels.len();
            labels.insert(id, n);
            write!(out, "#{}=", n)?;
        }

        match &value {
            Value::Void => out.write_str("#<void>"),
            Value::Null => out.write_str("()"),
            Value::Bool(true) => out.write_str("#t"),
            Value::Bool(false) => out.write_str("#f"),
            Value::Undefined => out.write_str("#<unsafe-undefined>"),
            Value::Fixnum(n) => write!(out, "{}", n),
            Value::Bignum(n) => write!(out, "{}", n),
            Value::Flonum(f) => out.write_str(&format_flonum(**f)),
            Value::Rational(r) => write!(out, "{}", r),
            Value::Complex(z) => {
                let sign = if z.im.is_sign_negative() && !z.im.is_nan() { "" } else { "+" };
                write!(out, "{}{}{}i", format_flonum(z.re), sign, format_flonum(z.im))
            }
            Value::Char(c) => {
                if !write {
                    out.write_char(**c)
                } else if let Some(name) = char_name(**c) {
                    write!(out, "#\\{}", name)
                } else {
                    write!(out, "#\\{}", c)
                }
            }
            Value::String(s) => {
                if write {
                    write_escaped(out, &s.text())
                } else {
                    out.write_str(&s.text())
                }
            }
            Value::Bytes(b) => {
                if write {
                    write_bytes(out, &b.bytes())
                } else {
                    out.write_str(&String::from_utf8_lossy(&b.bytes()))
                }
            }
            Value::Symbol(s) => out.write_str(s.name()),
            Value::Keyword(k) => write!(out, "#:{}", k.name()),
            Value::Pair(p) => {
                out.write_char('(')?;
                stack.push(Piece::Text(")"));
                stack.push(Piece::Tail(p.cdr().clone()));
                stack.push(Piece::Value(p.car()));
                Ok(())
            }
            Value::MPair(p) => {
                out.write_str("(mcons ")?;
                stack.push(Piece::Text(")"));
                stack.push(Piece::Value(p.cdr.borrow().clone()));
                stack.push(Piece::Text(" "));
                stack.push(Piece::Value(p.car.borrow().clone()));
                Ok(())
            }
            Value::Vector(v) => {
                out.write_str("#(")?;
                stack.push(Piece::Text(")"));
                for (i, item) in v.to_vec().into_iter().enumerate().rev() {
                    stack.push(Piece::Value(item));
                    if i > 0 {
                        stack.push(Piece::Text(" "));
                    }
                }
                Ok(())
            }
            Value::Box(b) => {
                out.write_str("#&")?;
                stack.push(Piece::Value(b.get()));
                Ok(())
            }
            Value::Hash(h) => {
                write!(out, "#{}(", h.kind().prefix())?;
                stack.push(Piece::Text(")"));
                for (i, (k, v)) in h.entries().into_iter().enumerate().rev() {
                    stack.push(Piece::Text(")"));
                    stack.push(Piece::Value(v));
                    stack.push(Piece::Text(" . "));
                    stack.push(Piece::Value(k));
                    stack.push(Piece::Text(if i > 0 { " (" } else { "(" }));
                }
                Ok(())
            }
            Value::Closure(c) => match c.procedure_name() {
                Some(name) => write!(out, "#<procedure:{}>", name),
                None => out.write_str("#<procedure>"),
            },
            Value::Primitive(p) => write!(out, "#<procedure:{}>", p.name),
            Value::Parameter(_) => out.write_str("#<procedure:parameter-procedure>"),
            Value::Continuation(_) => out.write_str("#<continuation>"),
            Value::Proxy(p) => {
                let kind = if p.chaperone { "chaperone" } else { "impersonator" };
                let target = match p.target {
                    ProxyTarget::Box => "box",
                    ProxyTarget::Vector => "vector",
                };
                write!(out, "#<{}-{}>", kind, target)
            }
            Value::Port(p) => match &**p {
                Port::StringOutput(_) => out.write_str("#<output-port:string>"),
                Port::Console => out.write_str("#<output-port:stdout>"),
            },
            Value::Thread(_) => out.write_str("#<thread>"),
            Value::Semaphore(_) => out.write_str("#<semaphore>"),
            Value::Regexp(r) => {
                let prefix = match r.kind {
                    RegexpKind::Regexp => "#rx",
                    RegexpKind::Pregexp => "#px",
                    RegexpKind::ByteRegexp => "#rx#",
                    RegexpKind::BytePregexp => "#px#",
                };
                out.write_str(prefix)?;
                write_escaped(out, &r.source)
            }
            Value::WeakBox(_) => out.write_str("#<weak-box>"),
            Value::Ephemeron(_) => out.write_str("#<ephemeron>"),
            Value::MarkSet(_) => out.write_str("#<continuation-mark-set>"),
            Value::Cell(c) => {
                out.write_str("#<cell:")?;
                stack.push(Piece::Text(">"));
                stack.push(Piece::Value(c.get()));
                Ok(())
            }
        }?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(self, f, true)
    }
}

// Debug shows the tag next to the written form
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specialized_pair_is_transparent() {
        let special = Pair::new(Value::fixnum(1), Value::fixnum(2), true);
        let generic = Pair::new(Value::fixnum(1), Value::fixnum(2), false);
        assert!(special.is_specialized());
        assert!(!generic.is_specialized());
        assert_eq!(special.car().as_fixnum(), Some(1));
        assert_eq!(generic.car().as_fixnum(), Some(1));

        let a = Value::Pair(Rc::new(special));
        let b = Value::Pair(Rc::new(generic));
        assert_eq!(a.to_string(), "(1 . 2)");
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_list_printing() {
        let list = Value::list(vec![Value::fixnum(1), Value::string("a"), Value::char('x')]);
        assert_eq!(list.to_string(), "(1 \"a\" #\\x)");
        assert_eq!(list.display_string(), "(1 a x)");
        let dotted = Value::list_with(vec![Value::fixnum(1)], Value::fixnum(2), true);
        assert_eq!(dotted.to_string(), "(1 . 2)");
    }

    #[test]
    fn test_deep_nesting_prints_and_drops() {
        // RUST CONCEPT: Drop and Display that never recurse natively
        // Each level nests through a car, a vector slot or a box.
        let mut value = Value::fixnum(1);
        for i in 0..300_000 {
            value = match i % 3 {
                0 => Value::list(vec![value]),
                1 => Value::vector(vec![value], true),
                _ => Value::new_box(value, false),
            };
        }
        let text = value.to_string();
        assert_eq!(text.len(), 700_001);
        assert!(text.starts_with("#&#(("), "Unexpected prefix {:?}", &text[..8]);
        drop(value);

        let mut chain = Value::Null;
        for i in 0..300_000 {
            chain = Value::MPair(Rc::new(MPair::new(Value::fixnum(i), chain)));
        }
        drop(chain);
    }

    #[test]
    fn test_cycles_print_with_labels() {
        let p = Rc::new(MPair::new(Value::fixnum(1), Value::fixnum(2)));
        *p.cdr.borrow_mut() = Value::MPair(p.clone());
        assert_eq!(Value::MPair(p.clone()).to_string(), "#0=(mcons 1 #0#)");
        *p.cdr.borrow_mut() = Value::Null;

        let v = Value::vector(vec![Value::fixnum(1), Value::fixnum(2)], true);
        if let Value::Vector(rc) = &v {
            assert!(rc.set(1, Value::list(vec![v.clone()])));
        }
        assert_eq!(v.to_string(), "#0=#(1 (#0#))");
        if let Value::Vector(rc) = &v {
            rc.set(1, Value::Null);
        }

        // shared but acyclic structure is printed in full
        let x = Value::vector(vec![Value::fixnum(1)], true);
        assert_eq!(Value::list(vec![x.clone(), x]).to_string(), "(#(1) #(1))");
    }

    #[test]
    fn test_flonum_printing() {
        assert_eq!(Value::flonum(1.0).to_string(), "1.0");
        assert_eq!(Value::flonum(2.5).to_string(), "2.5");
        assert_eq!(Value::flonum(f64::INFINITY).to_string(), "+inf.0");
        assert_eq!(Value::complex(Complex64::new(1.0, -2.0)).to_string(), "1.0-2.0i");
    }

    #[test]
    fn test_vector_strategy_switch() {
        let v = Vector::new(vec![Value::fixnum(1), Value::fixnum(2)], false, true);
        assert_eq!(v.strategy(), VectorStrategy::Fixnum);
        assert!(v.set(0, Value::fixnum(10)));
        assert_eq!(v.strategy(), VectorStrategy::Fixnum);
        assert!(v.set(1, Value::string("x")));
        assert_eq!(v.strategy(), VectorStrategy::Object);
        assert_eq!(v.get(0).and_then(|x| x.as_fixnum()), Some(10));
        assert!(!v.set(5, Value::Null));

        let plain = Vector::new(vec![Value::fixnum(1)], false, false);
        assert_eq!(plain.strategy(), VectorStrategy::Object);
    }

    #[test]
    fn test_arity() {
        let a = Arity::exactly(2);
        assert!(a.accepts(2));
        assert!(!a.accepts(3));
        assert_eq!(a.at_least_code(), -1);

        let rest = Arity::at_least(1);
        assert!(rest.accepts(5));
        assert_eq!(rest.at_least_code(), 1);

        let both = Arity::exactly(0).union(&Arity::at_least(2));
        assert!(both.accepts(0));
        assert!(!both.accepts(1));
        assert!(both.accepts(7));
        assert_eq!(both.describe(), "0 or at least 2");
    }

    #[test]
    fn test_immutability_flags() {
        assert!(Value::fixnum(1).is_immutable());
        assert!(Value::cons(Value::Null, Value::Null).is_immutable());
        assert!(!Value::string("abc").is_immutable());
        assert!(Value::immutable_string("abc").is_immutable());
        assert!(!Value::new_box(Value::Void, false).is_immutable());
        assert!(Value::new_box(Value::Void, true).is_immutable());
    }

    #[test]
    fn test_semaphore_counts() {
        let s = Semaphore::new(1);
        assert!(s.try_wait());
        assert!(!s.try_wait());
        s.post();
        assert_eq!(s.count(), 1);
    }
}
