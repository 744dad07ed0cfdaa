// Lexical environments: static shapes, dynamic frames, the global store and
// the module registry.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::Module;
use crate::cell::Cell;
use crate::error::RuntimeError;
use crate::value::{Symbol, Value};

// RUST CONCEPT: Shapes are shared, frames are per activation
// A shape is fixed at the definition site; every frame created from that
// site is laid out by it.
#[derive(Debug)]
pub struct Shape {
    elems: Vec<Symbol>,
    prev: Option<Rc<Shape>>,
}

impl Shape {
    pub fn new(elems: Vec<Symbol>, prev: Option<Rc<Shape>>) -> Rc<Shape> {
        Rc::new(Shape { elems, prev })
    }

    pub fn elems(&self) -> &[Symbol] {
        &self.elems
    }

    pub fn prev(&self) -> Option<&Rc<Shape>> {
        self.prev.as_ref()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn position(&self, sym: &Symbol) -> Option<usize> {
        self.elems.iter().position(|s| s.ptr_eq(sym))
    }

    /// Checks that `env` has a frame of matching length at every level this
    /// shape chain describes.
    pub fn check_plausibility(&self, env: &Env) {
        if self.elems.is_empty() {
            if let Some(prev) = &self.prev {
                prev.check_plausibility(env);
            }
            return;
        }
        let frame = env.frame();
        assert_eq!(
            frame.len(),
            self.elems.len(),
            "frame/shape length mismatch"
        );
        if let Some(prev) = &self.prev {
            prev.check_plausibility(&frame.prev);
        }
    }
}

pub struct Frame {
    vals: RefCell<Box<[Value]>>,
    prev: Env,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.vals.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Value {
        self.vals.borrow()[index].clone()
    }

    pub fn set(&self, index: usize, value: Value) {
        self.vals.borrow_mut()[index] = value;
    }

    pub fn prev(&self) -> &Env {
        &self.prev
    }
}

#[derive(Clone)]
pub enum Env {
    Toplevel,
    Frame(Rc<Frame>),
}

impl Env {
    /// A new frame over `prev`. Zero values allocate nothing.
    pub fn make(vals: Vec<Value>, prev: Env) -> Env {
        if vals.is_empty() {
            return prev;
        }
        Env::Frame(Rc::new(Frame {
            vals: RefCell::new(vals.into_boxed_slice()),
            prev,
        }))
    }

    pub fn is_toplevel(&self) -> bool {
        matches!(self, Env::Toplevel)
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        match (self, other) {
            (Env::Toplevel, Env::Toplevel) => true,
            (Env::Frame(a), Env::Frame(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn frame(&self) -> &Rc<Frame> {
        match self {
            Env::Frame(frame) => frame,
            Env::Toplevel => panic!("expected a frame, reached toplevel"),
        }
    }

    /// The enclosing environment, skipping the level `shape` describes.
    /// An empty shape has no frame of its own.
    pub fn get_prev(&self, shape: &Shape) -> Env {
        if shape.is_empty() {
            return self.clone();
        }
        self.frame().prev.clone()
    }

    /// Raw slot lookup: cell variables come back as Value::Cell.
    pub fn lookup(
        &self,
        sym: &Symbol,
        shape: Option<&Rc<Shape>>,
        globals: &Globals,
    ) -> Result<Value, RuntimeError> {
        let mut env = self.clone();
        let mut current = shape.cloned();
        while let Some(s) = current {
            if let Some(i) = s.position(sym) {
                let frame = env.frame();
                assert_eq!(frame.len(), s.len(), "frame/shape length mismatch");
                return Ok(frame.get(i));
            }
            env = env.get_prev(&s);
            current = s.prev.clone();
        }
        globals.lookup(sym)
    }

    pub fn set(
        &self,
        sym: &Symbol,
        value: Value,
        shape: Option<&Rc<Shape>>,
        globals: &mut Globals,
    ) -> Result<(), RuntimeError> {
        let mut env = self.clone();
        let mut current = shape.cloned();
        while let Some(s) = current {
            if let Some(i) = s.position(sym) {
                let frame = env.frame();
                assert_eq!(frame.len(), s.len(), "frame/shape length mismatch");
                frame.set(i, value);
                return Ok(());
            }
            env = env.get_prev(&s);
            current = s.prev.clone();
        }
        globals.set(sym, value)
    }

    /// Direct slot access for frames whose layout the caller built.
    pub(crate) fn slot(&self, index: usize) -> Value {
        self.frame().get(index)
    }
}

// RUST CONCEPT: Environment sharing as an identity walk
// Walk the call-site shape chain and the live environment together. If we
// reach the closure's free-variable shape while standing on the very frame
// the closure captured, the live frame is reused. Either way the result is
// the same frame object; the walk only decides how fast we find it.
pub fn find_env_in_chain(
    frees: &Rc<Shape>,
    target: &Env,
    call_shape: Option<&Rc<Shape>>,
    call_env: &Env,
) -> (Env, bool) {
    let mut env = call_env.clone();
    let mut current = call_shape.cloned();
    while let Some(s) = current {
        if Rc::ptr_eq(&s, frees) && env.ptr_eq(target) {
            return (env, true);
        }
        if !s.is_empty() && env.is_toplevel() {
            break;
        }
        env = env.get_prev(&s);
        current = s.prev.clone();
    }
    (target.clone(), false)
}

// ---------------------------------------------------------------------------
// Toplevel

#[derive(Default)]
pub struct Globals {
    bindings: HashMap<Symbol, Rc<Cell>>,
    version: u64,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cell(&self, sym: &Symbol) -> Option<Rc<Cell>> {
        self.bindings.get(sym).cloned()
    }

    pub fn is_defined(&self, sym: &Symbol) -> bool {
        self.bindings.contains_key(sym)
    }

    pub fn lookup(&self, sym: &Symbol) -> Result<Value, RuntimeError> {
        match self.bindings.get(sym) {
            Some(cell) => Ok(cell.get()),
            None => Err(RuntimeError::Unbound(sym.name().to_string())),
        }
    }

    /// Defining a new name bumps the version; redefining mutates in place.
    pub fn define(&mut self, sym: &Symbol, value: Value) {
        if let Some(cell) = self.bindings.get(sym) {
            trace!(name = sym.name(), "redefine");
            cell.set(value);
            return;
        }
        self.bindings.insert(sym.clone(), Rc::new(Cell::new(value)));
        self.version += 1;
        trace!(name = sym.name(), version = self.version, "define");
    }

    // set! on a name that was never defined is an error, not a define
    pub fn set(&mut self, sym: &Symbol, value: Value) -> Result<(), RuntimeError> {
        match self.bindings.get(sym) {
            Some(cell) => {
                cell.set(value);
                Ok(())
            }
            None => Err(RuntimeError::Unbound(sym.name().to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().map(|s| s.name().to_string()).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Modules

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<Rc<str>, Rc<Module>>,
    instantiated: HashSet<Rc<str>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The registration name is chosen by the loader and may differ from the
    // module's declared name.
    pub fn add_module(&mut self, name: &str, module: Rc<Module>) -> Result<(), RuntimeError> {
        if self.modules.contains_key(name) {
            return Err(RuntimeError::Module(format!("{} is already registered", name)));
        }
        debug!(name, declared = &*module.name, "module registered");
        self.modules.insert(name.into(), module);
        Ok(())
    }

    pub fn find_module(&self, name: &str) -> Option<Rc<Module>> {
        self.modules.get(name).cloned()
    }

    /// Returns true the first time a module is marked, false afterwards.
    pub fn mark_instantiated(&mut self, name: &str) -> bool {
        if self.instantiated.contains(name) {
            return false;
        }
        debug!(name, "module instantiated");
        self.instantiated.insert(name.into());
        true
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;

    fn sym(name: &str) -> Symbol {
        Symbol::uninterned(name)
    }

    #[test]
    fn test_frame_round_trip() {
        let (a, b, c) = (sym("a"), sym("b"), sym("c"));
        let shape = Shape::new(vec![a.clone(), b.clone(), c.clone()], None);
        let env = Env::make(
            vec![Value::fixnum(1), Value::fixnum(2), Value::fixnum(3)],
            Env::Toplevel,
        );
        let mut globals = Globals::new();
        shape.check_plausibility(&env);

        let read = |s: &Symbol, g: &Globals| env.lookup(s, Some(&shape), g).ok().and_then(|v| v.as_fixnum());
        assert_eq!(read(&b, &globals), Some(2));
        env.set(&b, Value::fixnum(9), Some(&shape), &mut globals).unwrap();
        assert_eq!(read(&b, &globals), Some(9));
        assert_eq!(read(&a, &globals), Some(1));
        assert_eq!(read(&c, &globals), Some(3));
    }

    #[test]
    fn test_empty_shape_is_elided() {
        let outer = sym("x");
        let outer_shape = Shape::new(vec![outer.clone()], None);
        let inner_shape = Shape::new(Vec::new(), Some(outer_shape.clone()));
        let env = Env::make(vec![Value::fixnum(4)], Env::Toplevel);
        let inner = Env::make(Vec::new(), env.clone());
        assert!(inner.ptr_eq(&env));
        assert!(inner.get_prev(&inner_shape).ptr_eq(&env));

        let globals = Globals::new();
        let v = inner.lookup(&outer, Some(&inner_shape), &globals).unwrap();
        assert_eq!(v.as_fixnum(), Some(4));
    }

    #[test]
    fn test_lookup_falls_through_to_globals() {
        let x = sym("x");
        let mut globals = Globals::new();
        let missing = Env::Toplevel.lookup(&x, None, &globals);
        assert!(matches!(missing, Err(RuntimeError::Unbound(ref n)) if n == "x"), "Expected Unbound, got {:?}", missing);

        globals.define(&x, Value::fixnum(1));
        let v = Env::Toplevel.lookup(&x, None, &globals).unwrap();
        assert_eq!(v.as_fixnum(), Some(1));
    }

    #[test]
    #[should_panic(expected = "frame/shape length mismatch")]
    fn test_mismatched_frame_panics() {
        let shape = Shape::new(vec![sym("a"), sym("b")], None);
        let env = Env::make(vec![Value::fixnum(1)], Env::Toplevel);
        shape.check_plausibility(&env);
    }

    #[test]
    fn test_version_bumps_only_on_new_names() {
        let x = sym("x");
        let mut globals = Globals::new();
        globals.define(&x, Value::fixnum(1));
        let v1 = globals.version();
        let cell = globals.cell(&x).unwrap();
        globals.define(&x, Value::fixnum(2));
        assert_eq!(globals.version(), v1);
        assert_eq!(cell.get().as_fixnum(), Some(2));

        globals.define(&sym("y"), Value::Null);
        assert_eq!(globals.version(), v1 + 1);
    }

    #[test]
    fn test_set_requires_definition() {
        let mut globals = Globals::new();
        let result = globals.set(&sym("nope"), Value::Void);
        assert!(matches!(result, Err(RuntimeError::Unbound(_))), "Expected Unbound, got {:?}", result);
    }

    #[test]
    fn test_sharing_walk_finds_captured_frame() {
        let frees = Shape::new(vec![sym("f")], None);
        let args = Shape::new(vec![sym("n")], Some(frees.clone()));
        let captured = Env::make(vec![Value::Void], Env::Toplevel);
        let live = Env::make(vec![Value::fixnum(0)], captured.clone());

        let (env, hit) = find_env_in_chain(&frees, &captured, Some(&args), &live);
        assert!(hit);
        assert!(env.ptr_eq(&captured));

        let other = Env::make(vec![Value::Void], Env::Toplevel);
        let (env, hit) = find_env_in_chain(&frees, &other, Some(&args), &live);
        assert!(!hit);
        assert!(env.ptr_eq(&other));
    }

    #[test]
    fn test_module_registration_is_unique() {
        let mut registry = ModuleRegistry::new();
        let module = Rc::new(Module {
            name: "m".into(),
            body: Rc::new(Ast::Quote(Value::Void)),
        });
        registry.add_module("m", module.clone()).unwrap();
        let again = registry.add_module("m", module);
        assert!(matches!(again, Err(RuntimeError::Module(_))), "Expected Module error, got {:?}", again);
        assert!(registry.find_module("m").is_some());
        assert!(registry.mark_instantiated("m"));
        assert!(!registry.mark_instantiated("m"));
    }
}
