// AST produced by the expander and walked by the trampoline.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::Cell;
use crate::env::{Env, Globals, Shape};
use crate::error::RuntimeError;
use crate::value::{Arity, Closure, Symbol, Value};

pub enum Ast {
    Quote(Value),
    // `shape` is the innermost shape at the reference site, None at toplevel
    LexicalVar {
        sym: Symbol,
        shape: Option<Rc<Shape>>,
    },
    CellRef {
        sym: Symbol,
        shape: Option<Rc<Shape>>,
    },
    ToplevelVar(ToplevelVar),
    SetBang(Rc<SetBang>),
    If {
        test: Rc<Ast>,
        then: Rc<Ast>,
        els: Rc<Ast>,
    },
    Begin(Rc<[Rc<Ast>]>),
    Begin0 {
        first: Rc<Ast>,
        rest: Rc<[Rc<Ast>]>,
    },
    App(Rc<App>),
    CaseLambda(Rc<CaseLambda>),
    Let(Rc<Let>),
    Letrec(Rc<Letrec>),
    DefineValues(Rc<DefineValues>),
    WithContinuationMark(Rc<WithContinuationMark>),
    ModuleDecl(Rc<Module>),
    Require(Rc<str>),
}

impl Ast {
    /// Simple nodes evaluate to one value without pushing a frame.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            Ast::Quote(_)
                | Ast::LexicalVar { .. }
                | Ast::CellRef { .. }
                | Ast::ToplevelVar(_)
                | Ast::CaseLambda(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Ast::Quote(_) => "quote",
            Ast::LexicalVar { .. } => "lexical-var",
            Ast::CellRef { .. } => "cell-ref",
            Ast::ToplevelVar(_) => "toplevel-var",
            Ast::SetBang(_) => "set!",
            Ast::If { .. } => "if",
            Ast::Begin(_) => "begin",
            Ast::Begin0 { .. } => "begin0",
            Ast::App(_) => "app",
            Ast::CaseLambda(_) => "case-lambda",
            Ast::Let(_) => "let-values",
            Ast::Letrec(_) => "letrec-values",
            Ast::DefineValues(_) => "define-values",
            Ast::WithContinuationMark(_) => "with-continuation-mark",
            Ast::ModuleDecl(_) => "module",
            Ast::Require(_) => "require",
        }
    }
}

// RUST CONCEPT: A version-stamped cache in a RefCell
// The AST is shared and immutable, but a toplevel reference remembers the
// global cell it resolved to together with the store version at the time.
pub struct ToplevelVar {
    pub sym: Symbol,
    cache: RefCell<Option<(u64, Rc<Cell>)>>,
}

impl ToplevelVar {
    pub fn new(sym: Symbol) -> Self {
        Self {
            sym,
            cache: RefCell::new(None),
        }
    }

    pub fn resolve(&self, globals: &Globals) -> Result<Rc<Cell>, RuntimeError> {
        if let Some((version, cell)) = &*self.cache.borrow() {
            if *version == globals.version() {
                return Ok(cell.clone());
            }
        }
        let cell = globals
            .cell(&self.sym)
            .ok_or_else(|| RuntimeError::Unbound(self.sym.name().to_string()))?;
        *self.cache.borrow_mut() = Some((globals.version(), cell.clone()));
        Ok(cell)
    }

    pub fn is_cached(&self) -> bool {
        self.cache.borrow().is_some()
    }
}

pub enum SetTarget {
    Lexical { sym: Symbol, shape: Option<Rc<Shape>> },
    Cell { sym: Symbol, shape: Option<Rc<Shape>> },
    Toplevel(ToplevelVar),
}

pub struct SetBang {
    pub target: SetTarget,
    pub rhs: Rc<Ast>,
}

pub struct App {
    pub rator: Rc<Ast>,
    pub rands: Vec<Rc<Ast>>,
    // Call-site shape, walked by the environment-sharing shortcut
    pub shape: Option<Rc<Shape>>,
}

pub struct Lambda {
    pub formals: Vec<Symbol>,
    pub rest: Option<Symbol>,
    // formals (then rest); enclosing shape is `frees`
    pub args: Rc<Shape>,
    // captured variables; enclosing shape is the toplevel
    pub frees: Rc<Shape>,
    // which argument slots hold a cell
    pub boxed: Vec<bool>,
    pub body: Rc<Ast>,
    // shape at the definition site, used to read the free variables
    pub enclosing: Option<Rc<Shape>>,
}

impl Lambda {
    pub fn arity(&self) -> Arity {
        match self.rest {
            Some(_) => Arity::at_least(self.formals.len()),
            None => Arity::exactly(self.formals.len()),
        }
    }

    pub fn accepts(&self, n: usize) -> bool {
        match self.rest {
            Some(_) => n >= self.formals.len(),
            None => n == self.formals.len(),
        }
    }

    /// Lays out the argument frame: rest arguments gathered into a fresh
    /// list, mutated parameters wrapped in cells.
    pub fn bind(&self, mut args: Vec<Value>, specialize: bool) -> Vec<Value> {
        if self.rest.is_some() {
            let tail = args.split_off(self.formals.len());
            args.push(Value::list_with(tail, Value::Null, specialize));
        }
        for (slot, &boxed) in args.iter_mut().zip(&self.boxed) {
            if boxed {
                let v = std::mem::replace(slot, Value::Void);
                *slot = Value::new_cell(v);
            }
        }
        args
    }

    /// Copies the free variables out of the defining environment.
    pub fn capture(&self, env: &Env, globals: &Globals) -> Result<Env, RuntimeError> {
        let vals = self
            .frees
            .elems()
            .iter()
            .map(|sym| env.lookup(sym, self.enclosing.as_ref(), globals))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Env::make(vals, Env::Toplevel))
    }
}

pub struct CaseLambda {
    pub lams: Vec<Lambda>,
    pub name: Option<Rc<str>>,
    pub arity: Arity,
}

impl CaseLambda {
    pub fn new(lams: Vec<Lambda>, name: Option<Rc<str>>) -> Self {
        let arity = lams
            .iter()
            .map(Lambda::arity)
            .reduce(|a, b| a.union(&b))
            .unwrap_or_default();
        Self { lams, name, arity }
    }

    pub fn make_closure(self: &Rc<Self>, env: &Env, globals: &Globals) -> Result<Value, RuntimeError> {
        let envs = self
            .lams
            .iter()
            .map(|lam| lam.capture(env, globals))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Closure(Rc::new(Closure {
            lambda: self.clone(),
            envs,
        })))
    }

    /// Index of the first arm accepting `n` arguments.
    pub fn select(&self, n: usize) -> Result<usize, RuntimeError> {
        if let Some(i) = self.lams.iter().position(|lam| lam.accepts(n)) {
            return Ok(i);
        }
        let name = match (&self.name, self.lams.len()) {
            (Some(name), 1) => name.to_string(),
            (Some(name), _) => format!("{} (no matching arity in case-lambda)", name),
            (None, 1) => "#<procedure>".to_string(),
            (None, _) => "case-lambda (no matching arity)".to_string(),
        };
        Err(RuntimeError::Arity {
            name,
            expected: self.arity.describe(),
            given: n,
        })
    }
}

pub struct Let {
    pub args: Rc<Shape>,
    // values each right-hand side must deliver
    pub counts: Vec<usize>,
    pub boxed: Vec<bool>,
    pub rhss: Vec<Rc<Ast>>,
    pub body: Rc<Ast>,
}

// Every letrec variable lives in a cell that starts out undefined
pub struct Letrec {
    pub args: Rc<Shape>,
    pub counts: Vec<usize>,
    pub offsets: Vec<usize>,
    pub rhss: Vec<Rc<Ast>>,
    pub body: Rc<Ast>,
}

impl Letrec {
    pub fn new(args: Rc<Shape>, counts: Vec<usize>, rhss: Vec<Rc<Ast>>, body: Rc<Ast>) -> Self {
        let offsets = counts
            .iter()
            .scan(0, |acc, &n| {
                let start = *acc;
                *acc += n;
                Some(start)
            })
            .collect();
        Self {
            args,
            counts,
            offsets,
            rhss,
            body,
        }
    }
}

pub struct DefineValues {
    pub names: Vec<Symbol>,
    pub rhs: Rc<Ast>,
}

pub struct WithContinuationMark {
    pub key: Rc<Ast>,
    pub value: Rc<Ast>,
    pub body: Rc<Ast>,
}

pub struct Module {
    pub name: Rc<str>,
    pub body: Rc<Ast>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lambda(formals: &[&str], rest: Option<&str>, boxed: Vec<bool>) -> Lambda {
        let formals: Vec<Symbol> = formals.iter().map(|n| Symbol::uninterned(n)).collect();
        let rest = rest.map(Symbol::uninterned);
        let frees = Shape::new(Vec::new(), None);
        let mut elems = formals.clone();
        elems.extend(rest.clone());
        Lambda {
            formals,
            rest,
            args: Shape::new(elems, Some(frees.clone())),
            frees,
            boxed,
            body: Rc::new(Ast::Quote(Value::Void)),
            enclosing: None,
        }
    }

    #[test]
    fn test_bind_gathers_rest() {
        let lam = lambda(&["a"], Some("more"), vec![false, false]);
        assert!(lam.accepts(1));
        assert!(lam.accepts(3));
        assert!(!lam.accepts(0));
        let frame = lam.bind(vec![Value::fixnum(1), Value::fixnum(2), Value::fixnum(3)], true);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[1].to_string(), "(2 3)");
    }

    #[test]
    fn test_bind_boxes_mutated_slots() {
        let lam = lambda(&["a", "b"], None, vec![false, true]);
        let frame = lam.bind(vec![Value::fixnum(1), Value::fixnum(2)], true);
        assert!(matches!(frame[0], Value::Fixnum(_)), "Expected fixnum, got {:?}", frame[0]);
        assert!(matches!(frame[1], Value::Cell(_)), "Expected cell, got {:?}", frame[1]);
    }

    #[test]
    fn test_case_lambda_selection() {
        let cl = CaseLambda::new(
            vec![lambda(&[], None, vec![]), lambda(&["x", "y"], None, vec![false, false])],
            Some("pick".into()),
        );
        assert_eq!(cl.select(0).unwrap(), 0);
        assert_eq!(cl.select(2).unwrap(), 1);
        let err = cl.select(1);
        assert!(matches!(err, Err(RuntimeError::Arity { given: 1, .. })), "Expected arity error, got {:?}", err.err());
        assert_eq!(cl.arity, Arity { counts: vec![0, 2], at_least: None });
    }

    #[test]
    fn test_toplevel_cache_tracks_version() {
        let x = Symbol::uninterned("x");
        let var = ToplevelVar::new(x.clone());
        let mut globals = Globals::new();
        assert!(var.resolve(&globals).is_err());
        assert!(!var.is_cached());

        globals.define(&x, Value::fixnum(1));
        let cell = var.resolve(&globals).unwrap();
        assert!(var.is_cached());
        globals.define(&x, Value::fixnum(2));
        let again = var.resolve(&globals).unwrap();
        assert!(Rc::ptr_eq(&cell, &again));
        assert_eq!(again.get().as_fixnum(), Some(2));
    }

    #[test]
    fn test_letrec_offsets() {
        let shape = Shape::new(
            ["a", "b", "c"].iter().map(|n| Symbol::uninterned(n)).collect(),
            None,
        );
        let body = Rc::new(Ast::Quote(Value::Void));
        let letrec = Letrec::new(shape, vec![2, 0, 1], vec![body.clone(), body.clone(), body.clone()], body);
        assert_eq!(letrec.offsets, vec![0, 2, 2]);
    }
}
