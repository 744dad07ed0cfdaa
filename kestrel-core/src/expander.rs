// Expander: datums to AST
//
// Two passes. `Expander` rewrites a datum into the small core language
// (`Expr`), removing derived forms and internal definitions. `Compiler` then
// resolves every variable against static frame shapes and produces the AST
// the trampoline walks.
//
// Frame layout for a lambda arm: the argument shape's enclosing shape is the
// arm's free-variable shape, whose enclosing shape is the toplevel. A
// closure copies its free variables when it is created, so any variable that
// is the target of set! lives in a cell shared by every copy.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{
    App, Ast, CaseLambda, DefineValues, Lambda, Let, Letrec, Module, SetBang, SetTarget, ToplevelVar,
    WithContinuationMark,
};
use crate::env::Shape;
use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::{Symbol, Value};

// ---------------------------------------------------------------------------
// Core language

#[derive(Debug)]
enum Expr {
    Quote(Value),
    Var(Symbol),
    Set(Symbol, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Begin(Vec<Expr>),
    Begin0(Box<Expr>, Vec<Expr>),
    App(Box<Expr>, Vec<Expr>),
    Lambda(Vec<Arm>, Option<Rc<str>>),
    Let(Vec<Binding>, Box<Expr>),
    Letrec(Vec<Binding>, Box<Expr>),
    Define(Vec<Symbol>, Box<Expr>),
    Wcm(Box<Expr>, Box<Expr>, Box<Expr>),
    Module(Rc<str>, Vec<Expr>),
    Require(Rc<str>),
}

#[derive(Debug)]
struct Arm {
    formals: Vec<Symbol>,
    rest: Option<Symbol>,
    body: Box<Expr>,
}

#[derive(Debug)]
struct Binding {
    names: Vec<Symbol>,
    rhs: Expr,
}

/// Expands and compiles one top-level form.
pub fn expand_toplevel(rt: &mut Runtime, datum: &Value) -> Result<Rc<Ast>, RuntimeError> {
    let expr = Expander::new(rt).expand_top(datum)?;
    let mut mutated = HashSet::new();
    collect_mutated(&expr, &mut mutated);
    Compiler { mutated }.compile(&expr, &None)
}

// ---------------------------------------------------------------------------
// Pass 1: surface syntax to core language

struct Expander<'r> {
    rt: &'r mut Runtime,
    // lexically bound names, innermost last; they shadow special forms
    bound: Vec<Symbol>,
}

fn syntax(form: &str, datum: &Value) -> RuntimeError {
    RuntimeError::syntax(form, datum)
}

fn quote_void() -> Expr {
    Expr::Quote(Value::Void)
}

fn make_begin(mut exprs: Vec<Expr>) -> Expr {
    if exprs.len() == 1 {
        exprs.remove(0)
    } else {
        Expr::Begin(exprs)
    }
}

impl<'r> Expander<'r> {
    fn new(rt: &'r mut Runtime) -> Self {
        Self { rt, bound: Vec::new() }
    }

    fn is_bound(&self, sym: &Symbol) -> bool {
        self.bound.iter().any(|b| b == sym)
    }

    // Name of the special form `head` refers to, unless a local shadows it
    fn keyword_of<'v>(&self, head: &'v Value) -> Option<&'v str> {
        match head {
            Value::Symbol(sym) if !sym.is_unreadable() && !self.is_bound(sym) => Some(sym.name()),
            _ => None,
        }
    }

    fn with_bound<T>(&mut self, names: &[Symbol], f: impl FnOnce(&mut Self) -> T) -> T {
        let mark = self.bound.len();
        self.bound.extend(names.iter().cloned());
        let result = f(self);
        self.bound.truncate(mark);
        result
    }

    fn form_items(&self, form: &str, datum: &Value) -> Result<Vec<Value>, RuntimeError> {
        datum.list_to_vec().ok_or_else(|| syntax(form, datum))
    }

    fn symbol(&self, form: &str, datum: &Value, whole: &Value) -> Result<Symbol, RuntimeError> {
        datum.as_symbol().cloned().ok_or_else(|| syntax(form, whole))
    }

    // -- toplevel ----------------------------------------------------------

    fn expand_top(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        if let Value::Pair(p) = datum {
            let head = p.car();
            match self.keyword_of(&head) {
                Some("define") | Some("define-values") => {
                    let (names, rhs) = self.expand_definition(datum)?;
                    return Ok(Expr::Define(names, Box::new(rhs)));
                }
                Some("begin") => {
                    let items = self.form_items("begin", datum)?;
                    if items.len() == 1 {
                        return Ok(quote_void());
                    }
                    let forms = items[1..]
                        .iter()
                        .map(|d| self.expand_top(d))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(make_begin(forms));
                }
                Some("module") => return self.expand_module(datum),
                Some("require") => return self.expand_require(datum),
                _ => {}
            }
        }
        self.expand(datum)
    }

    fn expand_module(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        let items = self.form_items("module", datum)?;
        let name = match items.get(1) {
            Some(Value::Symbol(s)) => Rc::from(s.name()),
            Some(Value::String(s)) => Rc::from(s.text().as_str()),
            _ => return Err(syntax("module", datum)),
        };
        let body = items[2..]
            .iter()
            .map(|d| self.expand_top(d))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Expr::Module(name, body))
    }

    fn expand_require(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        let items = self.form_items("require", datum)?;
        let mut requires = Vec::new();
        for spec in &items[1..] {
            let name: Rc<str> = match spec {
                Value::Symbol(s) => Rc::from(s.name()),
                Value::String(s) => Rc::from(s.text().as_str()),
                // 'name
                Value::Pair(_) => match spec.list_to_vec().as_deref() {
                    Some([Value::Symbol(q), Value::Symbol(s)]) if q.name() == "quote" => Rc::from(s.name()),
                    _ => return Err(syntax("require", datum)),
                },
                _ => return Err(syntax("require", datum)),
            };
            requires.push(Expr::Require(name));
        }
        if requires.is_empty() {
            return Ok(quote_void());
        }
        Ok(make_begin(requires))
    }

    // `(define x e)`, `(define (f . formals) body ...)`, `(define-values (x ...) e)`
    fn expand_definition(&mut self, datum: &Value) -> Result<(Vec<Symbol>, Expr), RuntimeError> {
        let items = self.form_items("define", datum)?;
        let head = items.first().and_then(Value::as_symbol).map(|s| s.name().to_string());
        if head.as_deref() == Some("define-values") {
            let [_, formals, rhs] = items.as_slice() else {
                return Err(syntax("define-values", datum));
            };
            let names = self.id_list("define-values", formals, datum)?;
            return Ok((names, self.expand(rhs)?));
        }
        match items.get(1) {
            Some(Value::Symbol(name)) => {
                let rhs = match items.len() {
                    // (define x) leaves x undefined
                    2 => Expr::Quote(Value::Undefined),
                    3 => self.expand_named(&items[2], Some(Rc::from(name.name())))?,
                    _ => return Err(syntax("define", datum)),
                };
                Ok((vec![name.clone()], rhs))
            }
            Some(Value::Pair(p)) => {
                let name = self.symbol("define", &p.car(), datum)?;
                if items.len() < 3 {
                    return Err(syntax("define", datum));
                }
                let arm = self.expand_arm("define", p.cdr(), &items[2..], datum)?;
                Ok((vec![name.clone()], Expr::Lambda(vec![arm], Some(Rc::from(name.name())))))
            }
            _ => Err(syntax("define", datum)),
        }
    }

    fn id_list(&self, form: &str, datum: &Value, whole: &Value) -> Result<Vec<Symbol>, RuntimeError> {
        let items = self.form_items(form, datum)?;
        let mut names: Vec<Symbol> = Vec::with_capacity(items.len());
        for item in &items {
            let sym = self.symbol(form, item, whole)?;
            if names.contains(&sym) {
                return Err(RuntimeError::Syntax {
                    form: form.to_string(),
                    datum: format!("duplicate identifier {} in {}", sym.name(), whole),
                });
            }
            names.push(sym);
        }
        Ok(names)
    }

    // -- expressions -------------------------------------------------------

    fn expand(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        self.expand_named(datum, None)
    }

    // `name` is the variable a lambda is bound to, used for printing
    fn expand_named(&mut self, datum: &Value, name: Option<Rc<str>>) -> Result<Expr, RuntimeError> {
        match datum {
            Value::Symbol(sym) => Ok(Expr::Var(sym.clone())),
            Value::Null => Err(RuntimeError::Syntax {
                form: "#%app".to_string(),
                datum: "missing procedure expression in ()".to_string(),
            }),
            Value::Pair(p) => {
                let head = p.car();
                match self.keyword_of(&head) {
                    Some("quote") => match self.form_items("quote", datum)?.as_slice() {
                        [_, quoted] => Ok(Expr::Quote(quoted.clone())),
                        _ => Err(syntax("quote", datum)),
                    },
                    Some("if") => self.expand_if(datum),
                    Some("begin") => {
                        let items = self.form_items("begin", datum)?;
                        if items.len() < 2 {
                            return Err(syntax("begin", datum));
                        }
                        Ok(make_begin(self.expand_all(&items[1..])?))
                    }
                    Some("begin0") => {
                        let items = self.form_items("begin0", datum)?;
                        if items.len() < 2 {
                            return Err(syntax("begin0", datum));
                        }
                        let first = self.expand(&items[1])?;
                        let rest = self.expand_all(&items[2..])?;
                        Ok(Expr::Begin0(Box::new(first), rest))
                    }
                    Some("lambda") | Some("λ") => {
                        let items = self.form_items("lambda", datum)?;
                        if items.len() < 3 {
                            return Err(syntax("lambda", datum));
                        }
                        let arm = self.expand_arm("lambda", &items[1], &items[2..], datum)?;
                        Ok(Expr::Lambda(vec![arm], name))
                    }
                    Some("case-lambda") => self.expand_case_lambda(datum, name),
                    Some("define") | Some("define-values") => Err(RuntimeError::Syntax {
                        form: "define".to_string(),
                        datum: format!("not allowed in an expression context: {}", datum),
                    }),
                    Some("set!") => {
                        let items = self.form_items("set!", datum)?;
                        let [_, target, rhs] = items.as_slice() else {
                            return Err(syntax("set!", datum));
                        };
                        let sym = self.symbol("set!", target, datum)?;
                        let rhs = self.expand(rhs)?;
                        Ok(Expr::Set(sym, Box::new(rhs)))
                    }
                    Some("let") => self.expand_let(datum),
                    Some("let*") => self.expand_let_star(datum),
                    Some("letrec") | Some("letrec*") => self.expand_letrec(datum),
                    Some("let-values") => self.expand_let_values(datum, false),
                    Some("letrec-values") => self.expand_let_values(datum, true),
                    Some("with-continuation-mark") => {
                        let items = self.form_items("with-continuation-mark", datum)?;
                        let [_, key, value, body] = items.as_slice() else {
                            return Err(syntax("with-continuation-mark", datum));
                        };
                        Ok(Expr::Wcm(
                            Box::new(self.expand(key)?),
                            Box::new(self.expand(value)?),
                            Box::new(self.expand(body)?),
                        ))
                    }
                    Some("cond") => {
                        let items = self.form_items("cond", datum)?;
                        self.expand_cond(&items[1..], datum)
                    }
                    Some("when") | Some("unless") => {
                        let items = self.form_items("when", datum)?;
                        if items.len() < 3 {
                            return Err(syntax(head.to_string().as_str(), datum));
                        }
                        let test = self.expand(&items[1])?;
                        let body = make_begin(self.expand_all(&items[2..])?);
                        let (then, els) = if self.keyword_of(&head) == Some("when") {
                            (body, quote_void())
                        } else {
                            (quote_void(), body)
                        };
                        Ok(Expr::If(Box::new(test), Box::new(then), Box::new(els)))
                    }
                    Some("and") => {
                        let items = self.form_items("and", datum)?;
                        self.expand_and(&items[1..])
                    }
                    Some("or") => {
                        let items = self.form_items("or", datum)?;
                        self.expand_or(&items[1..])
                    }
                    Some("module") | Some("require") => Err(RuntimeError::Syntax {
                        form: head.to_string(),
                        datum: format!("not at module level: {}", datum),
                    }),
                    _ => {
                        let items = datum.list_to_vec().ok_or_else(|| syntax("#%app", datum))?;
                        let rator = self.expand(&items[0])?;
                        let rands = self.expand_all(&items[1..])?;
                        Ok(Expr::App(Box::new(rator), rands))
                    }
                }
            }
            // self-evaluating
            other => Ok(Expr::Quote(other.clone())),
        }
    }

    fn expand_all(&mut self, data: &[Value]) -> Result<Vec<Expr>, RuntimeError> {
        data.iter().map(|d| self.expand(d)).collect()
    }

    fn expand_if(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        let items = self.form_items("if", datum)?;
        let (test, then, els) = match items.as_slice() {
            [_, test, then] => (test, then, None),
            [_, test, then, els] => (test, then, Some(els)),
            _ => return Err(syntax("if", datum)),
        };
        let els = match els {
            Some(e) => self.expand(e)?,
            None => quote_void(),
        };
        Ok(Expr::If(
            Box::new(self.expand(test)?),
            Box::new(self.expand(then)?),
            Box::new(els),
        ))
    }

    // Formals: `(a b)`, `(a . rest)` or a lone `args`
    fn parse_formals(
        &self,
        form: &str,
        formals: &Value,
        whole: &Value,
    ) -> Result<(Vec<Symbol>, Option<Symbol>), RuntimeError> {
        let mut names: Vec<Symbol> = Vec::new();
        let mut current = formals.clone();
        let rest = loop {
            match current {
                Value::Null => break None,
                Value::Symbol(sym) => break Some(sym),
                Value::Pair(p) => {
                    names.push(self.symbol(form, &p.car(), whole)?);
                    current = p.cdr().clone();
                }
                _ => return Err(syntax(form, whole)),
            }
        };
        let mut seen: Vec<&Symbol> = Vec::new();
        for sym in names.iter().chain(rest.iter()) {
            if seen.contains(&sym) {
                return Err(RuntimeError::Syntax {
                    form: form.to_string(),
                    datum: format!("duplicate argument name {} in {}", sym.name(), whole),
                });
            }
            seen.push(sym);
        }
        Ok((names, rest))
    }

    fn expand_arm(&mut self, form: &str, formals: &Value, body: &[Value], whole: &Value) -> Result<Arm, RuntimeError> {
        let (formals, rest) = self.parse_formals(form, formals, whole)?;
        let mut params = formals.clone();
        params.extend(rest.iter().cloned());
        let body = self.with_bound(&params, |ex| ex.expand_body(body, whole))?;
        Ok(Arm {
            formals,
            rest,
            body: Box::new(body),
        })
    }

    fn expand_case_lambda(&mut self, datum: &Value, name: Option<Rc<str>>) -> Result<Expr, RuntimeError> {
        let items = self.form_items("case-lambda", datum)?;
        let mut arms = Vec::new();
        for clause in &items[1..] {
            let parts = self.form_items("case-lambda", clause)?;
            if parts.len() < 2 {
                return Err(syntax("case-lambda", datum));
            }
            arms.push(self.expand_arm("case-lambda", &parts[0], &parts[1..], datum)?);
        }
        Ok(Expr::Lambda(arms, name))
    }

    // RUST CONCEPT: Internal definitions become letrec
    // Definitions are collected first so every defined name is in scope for
    // every right-hand side. Expressions interleaved with definitions become
    // zero-value bindings to keep evaluation order.
    fn expand_body(&mut self, body: &[Value], whole: &Value) -> Result<Expr, RuntimeError> {
        if body.is_empty() {
            return Err(RuntimeError::Syntax {
                form: "lambda".to_string(),
                datum: format!("empty body in {}", whole),
            });
        }
        let forms = self.splice_body(body)?;
        if !forms.iter().any(|f| self.is_definition(f)) {
            return Ok(make_begin(self.expand_all(&forms)?));
        }

        let last_def = forms.iter().rposition(|f| self.is_definition(f)).unwrap_or(0);
        if last_def + 1 == forms.len() {
            return Err(RuntimeError::Syntax {
                form: "begin".to_string(),
                datum: format!("no expression after a sequence of internal definitions in {}", whole),
            });
        }

        let mut names = Vec::new();
        for form in &forms[..=last_def] {
            if self.is_definition(form) {
                names.extend(self.defined_names(form)?);
            }
        }

        self.with_bound(&names, |ex| {
            let mut bindings = Vec::new();
            for form in &forms[..=last_def] {
                if ex.is_definition(form) {
                    let (names, rhs) = ex.expand_definition(form)?;
                    bindings.push(Binding { names, rhs });
                } else {
                    let expr = ex.expand(form)?;
                    let values = ex.rt.lookup("values")?;
                    let nothing = Expr::App(Box::new(Expr::Quote(values)), Vec::new());
                    bindings.push(Binding {
                        names: Vec::new(),
                        rhs: Expr::Begin(vec![expr, nothing]),
                    });
                }
            }
            let tail = make_begin(ex.expand_all(&forms[last_def + 1..])?);
            Ok(Expr::Letrec(bindings, Box::new(tail)))
        })
    }

    // `(begin ...)` in a body splices its forms
    fn splice_body(&self, body: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let mut out = Vec::new();
        for form in body {
            match form {
                Value::Pair(p) if self.keyword_of(&p.car()) == Some("begin") => {
                    let items = self.form_items("begin", form)?;
                    out.extend(self.splice_body(&items[1..])?);
                }
                _ => out.push(form.clone()),
            }
        }
        Ok(out)
    }

    fn is_definition(&self, form: &Value) -> bool {
        match form {
            Value::Pair(p) => matches!(self.keyword_of(&p.car()), Some("define") | Some("define-values")),
            _ => false,
        }
    }

    fn defined_names(&self, form: &Value) -> Result<Vec<Symbol>, RuntimeError> {
        let items = self.form_items("define", form)?;
        match items.get(1) {
            Some(Value::Symbol(s)) => Ok(vec![s.clone()]),
            Some(Value::Pair(p)) if self.keyword_of(&items[0]) == Some("define") => {
                Ok(vec![self.symbol("define", &p.car(), form)?])
            }
            Some(formals) => self.id_list("define-values", formals, form),
            None => Err(syntax("define", form)),
        }
    }

    // `((name rhs) ...)`
    fn simple_bindings(&self, form: &str, bindings: &Value, whole: &Value) -> Result<Vec<(Symbol, Value)>, RuntimeError> {
        let mut out: Vec<(Symbol, Value)> = Vec::new();
        for binding in self.form_items(form, bindings)? {
            let parts = self.form_items(form, &binding)?;
            let [name, rhs] = parts.as_slice() else {
                return Err(syntax(form, whole));
            };
            let sym = self.symbol(form, name, whole)?;
            out.push((sym, rhs.clone()));
        }
        Ok(out)
    }

    fn expand_let(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        let items = self.form_items("let", datum)?;
        if items.len() < 3 {
            return Err(syntax("let", datum));
        }

        // named let: ((letrec ([name (lambda (x ...) body ...)]) name) rhs ...)
        if let Value::Symbol(loop_name) = &items[1] {
            if items.len() < 4 {
                return Err(syntax("let", datum));
            }
            let pairs = self.simple_bindings("let", &items[2], datum)?;
            let params: Vec<Symbol> = pairs.iter().map(|(s, _)| s.clone()).collect();
            let args = pairs
                .iter()
                .map(|(_, rhs)| self.expand(rhs))
                .collect::<Result<Vec<_>, _>>()?;
            let lambda = self.with_bound(std::slice::from_ref(loop_name), |ex| {
                ex.with_bound(&params, |ex| ex.expand_body(&items[3..], datum))
            })?;
            let arm = Arm {
                formals: params,
                rest: None,
                body: Box::new(lambda),
            };
            let proc = Expr::Letrec(
                vec![Binding {
                    names: vec![loop_name.clone()],
                    rhs: Expr::Lambda(vec![arm], Some(Rc::from(loop_name.name()))),
                }],
                Box::new(Expr::Var(loop_name.clone())),
            );
            return Ok(Expr::App(Box::new(proc), args));
        }

        let pairs = self.simple_bindings("let", &items[1], datum)?;
        let names: Vec<Symbol> = pairs.iter().map(|(s, _)| s.clone()).collect();
        self.check_distinct("let", &names, datum)?;
        let bindings = pairs
            .into_iter()
            .map(|(sym, rhs)| {
                let rhs = self.expand_named(&rhs, Some(Rc::from(sym.name())))?;
                Ok(Binding { names: vec![sym], rhs })
            })
            .collect::<Result<Vec<_>, RuntimeError>>()?;
        let body = self.with_bound(&names, |ex| ex.expand_body(&items[2..], datum))?;
        Ok(Expr::Let(bindings, Box::new(body)))
    }

    fn expand_let_star(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        let items = self.form_items("let*", datum)?;
        if items.len() < 3 {
            return Err(syntax("let*", datum));
        }
        let pairs = self.simple_bindings("let*", &items[1], datum)?;
        self.expand_let_star_from(&pairs, &items[2..], datum)
    }

    fn expand_let_star_from(&mut self, pairs: &[(Symbol, Value)], body: &[Value], datum: &Value) -> Result<Expr, RuntimeError> {
        let Some(((sym, rhs), rest)) = pairs.split_first() else {
            let body = self.expand_body(body, datum)?;
            return Ok(Expr::Let(Vec::new(), Box::new(body)));
        };
        let rhs = self.expand_named(rhs, Some(Rc::from(sym.name())))?;
        let inner = self.with_bound(std::slice::from_ref(sym), |ex| ex.expand_let_star_from(rest, body, datum))?;
        Ok(Expr::Let(
            vec![Binding {
                names: vec![sym.clone()],
                rhs,
            }],
            Box::new(inner),
        ))
    }

    fn expand_letrec(&mut self, datum: &Value) -> Result<Expr, RuntimeError> {
        let items = self.form_items("letrec", datum)?;
        if items.len() < 3 {
            return Err(syntax("letrec", datum));
        }
        let pairs = self.simple_bindings("letrec", &items[1], datum)?;
        let names: Vec<Symbol> = pairs.iter().map(|(s, _)| s.clone()).collect();
        self.check_distinct("letrec", &names, datum)?;
        self.with_bound(&names, |ex| {
            let bindings = pairs
                .iter()
                .map(|(sym, rhs)| {
                    let rhs = ex.expand_named(rhs, Some(Rc::from(sym.name())))?;
                    Ok(Binding {
                        names: vec![sym.clone()],
                        rhs,
                    })
                })
                .collect::<Result<Vec<_>, RuntimeError>>()?;
            let body = ex.expand_body(&items[2..], datum)?;
            Ok(Expr::Letrec(bindings, Box::new(body)))
        })
    }

    fn expand_let_values(&mut self, datum: &Value, recursive: bool) -> Result<Expr, RuntimeError> {
        let form = if recursive { "letrec-values" } else { "let-values" };
        let items = self.form_items(form, datum)?;
        if items.len() < 3 {
            return Err(syntax(form, datum));
        }
        let mut clauses = Vec::new();
        for clause in self.form_items(form, &items[1])? {
            let parts = self.form_items(form, &clause)?;
            let [formals, rhs] = parts.as_slice() else {
                return Err(syntax(form, datum));
            };
            clauses.push((self.id_list(form, formals, datum)?, rhs.clone()));
        }
        let all: Vec<Symbol> = clauses.iter().flat_map(|(names, _)| names.iter().cloned()).collect();
        self.check_distinct(form, &all, datum)?;

        let expand_clauses = |ex: &mut Self| {
            clauses
                .iter()
                .map(|(names, rhs)| {
                    Ok(Binding {
                        names: names.clone(),
                        rhs: ex.expand(rhs)?,
                    })
                })
                .collect::<Result<Vec<_>, RuntimeError>>()
        };

        if recursive {
            self.with_bound(&all, |ex| {
                let bindings = expand_clauses(ex)?;
                let body = ex.expand_body(&items[2..], datum)?;
                Ok(Expr::Letrec(bindings, Box::new(body)))
            })
        } else {
            let bindings = expand_clauses(self)?;
            let body = self.with_bound(&all, |ex| ex.expand_body(&items[2..], datum))?;
            Ok(Expr::Let(bindings, Box::new(body)))
        }
    }

    fn check_distinct(&self, form: &str, names: &[Symbol], whole: &Value) -> Result<(), RuntimeError> {
        for (i, sym) in names.iter().enumerate() {
            if names[..i].contains(sym) {
                return Err(RuntimeError::Syntax {
                    form: form.to_string(),
                    datum: format!("duplicate identifier {} in {}", sym.name(), whole),
                });
            }
        }
        Ok(())
    }

    // -- derived conditionals ------------------------------------------------

    fn expand_cond(&mut self, clauses: &[Value], whole: &Value) -> Result<Expr, RuntimeError> {
        let Some((clause, rest)) = clauses.split_first() else {
            return Ok(quote_void());
        };
        let parts = self.form_items("cond", clause)?;
        let Some(test) = parts.first() else {
            return Err(syntax("cond", whole));
        };

        if self.keyword_of(test) == Some("else") {
            if !rest.is_empty() || parts.len() < 2 {
                return Err(syntax("cond", whole));
            }
            return Ok(make_begin(self.expand_all(&parts[1..])?));
        }

        let test = self.expand(test)?;
        let otherwise = self.expand_cond(rest, whole)?;

        // (test) yields the test value itself
        if parts.len() == 1 {
            return Ok(self.or_chain(test, otherwise));
        }

        // (test => receiver)
        if parts.len() == 3 && self.keyword_of(&parts[1]) == Some("=>") {
            let receiver = self.expand(&parts[2])?;
            let temp = Symbol::uninterned("cond-value");
            return Ok(Expr::Let(
                vec![Binding {
                    names: vec![temp.clone()],
                    rhs: test,
                }],
                Box::new(Expr::If(
                    Box::new(Expr::Var(temp.clone())),
                    Box::new(Expr::App(Box::new(receiver), vec![Expr::Var(temp)])),
                    Box::new(otherwise),
                )),
            ));
        }

        let body = make_begin(self.expand_all(&parts[1..])?);
        Ok(Expr::If(Box::new(test), Box::new(body), Box::new(otherwise)))
    }

    fn expand_and(&mut self, items: &[Value]) -> Result<Expr, RuntimeError> {
        match items {
            [] => Ok(Expr::Quote(Value::Bool(true))),
            [only] => self.expand(only),
            [first, rest @ ..] => {
                let first = self.expand(first)?;
                let rest = self.expand_and(rest)?;
                Ok(Expr::If(Box::new(first), Box::new(rest), Box::new(Expr::Quote(Value::Bool(false)))))
            }
        }
    }

    fn expand_or(&mut self, items: &[Value]) -> Result<Expr, RuntimeError> {
        match items {
            [] => Ok(Expr::Quote(Value::Bool(false))),
            [only] => self.expand(only),
            [first, rest @ ..] => {
                let first = self.expand(first)?;
                let rest = self.expand_or(rest)?;
                Ok(self.or_chain(first, rest))
            }
        }
    }

    // (let ([t first]) (if t t rest)) with a temporary no program can name
    fn or_chain(&self, first: Expr, rest: Expr) -> Expr {
        let temp = Symbol::uninterned("or-part");
        Expr::Let(
            vec![Binding {
                names: vec![temp.clone()],
                rhs: first,
            }],
            Box::new(Expr::If(
                Box::new(Expr::Var(temp.clone())),
                Box::new(Expr::Var(temp)),
                Box::new(rest),
            )),
        )
    }
}

// ---------------------------------------------------------------------------
// Analyses over the core language

// Every set! target, by identity. A binder of one of these names gets a
// cell; over-approximating across shadowed names only costs a cell.
fn collect_mutated(expr: &Expr, out: &mut HashSet<Symbol>) {
    match expr {
        Expr::Quote(_) | Expr::Var(_) | Expr::Require(_) => {}
        Expr::Set(sym, rhs) => {
            out.insert(sym.clone());
            collect_mutated(rhs, out);
        }
        Expr::If(a, b, c) | Expr::Wcm(a, b, c) => {
            collect_mutated(a, out);
            collect_mutated(b, out);
            collect_mutated(c, out);
        }
        Expr::Begin(items) | Expr::Module(_, items) => items.iter().for_each(|e| collect_mutated(e, out)),
        Expr::Begin0(first, rest) | Expr::App(first, rest) => {
            collect_mutated(first, out);
            rest.iter().for_each(|e| collect_mutated(e, out));
        }
        Expr::Lambda(arms, _) => arms.iter().for_each(|arm| collect_mutated(&arm.body, out)),
        Expr::Let(bindings, body) | Expr::Letrec(bindings, body) => {
            bindings.iter().for_each(|b| collect_mutated(&b.rhs, out));
            collect_mutated(body, out);
        }
        Expr::Define(_, rhs) => collect_mutated(rhs, out),
    }
}

// Free variables in first-occurrence order
fn collect_free(expr: &Expr, bound: &mut Vec<Symbol>, out: &mut Vec<Symbol>) {
    let note = |sym: &Symbol, bound: &Vec<Symbol>, out: &mut Vec<Symbol>| {
        if !bound.contains(sym) && !out.contains(sym) {
            out.push(sym.clone());
        }
    };
    match expr {
        Expr::Quote(_) | Expr::Require(_) | Expr::Module(..) => {}
        Expr::Var(sym) => note(sym, bound, out),
        Expr::Set(sym, rhs) => {
            note(sym, bound, out);
            collect_free(rhs, bound, out);
        }
        Expr::If(a, b, c) | Expr::Wcm(a, b, c) => {
            collect_free(a, bound, out);
            collect_free(b, bound, out);
            collect_free(c, bound, out);
        }
        Expr::Begin(items) => items.iter().for_each(|e| collect_free(e, bound, out)),
        Expr::Begin0(first, rest) | Expr::App(first, rest) => {
            collect_free(first, bound, out);
            rest.iter().for_each(|e| collect_free(e, bound, out));
        }
        Expr::Lambda(arms, _) => {
            for arm in arms {
                let mark = bound.len();
                bound.extend(arm.formals.iter().cloned());
                bound.extend(arm.rest.iter().cloned());
                collect_free(&arm.body, bound, out);
                bound.truncate(mark);
            }
        }
        Expr::Let(bindings, body) => {
            bindings.iter().for_each(|b| collect_free(&b.rhs, bound, out));
            let mark = bound.len();
            bound.extend(bindings.iter().flat_map(|b| b.names.iter().cloned()));
            collect_free(body, bound, out);
            bound.truncate(mark);
        }
        Expr::Letrec(bindings, body) => {
            let mark = bound.len();
            bound.extend(bindings.iter().flat_map(|b| b.names.iter().cloned()));
            bindings.iter().for_each(|b| collect_free(&b.rhs, bound, out));
            collect_free(body, bound, out);
            bound.truncate(mark);
        }
        Expr::Define(_, rhs) => collect_free(rhs, bound, out),
    }
}

// ---------------------------------------------------------------------------
// Pass 2: resolution against static shapes

// Compile-time mirror of a runtime frame: the shape plus which slots hold
// cells. The chain follows the shape chain exactly.
struct Scope {
    shape: Rc<Shape>,
    cells: Vec<bool>,
    prev: Option<Rc<Scope>>,
}

enum Resolved {
    Lexical,
    Cell,
    Toplevel,
}

fn resolve(scope: &Option<Rc<Scope>>, sym: &Symbol) -> Resolved {
    let mut current = scope.as_ref();
    while let Some(s) = current {
        if let Some(i) = s.shape.position(sym) {
            return if s.cells[i] { Resolved::Cell } else { Resolved::Lexical };
        }
        current = s.prev.as_ref();
    }
    Resolved::Toplevel
}

fn shape_of(scope: &Option<Rc<Scope>>) -> Option<Rc<Shape>> {
    scope.as_ref().map(|s| s.shape.clone())
}

struct Compiler {
    mutated: HashSet<Symbol>,
}

impl Compiler {
    fn compile(&self, expr: &Expr, scope: &Option<Rc<Scope>>) -> Result<Rc<Ast>, RuntimeError> {
        let ast = match expr {
            Expr::Quote(v) => Ast::Quote(v.clone()),
            Expr::Var(sym) => match resolve(scope, sym) {
                Resolved::Lexical => Ast::LexicalVar {
                    sym: sym.clone(),
                    shape: shape_of(scope),
                },
                Resolved::Cell => Ast::CellRef {
                    sym: sym.clone(),
                    shape: shape_of(scope),
                },
                Resolved::Toplevel => Ast::ToplevelVar(ToplevelVar::new(sym.clone())),
            },
            Expr::Set(sym, rhs) => {
                let target = match resolve(scope, sym) {
                    Resolved::Lexical => SetTarget::Lexical {
                        sym: sym.clone(),
                        shape: shape_of(scope),
                    },
                    Resolved::Cell => SetTarget::Cell {
                        sym: sym.clone(),
                        shape: shape_of(scope),
                    },
                    Resolved::Toplevel => SetTarget::Toplevel(ToplevelVar::new(sym.clone())),
                };
                Ast::SetBang(Rc::new(SetBang {
                    target,
                    rhs: self.compile(rhs, scope)?,
                }))
            }
            Expr::If(test, then, els) => Ast::If {
                test: self.compile(test, scope)?,
                then: self.compile(then, scope)?,
                els: self.compile(els, scope)?,
            },
            Expr::Begin(items) => Ast::Begin(self.compile_all(items, scope)?.into()),
            Expr::Begin0(first, rest) => Ast::Begin0 {
                first: self.compile(first, scope)?,
                rest: self.compile_all(rest, scope)?.into(),
            },
            Expr::App(rator, rands) => Ast::App(Rc::new(App {
                rator: self.compile(rator, scope)?,
                rands: self.compile_all(rands, scope)?,
                shape: shape_of(scope),
            })),
            Expr::Lambda(arms, name) => {
                let lams = arms
                    .iter()
                    .map(|arm| self.compile_arm(arm, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ast::CaseLambda(Rc::new(CaseLambda::new(lams, name.clone())))
            }
            Expr::Let(bindings, body) => {
                let names: Vec<Symbol> = bindings.iter().flat_map(|b| b.names.iter().cloned()).collect();
                let boxed: Vec<bool> = names.iter().map(|s| self.mutated.contains(s)).collect();
                let rhss = bindings
                    .iter()
                    .map(|b| self.compile(&b.rhs, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let counts = bindings.iter().map(|b| b.names.len()).collect();
                let args = Shape::new(names, shape_of(scope));
                let inner = Some(Rc::new(Scope {
                    shape: args.clone(),
                    cells: boxed.clone(),
                    prev: scope.clone(),
                }));
                Ast::Let(Rc::new(Let {
                    args,
                    counts,
                    boxed,
                    rhss,
                    body: self.compile(body, &inner)?,
                }))
            }
            Expr::Letrec(bindings, body) => {
                let names: Vec<Symbol> = bindings.iter().flat_map(|b| b.names.iter().cloned()).collect();
                let args = Shape::new(names, shape_of(scope));
                let inner = Some(Rc::new(Scope {
                    shape: args.clone(),
                    cells: vec![true; args.len()],
                    prev: scope.clone(),
                }));
                let rhss = bindings
                    .iter()
                    .map(|b| self.compile(&b.rhs, &inner))
                    .collect::<Result<Vec<_>, _>>()?;
                let counts = bindings.iter().map(|b| b.names.len()).collect();
                Ast::Letrec(Rc::new(Letrec::new(args, counts, rhss, self.compile(body, &inner)?)))
            }
            Expr::Define(names, rhs) => Ast::DefineValues(Rc::new(DefineValues {
                names: names.clone(),
                rhs: self.compile(rhs, scope)?,
            })),
            Expr::Wcm(key, value, body) => Ast::WithContinuationMark(Rc::new(WithContinuationMark {
                key: self.compile(key, scope)?,
                value: self.compile(value, scope)?,
                body: self.compile(body, scope)?,
            })),
            Expr::Module(name, forms) => {
                let body = if forms.is_empty() {
                    Rc::new(Ast::Quote(Value::Void))
                } else {
                    Rc::new(Ast::Begin(self.compile_all(forms, &None)?.into()))
                };
                Ast::ModuleDecl(Rc::new(Module {
                    name: name.clone(),
                    body,
                }))
            }
            Expr::Require(name) => Ast::Require(name.clone()),
        };
        Ok(Rc::new(ast))
    }

    fn compile_all(&self, exprs: &[Expr], scope: &Option<Rc<Scope>>) -> Result<Vec<Rc<Ast>>, RuntimeError> {
        exprs.iter().map(|e| self.compile(e, scope)).collect()
    }

    fn compile_arm(&self, arm: &Arm, scope: &Option<Rc<Scope>>) -> Result<Lambda, RuntimeError> {
        let mut params = arm.formals.clone();
        params.extend(arm.rest.iter().cloned());

        // free variables that are lexical here; the rest are toplevel
        let mut free = Vec::new();
        collect_free(&arm.body, &mut params.clone(), &mut free);
        let mut frees: Vec<(Symbol, bool)> = free
            .into_iter()
            .filter_map(|sym| match resolve(scope, &sym) {
                Resolved::Lexical => Some((sym, false)),
                Resolved::Cell => Some((sym, true)),
                Resolved::Toplevel => None,
            })
            .collect();
        frees.sort_by(|a, b| a.0.name().cmp(b.0.name()));

        let free_shape = Shape::new(frees.iter().map(|(s, _)| s.clone()).collect(), None);
        let free_scope = Rc::new(Scope {
            shape: free_shape.clone(),
            cells: frees.iter().map(|(_, cell)| *cell).collect(),
            prev: None,
        });

        let boxed: Vec<bool> = params.iter().map(|s| self.mutated.contains(s)).collect();
        let args = Shape::new(params, Some(free_shape.clone()));
        let body_scope = Some(Rc::new(Scope {
            shape: args.clone(),
            cells: boxed.clone(),
            prev: Some(free_scope),
        }));

        Ok(Lambda {
            formals: arm.formals.clone(),
            rest: arm.rest.clone(),
            args,
            frees: free_shape,
            boxed,
            body: self.compile(&arm.body, &body_scope)?,
            enclosing: shape_of(scope),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn expand_str(rt: &mut Runtime, src: &str) -> Result<Rc<Ast>, RuntimeError> {
        let datum = parse(src, rt).unwrap().remove(0);
        expand_toplevel(rt, &datum)
    }

    fn lambda_of(ast: &Ast) -> &Lambda {
        match ast {
            Ast::CaseLambda(cl) => &cl.lams[0],
            other => panic!("Expected lambda, got {}", other.kind()),
        }
    }

    #[test]
    fn test_free_variables_are_lexical_and_sorted() {
        let mut rt = Runtime::new();
        let ast = expand_str(&mut rt, "(lambda (b a) (lambda (x) (list x b a car)))").unwrap();
        let outer = lambda_of(&ast);
        assert!(outer.frees.is_empty());
        let Ast::CaseLambda(inner) = &*outer.body else {
            panic!("Expected inner lambda");
        };
        let names: Vec<&str> = inner.lams[0].frees.elems().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        // the argument shape sits on the free shape, which sits on toplevel
        let args = &inner.lams[0].args;
        assert!(Rc::ptr_eq(args.prev().unwrap(), &inner.lams[0].frees));
        assert!(inner.lams[0].frees.prev().is_none());
    }

    #[test]
    fn test_mutated_parameters_get_cells() {
        let mut rt = Runtime::new();
        let ast = expand_str(&mut rt, "(lambda (x y) (set! x 1) y)").unwrap();
        assert_eq!(lambda_of(&ast).boxed, vec![true, false]);
    }

    #[test]
    fn test_internal_defines_become_letrec() {
        let mut rt = Runtime::new();
        let ast = expand_str(&mut rt, "(lambda () (define a 1) (display a) (define b 2) (+ a b))").unwrap();
        let Ast::Letrec(node) = &*lambda_of(&ast).body else {
            panic!("Expected letrec body");
        };
        assert_eq!(node.counts, vec![1, 0, 1]);
        assert_eq!(node.offsets, vec![0, 1, 1]);
    }

    #[test]
    fn test_local_binding_shadows_special_form() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(let ([if (lambda (a b c) c)]) (if #t 1 2))").unwrap();
        assert_eq!(result.as_fixnum(), Some(2));
    }

    #[test]
    fn test_syntax_errors() {
        let mut rt = Runtime::new();
        for src in ["(if)", "(lambda (x x) x)", "(let ((x)) x)", "(quote)", "()", "(lambda (x))"] {
            let result = expand_str(&mut rt, src);
            assert!(matches!(result, Err(RuntimeError::Syntax { .. })), "Expected Syntax for {}, got {:?}", src, result.map(|a| a.kind()));
        }
    }

    #[test]
    fn test_define_outside_toplevel_is_rejected() {
        let mut rt = Runtime::new();
        let result = expand_str(&mut rt, "(+ 1 (define x 2))");
        assert!(matches!(result, Err(RuntimeError::Syntax { .. })));
    }
}
