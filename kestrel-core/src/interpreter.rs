use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{App, Ast, Let, Letrec, Module, SetTarget};
use crate::config::RuntimeConfig;
use crate::cont::{Cont, ContKind, Values};
use crate::env::{Env, Globals, ModuleRegistry, Shape, find_env_in_chain};
use crate::equal;
use crate::error::RuntimeError;
use crate::hash::{self, HashTable, MissPolicy};
use crate::memo::{ConstructorCache, Interner};
use crate::output::{Output, StdoutOutput};
use crate::proxy;
use crate::value::{Keyword, PrimCode, Symbol, ThreadHandle, Value, Vector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub steps: u64,
    pub max_cont_depth: usize,
    pub env_shares: u64,
}

// RUST CONCEPT: The trampoline's instruction type
// Step functions never call each other; they return the next Step and the
// driver loop in Runtime::execute runs it. That keeps the native stack flat
// no matter how deep or long the computation is.
pub enum Step {
    // Evaluate `ast` in `env`, deliver the result to `cont`
    Eval { ast: Rc<Ast>, env: Env, cont: Cont },
    // Deliver `vals` to the top frame of `cont`
    Plug { vals: Values, cont: Cont },
    // Call `callee` with `args`, deliver the result to `cont`
    Apply {
        callee: Value,
        args: Vec<Value>,
        cont: Cont,
    },
}

impl Step {
    pub fn plug1(value: Value, cont: Cont) -> Step {
        Step::Plug {
            vals: Values::one(value),
            cont,
        }
    }
}

pub struct Runtime {
    pub config: RuntimeConfig,
    pub globals: Globals,
    pub modules: ModuleRegistry,
    interner: Interner,
    constructors: ConstructorCache,
    output: Option<Box<dyn Output>>,
    stats: EvalStats,
    next_thread_id: u64,
    main_thread: Value,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut runtime = Self {
            config,
            globals: Globals::new(),
            modules: ModuleRegistry::new(),
            interner: Interner::new(),
            constructors: ConstructorCache::new(),
            output: None,
            stats: EvalStats::default(),
            next_thread_id: 1,
            main_thread: Value::Thread(Rc::new(ThreadHandle { id: 0 })),
        };

        // RUST CONCEPT: Automatic initialization
        // Primitives are registered before any program runs
        crate::builtins::register_builtins(&mut runtime);
        debug!(
            globals = runtime.globals.len(),
            env_sharing = runtime.config.env_sharing,
            cons_specialization = runtime.config.cons_specialization,
            vector_strategies = runtime.config.vector_strategies,
            "runtime constructed"
        );
        runtime
    }

    // ---------------------------------------------------------------------
    // Canonical construction

    pub fn intern(&mut self, text: &str) -> Symbol {
        self.interner.symbol(text)
    }

    pub fn intern_unreadable(&mut self, text: &str) -> Symbol {
        self.interner.unreadable_symbol(text)
    }

    pub fn keyword(&mut self, text: &str) -> Keyword {
        self.interner.keyword(text)
    }

    pub fn symbol_value(&mut self, text: &str) -> Value {
        Value::Symbol(self.intern(text))
    }

    pub fn fixnum(&mut self, n: i64) -> Value {
        self.constructors.fixnum(n)
    }

    pub fn flonum(&mut self, f: f64) -> Value {
        self.constructors.flonum(f)
    }

    pub fn char(&mut self, c: char) -> Value {
        self.constructors.char(c)
    }

    pub fn complex(&mut self, re: f64, im: f64) -> Value {
        self.constructors.complex(re, im)
    }

    pub fn cons(&self, car: Value, cdr: Value) -> Value {
        Value::cons_with(car, cdr, self.config.cons_specialization)
    }

    pub fn list(&self, items: Vec<Value>) -> Value {
        Value::list_with(items, Value::Null, self.config.cons_specialization)
    }

    pub fn vector(&self, items: Vec<Value>) -> Value {
        Value::vector(items, self.config.vector_strategies)
    }

    pub fn immutable_vector(&self, items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(Vector::new(
            items,
            true,
            self.config.vector_strategies,
        )))
    }

    // ---------------------------------------------------------------------
    // Globals

    pub fn define(&mut self, name: &str, value: Value) {
        let sym = self.intern(name);
        self.globals.define(&sym, value);
    }

    pub fn lookup(&mut self, name: &str) -> Result<Value, RuntimeError> {
        let sym = self.intern(name);
        self.globals.lookup(&sym)
    }

    // ---------------------------------------------------------------------
    // Output and bookkeeping

    pub fn set_output(&mut self, output: Box<dyn Output>) {
        self.output = Some(output);
    }

    pub fn write_output(&mut self, text: &str) -> Result<(), RuntimeError> {
        let result = match &mut self.output {
            Some(output) => output.write_str(text),
            None => StdoutOutput::new().write_str(text),
        };
        result.map_err(|_| RuntimeError::User("write: output port is closed".to_string()))
    }

    pub fn flush_output(&mut self) -> Result<(), RuntimeError> {
        let result = match &mut self.output {
            Some(output) => output.flush(),
            None => StdoutOutput::new().flush(),
        };
        result.map_err(|_| RuntimeError::User("flush: output port is closed".to_string()))
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EvalStats::default();
    }

    pub(crate) fn next_thread_id(&mut self) -> u64 {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        id
    }

    pub(crate) fn main_thread(&self) -> Value {
        self.main_thread.clone()
    }

    // ---------------------------------------------------------------------
    // Entry points

    /// Reads, expands and runs every form in `src`; returns the last result.
    pub fn eval_str(&mut self, src: &str) -> Result<Value, RuntimeError> {
        let vals = self.eval_str_values(src)?;
        if vals.is_empty() {
            return Ok(Value::Void);
        }
        vals.check_one()
    }

    pub fn eval_str_values(&mut self, src: &str) -> Result<Values, RuntimeError> {
        let data = crate::parser::parse(src, self)?;
        let mut last = Values::one(Value::Void);
        for datum in &data {
            last = self.eval_datum(datum)?;
        }
        Ok(last)
    }

    pub fn eval_datum(&mut self, datum: &Value) -> Result<Values, RuntimeError> {
        let ast = crate::expander::expand_toplevel(self, datum)?;
        self.run(ast)
    }

    /// Registers the single `module` form in `src` under `name`, the name a
    /// loader gives it (a file name, say), which need not match the name the
    /// form declares. The body runs on the first `(require name)`.
    pub fn register_module(&mut self, name: &str, src: &str) -> Result<(), RuntimeError> {
        let data = crate::parser::parse(src, self)?;
        let [datum] = data.as_slice() else {
            return Err(RuntimeError::Module(format!("{}: expected exactly one module form", name)));
        };
        let ast = crate::expander::expand_toplevel(self, datum)?;
        match &*ast {
            Ast::ModuleDecl(module) => self.register_compiled_module(name, module.clone()),
            _ => Err(RuntimeError::Module(format!("{}: not a module form", name))),
        }
    }

    pub fn register_compiled_module(&mut self, name: &str, module: Rc<Module>) -> Result<(), RuntimeError> {
        self.modules.add_module(name, module)
    }

    pub fn run(&mut self, ast: Rc<Ast>) -> Result<Values, RuntimeError> {
        let result = self.execute(Step::Eval {
            ast,
            env: Env::Toplevel,
            cont: Cont::done(),
        });
        if self.config.trace_stats {
            debug!(
                steps = self.stats.steps,
                max_cont_depth = self.stats.max_cont_depth,
                env_shares = self.stats.env_shares,
                "evaluation statistics"
            );
        }
        result
    }

    /// Calls a procedure from the host and runs it to completion.
    pub fn apply_procedure(&mut self, callee: Value, args: Vec<Value>) -> Result<Values, RuntimeError> {
        self.execute(Step::Apply {
            callee,
            args,
            cont: Cont::done(),
        })
    }

    /// equal? from the host; proxy handlers run to completion.
    pub fn equal(&mut self, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
        let step = equal::equal_step(a.clone(), b.clone(), Cont::done())?;
        Ok(self.execute(step)?.check_one()?.is_true())
    }

    /// None when the key is absent.
    pub fn hash_ref(&mut self, table: &Rc<HashTable>, key: Value) -> Result<Option<Value>, RuntimeError> {
        let step = hash::ref_step(table, key, MissPolicy::Report, Cont::done())?;
        Ok(self.execute(step)?.into_vec().into_iter().next())
    }

    pub fn hash_set(&mut self, table: &Rc<HashTable>, key: Value, value: Value) -> Result<(), RuntimeError> {
        let step = hash::set_step(table, key, value, Cont::done())?;
        self.execute(step)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Driver

    /// Runs steps until a value reaches the empty continuation.
    pub fn execute(&mut self, mut step: Step) -> Result<Values, RuntimeError> {
        loop {
            self.stats.steps += 1;
            step = match step {
                Step::Eval { ast, env, cont } => {
                    self.note_depth(&cont);
                    self.eval(ast, env, cont)?
                }
                Step::Plug { vals, cont } => match cont.pop() {
                    None => return Ok(vals),
                    Some((kind, prev)) => self.plug(kind, vals, prev)?,
                },
                Step::Apply { callee, args, cont } => {
                    self.note_depth(&cont);
                    self.apply(callee, args, None, cont)?
                }
            };
        }
    }

    fn note_depth(&mut self, cont: &Cont) {
        let depth = cont.depth();
        if depth > self.stats.max_cont_depth {
            self.stats.max_cont_depth = depth;
        }
    }

    fn eval_simple(&mut self, ast: &Ast, env: &Env) -> Result<Value, RuntimeError> {
        match ast {
            Ast::Quote(v) => Ok(v.clone()),
            Ast::LexicalVar { sym, shape } => env.lookup(sym, shape.as_ref(), &self.globals),
            Ast::CellRef { sym, shape } => match env.lookup(sym, shape.as_ref(), &self.globals)? {
                Value::Cell(cell) => {
                    if cell.is_undefined() {
                        return Err(RuntimeError::User(format!(
                            "{}: undefined; cannot use before initialization",
                            sym.name()
                        )));
                    }
                    Ok(cell.get())
                }
                other => Ok(other),
            },
            Ast::ToplevelVar(var) => Ok(var.resolve(&self.globals)?.get()),
            Ast::CaseLambda(lambda) => lambda.make_closure(env, &self.globals),
            other => unreachable!("{} is not a simple expression", other.kind()),
        }
    }

    fn eval(&mut self, ast: Rc<Ast>, env: Env, cont: Cont) -> Result<Step, RuntimeError> {
        match &*ast {
            Ast::Quote(_)
            | Ast::LexicalVar { .. }
            | Ast::CellRef { .. }
            | Ast::ToplevelVar(_)
            | Ast::CaseLambda(_) => {
                let value = self.eval_simple(&ast, &env)?;
                Ok(Step::plug1(value, cont))
            }
            Ast::If { test, then, els } => {
                if test.is_simple() {
                    let branch = if self.eval_simple(test, &env)?.is_true() { then } else { els };
                    return Ok(Step::Eval {
                        ast: branch.clone(),
                        env,
                        cont,
                    });
                }
                Ok(Step::Eval {
                    ast: test.clone(),
                    env: env.clone(),
                    cont: cont.push(ContKind::If {
                        then: then.clone(),
                        els: els.clone(),
                        env,
                    }),
                })
            }
            Ast::Begin(items) => self.continue_begin(items.clone(), 0, env, cont),
            Ast::Begin0 { first, rest } => Ok(Step::Eval {
                ast: first.clone(),
                env: env.clone(),
                cont: cont.push(ContKind::Begin0 {
                    rest: rest.clone(),
                    env,
                }),
            }),
            Ast::App(app) => {
                let vals = Vec::with_capacity(app.rands.len() + 1);
                self.continue_app(app.clone(), env, vals, cont)
            }
            Ast::Let(node) => {
                let collected = Vec::with_capacity(node.args.len());
                self.continue_let(node.clone(), 0, collected, env, cont)
            }
            Ast::Letrec(node) => {
                let cells = (0..node.args.len())
                    .map(|_| Value::new_cell(Value::Undefined))
                    .collect();
                let env = Env::make(cells, env);
                self.continue_letrec(node.clone(), 0, env, cont)
            }
            Ast::SetBang(node) => {
                if node.rhs.is_simple() {
                    let value = self.eval_simple(&node.rhs, &env)?;
                    self.assign(&node.target, value, &env)?;
                    return Ok(Step::plug1(Value::Void, cont));
                }
                Ok(Step::Eval {
                    ast: node.rhs.clone(),
                    env: env.clone(),
                    cont: cont.push(ContKind::SetBang {
                        node: node.clone(),
                        env,
                    }),
                })
            }
            Ast::DefineValues(node) => Ok(Step::Eval {
                ast: node.rhs.clone(),
                env,
                cont: cont.push(ContKind::Define { node: node.clone() }),
            }),
            Ast::WithContinuationMark(node) => {
                if node.key.is_simple() && node.value.is_simple() {
                    let key = self.eval_simple(&node.key, &env)?;
                    let value = self.eval_simple(&node.value, &env)?;
                    return Ok(Step::Eval {
                        ast: node.body.clone(),
                        env,
                        cont: cont.with_mark(key, value),
                    });
                }
                Ok(Step::Eval {
                    ast: node.key.clone(),
                    env: env.clone(),
                    cont: cont.push(ContKind::WcmKey {
                        node: node.clone(),
                        env,
                    }),
                })
            }
            // a module form evaluated in place registers under its own name
            Ast::ModuleDecl(module) => {
                self.register_compiled_module(&module.name, module.clone())?;
                Ok(Step::plug1(Value::Void, cont))
            }
            Ast::Require(name) => self.require(name, cont),
        }
    }

    fn continue_begin(
        &mut self,
        items: Rc<[Rc<Ast>]>,
        mut index: usize,
        env: Env,
        cont: Cont,
    ) -> Result<Step, RuntimeError> {
        if items.is_empty() {
            return Ok(Step::plug1(Value::Void, cont));
        }
        let last = items.len() - 1;
        while index < last && items[index].is_simple() {
            self.eval_simple(&items[index], &env)?;
            index += 1;
        }
        let ast = items[index].clone();
        if index == last {
            // tail position: same continuation
            return Ok(Step::Eval { ast, env, cont });
        }
        Ok(Step::Eval {
            ast,
            env: env.clone(),
            cont: cont.push(ContKind::Begin {
                items,
                index: index + 1,
                env,
            }),
        })
    }

    fn continue_app(
        &mut self,
        app: Rc<App>,
        env: Env,
        mut vals: Vec<Value>,
        cont: Cont,
    ) -> Result<Step, RuntimeError> {
        let total = app.rands.len() + 1;
        while vals.len() < total {
            let expr = if vals.is_empty() {
                &app.rator
            } else {
                &app.rands[vals.len() - 1]
            };
            if expr.is_simple() {
                let value = self.eval_simple(expr, &env)?;
                vals.push(value);
            } else {
                let next = expr.clone();
                return Ok(Step::Eval {
                    ast: next,
                    env: env.clone(),
                    cont: cont.push(ContKind::App { app, env, vals }),
                });
            }
        }
        let args = vals.split_off(1);
        let callee = vals.swap_remove(0);
        self.apply(callee, args, Some((&env, app.shape.as_ref())), cont)
    }

    fn push_let_value(node: &Let, collected: &mut Vec<Value>, value: Value) {
        let slot = collected.len();
        if node.boxed.get(slot).copied().unwrap_or(false) {
            collected.push(Value::new_cell(value));
        } else {
            collected.push(value);
        }
    }

    fn continue_let(
        &mut self,
        node: Rc<Let>,
        mut index: usize,
        mut collected: Vec<Value>,
        env: Env,
        cont: Cont,
    ) -> Result<Step, RuntimeError> {
        while index < node.rhss.len() {
            let rhs = &node.rhss[index];
            if rhs.is_simple() && node.counts[index] == 1 {
                let value = self.eval_simple(rhs, &env)?;
                Self::push_let_value(&node, &mut collected, value);
                index += 1;
            } else {
                let next = rhs.clone();
                return Ok(Step::Eval {
                    ast: next,
                    env: env.clone(),
                    cont: cont.push(ContKind::Let {
                        node,
                        index,
                        collected,
                        env,
                    }),
                });
            }
        }
        let body = node.body.clone();
        Ok(Step::Eval {
            ast: body,
            env: Env::make(collected, env),
            cont,
        })
    }

    fn set_letrec_slot(env: &Env, index: usize, value: Value) {
        match env.slot(index) {
            Value::Cell(cell) => cell.set(value),
            other => panic!("letrec slot {} holds {:?}, not a cell", index, other),
        }
    }

    fn continue_letrec(
        &mut self,
        node: Rc<Letrec>,
        mut index: usize,
        env: Env,
        cont: Cont,
    ) -> Result<Step, RuntimeError> {
        while index < node.rhss.len() {
            let rhs = &node.rhss[index];
            if rhs.is_simple() && node.counts[index] == 1 {
                let value = self.eval_simple(rhs, &env)?;
                Self::set_letrec_slot(&env, node.offsets[index], value);
                index += 1;
            } else {
                let next = rhs.clone();
                return Ok(Step::Eval {
                    ast: next,
                    env: env.clone(),
                    cont: cont.push(ContKind::Letrec { node, index, env }),
                });
            }
        }
        let body = node.body.clone();
        Ok(Step::Eval {
            ast: body,
            env,
            cont,
        })
    }

    fn assign(&mut self, target: &SetTarget, value: Value, env: &Env) -> Result<(), RuntimeError> {
        match target {
            SetTarget::Lexical { sym, shape } => env.set(sym, value, shape.as_ref(), &mut self.globals),
            SetTarget::Cell { sym, shape } => match env.lookup(sym, shape.as_ref(), &self.globals)? {
                Value::Cell(cell) => {
                    cell.set(value);
                    Ok(())
                }
                _ => env.set(sym, value, shape.as_ref(), &mut self.globals),
            },
            SetTarget::Toplevel(var) => {
                var.resolve(&self.globals)?.set(value);
                Ok(())
            }
        }
    }

    fn require(&mut self, name: &str, cont: Cont) -> Result<Step, RuntimeError> {
        let module = self
            .modules
            .find_module(name)
            .ok_or_else(|| RuntimeError::Module(format!("{}: unknown module", name)))?;
        if !self.modules.mark_instantiated(name) {
            return Ok(Step::plug1(Value::Void, cont));
        }
        Ok(Step::Eval {
            ast: module.body.clone(),
            env: Env::Toplevel,
            cont: cont.push(ContKind::ReturnValue(Value::Void)),
        })
    }

    // RUST CONCEPT: Calls hand control back to the driver
    // A closure call becomes an Eval of its body with the caller's
    // continuation untouched; that is the whole tail-call guarantee.
    pub(crate) fn apply(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        site: Option<(&Env, Option<&Rc<Shape>>)>,
        cont: Cont,
    ) -> Result<Step, RuntimeError> {
        match &callee {
            Value::Closure(closure) => {
                let arm = closure.lambda.select(args.len())?;
                let lam = &closure.lambda.lams[arm];
                let captured = &closure.envs[arm];
                let prev = match site {
                    Some((env, shape)) if self.config.env_sharing => {
                        let (found, hit) = find_env_in_chain(&lam.frees, captured, shape, env);
                        if hit {
                            self.stats.env_shares += 1;
                            trace!(procedure = closure.lambda.name.as_deref().unwrap_or("?"), "environment shared");
                        }
                        found
                    }
                    _ => captured.clone(),
                };
                let frame = lam.bind(args, self.config.cons_specialization);
                Ok(Step::Eval {
                    ast: lam.body.clone(),
                    env: Env::make(frame, prev),
                    cont,
                })
            }
            Value::Primitive(prim) => {
                if !prim.arity.accepts(args.len()) {
                    return Err(RuntimeError::Arity {
                        name: prim.name.to_string(),
                        expected: prim.arity.describe(),
                        given: args.len(),
                    });
                }
                match prim.code {
                    PrimCode::Simple(f) => Ok(Step::plug1(f(self, &args)?, cont)),
                    PrimCode::Control(f) => f(self, args, cont),
                }
            }
            // Escaping: the current continuation is dropped
            Value::Continuation(k) => Ok(Step::Plug {
                vals: Values::many(args),
                cont: k.clone(),
            }),
            Value::Parameter(param) => match args.len() {
                0 => Ok(Step::plug1(param.value.borrow().clone(), cont)),
                1 => {
                    let mut args = args;
                    let value = args.swap_remove(0);
                    match &param.guard {
                        Some(guard) => Ok(Step::Apply {
                            callee: guard.clone(),
                            args: vec![value],
                            cont: cont.push(ContKind::ParameterSet {
                                param: param.clone(),
                            }),
                        }),
                        None => {
                            *param.value.borrow_mut() = value;
                            Ok(Step::plug1(Value::Void, cont))
                        }
                    }
                }
                n => Err(RuntimeError::Arity {
                    name: "parameter-procedure".to_string(),
                    expected: "0 or 1".to_string(),
                    given: n,
                }),
            },
            _ => Err(RuntimeError::NotCallable(callee.to_string())),
        }
    }

    fn plug(&mut self, kind: ContKind, vals: Values, cont: Cont) -> Result<Step, RuntimeError> {
        match kind {
            ContKind::If { then, els, env } => {
                let branch = if vals.check_one()?.is_true() { then } else { els };
                Ok(Step::Eval {
                    ast: branch,
                    env,
                    cont,
                })
            }
            ContKind::App { app, env, vals: mut collected } => {
                collected.push(vals.check_one()?);
                self.continue_app(app, env, collected, cont)
            }
            ContKind::Begin { items, index, env } => self.continue_begin(items, index, env, cont),
            ContKind::Begin0 { rest, env } => {
                if rest.is_empty() {
                    return Ok(Step::Plug { vals, cont });
                }
                let cont = cont.push(ContKind::Begin0Finish { vals });
                self.continue_begin(rest, 0, env, cont)
            }
            ContKind::Begin0Finish { vals: saved } => Ok(Step::Plug { vals: saved, cont }),
            ContKind::Let {
                node,
                index,
                mut collected,
                env,
            } => {
                vals.expect_count(node.counts[index])?;
                for value in vals.into_vec() {
                    Self::push_let_value(&node, &mut collected, value);
                }
                self.continue_let(node, index + 1, collected, env, cont)
            }
            ContKind::Letrec { node, index, env } => {
                vals.expect_count(node.counts[index])?;
                let offset = node.offsets[index];
                for (j, value) in vals.into_vec().into_iter().enumerate() {
                    Self::set_letrec_slot(&env, offset + j, value);
                }
                self.continue_letrec(node, index + 1, env, cont)
            }
            ContKind::SetBang { node, env } => {
                let value = vals.check_one()?;
                self.assign(&node.target, value, &env)?;
                Ok(Step::plug1(Value::Void, cont))
            }
            ContKind::Define { node } => {
                vals.expect_count(node.names.len())?;
                for (name, value) in node.names.iter().zip(vals.into_vec()) {
                    self.globals.define(name, value);
                }
                Ok(Step::plug1(Value::Void, cont))
            }
            ContKind::WcmKey { node, env } => {
                let key = vals.check_one()?;
                if node.value.is_simple() {
                    let value = self.eval_simple(&node.value, &env)?;
                    return Ok(Step::Eval {
                        ast: node.body.clone(),
                        env,
                        cont: cont.with_mark(key, value),
                    });
                }
                Ok(Step::Eval {
                    ast: node.value.clone(),
                    env: env.clone(),
                    cont: cont.push(ContKind::WcmValue { node, key, env }),
                })
            }
            ContKind::WcmValue { node, key, env } => {
                let value = vals.check_one()?;
                Ok(Step::Eval {
                    ast: node.body.clone(),
                    env,
                    cont: cont.with_mark(key, value),
                })
            }
            ContKind::Mark { .. } => Ok(Step::Plug { vals, cont }),
            ContKind::ReturnValue(value) => Ok(Step::plug1(value, cont)),
            ContKind::CallWithValues { consumer } => Ok(Step::Apply {
                callee: consumer,
                args: vals.into_vec(),
                cont,
            }),
            ContKind::ParameterSet { param } => {
                *param.value.borrow_mut() = vals.check_one()?;
                Ok(Step::plug1(Value::Void, cont))
            }
            ContKind::ProxyRef { proxy, index } => proxy::after_inner_ref(&proxy, index, vals, cont),
            ContKind::ProxySet { inner, index } => proxy::set_step(inner, index, vals.check_one()?, cont),
            ContKind::ChaperoneCheck { original } => proxy::chaperone_check(&original, vals, cont),
            ContKind::EqualLeft { right, index, tasks } => {
                equal::resume_left(vals.check_one()?, right, index, tasks, cont)
            }
            ContKind::EqualRight { left, tasks } => equal::resume_right(left, vals.check_one()?, tasks, cont),
            ContKind::HashRef {
                table,
                index,
                key,
                hash,
                miss,
            } => hash::resume_ref(table, index, key, hash, miss, vals, cont),
            ContKind::HashSet {
                table,
                index,
                key,
                value,
                hash,
            } => hash::resume_set(table, index, key, value, hash, vals, cont),
            ContKind::Native(native) => {
                let f = native.take()?;
                f(self, vals, cont)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_through_runtime() {
        let mut rt = Runtime::new();
        let a = rt.intern("x");
        let b = rt.intern("x");
        let hidden = rt.intern_unreadable("x");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&hidden));
    }

    #[test]
    fn test_memoized_fixnum_is_eqv() {
        let mut rt = Runtime::new();
        let a = rt.fixnum(5);
        let b = rt.fixnum(5);
        assert!(equal::eqv(&a, &b));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_unbound_then_defined() {
        let mut rt = Runtime::new();
        let missing = rt.eval_str("zork");
        assert!(matches!(missing, Err(RuntimeError::Unbound(ref n)) if n == "zork"), "Expected Unbound, got {:?}", missing);

        rt.define("zork", Value::fixnum(1));
        let sym = rt.intern("zork");
        let cell = rt.globals.cell(&sym).unwrap();
        assert_eq!(rt.eval_str("zork").unwrap().as_fixnum(), Some(1));

        rt.eval_str("(define zork 2)").unwrap();
        assert_eq!(cell.get().as_fixnum(), Some(2));
        assert_eq!(rt.eval_str("zork").unwrap().as_fixnum(), Some(2));
    }

    #[test]
    fn test_apply_procedure_from_host() {
        let mut rt = Runtime::new();
        let add = rt.lookup("+").unwrap();
        let result = rt
            .apply_procedure(add, vec![Value::fixnum(2), Value::fixnum(3)])
            .unwrap()
            .check_one()
            .unwrap();
        assert_eq!(result.as_fixnum(), Some(5));
    }

    #[test]
    fn test_not_callable() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(5 1)");
        assert!(matches!(result, Err(RuntimeError::NotCallable(_))), "Expected NotCallable, got {:?}", result);
    }

    #[test]
    fn test_stats_count_steps() {
        let mut rt = Runtime::new();
        rt.eval_str("(+ 1 (+ 2 3))").unwrap();
        let stats = rt.stats();
        assert!(stats.steps > 0);
        assert!(stats.max_cont_depth >= 1);
        rt.reset_stats();
        assert_eq!(rt.stats(), EvalStats::default());
    }

    struct ClosedOutput;

    impl Output for ClosedOutput {
        fn write_str(&mut self, _text: &str) -> Result<(), ()> {
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ()> {
            Err(())
        }
    }

    #[test]
    fn test_flush_failure_is_reported() {
        let mut rt = Runtime::new();
        rt.set_output(Box::new(ClosedOutput));
        rt.eval_str("(display 1)").unwrap();
        let result = rt.flush_output();
        assert!(matches!(result, Err(RuntimeError::User(_))), "Expected User error, got {:?}", result);

        rt.set_output(Box::new(crate::output::BufferOutput::new()));
        assert!(rt.flush_output().is_ok());
    }
}
