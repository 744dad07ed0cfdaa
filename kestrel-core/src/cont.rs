// Continuations: a persistent linked list of pending frames.
//
// Frames are immutable and shared, so capturing the current continuation is
// just cloning the handle. Delivering values pops the top frame; when nobody
// else holds it the frame is moved out, otherwise its kind is cloned.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::{App, DefineValues, Let, Letrec, SetBang, WithContinuationMark};
use crate::env::Env;
use crate::equal::{self, EqualTask};
use crate::error::RuntimeError;
use crate::hash::{HashTable, MissPolicy};
use crate::interpreter::{Runtime, Step};
use crate::value::{Parameter, Proxy, Value};

// A bundle of delivered values
#[derive(Clone, Debug, Default)]
pub struct Values(Vec<Value>);

impl Values {
    pub fn one(value: Value) -> Self {
        Values(vec![value])
    }

    pub fn many(values: Vec<Value>) -> Self {
        Values(values)
    }

    pub fn none() -> Self {
        Values(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }

    /// Receivers that need exactly one value go through here.
    pub fn check_one(self) -> Result<Value, RuntimeError> {
        self.expect_count(1)?;
        let mut vals = self.0;
        Ok(vals.swap_remove(0))
    }

    pub fn expect_count(&self, expected: usize) -> Result<(), RuntimeError> {
        if self.0.len() == expected {
            Ok(())
        } else {
            Err(RuntimeError::ValueCount {
                expected,
                received: self.0.len(),
            })
        }
    }
}

pub type NativeFn = Box<dyn FnOnce(&mut Runtime, Values, Cont) -> Result<Step, RuntimeError>>;

// RUST CONCEPT: A single-use host frame
// The closure sits in a shared Option; whoever runs it first takes it. A
// captured continuation that reaches the same frame again finds it empty.
#[derive(Clone)]
pub struct NativeCont(Rc<RefCell<Option<NativeFn>>>);

impl NativeCont {
    pub fn new(f: NativeFn) -> Self {
        NativeCont(Rc::new(RefCell::new(Some(f))))
    }

    pub fn take(&self) -> Result<NativeFn, RuntimeError> {
        self.0
            .borrow_mut()
            .take()
            .ok_or(RuntimeError::ContinuationReentry)
    }
}

#[derive(Clone)]
pub enum ContKind {
    If {
        then: Rc<crate::ast::Ast>,
        els: Rc<crate::ast::Ast>,
        env: Env,
    },
    // operator and operands evaluated so far
    App {
        app: Rc<App>,
        env: Env,
        vals: Vec<Value>,
    },
    Begin {
        items: Rc<[Rc<crate::ast::Ast>]>,
        index: usize,
        env: Env,
    },
    Begin0 {
        rest: Rc<[Rc<crate::ast::Ast>]>,
        env: Env,
    },
    Begin0Finish {
        vals: Values,
    },
    Let {
        node: Rc<Let>,
        index: usize,
        collected: Vec<Value>,
        env: Env,
    },
    Letrec {
        node: Rc<Letrec>,
        index: usize,
        env: Env,
    },
    SetBang {
        node: Rc<SetBang>,
        env: Env,
    },
    Define {
        node: Rc<DefineValues>,
    },
    WcmKey {
        node: Rc<WithContinuationMark>,
        env: Env,
    },
    WcmValue {
        node: Rc<WithContinuationMark>,
        key: Value,
        env: Env,
    },
    // Continuation marks; transparent to delivered values
    Mark {
        marks: Vec<(Value, Value)>,
    },
    // Ignore what arrives and deliver this instead
    ReturnValue(Value),
    CallWithValues {
        consumer: Value,
    },
    ParameterSet {
        param: Rc<Parameter>,
    },
    ProxyRef {
        proxy: Rc<Proxy>,
        index: Option<usize>,
    },
    ProxySet {
        inner: Value,
        index: Option<usize>,
    },
    ChaperoneCheck {
        original: Value,
    },
    EqualLeft {
        right: Value,
        index: Option<usize>,
        tasks: Vec<EqualTask>,
    },
    EqualRight {
        left: Value,
        tasks: Vec<EqualTask>,
    },
    HashRef {
        table: Rc<HashTable>,
        index: usize,
        key: Value,
        hash: Option<u64>,
        miss: MissPolicy,
    },
    HashSet {
        table: Rc<HashTable>,
        index: usize,
        key: Value,
        value: Value,
        hash: Option<u64>,
    },
    Native(NativeCont),
}

impl ContKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContKind::If { .. } => "if",
            ContKind::App { .. } => "app",
            ContKind::Begin { .. } => "begin",
            ContKind::Begin0 { .. } => "begin0",
            ContKind::Begin0Finish { .. } => "begin0-finish",
            ContKind::Let { .. } => "let",
            ContKind::Letrec { .. } => "letrec",
            ContKind::SetBang { .. } => "set!",
            ContKind::Define { .. } => "define",
            ContKind::WcmKey { .. } => "wcm-key",
            ContKind::WcmValue { .. } => "wcm-value",
            ContKind::Mark { .. } => "mark",
            ContKind::ReturnValue(_) => "return-value",
            ContKind::CallWithValues { .. } => "call-with-values",
            ContKind::ParameterSet { .. } => "parameter-set",
            ContKind::ProxyRef { .. } => "proxy-ref",
            ContKind::ProxySet { .. } => "proxy-set",
            ContKind::ChaperoneCheck { .. } => "chaperone-check",
            ContKind::EqualLeft { .. } => "equal-left",
            ContKind::EqualRight { .. } => "equal-right",
            ContKind::HashRef { .. } => "hash-ref",
            ContKind::HashSet { .. } => "hash-set",
            ContKind::Native(_) => "native",
        }
    }
}

pub struct ContFrame {
    kind: ContKind,
    prev: Cont,
    depth: usize,
}

#[derive(Clone, Default)]
pub struct Cont(Option<Rc<ContFrame>>);

impl Cont {
    /// The empty continuation: delivering to it ends the run.
    pub fn done() -> Cont {
        Cont(None)
    }

    pub fn is_done(&self) -> bool {
        self.0.is_none()
    }

    pub fn depth(&self) -> usize {
        self.0.as_ref().map_or(0, |frame| frame.depth)
    }

    pub fn push(self, kind: ContKind) -> Cont {
        let depth = self.depth() + 1;
        Cont(Some(Rc::new(ContFrame {
            kind,
            prev: self,
            depth,
        })))
    }

    /// Adds a host closure as the next frame.
    pub fn then(
        self,
        f: impl FnOnce(&mut Runtime, Values, Cont) -> Result<Step, RuntimeError> + 'static,
    ) -> Cont {
        self.push(ContKind::Native(NativeCont::new(Box::new(f))))
    }

    pub fn pop(mut self) -> Option<(ContKind, Cont)> {
        let frame = self.0.take()?;
        match Rc::try_unwrap(frame) {
            Ok(mut frame) => {
                let prev = std::mem::take(&mut frame.prev);
                Some((frame.kind, prev))
            }
            Err(shared) => Some((shared.kind.clone(), shared.prev.clone())),
        }
    }

    pub fn top(&self) -> Option<&ContKind> {
        self.0.as_ref().map(|frame| &frame.kind)
    }

    pub fn ptr_eq(&self, other: &Cont) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn addr(&self) -> usize {
        self.0.as_ref().map_or(0, |frame| Rc::as_ptr(frame) as usize)
    }

    // RUST CONCEPT: Tail marks replace instead of stacking
    // A mark frame directly on top means we are in tail position with
    // respect to an earlier with-continuation-mark; update that frame.
    pub fn with_mark(self, key: Value, value: Value) -> Cont {
        if let Some(frame) = &self.0 {
            if let ContKind::Mark { marks } = &frame.kind {
                let mut marks = marks.clone();
                match marks.iter_mut().find(|(k, _)| equal::eq(k, &key)) {
                    Some(slot) => slot.1 = value,
                    None => marks.push((key, value)),
                }
                return frame.prev.clone().push(ContKind::Mark { marks });
            }
        }
        self.push(ContKind::Mark {
            marks: vec![(key, value)],
        })
    }

    fn frames(&self) -> impl Iterator<Item = &ContFrame> {
        let mut current = self.0.as_deref();
        std::iter::from_fn(move || {
            let frame = current?;
            current = frame.prev.0.as_deref();
            Some(frame)
        })
    }

    /// Values marked with `key`, innermost first.
    pub fn marks_for(&self, key: &Value) -> Vec<Value> {
        self.frames()
            .filter_map(|frame| match &frame.kind {
                ContKind::Mark { marks } => marks
                    .iter()
                    .find(|(k, _)| equal::eq(k, key))
                    .map(|(_, v)| v.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn first_mark(&self, key: &Value) -> Option<Value> {
        self.marks_for(key).into_iter().next()
    }
}

// Unlinks frames one at a time so a deep chain cannot overflow the stack
impl Drop for Cont {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(frame) = next {
            match Rc::try_unwrap(frame) {
                Ok(mut frame) => next = frame.prev.0.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for Cont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.frames().map(|frame| frame.kind.name()).collect();
        write!(f, "Cont[{}]", names.join(" <- "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_and_pop() {
        let k = Cont::done()
            .push(ContKind::ReturnValue(Value::Void))
            .push(ContKind::ReturnValue(Value::Null));
        assert_eq!(k.depth(), 2);
        let (kind, rest) = k.pop().unwrap();
        assert!(matches!(kind, ContKind::ReturnValue(Value::Null)), "Expected top frame, got {}", kind.name());
        assert_eq!(rest.depth(), 1);
        assert!(Cont::done().pop().is_none());
    }

    #[test]
    fn test_shared_frames_survive_pop() {
        let k = Cont::done().push(ContKind::ReturnValue(Value::Void));
        let captured = k.clone();
        let _ = k.pop();
        assert_eq!(captured.depth(), 1);
        assert!(captured.pop().is_some());
    }

    #[test]
    fn test_tail_marks_replace() {
        let key = Value::Bool(true);
        let k = Cont::done()
            .with_mark(key.clone(), Value::fixnum(1))
            .with_mark(key.clone(), Value::fixnum(2));
        assert_eq!(k.depth(), 1);
        assert_eq!(k.first_mark(&key).and_then(|v| v.as_fixnum()), Some(2));

        let nested = k.push(ContKind::ReturnValue(Value::Void)).with_mark(key.clone(), Value::fixnum(3));
        let seen: Vec<i64> = nested.marks_for(&key).iter().filter_map(Value::as_fixnum).collect();
        assert_eq!(seen, vec![3, 2]);
    }

    #[test]
    fn test_native_frame_is_single_use() {
        let native = NativeCont::new(Box::new(|_rt: &mut Runtime, vals: Values, k: Cont| Ok(Step::Plug { vals, cont: k })));
        let copy = native.clone();
        assert!(native.take().is_ok());
        assert!(matches!(copy.take(), Err(RuntimeError::ContinuationReentry)));
    }

    #[test]
    fn test_check_one() {
        assert!(Values::one(Value::Void).check_one().is_ok());
        let err = Values::many(vec![Value::Void, Value::Void]).check_one();
        assert!(matches!(err, Err(RuntimeError::ValueCount { expected: 1, received: 2 })), "Expected ValueCount, got {:?}", err);
    }

    #[test]
    fn test_deep_chain_drops() {
        let mut k = Cont::done();
        for _ in 0..200_000 {
            k = k.push(ContKind::ReturnValue(Value::Void));
        }
        assert_eq!(k.depth(), 200_000);
        drop(k);
    }
}
