//! Property-based tests for structural equality.
//!
//! A random tree is written two ways: as a quoted literal (immutable, built
//! by the reader) and as constructor calls (fresh mutable strings and
//! vectors). The two must always be equal?, and an equal-keyed table must
//! find one through the other.

mod common;

use common::eval_with;
use kestrel_core::equal::equal_hash;
use kestrel_core::parser::parse;
use kestrel_core::{Runtime, RuntimeConfig};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Tree {
    Int(i64),
    Str(String),
    Sym(String),
    List(Vec<Tree>),
    Vector(Vec<Tree>),
}

fn tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Tree::Int),
        "[a-z ]{0,6}".prop_map(Tree::Str),
        "[a-z][a-z0-9]{0,5}".prop_map(Tree::Sym),
    ];
    leaf.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Tree::List),
            prop::collection::vec(inner, 0..5).prop_map(Tree::Vector),
        ]
    })
}

// Datum text, meant to appear under a quote
fn literal(t: &Tree) -> String {
    match t {
        Tree::Int(n) => n.to_string(),
        Tree::Str(s) => format!("\"{}\"", s),
        Tree::Sym(s) => s.clone(),
        Tree::List(items) => format!("({})", items.iter().map(literal).collect::<Vec<_>>().join(" ")),
        Tree::Vector(items) => format!("#({})", items.iter().map(literal).collect::<Vec<_>>().join(" ")),
    }
}

// An expression that builds the same tree at run time
fn constructor(t: &Tree) -> String {
    match t {
        Tree::Int(n) => n.to_string(),
        Tree::Str(s) => format!("(string-append \"{}\")", s),
        Tree::Sym(s) => format!("'{}", s),
        Tree::List(items) => format!("(list {})", items.iter().map(constructor).collect::<Vec<_>>().join(" ")),
        Tree::Vector(items) => format!("(vector {})", items.iter().map(constructor).collect::<Vec<_>>().join(" ")),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A literal and its freshly built copy are equal? with or without
    /// specialized pairs
    #[test]
    fn literal_equals_constructed(t in tree()) {
        let program = format!("(equal? '{} {})", literal(&t), constructor(&t));
        for cons in [true, false] {
            let config = RuntimeConfig::default().with_cons_specialization(cons);
            let result = eval_with(config, &program).unwrap();
            prop_assert_eq!(result.to_string(), "#t", "program: {}", program);
        }
    }

    /// Reading the same text twice gives equal values with equal hashes
    #[test]
    fn equal_literals_hash_alike(t in tree()) {
        let mut rt = Runtime::new();
        let text = literal(&t);
        let a = parse(&text, &mut rt).unwrap().remove(0);
        let b = parse(&text, &mut rt).unwrap().remove(0);

        prop_assert!(rt.equal(&a, &b).unwrap());
        let (ha, hb) = (equal_hash(&a), equal_hash(&b));
        prop_assert!(ha.is_some(), "literal {} should be hashable", text);
        prop_assert_eq!(ha, hb);
    }

    /// An equal table finds a mutable key through its immutable twin
    #[test]
    fn equal_table_finds_twin(t in tree()) {
        let program = format!(
            "(define h (make-hash)) (hash-set! h {} 'hit) (hash-ref h '{} 'miss)",
            constructor(&t),
            literal(&t)
        );
        let result = eval_with(RuntimeConfig::default(), &program).unwrap();
        prop_assert_eq!(result.to_string(), "hit", "program: {}", program);
    }
}
