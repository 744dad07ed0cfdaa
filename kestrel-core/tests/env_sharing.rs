// The optimization switches must never change what a program computes.
// Every program here runs under all eight switch combinations and must give
// the same printed result each time.

mod common;

use common::{all_configs, eval_with};
use kestrel_core::{Runtime, RuntimeConfig};

const PROGRAMS: &[(&str, &str)] = &[
    (
        "self-recursive closure with free variables",
        r#"
        (define (make-summer step)
          (letrec ([loop (lambda (n acc)
                           (if (= n 0) acc (loop (- n 1) (+ acc step))))])
            loop))
        ((make-summer 3) 1000 0)
        "#,
    ),
    (
        "nested closures sharing a mutated variable",
        r#"
        (define (make-account balance)
          (define (deposit x) (set! balance (+ balance x)) balance)
          (define (withdraw x) (set! balance (- balance x)) balance)
          (lambda (op x) (if (eq? op 'deposit) (deposit x) (withdraw x))))
        (define acc (make-account 100))
        (acc 'deposit 50)
        (list (acc 'withdraw 30) (acc 'deposit 0))
        "#,
    ),
    (
        "inner lambda calling its enclosing loop",
        r#"
        (define (collect n)
          (let loop ([i 0] [out '()])
            (if (= i n)
                (reverse out)
                ((lambda (v) (loop (+ i 1) (cons v out))) (* i i)))))
        (collect 6)
        "#,
    ),
    (
        "mutual recursion through letrec",
        r#"
        (letrec ([ev? (lambda (n) (if (= n 0) #t (od? (- n 1))))]
                 [od? (lambda (n) (if (= n 0) #f (ev? (- n 1))))])
          (list (ev? 1000) (od? 7)))
        "#,
    ),
    (
        "pairs and vectors of mixed content",
        r#"
        (define v (make-vector 3 0))
        (vector-set! v 0 1.5)
        (vector-set! v 1 'sym)
        (define p (cons 7 (cons "x" '())))
        (list v p (car p) (equal? p (list 7 "x")))
        "#,
    ),
    (
        "higher-order functions over closures",
        r#"
        (define (compose f g) (lambda (x) (f (g x))))
        (define add1-then-double (compose (lambda (x) (* 2 x)) add1))
        (map add1-then-double '(1 2 3))
        "#,
    ),
];

#[test]
fn test_switches_do_not_change_results() {
    for (name, program) in PROGRAMS {
        let expected = eval_with(RuntimeConfig::default(), program)
            .unwrap_or_else(|e| panic!("{} failed: {}", name, e))
            .to_string();
        for config in all_configs() {
            let result = eval_with(config.clone(), program)
                .unwrap_or_else(|e| panic!("{} failed under {:?}: {}", name, config, e));
            assert_eq!(result.to_string(), expected, "{} differs under {:?}", name, config);
        }
    }
}

#[test]
fn test_known_results() {
    let expected = [
        "3000",
        "(120 120)",
        "(0 1 4 9 16 25)",
        "(#t #t)",
        "(#(1.5 sym 0) (7 \"x\") 7 #t)",
        "(4 6 8)",
    ];
    for ((name, program), want) in PROGRAMS.iter().zip(expected) {
        let result = eval_with(RuntimeConfig::default(), program).unwrap();
        assert_eq!(result.to_string(), want, "unexpected result for {}", name);
    }
}

#[test]
fn test_sharing_is_counted_only_when_enabled() {
    // RUST CONCEPT: Observing an optimization through statistics
    // The self call inside `loop` finds the captured frame on the live chain.
    let program = PROGRAMS[0].1;

    let mut rt = Runtime::with_config(RuntimeConfig::default().with_env_sharing(true));
    rt.eval_str(program).unwrap();
    let shared = rt.stats().env_shares;
    assert!(shared > 0, "Expected environment sharing hits, got {}", shared);

    let mut rt = Runtime::with_config(RuntimeConfig::default().with_env_sharing(false));
    rt.eval_str(program).unwrap();
    assert_eq!(rt.stats().env_shares, 0);
}
