use std::rc::Rc;

use crate::interpreter::Runtime;
use crate::primitives::*;
use crate::value::{Arity, PrimCode, Primitive, Value};

// Every primitive goes into the toplevel as an ordinary variable, so user
// code may shadow or redefine any of them.
pub fn register_builtins(rt: &mut Runtime) {
    // Helper to add a primitive under its Scheme name
    let add_builtin = |rt: &mut Runtime, name: &'static str, arity: Arity, code: PrimCode| {
        rt.define(name, Value::Primitive(Rc::new(Primitive { name, arity, code })));
    };

    // RUST CONCEPT: Function pointers as data
    // Each impl is a plain `fn`, so wrapping it in PrimCode costs nothing and
    // the table below stays a flat list.
    let add_simple = |rt: &mut Runtime, name: &'static str, arity: Arity, f: crate::value::SimpleFn| {
        add_builtin(rt, name, arity, PrimCode::Simple(f));
    };
    let add_control = |rt: &mut Runtime, name: &'static str, arity: Arity, f: crate::value::ControlFn| {
        add_builtin(rt, name, arity, PrimCode::Control(f));
    };

    // Arithmetic
    add_simple(rt, "+", Arity::at_least(0), arithmetic::add_impl);
    add_simple(rt, "-", Arity::at_least(1), arithmetic::sub_impl);
    add_simple(rt, "*", Arity::at_least(0), arithmetic::mul_impl);
    add_simple(rt, "/", Arity::at_least(1), arithmetic::div_impl);
    add_simple(rt, "quotient", Arity::exactly(2), arithmetic::quotient_impl);
    add_simple(rt, "remainder", Arity::exactly(2), arithmetic::remainder_impl);
    add_simple(rt, "modulo", Arity::exactly(2), arithmetic::modulo_impl);
    add_simple(rt, "abs", Arity::exactly(1), arithmetic::abs_impl);
    add_simple(rt, "add1", Arity::exactly(1), arithmetic::add1_impl);
    add_simple(rt, "sub1", Arity::exactly(1), arithmetic::sub1_impl);
    add_simple(rt, "expt", Arity::exactly(2), arithmetic::expt_impl);
    add_simple(rt, "exact->inexact", Arity::exactly(1), arithmetic::exact_to_inexact_impl);
    add_simple(rt, "inexact->exact", Arity::exactly(1), arithmetic::inexact_to_exact_impl);
    add_simple(rt, "number?", Arity::exactly(1), arithmetic::is_number_impl);
    add_simple(rt, "integer?", Arity::exactly(1), arithmetic::is_integer_impl);
    add_simple(rt, "exact?", Arity::exactly(1), arithmetic::is_exact_impl);
    add_simple(rt, "inexact?", Arity::exactly(1), arithmetic::is_inexact_impl);
    add_simple(rt, "zero?", Arity::exactly(1), arithmetic::is_zero_impl);

    // Comparison
    add_simple(rt, "=", Arity::at_least(1), comparison::num_eq_impl);
    add_simple(rt, "<", Arity::at_least(1), comparison::less_than_impl);
    add_simple(rt, ">", Arity::at_least(1), comparison::greater_than_impl);
    add_simple(rt, "<=", Arity::at_least(1), comparison::less_equal_impl);
    add_simple(rt, ">=", Arity::at_least(1), comparison::greater_equal_impl);
    add_simple(rt, "max", Arity::at_least(1), comparison::max_impl);
    add_simple(rt, "min", Arity::at_least(1), comparison::min_impl);

    // Advanced math primitives (feature-gated)
    #[cfg(feature = "advanced_math")]
    {
        add_simple(rt, "sqrt", Arity::exactly(1), math::sqrt_impl);
        add_simple(rt, "exp", Arity::exactly(1), math::exp_impl);
        add_simple(rt, "log", Arity::exactly(1), math::log_impl);
        add_simple(rt, "sin", Arity::exactly(1), math::sin_impl);
        add_simple(rt, "cos", Arity::exactly(1), math::cos_impl);
        add_simple(rt, "floor", Arity::exactly(1), math::floor_impl);
        add_simple(rt, "ceiling", Arity::exactly(1), math::ceiling_impl);
        add_simple(rt, "round", Arity::exactly(1), math::round_impl);
    }

    // Pairs and lists
    add_simple(rt, "cons", Arity::exactly(2), pairs::cons_impl);
    add_simple(rt, "car", Arity::exactly(1), pairs::car_impl);
    add_simple(rt, "cdr", Arity::exactly(1), pairs::cdr_impl);
    add_simple(rt, "list", Arity::at_least(0), pairs::list_impl);
    add_simple(rt, "null?", Arity::exactly(1), pairs::is_null_impl);
    add_simple(rt, "pair?", Arity::exactly(1), pairs::is_pair_impl);
    add_simple(rt, "list?", Arity::exactly(1), pairs::is_list_impl);
    add_simple(rt, "length", Arity::exactly(1), pairs::length_impl);
    add_simple(rt, "reverse", Arity::exactly(1), pairs::reverse_impl);
    add_simple(rt, "append", Arity::at_least(0), pairs::append_impl);
    add_simple(rt, "list-ref", Arity::exactly(2), pairs::list_ref_impl);
    add_simple(rt, "mcons", Arity::exactly(2), pairs::mcons_impl);
    add_simple(rt, "mcar", Arity::exactly(1), pairs::mcar_impl);
    add_simple(rt, "mcdr", Arity::exactly(1), pairs::mcdr_impl);
    add_simple(rt, "set-mcar!", Arity::exactly(2), pairs::set_mcar_impl);
    add_simple(rt, "set-mcdr!", Arity::exactly(2), pairs::set_mcdr_impl);
    add_simple(rt, "mpair?", Arity::exactly(1), pairs::is_mpair_impl);

    // Boxes
    add_simple(rt, "box", Arity::exactly(1), boxes::box_impl);
    add_simple(rt, "box-immutable", Arity::exactly(1), boxes::box_immutable_impl);
    add_control(rt, "unbox", Arity::exactly(1), boxes::unbox_impl);
    add_control(rt, "set-box!", Arity::exactly(2), boxes::set_box_impl);
    add_simple(rt, "box?", Arity::exactly(1), boxes::is_box_impl);
    add_simple(rt, "chaperone-box", Arity::exactly(3), boxes::chaperone_box_impl);
    add_simple(rt, "impersonate-box", Arity::exactly(3), boxes::impersonate_box_impl);

    // Vectors
    add_simple(rt, "vector", Arity::at_least(0), vectors::vector_impl);
    add_simple(rt, "make-vector", Arity::between(1, 2), vectors::make_vector_impl);
    add_control(rt, "vector-ref", Arity::exactly(2), vectors::vector_ref_impl);
    add_control(rt, "vector-set!", Arity::exactly(3), vectors::vector_set_impl);
    add_simple(rt, "vector-length", Arity::exactly(1), vectors::vector_length_impl);
    add_simple(rt, "vector->list", Arity::exactly(1), vectors::vector_to_list_impl);
    add_simple(rt, "list->vector", Arity::exactly(1), vectors::list_to_vector_impl);
    add_simple(rt, "vector?", Arity::exactly(1), vectors::is_vector_impl);
    add_simple(rt, "vector-strategy", Arity::exactly(1), vectors::vector_strategy_impl);
    add_simple(rt, "chaperone-vector", Arity::exactly(3), vectors::chaperone_vector_impl);
    add_simple(rt, "impersonate-vector", Arity::exactly(3), vectors::impersonate_vector_impl);

    // Hash tables
    add_simple(rt, "make-hash", Arity::exactly(0), hashes::make_hash_impl);
    add_simple(rt, "make-hasheqv", Arity::exactly(0), hashes::make_hasheqv_impl);
    add_simple(rt, "make-hasheq", Arity::exactly(0), hashes::make_hasheq_impl);
    add_simple(rt, "make-weak-hasheq", Arity::exactly(0), hashes::make_weak_hasheq_impl);
    add_control(rt, "hash-ref", Arity::between(2, 3), hashes::hash_ref_impl);
    add_control(rt, "hash-set!", Arity::exactly(3), hashes::hash_set_impl);
    add_control(rt, "hash-has-key?", Arity::exactly(2), hashes::hash_has_key_impl);
    add_simple(rt, "hash-count", Arity::exactly(1), hashes::hash_count_impl);
    add_simple(rt, "hash-keys", Arity::exactly(1), hashes::hash_keys_impl);
    add_simple(rt, "hash?", Arity::exactly(1), hashes::is_hash_impl);

    // Strings, symbols and keywords
    add_simple(rt, "string-append", Arity::at_least(0), strings::string_append_impl);
    add_simple(rt, "string-length", Arity::exactly(1), strings::string_length_impl);
    add_simple(rt, "string=?", Arity::at_least(1), strings::string_eq_impl);
    add_simple(rt, "string?", Arity::exactly(1), strings::is_string_impl);
    add_simple(rt, "symbol?", Arity::exactly(1), strings::is_symbol_impl);
    add_simple(rt, "keyword?", Arity::exactly(1), strings::is_keyword_impl);
    add_simple(rt, "symbol->string", Arity::exactly(1), strings::symbol_to_string_impl);
    add_simple(rt, "string->symbol", Arity::exactly(1), strings::string_to_symbol_impl);
    add_simple(rt, "string->uninterned-symbol", Arity::exactly(1), strings::string_to_uninterned_symbol_impl);
    add_simple(rt, "string->unreadable-symbol", Arity::exactly(1), strings::string_to_unreadable_symbol_impl);
    add_simple(rt, "string->keyword", Arity::exactly(1), strings::string_to_keyword_impl);
    add_simple(rt, "number->string", Arity::exactly(1), strings::number_to_string_impl);

    // Weak references
    add_simple(rt, "make-weak-box", Arity::exactly(1), weak::make_weak_box_impl);
    add_simple(rt, "weak-box-value", Arity::between(1, 2), weak::weak_box_value_impl);
    add_simple(rt, "make-ephemeron", Arity::exactly(2), weak::make_ephemeron_impl);
    add_simple(rt, "ephemeron-value", Arity::between(1, 2), weak::ephemeron_value_impl);

    // Equality
    add_simple(rt, "eq?", Arity::exactly(2), equality::eq_impl);
    add_simple(rt, "eqv?", Arity::exactly(2), equality::eqv_impl);
    add_control(rt, "equal?", Arity::exactly(2), equality::equal_impl);
    add_simple(rt, "not", Arity::exactly(1), equality::not_impl);

    // Control
    add_control(rt, "call/cc", Arity::exactly(1), control::call_cc_impl);
    add_control(rt, "call-with-current-continuation", Arity::exactly(1), control::call_cc_impl);
    add_control(rt, "values", Arity::at_least(0), control::values_impl);
    add_control(rt, "call-with-values", Arity::exactly(2), control::call_with_values_impl);
    add_control(rt, "apply", Arity::at_least(2), control::apply_impl);
    add_control(rt, "continuation-depth", Arity::exactly(0), control::continuation_depth_impl);
    add_simple(rt, "procedure?", Arity::exactly(1), control::is_procedure_impl);
    add_simple(rt, "procedure-arity-includes?", Arity::exactly(2), control::procedure_arity_includes_impl);
    add_simple(rt, "void", Arity::at_least(0), control::void_impl);
    add_simple(rt, "error", Arity::at_least(1), control::error_impl);
    add_control(rt, "map", Arity::at_least(2), control::map_impl);
    add_control(rt, "for-each", Arity::at_least(2), control::for_each_impl);
    add_control(rt, "andmap", Arity::at_least(2), control::andmap_impl);
    add_control(rt, "ormap", Arity::at_least(2), control::ormap_impl);
    add_control(rt, "foldl", Arity::at_least(3), control::foldl_impl);
    add_control(rt, "filter", Arity::exactly(2), control::filter_impl);

    // Continuation marks
    add_control(rt, "current-continuation-marks", Arity::exactly(0), marks::current_continuation_marks_impl);
    add_control(rt, "continuation-mark-set-first", Arity::between(2, 3), marks::continuation_mark_set_first_impl);
    add_control(rt, "continuation-mark-set->list", Arity::exactly(2), marks::continuation_mark_set_to_list_impl);

    // Parameters
    add_simple(rt, "make-parameter", Arity::between(1, 2), parameters::make_parameter_impl);

    // Threads and semaphores
    add_control(rt, "thread", Arity::exactly(1), threads::thread_impl);
    add_simple(rt, "current-thread", Arity::exactly(0), threads::current_thread_impl);
    add_simple(rt, "thread?", Arity::exactly(1), threads::is_thread_impl);
    add_simple(rt, "make-semaphore", Arity::between(0, 1), threads::make_semaphore_impl);
    add_simple(rt, "semaphore-post", Arity::exactly(1), threads::semaphore_post_impl);
    add_simple(rt, "semaphore-wait", Arity::exactly(1), threads::semaphore_wait_impl);
    add_simple(rt, "semaphore-try-wait?", Arity::exactly(1), threads::semaphore_try_wait_impl);

    // Output
    add_simple(rt, "display", Arity::between(1, 2), ports::display_impl);
    add_simple(rt, "write", Arity::between(1, 2), ports::write_impl);
    add_simple(rt, "newline", Arity::between(0, 1), ports::newline_impl);
    add_simple(rt, "write-string", Arity::between(1, 2), ports::write_string_impl);
    add_simple(rt, "open-output-string", Arity::exactly(0), ports::open_output_string_impl);
    add_simple(rt, "get-output-string", Arity::exactly(1), ports::get_output_string_impl);
    add_simple(rt, "current-output-port", Arity::exactly(0), ports::current_output_port_impl);

    // Regexps
    add_simple(rt, "regexp", Arity::exactly(1), regexps::regexp_impl);
    add_simple(rt, "pregexp", Arity::exactly(1), regexps::pregexp_impl);
    add_simple(rt, "byte-regexp", Arity::exactly(1), regexps::byte_regexp_impl);
    add_simple(rt, "byte-pregexp", Arity::exactly(1), regexps::byte_pregexp_impl);
    add_simple(rt, "regexp-match", Arity::exactly(2), regexps::regexp_match_impl);
    add_simple(rt, "regexp-match?", Arity::exactly(2), regexps::regexp_match_p_impl);
    add_simple(rt, "regexp?", Arity::exactly(1), regexps::is_regexp_impl);

    // The undefined marker and its checks
    rt.define("unsafe-undefined", Value::Undefined);
    add_simple(rt, "check-not-unsafe-undefined", Arity::exactly(2), undefined::check_not_unsafe_undefined_impl);
    add_simple(rt, "check-not-unsafe-undefined/assign", Arity::exactly(2), undefined::check_not_unsafe_undefined_assign_impl);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_registered() {
        let mut rt = Runtime::new();
        for name in ["+", "car", "call/cc", "hash-ref", "values", "vector-set!", "check-not-unsafe-undefined/assign"] {
            let value = rt.lookup(name);
            assert!(matches!(value, Ok(Value::Primitive(_))), "Expected primitive for {}, got {:?}", name, value);
        }
    }

    #[test]
    fn test_unsafe_undefined_is_a_value() {
        let mut rt = Runtime::new();
        let value = rt.lookup("unsafe-undefined");
        assert!(matches!(value, Ok(Value::Undefined)), "Expected undefined marker, got {:?}", value);
    }

    #[test]
    fn test_builtins_can_be_shadowed() {
        let mut rt = Runtime::new();
        let result = rt.eval_str("(define (car x) 'mine) (car '(1 2))").unwrap();
        assert_eq!(result.to_string(), "mine");
    }
}
