// Output primitives: display, write, newline, write-string and string ports
//
// Without an explicit port, text goes to the runtime's Output sink.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::interpreter::Runtime;
use crate::value::{Port, Value};

fn emit(rt: &mut Runtime, who: &str, port: Option<&Value>, text: &str) -> Result<Value, RuntimeError> {
    match port {
        None => rt.write_output(text)?,
        Some(Value::Port(p)) => match &**p {
            Port::StringOutput(buffer) => buffer.borrow_mut().push_str(text),
            Port::Console => rt.write_output(text)?,
        },
        Some(other) => return Err(RuntimeError::type_error(who, "output-port?", other)),
    }
    Ok(Value::Void)
}

pub fn display_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = args[0].display_string();
    emit(rt, "display", args.get(1), &text)
}

pub fn write_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = args[0].to_string();
    emit(rt, "write", args.get(1), &text)
}

pub fn newline_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    emit(rt, "newline", args.first(), "\n")
}

pub fn write_string_impl(rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = super::check_string("write-string", &args[0])?;
    emit(rt, "write-string", args.get(1), &text)?;
    Ok(Value::fixnum(text.chars().count() as i64))
}

pub fn open_output_string_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Port(Rc::new(Port::StringOutput(RefCell::new(String::new())))))
}

pub fn get_output_string_impl(_rt: &mut Runtime, args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Port(p) => match &**p {
            Port::StringOutput(buffer) => Ok(Value::string(&buffer.borrow())),
            Port::Console => Err(RuntimeError::type_error("get-output-string", "string port", &args[0])),
        },
        other => Err(RuntimeError::type_error("get-output-string", "output-port?", other)),
    }
}

pub fn current_output_port_impl(_rt: &mut Runtime, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Port(Rc::new(Port::Console)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BufferOutput;

    #[test]
    fn test_display_goes_to_output() {
        let mut rt = Runtime::new();
        let buffer = BufferOutput::new();
        rt.set_output(Box::new(buffer.clone()));
        rt.eval_str("(display \"hi\") (write \"hi\") (newline) (display '(1 #\\a))").unwrap();
        assert_eq!(buffer.contents(), "hi\"hi\"\n(1 a)");
    }

    #[test]
    fn test_string_port() {
        let mut rt = Runtime::new();
        let result = rt
            .eval_str("(define o (open-output-string)) (write-string \"ab\" o) (display 42 o) (get-output-string o)")
            .unwrap();
        assert_eq!(result.display_string(), "ab42");
    }
}
