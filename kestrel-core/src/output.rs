//! Output sink for the interpreter
//!
//! `display`, `write` and `newline` on the console port go through this
//! trait, so the host decides where program output lands (a terminal, a
//! buffer in tests).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

pub trait Output {
    /// Write text to the sink. Err(()) when the sink is gone.
    fn write_str(&mut self, text: &str) -> Result<(), ()>;

    fn flush(&mut self) -> Result<(), ()>;
}

pub struct StdoutOutput;

impl StdoutOutput {
    pub fn new() -> Self {
        StdoutOutput
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for StdoutOutput {
    fn write_str(&mut self, text: &str) -> Result<(), ()> {
        std::io::stdout().write_all(text.as_bytes()).map_err(|_| ())
    }

    fn flush(&mut self) -> Result<(), ()> {
        std::io::stdout().flush().map_err(|_| ())
    }
}

// RUST CONCEPT: Shared buffer for capturing output
// The runtime owns the Box<dyn Output>; the test keeps a clone of the Rc
// and reads what was written.
#[derive(Clone, Default)]
pub struct BufferOutput {
    buffer: Rc<RefCell<String>>,
}

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }
}

impl Output for BufferOutput {
    fn write_str(&mut self, text: &str) -> Result<(), ()> {
        self.buffer.borrow_mut().push_str(text);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_output_is_shared() {
        let buffer = BufferOutput::new();
        let mut sink: Box<dyn Output> = Box::new(buffer.clone());
        sink.write_str("Hello").unwrap();
        sink.write_str(" World").unwrap();
        sink.flush().unwrap();
        assert_eq!(buffer.contents(), "Hello World");
    }
}
