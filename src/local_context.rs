use std::{cell::RefCell, rc::Rc};

use revm::context::LocalContextTr;

pub trait StylusLocalContextTr: LocalContextTr {
    fn stylus_pages_ever(&self) -> u16;
    fn stylus_pages_open(&self) -> u16;
    fn add_stylus_pages_open(&mut self, pages: u16);
    fn set_stylus_pages_open(&mut self, pages: u16);
}

/// Local context that is filled by execution.
#[derive(Clone, Debug)]
pub struct StylusLocalContext {
    /// Interpreter shared memory buffer. A reused memory buffer for calls.
    pub shared_memory_buffer: Rc<RefCell<Vec<u8>>>,
    /// Optional precompile error message to bubble up.
    pub precompile_error_message: Option<String>,
    /// Stylus pages ever used in this transaction.
    pub stylus_pages_ever: u16,
    /// Stylus pages currently open.
    pub stylus_pages_open: u16,
}

impl Default for StylusLocalContext {
    fn default() -> Self {
        Self {
            shared_memory_buffer: Rc::new(RefCell::new(Vec::with_capacity(1024 * 4))),
            precompile_error_message: None,
            stylus_pages_ever: 0,
            stylus_pages_open: 0,
        }
    }
}

impl LocalContextTr for StylusLocalContext {
    fn clear(&mut self) {
        self.shared_memory_buffer.borrow_mut().clear();
        self.precompile_error_message = None;
        self.stylus_pages_ever = 0;
        self.stylus_pages_open = 0;
    }

    fn shared_memory_buffer(&self) -> &Rc<RefCell<Vec<u8>>> {
        &self.shared_memory_buffer
    }

    fn set_precompile_error_context(&mut self, output: String) {
        self.precompile_error_message = Some(output);
    }

    fn take_precompile_error_context(&mut self) -> Option<String> {
        self.precompile_error_message.take()
    }
}

impl StylusLocalContextTr for StylusLocalContext {
    fn stylus_pages_ever(&self) -> u16 {
        self.stylus_pages_ever
    }

    fn stylus_pages_open(&self) -> u16 {
        self.stylus_pages_open
    }

    fn add_stylus_pages_open(&mut self, pages: u16) {
        self.set_stylus_pages_open(self.stylus_pages_open.saturating_add(pages));
    }

    fn set_stylus_pages_open(&mut self, pages: u16) {
        self.stylus_pages_open = pages;
        self.stylus_pages_ever = self.stylus_pages_ever.max(pages);
    }
}

impl StylusLocalContext {
    pub fn new() -> Self {
        Self::default()
    }
}
