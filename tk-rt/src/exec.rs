//! Running machine code blocks.
//!
//! A block is entered as `extern "C" fn(*mut RuntimeContext) -> isize`. The
//! context layout is shared with the code generator through `rt_abi`:
//!
//! ```text
//! 0      stack_limit
//! W      heap_limit
//! 2W     handlers[0]   hello()            -> 11
//! 3W     handlers[1]   print_word(x)      -> 22
//! 4W     handlers[2]   add(x, y)          -> x + y
//! ```

use tracing::debug;

use crate::config::RuntimeConfig;
use crate::fatal::RtResult;
use crate::logging::category_block;
use crate::memory::{self, CodeBlock};

pub type HelloHandler = extern "C" fn() -> isize;
pub type PrintWordHandler = extern "C" fn(isize) -> isize;
pub type AddHandler = extern "C" fn(isize, isize) -> isize;

pub type BlockEntry = unsafe extern "C" fn(*mut RuntimeContext) -> isize;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RuntimeContext {
    pub stack_limit: usize,
    pub heap_limit: usize,
    pub hello: HelloHandler,
    pub print_word: PrintWordHandler,
    pub add: AddHandler,
}

impl RuntimeContext {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            stack_limit: config.stack_limit,
            heap_limit: config.heap_limit,
            hello: handler_hello,
            print_word: handler_print_word,
            add: handler_add,
        }
    }
}

pub extern "C" fn handler_hello() -> isize {
    println!("hello world!");
    11
}

pub extern "C" fn handler_print_word(x: isize) -> isize {
    println!("x = {x}");
    22
}

pub extern "C" fn handler_add(x: isize, y: isize) -> isize {
    x.wrapping_add(y)
}

/// Calls the code at `block` with a fresh context on the stack.
///
/// # Safety
///
/// `block` must point at executable memory holding a complete function with
/// the C calling convention that accepts a single context pointer.
pub unsafe fn invoke(block: *const u8, config: &RuntimeConfig) -> isize {
    let mut context = RuntimeContext::new(config);
    debug!("{} invoking block {block:p}", category_block());
    let entry: BlockEntry = unsafe { std::mem::transmute(block) };
    memory::enter_execution();
    let result = unsafe { entry(&mut context) };
    memory::finish_execution();
    debug!("{} block {block:p} returned {result}", category_block());
    result
}

/// Flushes `[block, block + len)` and then runs it like [`invoke`].
///
/// # Safety
///
/// Same contract as [`invoke`], and `len` must not exceed the mapping.
pub unsafe fn invoke_region(block: *mut u8, len: usize, config: &RuntimeConfig) -> RtResult<isize> {
    memory::flush_instruction_cache(block, len)?;
    Ok(unsafe { invoke(block, config) })
}

impl CodeBlock {
    /// # Safety
    ///
    /// The block must hold a complete function, see [`invoke`].
    pub unsafe fn invoke(&self, config: &RuntimeConfig) -> RtResult<isize> {
        unsafe { invoke_region(self.as_ptr(), self.len(), config) }
    }
}
