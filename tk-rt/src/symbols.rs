//! Native functions that generated code may look up by name.
//!
//! Every symbol takes the runtime context as its first argument so it can be
//! reached through the same call shape as generated functions.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::OnceLock;

use tracing::debug;

use crate::fatal::{Fatal, RtResult};
use crate::host::Value;
use crate::logging::category_ffi;
use crate::marshal::to_byte_sequence;

#[derive(Clone, Copy, Debug)]
pub struct NativeSymbol {
    pub name: &'static str,
    pub arity: usize,
    address: usize,
}

impl NativeSymbol {
    pub fn address(&self) -> usize {
        self.address
    }
}

extern "C" fn native_malloc(_ctx: *mut u8, size: isize) -> isize {
    if size < 0 {
        return 0;
    }
    unsafe { libc::malloc(size as usize) as isize }
}

extern "C" fn native_free(_ctx: *mut u8, ptr: isize) -> isize {
    unsafe { libc::free(ptr as *mut libc::c_void) };
    0
}

extern "C" fn native_exit(_ctx: *mut u8, code: isize) -> isize {
    std::process::exit(code as i32)
}

extern "C" fn native_print_int(_ctx: *mut u8, value: isize) -> isize {
    println!("{value}");
    0
}

extern "C" fn native_print_str(_ctx: *mut u8, text: isize) -> isize {
    if text == 0 {
        println!();
        return 0;
    }
    let text = unsafe { CStr::from_ptr(text as *const libc::c_char) };
    println!("{}", text.to_string_lossy());
    0
}

extern "C" fn native_sum2_ints(_ctx: *mut u8, a: isize, b: isize) -> isize {
    a.wrapping_add(b)
}

fn symbol_table() -> &'static HashMap<&'static str, NativeSymbol> {
    static SYMBOLS: OnceLock<HashMap<&'static str, NativeSymbol>> = OnceLock::new();
    SYMBOLS.get_or_init(|| {
        type Unary = extern "C" fn(*mut u8, isize) -> isize;
        type Binary = extern "C" fn(*mut u8, isize, isize) -> isize;

        let entries = [
            ("malloc", 1, native_malloc as Unary as usize),
            ("free", 1, native_free as Unary as usize),
            ("exit", 1, native_exit as Unary as usize),
            ("printInt", 1, native_print_int as Unary as usize),
            ("printStr", 1, native_print_str as Unary as usize),
            ("sum2Ints", 2, native_sum2_ints as Binary as usize),
        ];
        entries
            .into_iter()
            .map(|(name, arity, address)| {
                (
                    name,
                    NativeSymbol {
                        name,
                        arity,
                        address,
                    },
                )
            })
            .collect()
    })
}

pub fn lookup(name: &str) -> Option<&'static NativeSymbol> {
    symbol_table().get(name)
}

/// All registered symbols, sorted by name.
pub fn symbols() -> Vec<&'static NativeSymbol> {
    let mut all: Vec<_> = symbol_table().values().collect();
    all.sort_by_key(|symbol| symbol.name);
    all
}

/// Address of a registered symbol as a native-order byte sequence.
pub fn function_address(name: &str) -> RtResult<Value> {
    let symbol = lookup(name).ok_or_else(|| {
        Fatal::unsupported("getFuncAddr", format!("C function not found: \"{name}\""))
    })?;
    debug!(
        "{} resolved {} to 0x{:x}",
        category_ffi(),
        symbol.name,
        symbol.address
    );
    Ok(to_byte_sequence(symbol.address))
}
