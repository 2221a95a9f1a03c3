//! Calls into generated or native functions through the context-first
//! calling convention.
//!
//! Every callee has the shape `extern "C" fn(ctx, a0, .., an) -> isize`, where
//! each argument is one native word. Integers are passed sign-extended and
//! pointers as their address. At most [`MAX_FFI_ARGS`] arguments follow the
//! context.

use std::fmt;

use tracing::debug;

use crate::fatal::{Fatal, RtResult};
use crate::host::Value;
use crate::logging::category_ffi;
use crate::marshal::{to_byte_sequence, to_value};

const OP: &str = "callFFI";

/// Largest number of arguments a foreign call may carry, context excluded.
pub const MAX_FFI_ARGS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FfiType {
    Int,
    Ptr,
}

impl FfiType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(FfiType::Int),
            "void*" | "char*" | "ptr" => Some(FfiType::Ptr),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> RtResult<Self> {
        let name = value.as_str().ok_or_else(|| {
            Fatal::shape(
                OP,
                format!("type names must be strings, got {}", value.type_name()),
            )
        })?;
        Self::parse(name)
            .ok_or_else(|| Fatal::unsupported(OP, format!("unsupported argument type: \"{name}\"")))
    }
}

impl fmt::Display for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FfiType::Int => write!(f, "int"),
            FfiType::Ptr => write!(f, "void*"),
        }
    }
}

/// Performs one foreign call.
///
/// `func` and `ctx` are pointer byte sequences, `arg_types` holds one type
/// name per element of `args`.
///
/// # Safety
///
/// `func` must decode to the address of a function with the context-first
/// shape for `args.len()` arguments, and every pointer passed must be valid
/// for whatever the callee does with it.
pub unsafe fn call_native(
    arg_types: &Value,
    ret_type: &Value,
    func: &Value,
    ctx: &Value,
    args: &[Value],
) -> RtResult<Value> {
    if args.len() > MAX_FFI_ARGS {
        return Err(Fatal::unsupported(
            OP,
            format!(
                "{} arguments exceed the maximum of {MAX_FFI_ARGS}",
                args.len()
            ),
        ));
    }

    let ret_type = FfiType::from_value(ret_type)?;
    let func_ptr: usize = to_value(OP, func)?;
    let ctx_ptr: *mut u8 = to_value(OP, ctx)?;
    if func_ptr == 0 {
        return Err(Fatal::shape(OP, "function pointer is null"));
    }

    let declared = arg_types.index_len().ok_or_else(|| {
        Fatal::shape(
            OP,
            format!(
                "argument types must be an array, got {}",
                arg_types.type_name()
            ),
        )
    })?;
    if declared != args.len() {
        return Err(Fatal::shape(
            OP,
            format!(
                "{declared} argument type(s) declared for {} argument(s)",
                args.len()
            ),
        ));
    }

    let mut words = [0isize; MAX_FFI_ARGS];
    for (index, arg) in args.iter().enumerate() {
        let type_name = arg_types
            .get_index(index)
            .ok_or_else(|| Fatal::shape(OP, "missing argument type string"))?;
        words[index] = match FfiType::from_value(&type_name)? {
            FfiType::Int => arg.as_int().ok_or_else(|| {
                Fatal::shape(OP, "integer arguments should be number values")
            })? as isize,
            FfiType::Ptr => {
                if !arg.is_indexable() {
                    return Err(Fatal::shape(
                        OP,
                        "pointer arguments should be byte arrays",
                    ));
                }
                to_value::<usize>(OP, arg)? as isize
            }
        };
    }

    debug!(
        "{} calling 0x{func_ptr:x} ctx={ctx_ptr:p} args={:?}",
        category_ffi(),
        &words[..args.len()]
    );
    let result = unsafe { dispatch(func_ptr, ctx_ptr, &words[..args.len()]) };
    debug!("{} 0x{func_ptr:x} returned {result}", category_ffi());

    Ok(match ret_type {
        FfiType::Int => Value::Int(result as i64),
        FfiType::Ptr => to_byte_sequence(result as usize),
    })
}

type Fn0 = unsafe extern "C" fn(*mut u8) -> isize;
type Fn1 = unsafe extern "C" fn(*mut u8, isize) -> isize;
type Fn2 = unsafe extern "C" fn(*mut u8, isize, isize) -> isize;
type Fn3 = unsafe extern "C" fn(*mut u8, isize, isize, isize) -> isize;
type Fn4 = unsafe extern "C" fn(*mut u8, isize, isize, isize, isize) -> isize;
type Fn5 = unsafe extern "C" fn(*mut u8, isize, isize, isize, isize, isize) -> isize;
type Fn6 = unsafe extern "C" fn(*mut u8, isize, isize, isize, isize, isize, isize) -> isize;

unsafe fn dispatch(func: usize, ctx: *mut u8, args: &[isize]) -> isize {
    unsafe {
        match *args {
            [] => std::mem::transmute::<usize, Fn0>(func)(ctx),
            [a] => std::mem::transmute::<usize, Fn1>(func)(ctx, a),
            [a, b] => std::mem::transmute::<usize, Fn2>(func)(ctx, a, b),
            [a, b, c] => std::mem::transmute::<usize, Fn3>(func)(ctx, a, b, c),
            [a, b, c, d] => std::mem::transmute::<usize, Fn4>(func)(ctx, a, b, c, d),
            [a, b, c, d, e] => std::mem::transmute::<usize, Fn5>(func)(ctx, a, b, c, d, e),
            [a, b, c, d, e, f] => std::mem::transmute::<usize, Fn6>(func)(ctx, a, b, c, d, e, f),
            _ => unreachable!("arity is checked against MAX_FFI_ARGS before dispatch"),
        }
    }
}
