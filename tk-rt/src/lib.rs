pub mod boxing;
pub mod config;
pub mod exec;
pub mod fatal;
pub mod ffi;
pub mod host;
pub mod logging;
pub mod marshal;
pub mod memory;
pub mod objects;
pub mod ops;
pub mod symbols;

pub use boxing::{Boxed, box_ref, ref_tag, unbox_ref};
pub use config::{ConfigError, RuntimeConfig};
pub use exec::{RuntimeContext, invoke};
pub use fatal::{FATAL_EXIT_CODE, Fatal, FatalKind, OrTerminate, RtResult};
pub use ffi::{FfiType, MAX_FFI_ARGS, call_native};
pub use host::{ExternalBuffer, Value};
pub use marshal::{NativeWord, to_byte_sequence, to_value};
pub use memory::{CodeBlock, DataBlock};
pub use objects::{
    Arr, ArrTbl, BoxedRefs, Cell, Clos, HashTbl, HeapRef, MemBlock, Obj, ObjRef, ObjectKind, Str,
    StrTbl, comp_size,
};
pub use ops::{OpFn, OpRegistry, OpSpec, Runtime};
pub use symbols::{NativeSymbol, function_address};
