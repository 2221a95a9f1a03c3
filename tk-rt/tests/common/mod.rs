#![allow(dead_code, unused_imports)]

pub use rt::{
    Boxed, CodeBlock, DataBlock, Fatal, FatalKind, HeapRef, MAX_FFI_ARGS, ObjRef, Runtime,
    RuntimeConfig, Value, comp_size, to_byte_sequence, to_value,
};
pub use rt_abi::{LAYOUTS, ObjectLayout, WORD_SIZE};

pub fn native_exec_supported() -> bool {
    (cfg!(target_arch = "x86_64") && (cfg!(unix) || cfg!(target_os = "windows")))
        || (cfg!(target_arch = "aarch64")
            && (cfg!(target_os = "linux") || cfg!(target_os = "macos")))
}

/// `return 42`
pub fn return_constant_code() -> Vec<u8> {
    if cfg!(target_arch = "aarch64") {
        // mov x0, #42 ; ret
        vec![0x40, 0x05, 0x80, 0xD2, 0xC0, 0x03, 0x5F, 0xD6]
    } else {
        // mov eax, 42 ; ret
        vec![0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]
    }
}

/// `return ctx->add(5, 7)` as a tail call.
pub fn tail_call_add_code() -> Vec<u8> {
    if cfg!(target_arch = "aarch64") {
        vec![
            0x10, 0x10, 0x40, 0xF9, // ldr x16, [x0, #32]
            0xA0, 0x00, 0x80, 0xD2, // mov x0, #5
            0xE1, 0x00, 0x80, 0xD2, // mov x1, #7
            0x00, 0x02, 0x1F, 0xD6, // br x16
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            0x48, 0x8B, 0x41, 0x20, // mov rax, [rcx + 0x20]
            0xB9, 0x05, 0x00, 0x00, 0x00, // mov ecx, 5
            0xBA, 0x07, 0x00, 0x00, 0x00, // mov edx, 7
            0xFF, 0xE0, // jmp rax
        ]
    } else {
        vec![
            0x48, 0x8B, 0x47, 0x20, // mov rax, [rdi + 0x20]
            0xBF, 0x05, 0x00, 0x00, 0x00, // mov edi, 5
            0xBE, 0x07, 0x00, 0x00, 0x00, // mov esi, 7
            0xFF, 0xE0, // jmp rax
        ]
    }
}

/// `return ctx->hello()` as a tail call.
pub fn tail_call_hello_code() -> Vec<u8> {
    if cfg!(target_arch = "aarch64") {
        vec![
            0x10, 0x08, 0x40, 0xF9, // ldr x16, [x0, #16]
            0x00, 0x02, 0x1F, 0xD6, // br x16
        ]
    } else if cfg!(target_os = "windows") {
        vec![0x48, 0x8B, 0x41, 0x10, 0xFF, 0xE0]
    } else {
        vec![0x48, 0x8B, 0x47, 0x10, 0xFF, 0xE0]
    }
}

pub fn type_list(names: &[&str]) -> Value {
    Value::Array(
        names
            .iter()
            .map(|name| Value::String(name.to_string()))
            .collect(),
    )
}

pub fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

pub fn null_ctx() -> Value {
    to_byte_sequence(0usize)
}

/// Zeroed, word-aligned storage large enough for `bytes`.
pub fn heap_storage(bytes: usize) -> Vec<u64> {
    vec![0; bytes.div_ceil(8) + 1]
}
