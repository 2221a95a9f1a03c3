mod common;
use common::*;

use rt::{FfiType, call_native};

extern "C" fn sum3(_ctx: *mut u8, a: isize, b: isize, c: isize) -> isize {
    a + b + c
}

extern "C" fn first_byte(_ctx: *mut u8, data: isize) -> isize {
    unsafe { *(data as *const u8) as isize }
}

type Sum3 = extern "C" fn(*mut u8, isize, isize, isize) -> isize;
type Unary = extern "C" fn(*mut u8, isize) -> isize;

fn call(types: &[&str], ret: &str, func: usize, args: &[Value]) -> rt::RtResult<Value> {
    unsafe {
        call_native(
            &type_list(types),
            &text(ret),
            &to_byte_sequence(func),
            &null_ctx(),
            args,
        )
    }
}

#[test]
fn sums_three_integers() {
    let result = call(
        &["int", "int", "int"],
        "int",
        sum3 as Sum3 as usize,
        &[Value::Int(1), Value::Int(20), Value::Int(300)],
    )
    .expect("call should succeed");
    assert_eq!(result, Value::Int(321));
}

#[test]
fn integer_arguments_truncate_toward_zero() {
    let result = call(
        &["int", "int", "int"],
        "int",
        sum3 as Sum3 as usize,
        &[Value::Float(2.9), Value::Float(-1.9), Value::Int(0)],
    )
    .expect("call should succeed");
    assert_eq!(result, Value::Int(1));
}

#[test]
fn pointer_arguments_are_decoded_from_bytes() {
    let data = DataBlock::allocate(4).expect("malloc should succeed");
    data.write(0, &[0xAB, 1, 2, 3]).expect("write");
    let pointer = to_byte_sequence(data.as_ptr() as usize);

    for ty in ["void*", "char*", "ptr"] {
        let result = call(&[ty], "int", first_byte as Unary as usize, &[pointer.clone()])
            .expect("call should succeed");
        assert_eq!(result, Value::Int(0xAB));
    }
}

#[test]
fn pointer_argument_given_a_number_fails() {
    let err = call(&["void*"], "int", first_byte as Unary as usize, &[Value::Int(1234)])
        .expect_err("numbers are not pointers");
    assert!(matches!(err.kind, FatalKind::Shape(_)), "{err}");
    assert_eq!(err.op, "callFFI");
}

#[test]
fn integer_argument_given_bytes_fails() {
    let err = call(
        &["int", "int", "int"],
        "int",
        sum3 as Sum3 as usize,
        &[Value::Int(1), to_byte_sequence(2usize), Value::Int(3)],
    )
    .expect_err("byte arrays are not integers");
    assert!(matches!(err.kind, FatalKind::Shape(_)), "{err}");
}

#[test]
fn too_many_arguments_fail_before_calling() {
    let names = ["int"; MAX_FFI_ARGS + 1];
    let args = vec![Value::Int(1); MAX_FFI_ARGS + 1];
    // The address is never called.
    let err = call(&names, "int", 0x10, &args).expect_err("seven arguments exceed the bound");
    assert!(matches!(err.kind, FatalKind::Unsupported(_)), "{err}");
    assert!(err.message().contains(&MAX_FFI_ARGS.to_string()));
}

#[test]
fn unknown_argument_type_fails() {
    let err = call(&["float"], "int", first_byte as Unary as usize, &[Value::Float(1.0)])
        .expect_err("float is not a bridge type");
    assert!(matches!(err.kind, FatalKind::Unsupported(_)), "{err}");
    assert_eq!(FfiType::parse("float"), None);
}

#[test]
fn sum2ints_end_to_end_through_runtime() {
    let runtime = Runtime::default();
    let func = runtime
        .try_call("getFuncAddr", &[text("sum2Ints")])
        .expect("sum2Ints is registered");
    let result = runtime
        .try_call(
            "callFFI",
            &[
                type_list(&["int", "int"]),
                text("int"),
                func,
                null_ctx(),
                Value::Int(5),
                Value::Int(7),
            ],
        )
        .expect("call should succeed");
    assert_eq!(result, Value::Int(12));
}

#[test]
fn pointer_results_come_back_as_bytes() {
    let runtime = Runtime::default();
    let malloc = runtime
        .try_call("getFuncAddr", &[text("malloc")])
        .expect("malloc is registered");
    let free = runtime
        .try_call("getFuncAddr", &[text("free")])
        .expect("free is registered");

    let pointer = runtime
        .try_call(
            "callFFI",
            &[type_list(&["int"]), text("void*"), malloc, null_ctx(), Value::Int(64)],
        )
        .expect("malloc through the bridge");
    assert_eq!(pointer.index_len(), Some(WORD_SIZE));
    let address: usize = to_value("test", &pointer).expect("pointer decodes");
    assert_ne!(address, 0);

    runtime
        .try_call(
            "callFFI",
            &[type_list(&["void*"]), text("int"), free, null_ctx(), pointer],
        )
        .expect("free through the bridge");
}

#[test]
fn ctx_must_be_a_full_pointer() {
    let err = unsafe {
        call_native(
            &type_list(&[]),
            &text("int"),
            &to_byte_sequence(sum3 as Sum3 as usize),
            &Value::from_bytes(&[0, 0]),
            &[],
        )
    }
    .expect_err("two bytes are not a pointer");
    assert!(matches!(err.kind, FatalKind::Shape(_)), "{err}");
}
