//! Named operations exposed to the embedding host.
//!
//! Each operation receives the host's argument list unchanged and either
//! produces a [`Value`] or a [`Fatal`]. Argument counts are checked before
//! anything else runs.

use std::collections::BTreeMap;
use std::process::Command;

use tracing::debug;

use crate::config::RuntimeConfig;
use crate::exec;
use crate::fatal::{Fatal, OrTerminate, RtResult};
use crate::ffi;
use crate::host::{ExternalBuffer, Value};
use crate::logging::category_host;
use crate::marshal::{byte_from_value, to_byte_sequence};
use crate::memory::{self, CodeBlock, DataBlock};
use crate::symbols;

pub type OpFn = fn(&Runtime, &[Value]) -> RtResult<Value>;

#[derive(Clone, Copy, Debug)]
pub struct OpSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub func: OpFn,
}

impl OpSpec {
    fn check_arity(&self, got: usize) -> RtResult<()> {
        let fits = got >= self.min_args && self.max_args.is_none_or(|max| got <= max);
        if fits {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} or {max}", self.min_args),
            None => format!("{} or more", self.min_args),
        };
        Err(Fatal::arg_count(self.name, expected, got))
    }
}

#[derive(Clone, Debug, Default)]
pub struct OpRegistry {
    ops: BTreeMap<&'static str, OpSpec>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in operation.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("allocMachineCodeBlock", 1, Some(1), alloc_machine_code_block);
        registry.register("freeMachineCodeBlock", 1, Some(1), free_machine_code_block);
        registry.register("execMachineCodeBlock", 1, Some(1), exec_machine_code_block);
        registry.register("writeToMachineCodeBlock", 3, Some(3), write_to_machine_code_block);
        registry.register("allocMemoryBlock", 1, Some(1), alloc_memory_block);
        registry.register("freeMemoryBlock", 1, Some(1), free_memory_block);
        registry.register("getBlockAddr", 1, Some(2), get_block_addr);
        registry.register("getFuncAddr", 1, Some(1), get_func_addr);
        registry.register("callFFI", 4, None, call_ffi);
        registry.register("writeFile", 2, Some(2), write_file);
        registry.register("shellCommand", 1, Some(1), shell_command);
        registry
    }

    pub fn register(
        &mut self,
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        func: OpFn,
    ) {
        self.ops.insert(
            name,
            OpSpec {
                name,
                min_args,
                max_args,
                func,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&OpSpec> {
        self.ops.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.keys().copied()
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    registry: OpRegistry,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: OpRegistry::builtin(),
        }
    }

    pub fn with_registry(config: RuntimeConfig, registry: OpRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    /// Runs an operation, terminating the process if it fails.
    pub fn call(&self, name: &str, args: &[Value]) -> Value {
        self.try_call(name, args).or_terminate()
    }

    pub fn try_call(&self, name: &str, args: &[Value]) -> RtResult<Value> {
        let entry = self.registry.get(name).ok_or_else(|| {
            Fatal::unsupported("runtime", format!("unknown operation \"{name}\""))
        })?;
        entry.check_arity(args.len())?;
        debug!("{} {} ({} args)", category_host(), entry.name, args.len());
        (entry.func)(self, args)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

fn block_arg(op: &'static str, value: &Value) -> RtResult<ExternalBuffer> {
    value.as_buffer().ok_or_else(|| {
        Fatal::shape(
            op,
            format!("expected a memory block, got {}", value.type_name()),
        )
    })
}

fn size_arg(op: &'static str, value: &Value) -> RtResult<usize> {
    let size = value.as_int().ok_or_else(|| {
        Fatal::shape(op, format!("expected a size, got {}", value.type_name()))
    })?;
    usize::try_from(size).map_err(|_| Fatal::range(op, format!("invalid block size: {size}")))
}

fn index_arg(op: &'static str, value: &Value) -> RtResult<usize> {
    let index = value.as_int().ok_or_else(|| {
        Fatal::shape(op, format!("expected an index, got {}", value.type_name()))
    })?;
    usize::try_from(index).map_err(|_| Fatal::range(op, format!("negative index: {index}")))
}

fn text_arg(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn alloc_machine_code_block(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let size = size_arg("allocMachineCodeBlock", &args[0])?;
    Ok(Value::Buffer(CodeBlock::allocate(size)?.into_buffer()))
}

fn free_machine_code_block(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let block = block_arg("freeMachineCodeBlock", &args[0])?;
    unsafe { CodeBlock::free_raw(block.as_ptr(), block.len())? };
    Ok(Value::Undefined)
}

fn exec_machine_code_block(rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let block = block_arg("execMachineCodeBlock", &args[0])?;
    let result = unsafe { exec::invoke_region(block.as_ptr(), block.len(), &rt.config)? };
    Ok(Value::Int(result as i64))
}

fn write_to_machine_code_block(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    const OP: &str = "writeToMachineCodeBlock";
    let block = block_arg(OP, &args[0])?;
    let index = index_arg(OP, &args[1])?;
    let byte = byte_from_value(OP, &args[2])?;
    if index >= block.len() {
        return Err(Fatal::range(
            OP,
            format!("index {index} is past end of block (len {})", block.len()),
        ));
    }
    memory::write_machine_code(unsafe { block.as_ptr().add(index) }, &[byte]);
    Ok(Value::Undefined)
}

fn alloc_memory_block(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let size = size_arg("allocMemoryBlock", &args[0])?;
    Ok(Value::Buffer(DataBlock::allocate(size)?.into_buffer()))
}

fn free_memory_block(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let block = block_arg("freeMemoryBlock", &args[0])?;
    unsafe { DataBlock::free_raw(block.as_ptr()) };
    Ok(Value::Undefined)
}

fn get_block_addr(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    const OP: &str = "getBlockAddr";
    let block = block_arg(OP, &args[0])?;
    let index = match args.get(1) {
        Some(value) => index_arg(OP, value)?,
        None => 0,
    };
    let address = memory::address_of(OP, block.as_ptr(), block.len(), index)?;
    Ok(to_byte_sequence(address))
}

fn get_func_addr(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    symbols::function_address(&text_arg(&args[0]))
}

fn call_ffi(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    unsafe { ffi::call_native(&args[0], &args[1], &args[2], &args[3], &args[4..]) }
}

fn write_file(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let path = text_arg(&args[0]);
    let text = text_arg(&args[1]);
    std::fs::write(&path, text)
        .map_err(|err| Fatal::os("writeFile", format!("failed to write \"{path}\": {err}")))?;
    Ok(Value::Undefined)
}

fn shell_command(_rt: &Runtime, args: &[Value]) -> RtResult<Value> {
    let command = text_arg(&args[0]);
    let output = shell(&command).output().map_err(|err| {
        Fatal::os(
            "shellCommand",
            format!("failed to execute command \"{command}\": {err}"),
        )
    })?;
    Ok(Value::String(
        String::from_utf8_lossy(&output.stdout).into_owned(),
    ))
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal::FatalKind;
    use crate::marshal::to_value;

    #[test]
    fn every_builtin_is_registered() {
        let names: Vec<_> = OpRegistry::builtin().names().collect();
        assert_eq!(names.len(), 11);
        for name in [
            "allocMachineCodeBlock",
            "callFFI",
            "getBlockAddr",
            "shellCommand",
            "writeFile",
        ] {
            assert!(names.contains(&name), "{name} missing");
        }
    }

    #[test]
    fn argument_counts_are_checked_first() {
        let rt = Runtime::default();
        let err = rt
            .try_call("allocMachineCodeBlock", &[])
            .expect_err("missing size must fail");
        assert_eq!(err.kind, FatalKind::ArgCount { expected: "1".to_string(), got: 0 });

        let err = rt
            .try_call("getBlockAddr", &vec![Value::Undefined; 3])
            .expect_err("three arguments must fail");
        assert_eq!(err.message(), "1 or 2 argument(s) expected, got 3");

        let err = rt.try_call("callFFI", &[]).expect_err("callFFI needs four");
        assert_eq!(err.message(), "4 or more argument(s) expected, got 0");
    }

    #[test]
    fn unknown_operation_is_fatal() {
        let err = Runtime::default()
            .try_call("quit", &[])
            .expect_err("quit is not an operation");
        assert!(matches!(err.kind, FatalKind::Unsupported(_)));
    }

    #[test]
    fn memory_block_ops_share_one_buffer() {
        let rt = Runtime::default();
        let block = rt
            .try_call("allocMemoryBlock", &[Value::Int(8)])
            .expect("allocation");
        let buffer = block.as_buffer().expect("a buffer");
        assert!(buffer.set(3, 0x5a));

        let base: usize = to_value(
            "test",
            &rt.try_call("getBlockAddr", &[block.clone()]).expect("base"),
        )
        .expect("decode");
        let third: usize = to_value(
            "test",
            &rt.try_call("getBlockAddr", &[block.clone(), Value::Int(3)])
                .expect("third"),
        )
        .expect("decode");
        assert_eq!(third - base, 3);
        assert_eq!(unsafe { *(third as *const u8) }, 0x5a);

        let err = rt
            .try_call("getBlockAddr", &[block.clone(), Value::Int(8)])
            .expect_err("index = len must fail");
        assert!(matches!(err.kind, FatalKind::Range(_)));

        rt.try_call("freeMemoryBlock", &[block]).expect("free");
    }

    #[test]
    fn write_to_machine_code_block_checks_index_and_byte() {
        let rt = Runtime::default();
        let block = rt
            .try_call("allocMachineCodeBlock", &[Value::Int(2)])
            .expect("allocation");
        rt.try_call(
            "writeToMachineCodeBlock",
            &[block.clone(), Value::Int(1), Value::Int(0xC3)],
        )
        .expect("in-range write");
        assert_eq!(block.get_index(1), Some(Value::Int(0xC3)));

        for args in [
            [block.clone(), Value::Int(2), Value::Int(0)],
            [block.clone(), Value::Int(0), Value::Int(256)],
            [block.clone(), Value::Int(-1), Value::Int(0)],
        ] {
            let err = rt
                .try_call("writeToMachineCodeBlock", &args)
                .expect_err("bad write must fail");
            assert!(matches!(err.kind, FatalKind::Range(_)), "{err}");
        }

        rt.try_call("freeMachineCodeBlock", &[block]).expect("free");
    }

    #[test]
    fn write_file_and_shell_command() {
        let rt = Runtime::default();
        let path = std::env::temp_dir().join(format!("tk-rt-ops-{}.txt", std::process::id()));
        rt.try_call(
            "writeFile",
            &[
                Value::String(path.display().to_string()),
                Value::String("payload".to_string()),
            ],
        )
        .expect("write");
        assert_eq!(std::fs::read_to_string(&path).expect("read back"), "payload");
        let _ = std::fs::remove_file(&path);

        #[cfg(unix)]
        {
            let out = rt
                .try_call("shellCommand", &[Value::String("echo tachyon".to_string())])
                .expect("shell");
            assert_eq!(out, Value::String("tachyon\n".to_string()));
        }
    }
}
