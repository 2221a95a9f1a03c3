use std::io;

use rt::config::parse_limit;
use rt::{OrTerminate, Runtime, RuntimeConfig, Value, function_address, symbols, to_byte_sequence};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Exec(Vec<u8>),
    Call { symbol: String, args: Vec<i64> },
    Symbols,
    Layouts,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliConfig {
    command: Option<Command>,
    stack_limit: Option<usize>,
    heap_limit: Option<usize>,
    help: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help || cli.command.is_none() {
        print_usage();
        return Ok(());
    }

    rt::logging::init()?;
    let mut config = RuntimeConfig::from_env()?;
    if let Some(limit) = cli.stack_limit {
        config.stack_limit = limit;
    }
    if let Some(limit) = cli.heap_limit {
        config.heap_limit = limit;
    }
    let runtime = Runtime::new(config);

    match cli.command {
        Some(Command::Exec(code)) => run_exec(&runtime, &code),
        Some(Command::Call { symbol, args }) => run_call(&runtime, &symbol, &args),
        Some(Command::Symbols) => print_symbols(),
        Some(Command::Layouts) => print_layouts(),
        None => {}
    }
    Ok(())
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut positional = Vec::new();
    let mut index = 0usize;

    while index < args.len() {
        match args[index].as_str() {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--stack-limit" => {
                let raw = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --stack-limit".to_string())?;
                let limit = parse_limit("--stack-limit", raw).map_err(|err| err.to_string())?;
                cfg.stack_limit = Some(limit);
                index += 2;
            }
            "--heap-limit" => {
                let raw = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --heap-limit".to_string())?;
                let limit = parse_limit("--heap-limit", raw).map_err(|err| err.to_string())?;
                cfg.heap_limit = Some(limit);
                index += 2;
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown option '{other}'"));
            }
            other => {
                positional.push(other.to_string());
                index += 1;
            }
        }
    }

    let Some((name, rest)) = positional.split_first() else {
        return Ok(cfg);
    };
    let command = match name.as_str() {
        "exec" => {
            let code = parse_hex_bytes(rest)?;
            if code.is_empty() {
                return Err("exec needs at least one byte of machine code".to_string());
            }
            Command::Exec(code)
        }
        "call" => {
            let (symbol, raw_args) = rest
                .split_first()
                .ok_or_else(|| "call needs a symbol name".to_string())?;
            let args = raw_args
                .iter()
                .map(|raw| {
                    raw.parse::<i64>()
                        .map_err(|_| format!("invalid integer argument '{raw}'"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Command::Call {
                symbol: symbol.clone(),
                args,
            }
        }
        "symbols" if rest.is_empty() => Command::Symbols,
        "layouts" if rest.is_empty() => Command::Layouts,
        "symbols" | "layouts" => return Err(format!("{name} takes no arguments")),
        other => return Err(format!("unknown command '{other}'")),
    };
    cfg.command = Some(command);
    Ok(cfg)
}

/// Accepts `b8 2a 00`, `b82a00` or `0xb8 0x2a 0x00`.
fn parse_hex_bytes(words: &[String]) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for word in words {
        let digits = word
            .strip_prefix("0x")
            .or_else(|| word.strip_prefix("0X"))
            .unwrap_or(word);
        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(format!("invalid hex byte string '{word}'"));
        }
        for pair in digits.as_bytes().chunks(2) {
            let text = std::str::from_utf8(pair).map_err(|_| format!("invalid hex '{word}'"))?;
            let byte =
                u8::from_str_radix(text, 16).map_err(|_| format!("invalid hex byte '{text}'"))?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}

fn run_exec(runtime: &Runtime, code: &[u8]) {
    let block = runtime.call("allocMachineCodeBlock", &[Value::Int(code.len() as i64)]);
    for (index, byte) in code.iter().enumerate() {
        runtime.call(
            "writeToMachineCodeBlock",
            &[block.clone(), Value::Int(index as i64), Value::Int(*byte as i64)],
        );
    }
    let result = runtime.call("execMachineCodeBlock", &[block.clone()]);
    runtime.call("freeMachineCodeBlock", &[block]);
    println!("result: {result}");
}

fn run_call(runtime: &Runtime, symbol: &str, args: &[i64]) {
    let func = function_address(symbol).or_terminate();
    let mut call_args = vec![
        Value::Array(vec![Value::String("int".to_string()); args.len()]),
        Value::String("int".to_string()),
        func,
        to_byte_sequence(0usize),
    ];
    call_args.extend(args.iter().map(|arg| Value::Int(*arg)));
    let result = runtime.call("callFFI", &call_args);
    println!("result: {result}");
}

fn print_symbols() {
    for symbol in symbols::symbols() {
        println!(
            "{:<10} arity={} address=0x{:x}",
            symbol.name,
            symbol.arity,
            symbol.address()
        );
    }
}

fn print_layouts() {
    for layout in rt_abi::LAYOUTS {
        println!(
            "{} tag={} base_size={}",
            layout.name, layout.tag, layout.base_size
        );
        for field in layout.fields {
            println!("  {:<10} @{:<3} {:?}", field.name, field.offset, field.kind);
        }
        if let Some(tail) = &layout.tail {
            println!(
                "  {:<10} @{:<3} stride={} count={}",
                tail.name, tail.offset, tail.stride, tail.count_field
            );
            for element in tail.elements {
                println!("    {:<8} +{:<3} {:?}", element.name, element.offset, element.kind);
            }
        }
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  tk-rt-run [--stack-limit <n>] [--heap-limit <n>] exec <hex bytes>...");
    println!("  tk-rt-run call <symbol> [int args]...");
    println!("  tk-rt-run symbols");
    println!("  tk-rt-run layouts");
    println!();
    println!(
        "Limits are also read from {} and {}.",
        rt::config::STACK_LIMIT_ENV,
        rt::config::HEAP_LIMIT_ENV
    );
}
