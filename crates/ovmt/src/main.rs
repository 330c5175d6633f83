// SPDX-License-Identifier: AGPL-3.0

//! ovmt - transpile EVM bytecode so it runs sandboxed behind an execution manager

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use ovmt_config::Config;
use ovmt_exceptions::{TranspilationError, TranspilationErrorKind};
use ovmt_logs::ErrorCode;
use ovmt_opcodes::{disassemble, format_bytecode, Instruction};
use ovmt_transpiler::{
    parse_replacement_table, OpcodeReplacer, OpcodeWhitelist, TranspilationResult, Transpiler,
};
use rayon::prelude::*;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

mod report;

use report::{Exitcode, InputResult, MainResult};

fn main() -> Result<()> {
    let result = _main()?;
    std::process::exit(result.exitcode)
}

fn _main() -> Result<MainResult> {
    let start_time = Instant::now();

    let config = load_config(Config::parse())?;
    ovmt_logs::init(config.verbose);

    if config.debug_config {
        print!("{}", config.to_toml()?);
        return Ok(MainResult::empty());
    }

    let transpiler = build_transpiler(&config)?;

    if config.inputs.is_empty() && config.hex.is_empty() {
        ovmt_logs::error("No input given (pass files, - for stdin, or --hex)", true);
        return Ok(MainResult {
            exitcode: Exitcode::InvalidInput as i32,
            ..MainResult::empty()
        });
    }

    let mut inputs = Vec::with_capacity(config.inputs.len() + config.hex.len());
    let files = config
        .inputs
        .iter()
        .map(|path| (display_name(path), read_input(path)));
    let inline = config.hex.iter().enumerate().map(|(i, text)| {
        let bytes = parse_hex_bytecode(text).with_context(|| format!("Invalid --hex value #{}", i + 1));
        (format!("<hex #{}>", i + 1), bytes)
    });
    let deployed = config
        .deployed
        .as_deref()
        .map(|path| read_input(path).context("Invalid --deployed bytecode"))
        .transpose();
    let deployed = match deployed {
        Ok(deployed) => deployed,
        Err(err) => {
            ovmt_logs::error(&format!("{:#}", err), true);
            return Ok(MainResult {
                exitcode: Exitcode::InvalidInput as i32,
                duration: start_time.elapsed(),
                ..MainResult::empty()
            });
        }
    };

    for (name, bytes) in files.chain(inline) {
        match bytes {
            Ok(bytes) => inputs.push((name, bytes)),
            Err(err) => {
                ovmt_logs::error(&format!("{:#}", err), true);
                return Ok(MainResult {
                    exitcode: Exitcode::InvalidInput as i32,
                    duration: start_time.elapsed(),
                    ..MainResult::empty()
                });
            }
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.get_threads())
        .build()
        .context("Failed to build thread pool")?;
    let results: Vec<InputResult> = pool.install(|| {
        inputs
            .par_iter()
            .map(|(name, bytes)| {
                transpile_input(&transpiler, &config, deployed.as_deref(), name, bytes)
            })
            .collect()
    });

    for result in &results {
        print_result(result, &config);
    }

    let main_result = MainResult::from_results(results, start_time.elapsed());
    print_summary(&main_result);

    if let Some(path) = &config.output {
        fs::write(path, output_lines(&main_result.results))
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("wrote transpiled bytecode to {:?}", path);
    }

    if let Some(path) = &config.json_output {
        let json = serde_json::to_string_pretty(&main_result)?;
        fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("wrote results to {:?}", path);
    }

    Ok(main_result)
}

/// Command line values over the config file, if one is found
fn load_config(cli: Config) -> Result<Config> {
    match cli.resolve_config_path() {
        Some(path) => {
            debug!("loading config file {:?}", path);
            let mut config = Config::from_file(&path)?;
            config.merge(cli);
            Ok(config)
        }
        None => Ok(cli),
    }
}

fn build_transpiler(config: &Config) -> Result<Transpiler> {
    let whitelist = match config.parse_whitelist()? {
        Some(names) => OpcodeWhitelist::from_names(names)?,
        None => OpcodeWhitelist::default(),
    };
    let table = parse_replacement_table(&config.replacements)?;
    let replacer = OpcodeReplacer::new(&config.execution_manager_address, table)?;
    debug!(
        "whitelist of {} opcodes, {} replacements, execution manager {}",
        whitelist.len(),
        config.replacements.len(),
        replacer.execution_manager_address()
    );
    Ok(Transpiler::new(whitelist, replacer))
}

fn display_name(path: &Path) -> String {
    if path == Path::new("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

/// Read hex-encoded bytecode, with or without `0x`, ignoring whitespace
fn read_input(path: &Path) -> Result<Vec<u8>> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        text
    } else {
        fs::read_to_string(path).with_context(|| format!("Failed to read input: {:?}", path))?
    };
    parse_hex_bytecode(&text).with_context(|| format!("Invalid bytecode in {:?}", path))
}

fn parse_hex_bytecode(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.split_whitespace().collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.is_empty() {
        return Err(anyhow!("input is empty"));
    }
    Ok(hex::decode(digits)?)
}

/// One `0x` hex line per successful input, in input order
fn output_lines(results: &[InputResult]) -> String {
    results
        .iter()
        .filter_map(|result| match &result.result {
            TranspilationResult::Success { bytecode } => Some(format!("0x{}\n", hex::encode(bytecode))),
            TranspilationResult::Error { .. } => None,
        })
        .collect()
}

/// With `deployed` set, `bytes` is init code containing it
fn transpile_input(
    transpiler: &Transpiler,
    config: &Config,
    deployed: Option<&[u8]>,
    name: &str,
    bytes: &[u8],
) -> InputResult {
    let start = Instant::now();
    let result = match deployed {
        Some(deployed) => transpiler.transpile_init_code(bytes, deployed),
        None if config.raw_bytecode => transpiler.transpile_raw_bytecode(bytes),
        None => transpiler.transpile(bytes),
    };
    debug!("{}: transpiled in {:?}", name, start.elapsed());
    InputResult {
        name: name.to_string(),
        input_size: bytes.len(),
        result,
        duration: start.elapsed(),
    }
}

fn error_code(kind: TranspilationErrorKind) -> ErrorCode {
    match kind {
        TranspilationErrorKind::UnsupportedOpcode => ErrorCode::UnsupportedOpcode,
        TranspilationErrorKind::OpcodeNotWhitelisted => ErrorCode::OpcodeNotWhitelisted,
        TranspilationErrorKind::InvalidBytesConsumed => ErrorCode::InvalidBytesConsumed,
        TranspilationErrorKind::MissingDeployedBytecode => ErrorCode::MissingDeployedBytecode,
        TranspilationErrorKind::MissingConstant => ErrorCode::MissingConstant,
        TranspilationErrorKind::DetectedConstantOob => ErrorCode::DetectedConstantOob,
    }
}

fn print_error(error: &TranspilationError) {
    println!(
        "    {} [{}] index {}: {}",
        "✗".red(),
        error.kind,
        error.index,
        error.message
    );
    ovmt_logs::warn_code(
        error_code(error.kind),
        &format!("input rejected with {} errors", error.kind),
        false,
    );
}

fn print_result(result: &InputResult, config: &Config) {
    match &result.result {
        TranspilationResult::Success { bytecode } => {
            println!(
                "{} {} ({} -> {} bytes, {}ms)",
                "✓".green(),
                result.name.cyan(),
                result.input_size,
                bytecode.len(),
                result.duration.as_millis()
            );
            if config.print_assembly {
                let instructions: Vec<Instruction> = disassemble(bytecode)
                    .instructions
                    .into_iter()
                    .map(|located| located.instruction)
                    .collect();
                print!("{}", format_bytecode(&instructions));
            }
            println!("0x{}", hex::encode(bytecode));
        }
        TranspilationResult::Error { errors } => {
            println!(
                "{} {} ({} errors)",
                "✗".red(),
                result.name.red(),
                errors.len()
            );
            for error in errors {
                print_error(error);
            }
        }
    }
}

fn print_summary(result: &MainResult) {
    println!(
        "\n{} {} inputs, {} {} {} {} ({}ms)",
        "Summary:".yellow().bold(),
        result.total_found,
        result.total_succeeded.to_string().green(),
        "transpiled".green(),
        result.total_failed.to_string().red(),
        "failed".red(),
        result.duration.as_millis()
    );
}
