// SPDX-License-Identifier: AGPL-3.0

//! Configuration for the ovmt command line.
//!
//! Values come from an optional TOML file (`ovmt.toml` in the project root, or
//! `--config`) and from the command line, which takes precedence.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ovmt_constants::{DEFAULT_CONFIG_FILE, DEFAULT_EXECUTION_MANAGER_ADDRESS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[clap(
    name = "ovmt",
    version,
    about = "Transpile EVM bytecode into OVM-sandboxed bytecode"
)]
pub struct Config {
    /// Hex bytecode files to transpile ("-" reads stdin)
    #[clap(value_name = "INPUT")]
    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    /// Inline hex bytecode to transpile (repeatable)
    #[clap(long = "hex", value_name = "HEX")]
    #[serde(default)]
    pub hex: Vec<String>,

    /// Project root directory
    #[clap(long, default_value = ".")]
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Path to the config file
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Address of the execution manager contract
    #[clap(long, env = "OVMT_EXECUTION_MANAGER", default_value = DEFAULT_EXECUTION_MANAGER_ADDRESS)]
    #[serde(default = "default_execution_manager_address")]
    pub execution_manager_address: String,

    /// Comma-separated opcode names allowed in input (default: every assigned opcode)
    #[clap(long)]
    pub whitelist: Option<String>,

    /// Discretionary replacements, opcode name -> instruction lines.
    /// Only settable from the config file.
    #[clap(skip)]
    #[serde(default)]
    pub replacements: BTreeMap<String, Vec<String>>,

    /// Deployed bytecode (hex file); each input is then init code that contains it
    #[clap(long, value_name = "FILE")]
    pub deployed: Option<PathBuf>,

    /// Treat inputs as deployed bytecode: pass unreachable trailing data through
    #[clap(long)]
    #[serde(default)]
    pub raw_bytecode: bool,

    /// Print the transpiled program as assembly
    #[clap(long)]
    #[serde(default)]
    pub print_assembly: bool,

    /// Write results to this file as JSON
    #[clap(long)]
    pub json_output: Option<PathBuf>,

    /// Write transpiled bytecode here, one hex line per input
    #[clap(long)]
    pub output: Option<PathBuf>,

    /// Number of inputs transpiled in parallel (default: CPU count)
    #[clap(long)]
    pub threads: Option<usize>,

    /// Increase verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbose: u8,

    /// Print the effective configuration and exit
    #[clap(long)]
    #[serde(default)]
    pub debug_config: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_execution_manager_address() -> String {
    DEFAULT_EXECUTION_MANAGER_ADDRESS.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            hex: Vec::new(),
            root: default_root(),
            config: None,
            execution_manager_address: default_execution_manager_address(),
            whitelist: None,
            replacements: BTreeMap::new(),
            deployed: None,
            raw_bytecode: false,
            print_assembly: false,
            json_output: None,
            output: None,
            threads: None,
            verbose: 0,
            debug_config: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let parsed: TomlConfig = toml::from_str(content)?;
        parsed.to_config()
    }

    /// Merge with another configuration (command line overrides file config)
    pub fn merge(&mut self, other: Self) {
        if !other.inputs.is_empty() {
            self.inputs = other.inputs;
        }
        if !other.hex.is_empty() {
            self.hex = other.hex;
        }
        if other.root != default_root() {
            self.root = other.root;
        }
        if other.config.is_some() {
            self.config = other.config;
        }
        if other.execution_manager_address != default_execution_manager_address() {
            self.execution_manager_address = other.execution_manager_address;
        }
        if other.whitelist.is_some() {
            self.whitelist = other.whitelist;
        }
        self.replacements.extend(other.replacements);
        if other.deployed.is_some() {
            self.deployed = other.deployed;
        }
        self.raw_bytecode |= other.raw_bytecode;
        self.print_assembly |= other.print_assembly;
        self.debug_config |= other.debug_config;
        if other.json_output.is_some() {
            self.json_output = other.json_output;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.threads.is_some() {
            self.threads = other.threads;
        }
        if other.verbose > 0 {
            self.verbose = other.verbose;
        }
    }

    /// The explicit `--config` path, or `ovmt.toml` under the root if present
    pub fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(config) = &self.config {
            return Some(config.clone());
        }
        let default_path = self.root.join(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    }

    /// Opcode names of the whitelist, or `None` for the default whitelist
    pub fn parse_whitelist(&self) -> Result<Option<Vec<String>>> {
        match &self.whitelist {
            None => Ok(None),
            Some(list) => {
                let names = parse_csv(list);
                if names.is_empty() {
                    return Err(anyhow!("Whitelist cannot be empty"));
                }
                Ok(Some(names))
            }
        }
    }

    /// Threads for the input pool (defaults to CPU count)
    pub fn get_threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Render as TOML in the config file layout
    pub fn to_toml(&self) -> Result<String> {
        let mut global = toml::Table::new();
        global.insert(
            "execution-manager-address".into(),
            toml::Value::String(self.execution_manager_address.clone()),
        );
        if let Some(names) = self.parse_whitelist()? {
            global.insert(
                "whitelist".into(),
                toml::Value::Array(names.into_iter().map(toml::Value::String).collect()),
            );
        }
        if let Some(path) = &self.deployed {
            global.insert(
                "deployed".into(),
                toml::Value::String(path.display().to_string()),
            );
        }
        global.insert("raw-bytecode".into(), toml::Value::Boolean(self.raw_bytecode));

        let mut root = toml::Table::new();
        root.insert("global".into(), toml::Value::Table(global));
        if !self.replacements.is_empty() {
            let replacements = self
                .replacements
                .iter()
                .map(|(name, lines)| {
                    let lines = lines.iter().cloned().map(toml::Value::String).collect();
                    (name.clone(), toml::Value::Array(lines))
                })
                .collect();
            root.insert("replacements".into(), toml::Value::Table(replacements));
        }
        Ok(toml::to_string(&root)?)
    }
}

/// TOML configuration structure (for parsing from file)
#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    global: HashMap<String, toml::Value>,
    #[serde(default)]
    replacements: BTreeMap<String, Vec<String>>,
}

impl TomlConfig {
    fn to_config(self) -> Result<Config> {
        let mut config = Config {
            replacements: self.replacements,
            ..Config::default()
        };

        for (key, value) in self.global {
            // Convert kebab-case to snake_case
            let key = key.replace('-', "_");

            match key.as_str() {
                "execution_manager_address" => {
                    config.execution_manager_address = parse_toml_string(&value)?
                }
                "whitelist" => config.whitelist = Some(parse_toml_list(&value)?.join(",")),
                "deployed" => config.deployed = Some(PathBuf::from(parse_toml_string(&value)?)),
                "raw_bytecode" => config.raw_bytecode = parse_toml_bool(&value)?,
                "print_assembly" => config.print_assembly = parse_toml_bool(&value)?,
                "json_output" => config.json_output = Some(PathBuf::from(parse_toml_string(&value)?)),
                "output" => config.output = Some(PathBuf::from(parse_toml_string(&value)?)),
                "threads" => config.threads = Some(parse_toml_usize(&value)?),
                "verbose" => config.verbose = parse_toml_u8(&value)?,
                _ => {
                    // Ignore unknown fields (allows forward compatibility)
                }
            }
        }

        Ok(config)
    }
}

fn parse_toml_string(value: &toml::Value) -> Result<String> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Expected string, got {:?}", value))
}

fn parse_toml_bool(value: &toml::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow!("Expected bool, got {:?}", value))
}

fn parse_toml_usize(value: &toml::Value) -> Result<usize> {
    value
        .as_integer()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| anyhow!("Expected usize, got {:?}", value))
}

fn parse_toml_u8(value: &toml::Value) -> Result<u8> {
    value
        .as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| anyhow!("Expected u8, got {:?}", value))
}

/// An array of strings, or a single comma-separated string
fn parse_toml_list(value: &toml::Value) -> Result<Vec<String>> {
    match value {
        toml::Value::String(s) => Ok(parse_csv(s)),
        toml::Value::Array(items) => items.iter().map(parse_toml_string).collect(),
        other => Err(anyhow!("Expected list of strings, got {:?}", other)),
    }
}

pub fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
