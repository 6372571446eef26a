use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use sandbox::{Sandbox, SandboxConfig, SandboxError};
use scene::Scene;
use types::{ObjectGraph, Variant};

mod convert;

/// Sampling interval of `call --profile`, in instructions.
const PROFILE_INTERVAL: u64 = 1_000;

/// Runs guest RISC-V programs inside a sandbox attached to an empty scene
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the functions a host may call
    List {
        elf: PathBuf,

        /// Only show names matching this regular expression
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Show the sections of a program, optionally dumping some as hex
    Inspect {
        elf: PathBuf,

        /// Dump all sections whose name starts with this prefix, merged
        #[arg(short, long)]
        dump: Option<String>,
    },
    /// Call one guest function with JSON arguments
    Call {
        elf: PathBuf,
        function: String,
        args: Vec<String>,

        /// Sandbox configuration as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Log every host call and print call statistics
        #[arg(short, long)]
        verbose: bool,

        /// Sample the guest and print its busiest functions
        #[arg(long)]
        profile: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::List { elf, filter } => list(&elf, filter.as_deref()),
        Command::Inspect { elf, dump } => inspect(&elf, dump.as_deref()),
        Command::Call { elf, function, args, config, json, verbose, profile } => {
            init_logging(verbose);
            let options = CallOptions { json, verbose, profile };
            call(&elf, &function, &args, config.as_deref(), options)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();
}

fn read_program(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn list(elf: &Path, filter: Option<&str>) -> Result<()> {
    let bytes = read_program(elf)?;
    let pattern = filter.map(Regex::new).transpose().context("invalid --filter")?;
    let image = loader::ProgramImage::parse(&bytes)?;

    let names = loader::exported_functions(&bytes)?;
    let shown: Vec<&String> = names.iter().filter(|n| pattern.as_ref().map_or(true, |re| re.is_match(n))).collect();
    for name in &shown {
        let addr = image.address_of(name).unwrap_or_default();
        println!("  {} {}", format!("0x{addr:08x}").dimmed(), name.green());
    }
    println!("{} of {} functions", shown.len(), names.len());
    Ok(())
}

fn inspect(elf: &Path, dump: Option<&str>) -> Result<()> {
    let bytes = read_program(elf)?;
    let image = loader::ProgramImage::parse(&bytes)?;
    println!("{} 0x{:08x}", "Entry:".bold(), image.entry);

    println!("{}", "Segments:".bold());
    for segment in &image.segments {
        let flags = segment.flags;
        let perms: String = [(flags.read, 'r'), (flags.write, 'w'), (flags.exec, 'x')]
            .iter()
            .map(|&(set, c)| if set { c } else { '-' })
            .collect();
        println!("  0x{:08x}..0x{:08x} {}", segment.vaddr, segment.end(), perms.cyan());
    }

    let info = loader::parse_elf_from_bytes(&bytes)?;
    println!("{}", "Sections:".bold());
    for section in info.sections.iter().filter(|s| !s.name.is_empty()) {
        println!("  {:<20} 0x{:08x} {:>8} bytes", section.name.yellow(), section.addr, section.size);
    }

    if let Some(prefix) = dump {
        let (flat, base) = info.get_flat(prefix).with_context(|| format!("no section starts with '{prefix}'"))?;
        println!("{} {} @ 0x{base:08x}", "Dump:".bold(), prefix);
        for (i, row) in flat.chunks(16).enumerate() {
            println!("  0x{:08x}  {}", base + (i * 16) as u64, hex::encode(row));
        }
    }
    Ok(())
}

struct CallOptions {
    json: bool,
    verbose: bool,
    profile: bool,
}

fn call(elf: &Path, function: &str, raw_args: &[String], config: Option<&Path>, options: CallOptions) -> Result<()> {
    let CallOptions { json, verbose, profile } = options;
    let config = match config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            SandboxConfig::from_json(&text)?
        }
        None => SandboxConfig::default(),
    };
    let args = raw_args.iter().map(|a| convert::parse_arg(a)).collect::<Result<Vec<Variant>>>()?;

    let mut scene = Scene::new();
    let owner = scene.add_node(scene.root(), "Node", "Sandbox")?;
    let mut sandbox = Sandbox::new(scene, config)?;
    sandbox.set_self_object(owner)?;
    sandbox.set_tree_base(owner)?;
    if profile {
        sandbox.enable_profiling(true, PROFILE_INTERVAL)?;
    }
    sandbox.load_program(&read_program(elf)?)?;

    let result = sandbox.vmcall(function, &args);

    for line in sandbox.host().printed() {
        println!("{} {}", "guest:".dimmed(), line);
    }
    if verbose {
        let counters = sandbox.counters();
        println!(
            "{} {} calls, {} exceptions, {} timeouts",
            "Stats:".bold(),
            counters.calls,
            counters.exceptions,
            counters.timeouts
        );
    }

    if profile {
        let report = sandbox.hotspots(10);
        println!("{} {} samples in {} functions", "Profile:".bold(), report.total_samples, report.functions);
        for hotspot in &report.hotspots {
            println!("  {:>8}  {}", hotspot.count, hotspot.function.yellow());
        }
    }

    match result {
        Ok(value) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&convert::to_json(&value)?)?);
            } else {
                println!("{} {}", "Result:".green().bold(), value);
                if verbose {
                    if let Some(bytes) = value.packed_bytes() {
                        println!("  {}", hex::encode(bytes));
                    }
                }
            }
            Ok(())
        }
        Err(err) => {
            report_fault(&sandbox, &err);
            Err(err.into())
        }
    }
}

fn report_fault<H: ObjectGraph>(sandbox: &Sandbox<H>, err: &SandboxError) {
    println!("{} {} ({:?})", "Guest call failed:".red().bold(), err, err.kind());
    if let Some(fault) = sandbox.last_fault() {
        match &fault.function {
            Some((name, offset)) => println!("  at 0x{:08x} in {}+0x{:x}", fault.pc, name.yellow(), offset),
            None => println!("  at 0x{:08x}", fault.pc),
        }
        if let Some(instruction) = &fault.instruction {
            println!("  {instruction}");
        }
        println!("{}", fault.registers.dimmed());
    }
}
