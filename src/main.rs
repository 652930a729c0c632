use std::env;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use nes65_core::{
    AssembleOptions, Passthrough, RenderOptions, assemble_map, read_sources, render_listing,
};
use nes65_link::{LinkSymbol, OutputFormat, PAGE_SIZE, default_config, link_files, load_config};
use nes65_o65::{encode_fragment, encode_ips, encode_o65};
use tracing::{Level, error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "nes65",
    version,
    about = "6502 assembler and O65 linker for NES ROMs",
    long_about = None,
    after_help = "Examples:\n  nes65 compile game.s -o game.o65\n  nes65 link game.o65 music.o65 -f nes -o game.nes\n  nes65 link game.o65 -T mapper2.ron"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`.
    #[arg(long, global = true, default_value_t = Level::WARN)]
    log_level: Level,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Assemble source files into one object file.
    Compile(CompileArgs),
    /// Link object files and IPS patches into a ROM image.
    Link(LinkArgs),
}

#[derive(Debug, Parser)]
struct CompileArgs {
    /// Source files, assembled in order into a single object.
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,
    /// Output file; `-` writes to stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
    #[arg(short = 'f', long = "format", value_enum, default_value_t = CompileFormat::O65)]
    format: CompileFormat,
    /// Predefined constants (repeatable).
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    defines: Vec<(String, i64)>,
    /// Print a disassembly of the CODE segment to stdout.
    #[arg(long)]
    listing: bool,
}

#[derive(Debug, Parser)]
struct LinkArgs {
    /// Object files (o65 or fragment) and IPS patches.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
    /// Output file; `-` writes to stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
    /// Output format; overrides the config file.
    #[arg(short = 'f', long = "format", value_enum)]
    format: Option<LinkFormat>,
    /// ROM size in bytes, a multiple of 16384.
    #[arg(short = 's', long = "romsize", value_name = "ROMSIZE", value_parser = parse_size)]
    rom_size: Option<u32>,
    /// Linker config file in RON format.
    #[arg(short = 'T', long = "config", value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Symbols supplied to the linker (repeatable).
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    defines: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompileFormat {
    O65,
    Ips,
    Raw,
    Frag,
}

impl CompileFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::O65 => "o65",
            Self::Ips => "ips",
            Self::Raw => "bin",
            Self::Frag => "frag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LinkFormat {
    Ips,
    O65,
    Raw,
    Nes,
}

impl From<LinkFormat> for OutputFormat {
    fn from(format: LinkFormat) -> Self {
        match format {
            LinkFormat::Ips => Self::Ips,
            LinkFormat::O65 => Self::O65,
            LinkFormat::Raw => Self::Raw,
            LinkFormat::Nes => Self::Nes,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .with_ansi(stderr_supports_color())
        .without_time()
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Compile(args) => compile_command(args),
        Commands::Link(args) => link_command(args),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// `NAME=VALUE` with a decimal, `$hex` or `0x` hex value; a bare `NAME` is 1.
fn parse_define(text: &str) -> Result<(String, i64), String> {
    let (name, value) = match text.split_once('=') {
        Some((name, value)) => (name.trim(), parse_number(value.trim())?),
        None => (text.trim(), 1),
    };
    if name.is_empty() {
        return Err(format!("missing name in define '{text}'"));
    }
    Ok((name.to_string(), value))
}

fn parse_size(text: &str) -> Result<u32, String> {
    let value = parse_number(text.trim())?;
    u32::try_from(value).map_err(|_| format!("size {value} is out of range"))
}

fn parse_number(text: &str) -> Result<i64, String> {
    let (digits, radix) = if let Some(hex) = text.strip_prefix('$') {
        (hex, 16)
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (hex, 16)
    } else {
        (text, 10)
    };
    let (negative, digits) = match digits.strip_prefix('-') {
        Some(rest) if radix == 10 => (true, rest),
        _ => (false, digits),
    };
    let value = i64::from_str_radix(digits, radix).map_err(|_| format!("invalid number '{text}'"))?;
    Ok(if negative { -value } else { value })
}

fn stderr_supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if let Some(force) = env::var_os("CLICOLOR_FORCE") {
        return force != "0";
    }

    if let Some(choice) = env::var_os("CLICOLOR")
        && choice == "0"
    {
        return false;
    }

    std::io::stderr().is_terminal()
}

fn default_output_path(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("out");
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}.{extension}"))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if path == Path::new("-") {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(bytes).context("failed to write to stdout")?;
        return stdout.flush().context("failed to write to stdout");
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write '{}'", path.display()))
}

fn compile_command(args: CompileArgs) -> Result<ExitCode> {
    let (source_map, errors) = read_sources(&args.inputs, &Passthrough);
    let unreadable = errors.len();
    for err in errors {
        error!("{:#}", anyhow::Error::new(err));
    }
    if unreadable == args.inputs.len() {
        bail!("no input could be read");
    }

    let options = AssembleOptions {
        defines: args.defines,
        ..AssembleOptions::default()
    };
    let assembly = assemble_map(source_map, &options);
    info!(passes = assembly.passes, "assembled");
    let rendered = assembly.render_diagnostics(RenderOptions {
        color: stderr_supports_color(),
    });
    if !rendered.is_empty() {
        eprintln!("{rendered}");
    }
    if args.listing {
        print!("{}", render_listing(&assembly));
    }

    let bytes = match args.format {
        CompileFormat::O65 => encode_o65(&assembly.object.to_o65())?,
        CompileFormat::Frag => encode_fragment(&assembly.object.to_o65())?,
        CompileFormat::Ips => encode_ips(&assembly.object.to_ips())?,
        CompileFormat::Raw => assembly.object.to_raw(0, 0),
    };
    let out_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.inputs[0], args.format.extension()));
    write_output(&out_path, &bytes)?;

    if assembly.has_errors() || unreadable > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn link_command(args: LinkArgs) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    if let Some(format) = args.format {
        config.format = format.into();
    }
    if let Some(size) = args.rom_size {
        let usable = size / PAGE_SIZE * PAGE_SIZE;
        if usable != size {
            warn!(
                "the ROM size {size} (${size:X}) is not a multiple of ${PAGE_SIZE:X}; using {usable} (${usable:X}) instead"
            );
        }
        config.rom_pages = size / PAGE_SIZE;
        info!(pages = config.rom_pages, "ROM size set");
    }
    for (name, value) in args.defines {
        let value = u32::try_from(value)
            .with_context(|| format!("value of '{name}' does not fit in 32 bits"))?;
        config.defines.push(LinkSymbol { name, value });
    }

    let output = link_files(&args.files, &config)?;
    let extension = output.format.to_string();
    let out_path = args.output.unwrap_or_else(|| {
        let path = default_output_path(&args.files[0], &extension);
        if args.files.contains(&path) {
            path.with_extension(format!("linked.{extension}"))
        } else {
            path
        }
    });
    write_output(&out_path, &output.bytes)?;

    if output.has_errors() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
