use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Reconstruct Python source from a .pyc file
    Decompile {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Dump the code-object tree and disassembly of a .pyc file
    Disasm {
        #[command(flatten)]
        input: InputArgs,

        /// Show extra code-object fields (local kinds, line table)
        #[arg(long)]
        pycode_extra: bool,

        /// Keep CACHE instructions visible in 3.11+ disassembly
        #[arg(long)]
        show_caches: bool,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct InputArgs {
    /// Path to the input .pyc (or raw marshalled code object with -c)
    pub path: PathBuf,

    /// Write output to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Treat the input as a raw marshalled code object (requires -v)
    #[arg(short = 'c', long)]
    pub compiled: bool,

    /// Python version for -c, in the x.y form
    #[arg(short = 'v', long, value_name = "MAJOR.MINOR")]
    pub python_version: Option<String>,
}
