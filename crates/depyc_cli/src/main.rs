use std::path::Path;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use depyc_lib::{DepycError, DisasmOptions, PycModule, PyVersion};

use crate::cli::{Cli, InputArgs, TopLevel};

mod cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let status = match cli.command {
        Some(TopLevel::Decompile { input }) => run(&input, |module, name| {
            depyc_lib::decompile_source(module, name)
        }),
        Some(TopLevel::Disasm { input, pycode_extra, show_caches }) => {
            let options = DisasmOptions {
                pycode_extra,
                show_caches,
            };
            run(&input, move |module, name| {
                depyc_lib::disassemble(module, name, options)
            })
        }
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            Ok(())
        }
    };

    if let Err(e) = status {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(
    input: &InputArgs,
    render: impl Fn(&PycModule, &str) -> depyc_lib::Result<String>,
) -> depyc_lib::Result<()> {
    let module = load_module(input)?;
    let display_name = input
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.path.display().to_string());
    let text = render(&module, &display_name)?;
    match &input.output {
        Some(path) => std::fs::write(path, text)?,
        None => print!("{text}"),
    }
    Ok(())
}

fn load_module(input: &InputArgs) -> depyc_lib::Result<PycModule> {
    if input.compiled {
        let version: PyVersion = input
            .python_version
            .as_deref()
            .ok_or_else(|| DepycError::BadVersionString(
                "a raw code object needs -v MAJOR.MINOR".into(),
            ))?
            .parse()?;
        PycModule::load_marshalled_file(Path::new(&input.path), version)
    } else {
        PycModule::load_file(Path::new(&input.path))
    }
}
