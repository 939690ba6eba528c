//! Decompiler and disassembler for compiled Python bytecode.
//!
//! `depyc_lib` reads a `.pyc` file (or a raw marshalled code object) for any
//! CPython release from 1.0 through 3.13 and produces either reconstructed
//! Python source or a structured disassembly of the code-object tree.
//!
//! ```no_run
//! let data = std::fs::read("example.pyc").unwrap();
//! let module = depyc_lib::PycModule::load(&data).unwrap();
//! let source = depyc_lib::decompile_source(&module, "example.pyc").unwrap();
//! print!("{source}");
//! ```
//!
//! The pipeline: [`module`] parses the container and drives [`marshal`] to
//! produce the code-object tree; [`instr`] decodes instruction streams using
//! the per-version tables in [`opcode`]; [`builder`] symbolically executes
//! one code object into the [`ast`] node taxonomy; [`srcgen`] renders the
//! tree as Python source and [`disasm`] renders the raw structure instead.

pub mod ast;
pub mod builder;
pub mod disasm;
pub mod error;
pub mod instr;
pub mod marshal;
pub mod module;
pub mod object;
pub mod opcode;
pub mod reader;
pub mod srcgen;
pub mod version;

pub use disasm::{disassemble, DisasmOptions};
pub use error::{DepycError, Result};
pub use module::PycModule;
pub use srcgen::decompile_source;
pub use version::PyVersion;
