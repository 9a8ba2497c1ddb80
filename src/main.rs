//! Driver.
//!
//! Ejecuta todas las fases de compilación sobre un único archivo y luego
//! ejecuta el programa con el intérprete de referencia.

use anyhow::{self, Context};
use clap::{crate_version, Arg, Command};
use pascal::{codegen::ENTRY_POINT, error::Diagnostics, ir::Machine};

use std::{fs::File, io::BufReader, process};

/// Estado de salida cuando el código fuente no se puede parsear.
const PARSE_FAILURE: i32 = 1;

/// Estado de salida cuando el programa está mal tipado o no se puede traducir.
const GENERATION_FAILURE: i32 = 2;

fn main() -> anyhow::Result<()> {
    let args = Command::new("Pascal compiler")
        .version(crate_version!())
        .arg(
            Arg::new("check")
                .long("check")
                .help("Stop after code generation and verification"),
        )
        .arg(
            Arg::new("file")
                .required(true)
                .value_name("FILE")
                .help("Source file"),
        )
        .get_matches();

    let path = args.value_of("file").context("No input file")?;
    let file = File::open(path).with_context(|| format!("Failed to open for reading: {}", path))?;

    let program = match pascal::load(BufReader::new(file), path) {
        Ok(program) => program,
        Err(diagnostics) => {
            eprint!("{}", diagnostics);
            process::exit(PARSE_FAILURE);
        }
    };

    let module = match pascal::compile(&program) {
        Ok(module) => module,
        Err(error) => {
            eprint!("{}", Diagnostics::from(error));
            process::exit(GENERATION_FAILURE);
        }
    };

    if args.is_present("check") {
        return Ok(());
    }

    let result = Machine::new(&module)
        .call(ENTRY_POINT, &[])
        .with_context(|| format!("Execution of `{}` failed", module.name))?;

    if let Some(result) = result {
        println!("Result: {}", result);
    }

    Ok(())
}
