//! Compilador para un subconjunto pequeño de Pascal.
//!
//! # Front end
//! Cada programa proviene de un único archivo fuente. El archivo pasa primero
//! por análisis léxico en [`lex`], que produce un flujo de tokens. Los tokens
//! se ordenan en un AST mediante análisis sintáctico en [`parse`], que además
//! puebla las tablas de [`scope`]. Luego [`semantic`] resuelve el tipo de cada
//! expresión y revisa cada sentencia.
//!
//! # Back end
//! [`codegen`] traduce el programa ya revisado a través de la interfaz
//! [`backend::Backend`]. El crate incluye una implementación en [`ir`], una
//! representación en memoria que puede verificarse y ejecutarse directamente.

pub mod ast;
pub mod backend;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod lex;
pub mod parse;
pub mod scope;
pub mod semantic;
pub mod source;

use std::io::BufRead;

use crate::{
    ast::Program,
    error::Diagnostics,
    lex::Lexer,
    semantic::Semantic,
};

/// Lee y parsea un programa completo.
pub fn load<R: BufRead>(reader: R, name: &str) -> Result<Program, Diagnostics> {
    let (start, stream) = source::consume(reader, name);
    parse::parse(Lexer::new(start, stream)).map_err(Diagnostics::from)
}

/// Revisa un programa parseado y lo traduce a un módulo en memoria.
pub fn compile(program: &Program) -> Semantic<ir::Module> {
    codegen::generate(program, ir::Builder::new())
}
