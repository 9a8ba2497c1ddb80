//! Reporte de errores.
//!
//! Toda fase reporta sus errores como valores [`Located`]. La compilación
//! se detiene en el primero de ellos, y [`Diagnostics`] lo convierte en un
//! reporte legible que cita la línea fuente y señala la columna exacta.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

/// Reporte del error que detuvo la compilación.
pub struct Diagnostics(Box<dyn 'static + LocatedError>);

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics(Box::new(error))
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics(error) = self;
        writeln!(fmt, "error: {}", error.source())?;

        let location = error.location();
        writeln!(fmt, " --> {}", location)?;

        let line = location.line();
        let digits = line.to_string().len();
        writeln!(fmt, "{:digits$} |", "", digits = digits)?;

        let quoted = location.with_line(line, |text| {
            writeln!(fmt, "{:>digits$} | {}", line, text, digits = digits)
        });

        // Sin la línea original solo queda la posición
        if let Some(result) = quoted {
            result?;

            let skip = location.position().column().saturating_sub(1) as usize;
            writeln!(fmt, "{:digits$} | {:skip$}^", "", "", digits = digits, skip = skip)?;
        }

        writeln!(fmt)?;
        writeln!(fmt, "Build failed with 1 error")
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn errors_quote_their_line() {
        let text = indoc! {"
            var x: integer;
            begin
              x := 1 +
            end.
        "};

        let (start, stream) = source::consume(text.as_bytes(), "test.pas");
        let error = parse::parse(Lexer::new(start, stream)).unwrap_err();

        let report = Diagnostics::from(error).to_string();
        assert_eq!(
            report,
            indoc! {"
                error: Syntax error
                 --> test.pas:4:1
                  |
                4 | end.
                  | ^

                Build failed with 1 error
            "}
        );
    }
}
