//! Rastreo de posiciones en el código fuente.
//!
//! Todo objeto que construye el front end lleva consigo la posición del texto
//! original donde fue encontrado. Los diagnósticos la usan para señalar la
//! línea culpable, y los errores de sintaxis no cargan nada más que esta posición.

use std::{
    cell::RefCell,
    fmt::{self, Debug, Display, Formatter},
    io::{self, BufRead},
    iter,
    rc::Rc,
};

/// Ancho de una parada de tabulación.
const TAB_STOP: u32 = 4;

/// Flujo de entrada carácter por carácter.
pub trait InputStream: Iterator<Item = io::Result<(char, Position)>> {}

impl<I: Iterator<Item = io::Result<(char, Position)>>> InputStream for I {}

/// Cualquier valor con una ubicación asociada en el código fuente.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Toma prestado el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Toma prestada la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma el valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Separa ambas partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor, conservando la ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Una posición dentro de una fuente con nombre.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    position: Position,
}

impl Location {
    /// Misma fuente, otra posición.
    pub fn moved_to(&self, position: Position) -> Self {
        Location {
            from: Rc::clone(&self.from),
            position,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Número de línea, a partir de 1.
    pub fn line(&self) -> u32 {
        self.position.line
    }

    /// Ejecuta `with` sobre el texto de una línea retenida, si existe.
    pub fn with_line<F, R>(&self, line: u32, with: F) -> Option<R>
    where
        F: FnOnce(&str) -> R,
    {
        let lines = self.from.lines.borrow();
        let index = (line as usize).checked_sub(1)?;
        lines.get(index).map(|text| with(text))
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.from.name, self.position)
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Par de línea y columna.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    fn newline(self) -> Position {
        Position {
            line: self.line + 1,
            column: 1,
        }
    }

    fn tab(self) -> Position {
        let column = 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP;
        Position {
            line: self.line,
            column,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Convierte un lector con buffer en un flujo de caracteres.
///
/// La ubicación retornada nombra la fuente y apunta a su primer carácter.
/// Cada carácter emitido lleva su propia posición. Las líneas se retienen
/// conforme se leen para que los diagnósticos puedan citarlas después.
pub fn consume<R, S>(reader: R, name: S) -> (Location, impl InputStream)
where
    R: BufRead,
    S: Into<String>,
{
    let source = Rc::new(Source {
        name: name.into(),
        lines: Default::default(),
    });

    let start = Location {
        from: Rc::clone(&source),
        position: Position::default(),
    };

    let chars = reader
        .lines()
        .enumerate()
        .flat_map(move |(index, line)| {
            let source = Rc::clone(&source);

            Fallible::new(line.map(move |line| {
                let line_chars: Vec<_> = line.chars().collect();
                source.lines.borrow_mut().push(line);

                let mut here = Position {
                    line: index as u32 + 1,
                    column: 1,
                };

                line_chars
                    .into_iter()
                    .chain(iter::once('\n'))
                    .map(move |c| {
                        let position = here;
                        here = match c {
                            '\n' => here.newline(),
                            '\t' => here.tab(),
                            _ => here.advance(),
                        };

                        (c, position)
                    })
            }))
        })
        .fuse();

    (start, chars)
}

/// Nombre de la fuente y líneas leídas hasta el momento.
struct Source {
    name: String,
    lines: RefCell<Vec<String>>,
}

/// Emite un único error o los elementos del iterador envuelto, nunca ambos.
struct Fallible<I, E>(Result<I, iter::Once<E>>);

impl<I, E> Fallible<I, E> {
    fn new(result: Result<I, E>) -> Self {
        Fallible(result.map_err(iter::once))
    }
}

impl<I: Iterator, E> Iterator for Fallible<I, E> {
    type Item = Result<I::Item, E>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.0 {
            Ok(ok) => ok.next().map(Ok),
            Err(error) => error.next().map(Err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_lines_and_tabs() {
        let (_, chars) = consume("ab\n\tc".as_bytes(), "<test>");
        let chars: Vec<_> = chars
            .map(|item| {
                let (c, position) = item.unwrap();
                (c, position.line(), position.column())
            })
            .collect();

        assert_eq!(
            chars,
            [
                ('a', 1, 1),
                ('b', 1, 2),
                ('\n', 1, 3),
                ('\t', 2, 1),
                ('c', 2, 5),
                ('\n', 2, 6),
            ]
        );
    }

    #[test]
    fn lines_are_retained() {
        let (start, chars) = consume("first\nsecond\n".as_bytes(), "<test>");
        chars.for_each(drop);

        assert_eq!(start.with_line(2, str::to_owned).as_deref(), Some("second"));
        assert_eq!(start.with_line(3, str::to_owned), None);
        assert_eq!(start.to_string(), "<test>:1:1");
    }
}
