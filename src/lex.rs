//! Análisis léxico.
//!
//! # Tokenización
//! Esta es la primera fase del compilador. Divide un [`InputStream`] en
//! unidades léxicas llamadas tokens. Los espacios en blanco y los comentarios
//! `{ ... }` se descartan en el camino. Cada token emitido se etiqueta con la
//! posición donde inicia, lo cual permite a fases posteriores reportar errores
//! sobre el texto original.
//!
//! # Contenido de tokens
//! Puntuación, operadores y palabras reservadas se identifican por lo que son
//! y no llevan lexema. Identificadores, números y strings sí lo llevan.
//! En particular, los literales numéricos se conservan como texto: convertirlos
//! en valores es trabajo del parser.
//!
//! # Reglas del lenguaje
//! - Palabras reservadas, nombres de tipos y operadores en palabra no distinguen
//!   mayúsculas, así que `begin`, `BEGIN` y `Begin` producen [`Keyword::Begin`].
//! - Los identificadores tampoco las distinguen, pero conservan su escritura.
//! - Un exponente numérico (`E`, con signo opcional) debe seguirse de un dígito.
//!
//! # Errores
//! El lexer se detiene en el primer error. Después de eso no produce nada.

use crate::{
    ast::{ArithOp, RelOp},
    source::{InputStream, Located, Location, Position},
};

use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

// Sin distinción de mayúsculas
pub use unicase::Ascii as NoCase;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Error de E/S proveniente del [`InputStream`].
    #[error("I/O error")]
    Input(#[from] std::io::Error),

    /// Carácter desconocido o inesperado.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Fin de entrada dentro de un literal string.
    #[error("Unterminated string literal")]
    UnterminatedString,

    /// Fin de entrada dentro de un comentario.
    #[error("Unterminated comment")]
    UnterminatedComment,

    /// `E` o su signo no fue seguido por un dígito.
    #[error("Expected a digit in numeric exponent")]
    MalformedExponent,
}

/// Un identificador.
///
/// Comparación y hashing ignoran mayúsculas ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<NoCase<String>>);

impl Identifier {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Identifier(Rc::new(NoCase::new(name.into())))
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        (*self.0).as_ref()
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_ref())
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::new(name)
    }
}

/// Resultado del análisis léxico.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra reservada.
    Keyword(Keyword),

    /// Nombre de tipo predefinido.
    TypeName(TypeName),

    /// Literal numérico, tal como se escribió.
    Number(String),

    /// `true` o `false`.
    Boolean(bool),

    /// Literal string entre comillas simples, sin sus comillas.
    Str(String),

    /// `=`, `<>`, `<`, `<=`, `>`, `>=`, `in`
    RelOp(RelOp),

    /// `*`, `/`, `div`, `mod`, `and`, `^`
    MulOp(ArithOp),

    /// `+`, `-`, `or`
    AddOp(ArithOp),

    /// `;`
    Semicolon,

    /// `:`
    Colon,

    /// `,`
    Comma,

    /// `:=`
    Assign,

    /// `~`
    Tilde,

    /// `.`
    Period,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// Fin de la entrada.
    Eof,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            TypeName(name) => write!(fmt, "type `{}`", name),
            Number(number) => write!(fmt, "literal `{}`", number),
            Boolean(boolean) => write!(fmt, "literal `{}`", boolean),
            Str(string) => write!(fmt, "string '{}'", string),
            RelOp(op) => write!(fmt, "`{}`", op),
            MulOp(op) | AddOp(op) => write!(fmt, "`{}`", op),
            Semicolon => fmt.write_str("`;`"),
            Colon => fmt.write_str("`:`"),
            Comma => fmt.write_str("`,`"),
            Assign => fmt.write_str("`:=`"),
            Tilde => fmt.write_str("`~`"),
            Period => fmt.write_str("`.`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            Eof => fmt.write_str("end of file"),
        }
    }
}

/// Una palabra reservada.
///
/// Algunas solo se reconocen para que el parser pueda rechazar la construcción
/// que introducen.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Program,
    Const,
    Var,
    Function,
    Procedure,
    Begin,
    End,
    If,
    Then,
    Else,
    For,
    To,
    Downto,
    Do,
    While,
    Repeat,
    Until,
    Nil,
    Case,
    Of,
    With,
    Goto,
    Label,
    Array,
    Record,
    Set,
    File,
    Packed,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("program", Keyword::Program),
    ("const", Keyword::Const),
    ("var", Keyword::Var),
    ("function", Keyword::Function),
    ("procedure", Keyword::Procedure),
    ("begin", Keyword::Begin),
    ("end", Keyword::End),
    ("if", Keyword::If),
    ("then", Keyword::Then),
    ("else", Keyword::Else),
    ("for", Keyword::For),
    ("to", Keyword::To),
    ("downto", Keyword::Downto),
    ("do", Keyword::Do),
    ("while", Keyword::While),
    ("repeat", Keyword::Repeat),
    ("until", Keyword::Until),
    ("nil", Keyword::Nil),
    ("case", Keyword::Case),
    ("of", Keyword::Of),
    ("with", Keyword::With),
    ("goto", Keyword::Goto),
    ("label", Keyword::Label),
    ("array", Keyword::Array),
    ("record", Keyword::Record),
    ("set", Keyword::Set),
    ("file", Keyword::File),
    ("packed", Keyword::Packed),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = KEYWORDS
            .iter()
            .find(|(_, keyword)| keyword == self)
            .map_or("?", |&(name, _)| name);

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| NoCase::new(name) == NoCase::new(string))
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Un nombre de tipo predefinido.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeName {
    Integer,
    Real,
    Char,
    Boolean,
}

impl Display for TypeName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            TypeName::Integer => "integer",
            TypeName::Real => "real",
            TypeName::Char => "char",
            TypeName::Boolean => "Boolean",
        })
    }
}

impl FromStr for TypeName {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use TypeName::*;

        const NAMES: &[(NoCase<&str>, TypeName)] = &[
            (NoCase::new("integer"), Integer),
            (NoCase::new("real"),    Real),
            (NoCase::new("char"),    Char),
            (NoCase::new("boolean"), Boolean),
        ];

        NAMES
            .iter()
            .find(|&&(name, _)| name == NoCase::new(string))
            .map(|&(_, name)| name)
            .ok_or(())
    }
}

/// Máquina de estados del lexer.
///
/// La salida del lexer, así como su siguiente estado, quedan determinados por
/// el estado actual y el siguiente carácter en el flujo de entrada.
pub struct Lexer<S: InputStream> {
    source: Peekable<S>,
    origin: Location,
    state: State,
    start: Position,
    here: Position,
}

/// Posibles estados del lexer.
enum State {
    /// Antes del inicio de un token.
    Start,

    /// Se reportó fin de entrada, o bien ocurrió un error.
    Done,

    /// Siempre emite el token incluido sin consumir entrada.
    Complete(Token),

    /// Dentro de `{ ... }`.
    Comment,

    /// Se encontró `:`, podría convertirse en `:=`.
    Colon,

    /// Se encontró `<`, podría convertirse en `<=` o `<>`.
    Less,

    /// Se encontró `>`, podría convertirse en `>=`.
    Greater,

    /// Dentro de un string entre comillas.
    Str(String),

    /// Palabra que es un identificador, una palabra reservada o un nombre de tipo.
    Word(String),

    /// Parte entera de un número.
    Integer(String),

    /// Dígitos después del punto decimal.
    Fraction(String),

    /// Justo después de `E`.
    ExponentSign(String),

    /// Después de `E+` o `E-`, un dígito es obligatorio.
    ExponentStart(String),

    /// Dígitos del exponente.
    Exponent(String),
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en su estado inicial.
    pub fn new(origin: Location, source: S) -> Self {
        let start = origin.position();
        Lexer {
            source: source.peekable(),
            origin,
            state: State::Start,
            start,
            here: start,
        }
    }

    /// Línea del carácter bajo examen.
    pub fn line(&self) -> u32 {
        self.here.line()
    }

    /// Ubicación del carácter bajo examen.
    pub fn location(&self) -> Location {
        self.origin.moved_to(self.here)
    }

    /// Intenta construir el siguiente token.
    fn lex(&mut self) -> Result<Option<Token>, LexerError> {
        use State::*;

        let token = loop {
            let next_char = match self.source.peek() {
                None => None,
                Some(Ok((c, position))) => {
                    self.here = *position;
                    Some(*c)
                }

                Some(Err(_)) => match self.source.next() {
                    Some(Err(error)) => return Err(error.into()),
                    _ => unreachable!("peeked I/O error vanished"),
                },
            };

            // La posición inicial sigue a la entrada hasta un límite de token
            if let Start = self.state {
                self.start = self.here;
            }

            match (&mut self.state, next_char) {
                (Done, _) => return Ok(None),

                (Start, None) => {
                    self.state = Done;
                    break Token::Eof;
                }

                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some('{')) => self.state = Comment,

                // Tokens triviales
                (Start, Some(';')) => self.state = Complete(Token::Semicolon),
                (Start, Some(',')) => self.state = Complete(Token::Comma),
                (Start, Some('(')) => self.state = Complete(Token::OpenParen),
                (Start, Some(')')) => self.state = Complete(Token::CloseParen),
                (Start, Some('~')) => self.state = Complete(Token::Tilde),
                (Start, Some('.')) => self.state = Complete(Token::Period),
                (Start, Some('+')) => self.state = Complete(Token::AddOp(ArithOp::Add)),
                (Start, Some('-')) => self.state = Complete(Token::AddOp(ArithOp::Sub)),
                (Start, Some('*')) => self.state = Complete(Token::MulOp(ArithOp::Mul)),
                (Start, Some('/')) => self.state = Complete(Token::MulOp(ArithOp::Div)),
                (Start, Some('^')) => self.state = Complete(Token::MulOp(ArithOp::And)),
                (Start, Some('=')) => self.state = Complete(Token::RelOp(RelOp::Eq)),

                // Posibles tokens de dos caracteres
                (Start, Some(':')) => self.state = Colon,
                (Start, Some('<')) => self.state = Less,
                (Start, Some('>')) => self.state = Greater,

                (Start, Some('\'')) => self.state = Str(String::new()),
                (Start, Some(c)) if c.is_ascii_alphabetic() => self.state = Word(c.to_string()),

                // El dígito no se consume aquí, lo toma el estado de enteros
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(String::new());
                    continue;
                }

                (Start, Some(c)) => return Err(LexerError::BadChar(c)),

                // Emisión retrasada
                (Complete(token), _) => break std::mem::replace(token, Token::Eof),

                (Comment, Some('}')) => self.state = Start,
                (Comment, Some(_)) => (),
                (Comment, None) => return Err(LexerError::UnterminatedComment),

                (Colon, Some('=')) => self.state = Complete(Token::Assign),
                (Colon, _) => break Token::Colon,

                (Less, Some('=')) => self.state = Complete(Token::RelOp(RelOp::Le)),
                (Less, Some('>')) => self.state = Complete(Token::RelOp(RelOp::Ne)),
                (Less, _) => break Token::RelOp(RelOp::Lt),

                (Greater, Some('=')) => self.state = Complete(Token::RelOp(RelOp::Ge)),
                (Greater, _) => break Token::RelOp(RelOp::Gt),

                // Los cambios de línea embebidos son parte del string
                (Str(text), Some('\'')) => {
                    let text = std::mem::take(text);
                    self.state = Complete(Token::Str(text));
                }

                (Str(text), Some(c)) => text.push(c),
                (Str(_), None) => return Err(LexerError::UnterminatedString),

                (Word(word), Some(c)) if c.is_ascii_alphanumeric() => word.push(c),
                (Word(word), _) => break classify(std::mem::take(word)),

                (Integer(digits), Some(c)) if c.is_ascii_digit() => digits.push(c),
                (Integer(digits), Some('.')) => {
                    let mut digits = std::mem::take(digits);
                    digits.push('.');
                    self.state = Fraction(digits);
                }

                (Integer(digits), Some('e' | 'E')) | (Fraction(digits), Some('e' | 'E')) => {
                    let mut digits = std::mem::take(digits);
                    digits.push('E');
                    self.state = ExponentSign(digits);
                }

                (Integer(digits), _) => break Token::Number(std::mem::take(digits)),

                (Fraction(digits), Some(c)) if c.is_ascii_digit() => digits.push(c),
                (Fraction(digits), _) => break Token::Number(std::mem::take(digits)),

                (ExponentSign(digits), Some(c @ ('+' | '-'))) => {
                    let mut digits = std::mem::take(digits);
                    digits.push(c);
                    self.state = ExponentStart(digits);
                }

                (ExponentSign(digits), Some(c)) | (ExponentStart(digits), Some(c))
                    if c.is_ascii_digit() =>
                {
                    let mut digits = std::mem::take(digits);
                    digits.push(c);
                    self.state = Exponent(digits);
                }

                (ExponentSign(_), _) | (ExponentStart(_), _) => {
                    return Err(LexerError::MalformedExponent)
                }

                (Exponent(digits), Some(c)) if c.is_ascii_digit() => digits.push(c),
                (Exponent(digits), _) => break Token::Number(std::mem::take(digits)),
            }

            // Sin `continue`, el carácter observado se consume aquí
            self.source.next();
        };

        Ok(Some(token))
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some(token)) => {
                if !matches!(self.state, State::Done) {
                    self.state = State::Start;
                }

                let location = self.origin.moved_to(self.start);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.state = State::Done;
                Some(Err(Located::at(error, self.origin.moved_to(self.here))))
            }
        }
    }
}

/// Clasifica una palabra en uno de los vocabularios fijos, o la hace identificador.
fn classify(word: String) -> Token {
    if let Ok(keyword) = Keyword::from_str(&word) {
        return Token::Keyword(keyword);
    } else if let Ok(name) = TypeName::from_str(&word) {
        return Token::TypeName(name);
    }

    match NoCase::new(word.as_str()) {
        w if w == NoCase::new("true") => Token::Boolean(true),
        w if w == NoCase::new("false") => Token::Boolean(false),
        w if w == NoCase::new("in") => Token::RelOp(RelOp::In),
        w if w == NoCase::new("div") => Token::MulOp(ArithOp::IntDiv),
        w if w == NoCase::new("mod") => Token::MulOp(ArithOp::Mod),
        w if w == NoCase::new("and") => Token::MulOp(ArithOp::And),
        w if w == NoCase::new("or") => Token::AddOp(ArithOp::Or),
        _ => Token::Id(Identifier::new(word)),
    }
}
