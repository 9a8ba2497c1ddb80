//! Tablas de símbolos.
//!
//! Los scopes viven en una arena y refieren a su padre por [`ScopeId`]. El
//! primer scope siempre es la raíz, que contiene las declaraciones globales
//! del programa.
//!
//! # Visibilidad
//! Una búsqueda sube por la cadena de padres, pero un símbolo encontrado en un
//! scope envolvente distinto de la raíz solo es visible si es una función o
//! una constante. Las variables comunes de una función envolvente no son
//! alcanzables desde funciones anidadas en ella. Un símbolo encontrado pero
//! invisible, o de un tipo distinto al solicitado, no detiene la búsqueda.

use std::{collections::HashMap, rc::Rc};

use crate::{
    ast::{Constant, Parameter, Qualifiers, Type},
    lex::Identifier,
};

/// Índice de un scope en [`Scopes`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Clone, Debug)]
pub enum Symbol {
    Variable(Variable),
    Function(Rc<Signature>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub ty: Type,
    pub qualifiers: Qualifiers,

    /// Solo las constantes tienen uno.
    pub value: Option<Constant>,
}

impl Variable {
    pub fn new(ty: Type) -> Self {
        Variable {
            ty,
            qualifiers: Qualifiers::empty(),
            value: None,
        }
    }

    pub fn constant(value: Constant) -> Self {
        Variable {
            ty: value.ty(),
            qualifiers: Qualifiers::CONST,
            value: Some(value),
        }
    }

    pub fn reference(ty: Type) -> Self {
        Variable {
            ty,
            qualifiers: Qualifiers::REF,
            value: None,
        }
    }

    pub fn is_const(&self) -> bool {
        self.qualifiers.contains(Qualifiers::CONST)
    }

    pub fn is_ref(&self) -> bool {
        self.qualifiers.contains(Qualifiers::REF)
    }
}

/// Todo lo que un llamador necesita saber sobre una función.
#[derive(Debug)]
pub struct Signature {
    pub name: Identifier,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,

    /// Scope propio de la función.
    pub scope: ScopeId,
}

/// Un tipo de símbolo que puede buscarse.
pub trait SymbolKind {
    fn cast(symbol: &Symbol) -> Option<&Self>;

    /// Si el símbolo es visible a través de fronteras de scopes no raíz.
    fn is_shared(&self) -> bool;
}

impl SymbolKind for Variable {
    fn cast(symbol: &Symbol) -> Option<&Self> {
        match symbol {
            Symbol::Variable(variable) => Some(variable),
            Symbol::Function(_) => None,
        }
    }

    fn is_shared(&self) -> bool {
        self.is_const()
    }
}

impl SymbolKind for Signature {
    fn cast(symbol: &Symbol) -> Option<&Self> {
        match symbol {
            Symbol::Function(signature) => Some(signature),
            Symbol::Variable(_) => None,
        }
    }

    fn is_shared(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct Scope {
    name: Identifier,
    parent: Option<ScopeId>,
    symbols: HashMap<Identifier, Symbol>,
}

impl Scope {
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Símbolos declarados directamente en este scope.
    pub fn get(&self, name: &Identifier) -> Option<&Symbol> {
        self.symbols.get(name)
    }
}

/// Arena de todos los scopes de un programa.
#[derive(Debug)]
pub struct Scopes(Vec<Scope>);

impl Scopes {
    /// Crea la arena con únicamente un scope raíz.
    pub fn new(name: Identifier) -> Self {
        Scopes(vec![Scope {
            name,
            parent: None,
            symbols: HashMap::new(),
        }])
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn is_root(&self, scope: ScopeId) -> bool {
        self[scope].parent.is_none()
    }

    /// Crea un scope vacío anidado en `parent`.
    pub fn child(&mut self, parent: ScopeId, name: Identifier) -> ScopeId {
        let id = ScopeId(self.0.len());
        self.0.push(Scope {
            name,
            parent: Some(parent),
            symbols: HashMap::new(),
        });

        id
    }

    /// Declara un símbolo. Retorna `false` si el nombre ya está tomado en este
    /// mismo scope, en cuyo caso nada cambia.
    pub fn add(&mut self, scope: ScopeId, name: Identifier, symbol: Symbol) -> bool {
        use std::collections::hash_map::Entry;

        match self.0[scope.0].symbols.entry(name) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(symbol);
                true
            }
        }
    }

    /// Encuentra el símbolo visible más cercano de tipo `K` llamado `name`.
    ///
    /// También retorna el scope donde se encontró.
    pub fn lookup<K: SymbolKind>(&self, from: ScopeId, name: &Identifier) -> Option<(ScopeId, &K)> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = &self[id];
            let found = scope.symbols.get(name).and_then(K::cast);

            match found {
                Some(symbol) if id == from || scope.parent.is_none() || symbol.is_shared() => {
                    return Some((id, symbol))
                }

                _ => current = scope.parent,
            }
        }

        None
    }

    /// Nombres de todos los scopes envolventes, del más externo, unidos por `.`.
    pub fn qualified_name(&self, scope: ScopeId) -> String {
        let mut names = Vec::new();

        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self[id];
            names.push(scope.name.as_ref());
            current = scope.parent;
        }

        names.reverse();
        names.join(".")
    }
}

impl std::ops::Index<ScopeId> for Scopes {
    type Output = Scope;

    fn index(&self, id: ScopeId) -> &Scope {
        &self.0[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(name: &str, scope: ScopeId) -> Symbol {
        Symbol::Function(Rc::new(Signature {
            name: name.into(),
            parameters: Vec::new(),
            return_type: Type::Integer,
            scope,
        }))
    }

    #[test]
    fn duplicates_are_rejected_in_the_same_scope_only() {
        let mut scopes = Scopes::new("main".into());
        let root = scopes.root();
        let inner = scopes.child(root, "f".into());

        assert!(scopes.add(root, "x".into(), Symbol::Variable(Variable::new(Type::Integer))));
        assert!(!scopes.add(root, "X".into(), signature("x", inner)));
        assert!(scopes.add(inner, "x".into(), Symbol::Variable(Variable::new(Type::Real))));

        let (found, variable) = scopes.lookup::<Variable>(inner, &"x".into()).unwrap();
        assert_eq!(found, inner);
        assert_eq!(variable.ty, Type::Real);
    }

    #[test]
    fn enclosing_variables_are_hidden_unless_global_or_constant() {
        let mut scopes = Scopes::new("main".into());
        let root = scopes.root();
        let outer = scopes.child(root, "outer".into());
        let inner = scopes.child(outer, "inner".into());

        scopes.add(root, "g".into(), Symbol::Variable(Variable::new(Type::Integer)));
        scopes.add(outer, "v".into(), Symbol::Variable(Variable::new(Type::Integer)));
        scopes.add(outer, "k".into(), Symbol::Variable(Variable::constant(Constant::Integer(3))));
        scopes.add(outer, "helper".into(), signature("helper", inner));

        assert!(scopes.lookup::<Variable>(inner, &"v".into()).is_none());
        assert!(scopes.lookup::<Variable>(outer, &"v".into()).is_some());
        assert_eq!(scopes.lookup::<Variable>(inner, &"g".into()).map(|(id, _)| id), Some(root));
        assert_eq!(scopes.lookup::<Variable>(inner, &"k".into()).map(|(id, _)| id), Some(outer));
        assert!(scopes.lookup::<Signature>(inner, &"helper".into()).is_some());
    }

    #[test]
    fn lookup_skips_symbols_of_other_kinds() {
        let mut scopes = Scopes::new("main".into());
        let root = scopes.root();
        let fact = scopes.child(root, "fact".into());

        scopes.add(root, "fact".into(), signature("fact", fact));
        scopes.add(fact, "fact".into(), Symbol::Variable(Variable::new(Type::Integer)));

        assert_eq!(scopes.lookup::<Variable>(fact, &"fact".into()).map(|(id, _)| id), Some(fact));
        assert_eq!(scopes.lookup::<Signature>(fact, &"fact".into()).map(|(id, _)| id), Some(root));
    }

    #[test]
    fn qualified_names_list_ancestors() {
        let mut scopes = Scopes::new("main".into());
        let outer = scopes.child(scopes.root(), "outer".into());
        let inner = scopes.child(outer, "inner".into());

        assert!(scopes.is_root(scopes.root()));
        assert!(!scopes.is_root(inner));
        assert_eq!(scopes.qualified_name(inner), "main.outer.inner");
    }
}
