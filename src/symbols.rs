use std::collections::HashMap;

/// Interned bone name. Comparisons after interning are integer equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Case-insensitive name interner. The first spelling seen for a name is the
/// one reported back.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    index: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        let key = fold(name);
        if let Some(symbol) = self.index.get(&key) {
            return *symbol;
        }
        let symbol = Symbol(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(key, symbol);
        symbol
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.index.get(&fold(name)).copied()
    }

    /// Symbol interned at `index`, if any.
    pub fn symbol(&self, index: usize) -> Option<Symbol> {
        (index < self.names.len()).then_some(Symbol(index as u32))
    }

    pub fn name(&self, symbol: Symbol) -> &str {
        &self.names[symbol.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}
