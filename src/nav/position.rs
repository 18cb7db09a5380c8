use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// Last highlighted cell per page, consulted when a page is (re)created.
#[derive(Debug, Default)]
pub struct PositionMemory {
    positions: HashMap<String, Position>,
}

impl PositionMemory {
    pub fn record(&mut self, page: &str, position: Position) {
        self.positions.insert(page.to_string(), position);
    }

    pub fn lookup(&self, page: &str) -> Option<Position> {
        self.positions.get(page).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.positions.len()
    }
}
