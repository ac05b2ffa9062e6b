//! Two-dimensional tables keyed by (from, to)

use std::collections::BTreeMap;

/// A table with fixed row and column keys and optional cells.
///
/// Row and column order is the order the keys were given in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruthTable<T> {
    froms: Vec<String>,
    tos: Vec<String>,
    cells: BTreeMap<(String, String), T>,
}

impl<T> TruthTable<T> {
    pub fn new(froms: Vec<String>, tos: Vec<String>) -> Self {
        Self {
            froms,
            tos,
            cells: BTreeMap::new(),
        }
    }

    pub fn froms(&self) -> &[String] {
        &self.froms
    }

    pub fn tos(&self) -> &[String] {
        &self.tos
    }

    pub fn get(&self, from: &str, to: &str) -> Option<&T> {
        self.cells.get(&(from.to_string(), to.to_string()))
    }

    pub fn set(&mut self, from: &str, to: &str, value: T) {
        self.cells.insert((from.to_string(), to.to_string()), value);
    }

    pub fn get_or_insert_with(&mut self, from: &str, to: &str, init: impl FnOnce() -> T) -> &mut T {
        self.cells
            .entry((from.to_string(), to.to_string()))
            .or_insert_with(init)
    }

    /// Every (from, to) pair in row-major order, whether set or not
    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.froms
            .iter()
            .flat_map(move |f| self.tos.iter().map(move |t| (f.as_str(), t.as_str())))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, Option<&T>)> {
        self.keys().map(move |(f, t)| (f, t, self.get(f, t)))
    }

    /// Build a table of the same shape by mapping every cell
    pub fn map<U>(&self, mut f: impl FnMut(&str, &str, Option<&T>) -> Option<U>) -> TruthTable<U> {
        let mut table = TruthTable::new(self.froms.clone(), self.tos.clone());
        for (from, to, cell) in self.iter() {
            if let Some(value) = f(from, to, cell) {
                table.set(from, to, value);
            }
        }
        table
    }

    /// Render as an aligned text grid
    pub fn render(&self, cell_text: impl Fn(Option<&T>) -> String) -> String {
        let rows: Vec<Vec<String>> = self
            .froms
            .iter()
            .map(|from| {
                let mut row = vec![from.clone()];
                row.extend(self.tos.iter().map(|to| cell_text(self.get(from, to))));
                row
            })
            .collect();

        let mut header = vec!["-".to_string()];
        header.extend(self.tos.iter().cloned());

        let columns = header.len();
        let widths: Vec<usize> = (0..columns)
            .map(|i| {
                std::iter::once(&header)
                    .chain(rows.iter())
                    .map(|r| r[i].len())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        for row in std::iter::once(&header).chain(rows.iter()) {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect();
            out.push_str(cells.join(" | ").trim_end());
            out.push('\n');
        }
        out
    }
}
