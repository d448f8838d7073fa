use crate::errors::AppResult;
use crate::models::{Attributes, ElementRecord};
use std::collections::HashMap;

/// Accumulated rows and column union for one tag.
///
/// Cells are stored by column position. A row only holds cells up to the last
/// column it had a value for; anything past that is an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagGroup {
    tag: String,
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<Option<String>>>,
}

impl TagGroup {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Union of attribute names, in first-seen order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Appends one element's attributes, extending the column union as needed.
    pub fn push(&mut self, attributes: Attributes) {
        let mut row: Vec<Option<String>> = Vec::with_capacity(self.columns.len());
        for (key, value) in attributes {
            let position = match self.column_index.get(&key) {
                Some(&position) => position,
                None => {
                    let position = self.columns.len();
                    self.column_index.insert(key.clone(), position);
                    self.columns.push(key);
                    position
                }
            };
            if row.len() <= position {
                row.resize(position + 1, None);
            }
            row[position] = Some(value);
        }
        self.rows.push(row);
    }

    /// Rows padded to the full column union; absent cells are empty strings.
    pub fn padded_rows(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        let width = self.columns.len();
        self.rows.iter().map(move |row| {
            (0..width)
                .map(|i| row.get(i).and_then(|cell| cell.as_deref()).unwrap_or(""))
                .collect()
        })
    }
}

/// Partitions an element record stream into per-tag groups.
///
/// Groups are kept in the order their tag was first seen, so output derived
/// from them is deterministic for a given document.
#[derive(Debug, Default)]
pub struct TagAggregator {
    groups: Vec<TagGroup>,
    group_index: HashMap<String, usize>,
    total_rows: u64,
}

impl TagAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ElementRecord) {
        let ElementRecord {
            tag, attributes, ..
        } = record;
        let index = match self.group_index.get(&tag) {
            Some(&index) => index,
            None => {
                let index = self.groups.len();
                self.group_index.insert(tag.clone(), index);
                self.groups.push(TagGroup::new(tag));
                index
            }
        };
        self.groups[index].push(attributes);
        self.total_rows += 1;
    }

    /// Drains `records` into the aggregator, stopping at the first error.
    pub fn consume<I>(&mut self, records: I) -> AppResult<()>
    where
        I: IntoIterator<Item = AppResult<ElementRecord>>,
    {
        for record in records {
            self.push(record?);
        }
        Ok(())
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn tag_count(&self) -> usize {
        self.groups.len()
    }

    /// Groups seen so far, in tag-discovery order.
    pub fn groups(&self) -> &[TagGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<TagGroup> {
        self.groups
    }
}
