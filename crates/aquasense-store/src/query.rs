//! Collection queries.

use serde_json::Value;

use aquasense_core::CollectionPath;

use crate::error::StoreError;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    pub(crate) const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub(crate) const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// `field op value` on a top-level or dotted field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// A filtered, ordered and limited read of one collection.
///
/// Results always tie-break on store sequence, so a query without an order
/// returns documents in creation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order: Option<(String, Direction)>,
    pub limit: Option<u32>,
    /// Only documents created after this store sequence.
    pub after_seq: Option<i64>,
}

impl Query {
    pub const fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order: None,
            limit: None,
            after_seq: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order = Some((field.to_string(), direction));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn after_seq(mut self, seq: i64) -> Self {
        self.after_seq = Some(seq);
        self
    }

    pub const fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Reject field names that are not plain dotted identifiers.
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        let fields = self
            .filters
            .iter()
            .map(|f| f.field.as_str())
            .chain(self.order.iter().map(|(f, _)| f.as_str()));
        for field in fields {
            json_path(field)?;
        }
        for filter in &self.filters {
            if filter.value.is_null() && !matches!(filter.op, FilterOp::Eq | FilterOp::Ne) {
                return Err(StoreError::InvalidArgument(format!(
                    "null only supports == and != (field '{}')",
                    filter.field
                )));
            }
            if filter.value.is_array() || filter.value.is_object() {
                return Err(StoreError::InvalidArgument(format!(
                    "filter on '{}' must compare a scalar",
                    filter.field
                )));
            }
        }
        Ok(())
    }
}

/// `SQLite` JSON path for a dotted field name.
pub(crate) fn json_path(field: &str) -> Result<String, StoreError> {
    let valid = !field.is_empty()
        && field.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(StoreError::InvalidArgument(format!(
            "invalid field path '{field}'"
        )));
    }
    Ok(format!("$.{field}"))
}
