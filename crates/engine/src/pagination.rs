//! Paging, ordering and result envelopes.

use serde::{Deserialize, Serialize};

use crate::condition::ColumnRef;

/// Page used when none is requested.
pub const DEFAULT_PAGE_NUMBER: u32 = 1;

/// Page size used when none is requested.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Defaults applied when a request omits pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub page: u32,
    pub limit: u32,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE_NUMBER,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Requested page. Both fields are 1-based; zero means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE_NUMBER
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE_NUMBER,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Resolve an optional request against `defaults`.
    pub fn resolve(requested: Option<Pagination>, defaults: QueryDefaults) -> Self {
        let requested = requested.unwrap_or(Pagination {
            page: 0,
            limit: 0,
        });
        Self {
            page: if requested.page == 0 { defaults.page.max(1) } else { requested.page },
            limit: if requested.limit == 0 { defaults.limit.max(1) } else { requested.limit },
        }
    }

    /// Rows to skip: `(page - 1) * limit`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Asc,
    #[serde(alias = "desc")]
    Desc,
}

impl From<SortDirection> for sea_query::Order {
    fn from(value: SortDirection) -> Self {
        match value {
            SortDirection::Asc => sea_query::Order::Asc,
            SortDirection::Desc => sea_query::Order::Desc,
        }
    }
}

impl SortDirection {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub column: ColumnRef,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn asc(column: impl Into<ColumnRef>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<ColumnRef>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Number of pages needed for `total` rows: plain ceiling, zero for no rows.
pub fn total_pages(total: u64, limit: u32) -> u64 {
    let limit = u64::from(limit.max(1));
    total / limit + u64::from(total % limit > 0)
}

/// Records of one page plus totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    pub records: Vec<T>,
    /// Matching rows before paging.
    pub total: u64,
    pub total_pages: u64,
}

impl<T> QueryResult<T> {
    pub fn new(records: Vec<T>, total: u64, limit: u32) -> Self {
        Self {
            records,
            total,
            total_pages: total_pages(total, limit),
        }
    }

    /// `(records, total, total_pages)`.
    pub fn into_parts(self) -> (Vec<T>, u64, u64) {
        (self.records, self.total, self.total_pages)
    }

    /// Wrap into the API pagination envelope.
    pub fn into_page(self, pagination: &Pagination) -> PaginatedResponse<T> {
        PaginatedResponse {
            items: self.records,
            meta: PageMeta {
                page: pagination.page,
                limit: pagination.limit,
                total: self.total,
                total_pages: self.total_pages,
            },
        }
    }
}

/// Paging metadata returned to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// API pagination envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_ceiling() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(21, 10), 3);
    }

    #[test]
    fn offsets() {
        assert_eq!(Pagination::new(1, 10).offset(), 0);
        assert_eq!(Pagination::new(3, 25).offset(), 50);
    }

    #[test]
    fn omitted_pagination_uses_defaults() {
        let p = Pagination::resolve(None, QueryDefaults::default());
        assert_eq!(p, Pagination::new(DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE));
        assert_eq!(p.offset(), 0);

        let p = Pagination::resolve(Some(Pagination::new(0, 0)), QueryDefaults { page: 2, limit: 5 });
        assert_eq!(p, Pagination::new(2, 5));

        let p = Pagination::resolve(Some(Pagination::new(4, 3)), QueryDefaults::default());
        assert_eq!(p, Pagination::new(4, 3));
    }

    #[test]
    fn pagination_deserializes_with_defaults() {
        let p: Pagination = serde_json::from_str(r#"{"page": 3}"#).unwrap();
        assert_eq!(p.limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn envelope_carries_meta() {
        let result = QueryResult::new(vec![1, 2], 21, 10);
        assert_eq!(result.total_pages, 3);
        let page = result.into_page(&Pagination::new(1, 10));
        assert_eq!(page.items, vec![1, 2]);
        let json = serde_json::to_value(&page.meta).unwrap();
        assert_eq!(json["totalPages"], 3);
    }

    #[test]
    fn order_spec_from_json() {
        let order: OrderSpec =
            serde_json::from_str(r#"{"column": "company.name", "direction": "desc"}"#).unwrap();
        assert_eq!(order, OrderSpec::desc("company.name"));
    }
}
