//! Last fetched page of creditors plus a client-side sort.
//!
//! Sorting only reorders the page currently held; it never triggers a query.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::{total_pages, Record, SearchResult, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    Name,
    TradeName,
    Document,
    Status,
}

impl FromStr for SortField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(SortField::Id),
            "name" | "nome" => Ok(SortField::Name),
            "trade_name" | "nome_fantasia" | "nomefantasia" => Ok(SortField::TradeName),
            "document" | "documento" => Ok(SortField::Document),
            "status" | "ativo" => Ok(SortField::Status),
            other => Err(AppError::BadRequest(format!("Unknown sort field '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl SortOrder {
    fn toggled(self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

/// Holds `{items, page, page_size, total}` for the table and pager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCache {
    items: Vec<Record>,
    page: u32,
    page_size: u32,
    total: u64,
    sort: Option<SortSpec>,
}

impl PageCache {
    pub fn new(page_size: u32) -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            page_size: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
            total: 0,
            sort: None,
        }
    }

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn sort(&self) -> Option<SortSpec> {
        self.sort
    }

    /// Zero when there is nothing to paginate; the pager is hidden then.
    pub fn total_pages(&self) -> u32 {
        total_pages(self.total, self.page_size)
    }

    /// Replaces the held page with a fresh result, keeping the active sort.
    pub fn replace(&mut self, result: SearchResult) {
        let SearchResult {
            mut items,
            page,
            page_size,
            total,
        } = result;
        let page_size = if page_size == 0 {
            self.page_size
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };

        if items.len() > page_size as usize {
            tracing::warn!(
                "Store returned {} items for a page of {}, truncating",
                items.len(),
                page_size
            );
            items.truncate(page_size as usize);
        }

        self.items = items;
        self.page = page.max(1);
        self.page_size = page_size;
        self.total = total;

        if let Some(spec) = self.sort {
            sort_records(&mut self.items, spec);
        }
    }

    /// Drops the held page and returns to page 1.
    pub fn clear(&mut self) {
        self.items.clear();
        self.page = 1;
        self.total = 0;
    }

    /// Sorts the held items by `field`. Calling again with the same field
    /// flips the order; a new field starts ascending.
    pub fn apply_sort(&mut self, field: SortField) -> SortSpec {
        let order = match self.sort {
            Some(current) if current.field == field => current.order.toggled(),
            _ => SortOrder::Ascending,
        };
        self.apply_sort_order(field, order)
    }

    pub fn apply_sort_order(&mut self, field: SortField, order: SortOrder) -> SortSpec {
        let spec = SortSpec { field, order };
        sort_records(&mut self.items, spec);
        self.sort = Some(spec);
        spec
    }

    /// Validates a page request. Out-of-range pages are a no-op (`None`).
    pub fn navigate(&self, page: u32) -> Option<u32> {
        let last = self.total_pages();
        if last == 0 || page < 1 || page > last {
            tracing::debug!("Ignoring navigation to page {} (last page {})", page, last);
            return None;
        }
        Some(page)
    }

    /// Changes the page size and drops the held page. The caller must then
    /// re-fetch page 1; the pager stays hidden until it lands.
    pub fn set_page_size(&mut self, page_size: u32) -> Result<(), AppError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::BadRequest(format!(
                "Page size must be between {} and {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        self.page_size = page_size;
        self.clear();
        Ok(())
    }
}

fn sort_records(items: &mut [Record], spec: SortSpec) {
    items.sort_by(|a, b| {
        let ordering = compare_by(a, b, spec.field);
        match spec.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

fn compare_by(a: &Record, b: &Record, field: SortField) -> Ordering {
    match field {
        SortField::Id => compare_missing_last(a.id, b.id, |x, y| x.cmp(y)),
        SortField::Name => caseless(&a.name).cmp(&caseless(&b.name)),
        SortField::TradeName => compare_missing_last(
            a.trade_name.as_deref(),
            b.trade_name.as_deref(),
            |x, y| caseless(x).cmp(&caseless(y)),
        ),
        SortField::Document => compare_missing_last(
            a.document.as_ref().map(|d| d.digits()),
            b.document.as_ref().map(|d| d.digits()),
            |x, y| x.cmp(y),
        ),
        // Active first
        SortField::Status => b.status.is_active().cmp(&a.status.is_active()),
    }
}

fn compare_missing_last<T>(
    a: Option<T>,
    b: Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(&x, &y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn caseless(s: &str) -> String {
    s.to_lowercase()
}
