//! Uniform list contract: filter, sort, then paginate
//!
//! Every `List*` endpoint funnels through [`ListOptions::apply`]. Filters
//! run first, the sort runs over the whole filtered set, and only then is
//! the page window cut. Pages are 1-indexed.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::selector::{FieldSelector, LabelSelector};
use crate::error::{GatewayError, GatewayResult};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// `pageSize=-1` asks for every item on one page
pub const PAGE_SIZE_ALL: i64 = -1;

/// Raw list parameters as they arrive on the query string
///
/// Everything is kept as text so that malformed numbers surface as
/// `INVALID_ARGUMENT` in the uniform error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default, rename = "pageSize")]
    pub page_size: Option<String>,
    /// Fuzzy name (case-insensitive regex)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "labelSelector")]
    pub label_selector: Option<String>,
    #[serde(default, rename = "fieldSelector")]
    pub field_selector: Option<String>,
    #[serde(default, rename = "sortOption.field")]
    pub sort_field: Option<String>,
    #[serde(default, rename = "sortOption.asc")]
    pub sort_asc: Option<String>,
    #[serde(default, rename = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(default, rename = "sortDir")]
    pub sort_dir: Option<String>,
}

/// Page window size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Limited(usize),
    All,
}

/// Sort request, field already in canonical camelCase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub ascending: bool,
}

/// Validated list options
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub page: usize,
    pub page_size: PageSize,
    pub fuzzy_name: Option<Regex>,
    pub labels: Option<LabelSelector>,
    pub fields: Option<FieldSelector>,
    pub sort: Option<SortSpec>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: PageSize::Limited(DEFAULT_PAGE_SIZE),
            fuzzy_name: None,
            labels: None,
            fields: None,
            sort: None,
        }
    }
}

/// Pagination block of every list response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub pages: usize,
}

/// One page of a list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Capability every listable resource kind implements
pub trait Listable {
    /// Sortable and selectable fields, canonical camelCase
    const FIELDS: &'static [&'static str];

    fn name(&self) -> &str;

    fn namespace(&self) -> Option<&str> {
        None
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        None
    }

    /// Value of a field listed in `FIELDS`
    fn field(&self, field: &str) -> SortKey;

    /// Items that always sort ahead of the rest
    fn pinned(&self) -> bool {
        false
    }
}

// ============================================================================
// Sort keys
// ============================================================================

/// A comparable field value
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Str(String),
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Bool(_) => 1,
            SortKey::Int(_) | SortKey::Float(_) => 2,
            SortKey::Time(_) => 3,
            SortKey::Str(_) => 4,
        }
    }

    /// Total order across all values, nulls first
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            (SortKey::Int(a), SortKey::Int(b)) => a.cmp(b),
            (SortKey::Float(a), SortKey::Float(b)) => a.total_cmp(b),
            (SortKey::Int(a), SortKey::Float(b)) => (*a as f64).total_cmp(b),
            (SortKey::Float(a), SortKey::Int(b)) => a.total_cmp(&(*b as f64)),
            (SortKey::Time(a), SortKey::Time(b)) => a.cmp(b),
            (SortKey::Str(a), SortKey::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Text form used by field selectors
    pub fn render(&self) -> String {
        match self {
            SortKey::Null => String::new(),
            SortKey::Bool(b) => b.to_string(),
            SortKey::Int(i) => i.to_string(),
            SortKey::Float(f) => f.to_string(),
            SortKey::Time(t) => t.to_rfc3339(),
            SortKey::Str(s) => s.clone(),
        }
    }
}

impl From<&str> for SortKey {
    fn from(s: &str) -> Self {
        SortKey::Str(s.to_string())
    }
}

impl From<String> for SortKey {
    fn from(s: String) -> Self {
        SortKey::Str(s)
    }
}

impl From<Option<&str>> for SortKey {
    fn from(s: Option<&str>) -> Self {
        s.map_or(SortKey::Null, SortKey::from)
    }
}

impl From<bool> for SortKey {
    fn from(b: bool) -> Self {
        SortKey::Bool(b)
    }
}

impl From<i64> for SortKey {
    fn from(i: i64) -> Self {
        SortKey::Int(i)
    }
}

impl From<i32> for SortKey {
    fn from(i: i32) -> Self {
        SortKey::Int(i64::from(i))
    }
}

impl From<u32> for SortKey {
    fn from(i: u32) -> Self {
        SortKey::Int(i64::from(i))
    }
}

impl From<f64> for SortKey {
    fn from(f: f64) -> Self {
        SortKey::Float(f)
    }
}

impl From<Option<DateTime<Utc>>> for SortKey {
    fn from(t: Option<DateTime<Utc>>) -> Self {
        t.map_or(SortKey::Null, SortKey::Time)
    }
}

/// Normalize a client-supplied field name to canonical camelCase
///
/// Accepts `snake_case`, `camelCase`, `metadata.`/`spec.`/`status.`
/// prefixes, and the `field_name`/`created_at` aliases.
pub fn canonical_field(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches("metadata.")
        .trim_start_matches("spec.")
        .trim_start_matches("status.");
    match trimmed {
        "field_name" => return "name".to_string(),
        "created_at" | "creation_timestamp" | "createdTime" | "created_time" => {
            return "creationTimestamp".to_string()
        }
        _ => {}
    }
    let mut out = String::with_capacity(trimmed.len());
    let mut upper = false;
    for c in trimmed.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_int(name: &str, raw: &str) -> GatewayResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| GatewayError::invalid(format!("{} must be an integer, got '{}'", name, raw)))
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Compile a fuzzy name filter
pub fn fuzzy_regex(pattern: &str) -> GatewayResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .ignore_whitespace(true)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| GatewayError::invalid(format!("invalid name filter '{}': {}", pattern, e)))
}

impl ListQuery {
    /// Validate raw parameters into [`ListOptions`]
    pub fn to_options(&self) -> GatewayResult<ListOptions> {
        let page = match non_empty(&self.page) {
            None => DEFAULT_PAGE,
            Some(raw) => {
                let page = parse_int("page", raw)?;
                if page <= 0 {
                    return Err(GatewayError::invalid(format!(
                        "page must be >= 1, got {}",
                        page
                    )));
                }
                page as usize
            }
        };

        let page_size = match non_empty(&self.page_size) {
            None => PageSize::Limited(DEFAULT_PAGE_SIZE),
            Some(raw) => match parse_int("pageSize", raw)? {
                0 => PageSize::Limited(DEFAULT_PAGE_SIZE),
                PAGE_SIZE_ALL => PageSize::All,
                n if n < 0 => {
                    return Err(GatewayError::invalid(format!(
                        "pageSize must be positive or -1, got {}",
                        n
                    )))
                }
                n => PageSize::Limited((n as usize).min(MAX_PAGE_SIZE)),
            },
        };

        let fuzzy_name = non_empty(&self.name).map(fuzzy_regex).transpose()?;
        let labels = non_empty(&self.label_selector)
            .map(LabelSelector::parse)
            .transpose()?;
        let fields = non_empty(&self.field_selector)
            .map(FieldSelector::parse)
            .transpose()?;

        let sort = if let Some(field) = non_empty(&self.sort_field) {
            let ascending = match non_empty(&self.sort_asc) {
                None => true,
                Some(v) => v.parse::<bool>().map_err(|_| {
                    GatewayError::invalid(format!("sortOption.asc must be a boolean, got '{}'", v))
                })?,
            };
            Some(SortSpec {
                field: canonical_field(field),
                ascending,
            })
        } else if let Some(field) = non_empty(&self.sort_by) {
            Some(SortSpec {
                field: canonical_field(field),
                ascending: parse_direction(non_empty(&self.sort_dir))?,
            })
        } else if let Some(dir) = non_empty(&self.sort_dir) {
            Some(SortSpec {
                field: "creationTimestamp".to_string(),
                ascending: parse_direction(Some(dir))?,
            })
        } else {
            None
        };

        Ok(ListOptions {
            page,
            page_size,
            fuzzy_name,
            labels,
            fields,
            sort,
        })
    }
}

fn parse_direction(dir: Option<&str>) -> GatewayResult<bool> {
    match dir.map(str::to_ascii_lowercase).as_deref() {
        None | Some("asc") => Ok(true),
        Some("desc") => Ok(false),
        Some(other) => Err(GatewayError::invalid(format!(
            "sortDir must be 'asc' or 'desc', got '{}'",
            other
        ))),
    }
}

// ============================================================================
// Applying options
// ============================================================================

impl ListOptions {
    pub fn with_sort(mut self, field: &str, ascending: bool) -> Self {
        self.sort = Some(SortSpec {
            field: canonical_field(field),
            ascending,
        });
        self
    }

    /// Use `field` when the caller did not ask for a specific order
    pub fn with_default_sort(mut self, field: &str, ascending: bool) -> Self {
        if self.sort.is_none() {
            self = self.with_sort(field, ascending);
        }
        self
    }

    fn check_field<T: Listable>(field: &str, usage: &str) -> GatewayResult<()> {
        if T::FIELDS.contains(&field) {
            Ok(())
        } else {
            Err(GatewayError::invalid(format!(
                "unknown {} field '{}', expected one of: {}",
                usage,
                field,
                T::FIELDS.join(", ")
            )))
        }
    }

    /// Filter, sort and paginate
    pub fn apply<T: Listable>(&self, items: Vec<T>) -> GatewayResult<Page<T>> {
        let filtered = self.filter(items)?;
        let sorted = self.sort(filtered)?;
        Ok(self.paginate(sorted))
    }

    pub fn filter<T: Listable>(&self, items: Vec<T>) -> GatewayResult<Vec<T>> {
        if let Some(fields) = &self.fields {
            for req in &fields.requirements {
                Self::check_field::<T>(&req.field, "field selector")?;
            }
        }

        let kept = items
            .into_iter()
            .filter(|item| {
                if let Some(re) = &self.fuzzy_name {
                    if !re.is_match(item.name()) {
                        return false;
                    }
                }
                if let Some(selector) = &self.labels {
                    let empty = BTreeMap::new();
                    if !selector.matches(item.labels().unwrap_or(&empty)) {
                        return false;
                    }
                }
                if let Some(fields) = &self.fields {
                    let all = fields.requirements.iter().all(|req| {
                        let equal = item.field(&req.field).render() == req.value;
                        equal != req.negated
                    });
                    if !all {
                        return false;
                    }
                }
                true
            })
            .collect();
        Ok(kept)
    }

    /// Stable total order: pinned items, requested field, name, namespace
    pub fn sort<T: Listable>(&self, mut items: Vec<T>) -> GatewayResult<Vec<T>> {
        if let Some(spec) = &self.sort {
            Self::check_field::<T>(&spec.field, "sort")?;
        }
        items.sort_by(|a, b| {
            let pinned = b.pinned().cmp(&a.pinned());
            if pinned != Ordering::Equal {
                return pinned;
            }
            if let Some(spec) = &self.sort {
                let ord = a.field(&spec.field).total_cmp(&b.field(&spec.field));
                let ord = if spec.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.name()
                .cmp(b.name())
                .then_with(|| a.namespace().cmp(&b.namespace()))
        });
        Ok(items)
    }

    /// Cut the page window; a page past the end yields no items
    pub fn paginate<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len();
        let page_size = match self.page_size {
            PageSize::Limited(n) => n,
            PageSize::All => total,
        };
        let pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        };
        let start = (self.page - 1).saturating_mul(page_size);
        let items: Vec<T> = if start >= total {
            Vec::new()
        } else {
            let end = (start + page_size).min(total);
            items.into_iter().skip(start).take(end - start).collect()
        };
        Page {
            items,
            pagination: Pagination {
                total,
                page: self.page,
                page_size,
                pages,
            },
        }
    }
}
