//! Pagination, ordering and search helpers shared by every list endpoint.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::config::PaginationConfig;

/// Query parameters common to all list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

impl ListParams {
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn page_request(&self, pagination: &PaginationConfig) -> PageRequest {
        let size = self
            .page_size
            .filter(|s| *s > 0)
            .unwrap_or(pagination.page_size)
            .min(pagination.max_page_size.max(1));
        PageRequest {
            page: self.page.filter(|p| *p > 0).unwrap_or(1),
            page_size: size.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, page_size: 20 }
    }
}

/// Paginated list envelope; `next`/`previous` are page numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, count: i64, request: PageRequest) -> Self {
        let seen = request.offset() + results.len() as i64;
        Self {
            count,
            next: (seen < count).then_some(request.page + 1),
            previous: (request.page > 1).then_some(request.page - 1),
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

/// Declared sort fields for one resource: API name to SQL expression.
#[derive(Debug, Clone, Copy)]
pub struct Ordering {
    pub fields: &'static [(&'static str, &'static str)],
    pub default: &'static str,
    pub tiebreak: &'static str,
}

impl Ordering {
    /// Builds an `ORDER BY` clause from a comma separated `ordering` value.
    /// Unknown fields are dropped; nothing usable falls back to the default.
    pub fn clause(&self, requested: Option<&str>) -> String {
        let terms = requested
            .map(|r| self.resolve(r))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.resolve(self.default));

        let descending = terms.first().map(|(_, desc)| *desc).unwrap_or(false);
        let mut parts: Vec<String> = terms
            .iter()
            .map(|(column, desc)| format!("{column} {}", if *desc { "DESC" } else { "ASC" }))
            .collect();
        parts.push(format!("{} {}", self.tiebreak, if descending { "DESC" } else { "ASC" }));

        format!(" ORDER BY {}", parts.join(", "))
    }

    fn resolve(&self, value: &str) -> Vec<(&'static str, bool)> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|term| {
                let (name, desc) = match term.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (term, false),
                };
                self.fields
                    .iter()
                    .find(|(field, _)| *field == name)
                    .map(|(_, column)| (*column, desc))
            })
            .collect()
    }
}

/// Appends ` AND (c1 LIKE ? OR c2 LIKE ? ...)` for a case-insensitive substring match.
pub fn push_search(qb: &mut QueryBuilder<'_, Sqlite>, term: Option<&str>, columns: &[&str]) {
    let Some(term) = term else { return };
    if columns.is_empty() {
        return;
    }
    let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
    qb.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("LOWER(COALESCE(")
            .push(*column)
            .push(", '')) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\'");
    }
    qb.push(")");
}

/// Escapes LIKE wildcards so the term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const ORDERING: Ordering = Ordering {
        fields: &[("date", "v.date"), ("time", "v.time"), ("created_at", "v.created_at")],
        default: "-date,-time",
        tiebreak: "v.id",
    };

    #[test_case(None, " ORDER BY v.date DESC, v.time DESC, v.id DESC" ; "default")]
    #[test_case(Some("created_at"), " ORDER BY v.created_at ASC, v.id ASC" ; "ascending")]
    #[test_case(Some("-created_at"), " ORDER BY v.created_at DESC, v.id DESC" ; "descending")]
    #[test_case(Some("password"), " ORDER BY v.date DESC, v.time DESC, v.id DESC" ; "unknown falls back")]
    #[test_case(Some("bogus,time"), " ORDER BY v.time ASC, v.id ASC" ; "unknown term dropped")]
    fn ordering_clause(requested: Option<&str>, expected: &str) {
        assert_eq!(ORDERING.clause(requested), expected);
    }

    #[test]
    fn page_size_is_capped() {
        let params = ListParams {
            page_size: Some(5000),
            ..Default::default()
        };
        let request = params.page_request(&PaginationConfig::default());
        assert_eq!(request.page_size, 1000);
        assert_eq!(request.page, 1);
    }

    #[test]
    fn page_links() {
        let request = PageRequest { page: 2, page_size: 10 };
        let page = Page::new(vec![0; 10], 35, request);
        assert_eq!(page.next, Some(3));
        assert_eq!(page.previous, Some(1));

        let last = Page::new(vec![0; 5], 35, PageRequest { page: 4, page_size: 10 });
        assert_eq!(last.next, None);
    }

    #[test_case("50%", "50\\%" ; "percent")]
    #[test_case("a_b", "a\\_b" ; "underscore")]
    #[test_case("c:\\x", "c:\\\\x" ; "backslash")]
    #[test_case("plain", "plain" ; "untouched")]
    fn like_wildcards_are_escaped(term: &str, expected: &str) {
        assert_eq!(escape_like(term), expected);
    }

    #[test]
    fn search_clause_declares_escape() {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT 1 FROM t WHERE 1 = 1");
        push_search(&mut qb, Some("x"), &["t.a", "t.b"]);
        assert_eq!(qb.sql().matches("ESCAPE '\\'").count(), 2);
    }

    #[test]
    fn blank_search_is_ignored() {
        let params = ListParams {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(params.search_term(), None);
    }
}
