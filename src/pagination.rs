//! Page arithmetic shared by the recipe listings.
//!
//! Stores hand back the already filtered and ordered rows for one page plus the
//! total match count; [`Page`] carries the metadata that listings expose.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page must be at least 1")]
    InvalidPage,
    #[error("per_page must be between 1 and {}", PageRequest::MAX_PER_PAGE)]
    InvalidPerPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: i64 = 3;
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: i64, per_page: i64) -> Result<Self, PaginationError> {
        let page = u32::try_from(page)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or(PaginationError::InvalidPage)?;
        let per_page = u32::try_from(per_page)
            .ok()
            .filter(|p| (1..=Self::MAX_PER_PAGE).contains(p))
            .ok_or(PaginationError::InvalidPerPage)?;
        Ok(Self { page, per_page })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Saturates for pages far past the end; those simply come back empty.
    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1).saturating_mul(i64::from(self.per_page))
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
}

impl<T> Page<T> {
    /// Wraps one page of rows fetched at `req.offset()` out of `total` matches.
    pub fn new(items: Vec<T>, req: PageRequest, total: u64) -> Self {
        let pages = total.div_ceil(u64::from(req.per_page)) as u32;
        Self {
            items,
            page: req.page,
            per_page: req.per_page,
            total,
            pages,
        }
    }

    /// Slices an in-memory, already ordered result set.
    pub fn from_ordered(all: Vec<T>, req: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(req.offset() as usize)
            .take(req.per_page as usize)
            .collect();
        Self::new(items, req, total)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            pages: self.pages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    CreatedAt,
    CookTime,
    NumOfServings,
}

impl SortKey {
    /// Unknown keys fall back to creation time.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "cook_time" => SortKey::CookTime,
            "num_of_servings" => SortKey::NumOfServings,
            _ => SortKey::CreatedAt,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::CookTime => "cook_time",
            SortKey::NumOfServings => "num_of_servings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Absolute URLs of neighbouring pages for the same request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageLinks {
    pub first: String,
    pub last: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl PageLinks {
    pub fn build<T>(base_url: &str, params: &[(String, String)], page: &Page<T>) -> Self {
        let url_for = |n: u32| {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in params.iter().filter(|(k, _)| k != "page") {
                query.append_pair(k, v);
            }
            query.append_pair("page", &n.to_string());
            format!("{}?{}", base_url, query.finish())
        };
        Self {
            first: url_for(1),
            last: url_for(page.pages.max(1)),
            prev: page.has_prev().then(|| url_for(page.page - 1)),
            next: page.has_next().then(|| url_for(page.page + 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(total: usize, page: i64, per_page: i64) -> Page<usize> {
        let req = PageRequest::new(page, per_page).unwrap();
        Page::from_ordered((0..total).collect(), req)
    }

    #[test]
    fn pages_is_ceiling_of_total_over_per_page() {
        for total in 0..20 {
            for per_page in 1..6 {
                let p = page_of(total, 1, per_page);
                let expected = (total as f64 / per_page as f64).ceil() as u32;
                assert_eq!(p.pages, expected, "total={total} per_page={per_page}");
            }
        }
    }

    #[test]
    fn seven_items_three_per_page() {
        let third = page_of(7, 3, 3);
        assert_eq!(third.items, vec![6]);
        assert!(!third.has_next());
        assert!(third.has_prev());

        let fourth = page_of(7, 4, 3);
        assert!(fourth.items.is_empty());
        assert!(!fourth.has_next());
        assert_eq!(fourth.total, 7);
        assert_eq!(fourth.pages, 3);
    }

    #[test]
    fn rejects_non_positive_page_and_per_page() {
        assert_eq!(PageRequest::new(0, 3), Err(PaginationError::InvalidPage));
        assert_eq!(PageRequest::new(-4, 3), Err(PaginationError::InvalidPage));
        assert_eq!(PageRequest::new(1, 0), Err(PaginationError::InvalidPerPage));
        assert_eq!(PageRequest::new(1, -1), Err(PaginationError::InvalidPerPage));
        assert_eq!(PageRequest::new(1, 101), Err(PaginationError::InvalidPerPage));
        assert!(PageRequest::new(1, 100).is_ok());
    }

    #[test]
    fn huge_page_is_empty_not_an_error() {
        let req = PageRequest::new(i64::from(u32::MAX), 100).unwrap();
        assert_eq!(req.offset(), (i64::from(u32::MAX) - 1) * 100);

        let p = Page::from_ordered((0..7).collect::<Vec<usize>>(), req);
        assert!(p.items.is_empty());
        assert!(!p.has_next());
        assert_eq!(p.total, 7);
        assert_eq!(
            PageRequest::new(i64::from(u32::MAX), i64::from(u32::MAX)),
            Err(PaginationError::InvalidPerPage)
        );
    }

    #[test]
    fn offset_and_limit() {
        let req = PageRequest::new(3, 5).unwrap();
        assert_eq!(req.offset(), 10);
        assert_eq!(req.limit(), 5);
    }

    #[test]
    fn unknown_sort_and_order_fall_back() {
        assert_eq!(SortKey::parse("cook_time"), SortKey::CookTime);
        assert_eq!(SortKey::parse("num_of_servings"), SortKey::NumOfServings);
        assert_eq!(SortKey::parse("password_hash"), SortKey::CreatedAt);
        assert_eq!(SortOrder::parse("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Desc);
    }

    #[test]
    fn links_replace_page_and_keep_other_params() {
        let p = page_of(7, 2, 3);
        let params = vec![
            ("page".to_string(), "2".to_string()),
            ("q".to_string(), "egg".to_string()),
        ];
        let links = PageLinks::build("http://x/recipes", &params, &p);
        assert_eq!(links.first, "http://x/recipes?q=egg&page=1");
        assert_eq!(links.last, "http://x/recipes?q=egg&page=3");
        assert_eq!(links.prev.as_deref(), Some("http://x/recipes?q=egg&page=1"));
        assert_eq!(links.next.as_deref(), Some("http://x/recipes?q=egg&page=3"));
    }

    #[test]
    fn links_for_empty_listing() {
        let p = page_of(0, 1, 3);
        let links = PageLinks::build("http://x/recipes", &[], &p);
        assert_eq!(links.last, "http://x/recipes?page=1");
        assert!(links.prev.is_none());
        assert!(links.next.is_none());
    }
}
