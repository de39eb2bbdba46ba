//! Paged API responses.
//!
//! List endpoints answer with one page of results wrapped in an envelope
//! describing where the page sits in the full result set. Consecutive
//! pages of the same query are accumulated with [`Page::merge`].

use serde::{Deserialize, Serialize};

/// Sort descriptor of a page.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct Sort {
    pub sorted: bool,
    pub unsorted: bool,
    pub empty: bool,
}

/// One page of a paged query.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,

    /// Elements across all pages
    #[serde(default)]
    pub total_elements: u64,

    #[serde(default)]
    pub total_pages: u32,

    /// Zero-based page index
    #[serde(default)]
    pub number: u32,

    /// Requested page size
    #[serde(default)]
    pub size: u32,

    /// Elements on this page
    #[serde(default)]
    pub number_of_elements: u32,

    #[serde(default)]
    pub sort: Sort,

    #[serde(default)]
    pub first: bool,

    #[serde(default)]
    pub last: bool,

    #[serde(default)]
    pub empty: bool,
}

impl<T> Page<T> {
    /// An empty first and last page, the starting point for accumulation.
    #[must_use]
    pub fn empty_page() -> Self {
        Self {
            content: Vec::new(),
            total_elements: 0,
            total_pages: 0,
            number: 0,
            size: 0,
            number_of_elements: 0,
            sort: Sort::default(),
            first: true,
            last: true,
            empty: true,
        }
    }

    /// Merges two pages of the same query.
    ///
    /// Content is concatenated in order and element counts are summed; all
    /// other metadata is taken from `newer`.
    #[must_use]
    pub fn merge(older: Self, newer: Self) -> Self {
        let mut content = older.content;
        content.extend(newer.content);

        Self {
            content,
            number_of_elements: older
                .number_of_elements
                .saturating_add(newer.number_of_elements),
            ..newer
        }
    }

    /// Whether the server has more pages after this one.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.last && self.number + 1 < self.total_pages
    }

    /// Index of the page to request next, if any.
    #[must_use]
    pub fn next_page(&self) -> Option<u32> {
        self.has_next().then_some(self.number + 1)
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty_page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content: &[u32], number: u32, total_pages: u32) -> Page<u32> {
        Page {
            content: content.to_vec(),
            total_elements: 5,
            total_pages,
            number,
            size: 2,
            number_of_elements: u32::try_from(content.len()).unwrap(),
            sort: Sort::default(),
            first: number == 0,
            last: number + 1 == total_pages,
            empty: content.is_empty(),
        }
    }

    #[test]
    fn merge_concatenates_and_sums() {
        let older = page(&[1, 2], 0, 3);
        let newer = page(&[3, 4], 1, 3);
        let merged = Page::merge(older, newer.clone());

        assert_eq!(merged.content, [1, 2, 3, 4]);
        assert_eq!(merged.number_of_elements, 4);
        assert_eq!(merged.number, newer.number);
        assert_eq!(merged.first, newer.first);
        assert_eq!(merged.total_elements, newer.total_elements);
    }

    #[test]
    fn accumulates_from_empty_page() {
        let merged = [page(&[1, 2], 0, 3), page(&[3, 4], 1, 3), page(&[5], 2, 3)]
            .into_iter()
            .fold(Page::empty_page(), Page::merge);

        assert_eq!(merged.content, [1, 2, 3, 4, 5]);
        assert_eq!(merged.number_of_elements, 5);
        assert!(merged.last);
        assert!(!merged.has_next());
    }

    #[test]
    fn merge_saturates_element_count() {
        let mut older = page(&[1], 0, 2);
        older.number_of_elements = u32::MAX;
        let merged = Page::merge(older, page(&[2], 1, 2));

        assert_eq!(merged.number_of_elements, u32::MAX);
        assert_eq!(merged.content, [1, 2]);
    }

    #[test]
    fn next_page() {
        assert_eq!(page(&[1, 2], 0, 3).next_page(), Some(1));
        assert_eq!(page(&[5], 2, 3).next_page(), None);
        assert_eq!(Page::<u32>::empty_page().next_page(), None);
    }

    #[test]
    fn decodes_camel_case() {
        let page: Page<String> = serde_json::from_str(
            r#"{
                "content": ["a"],
                "totalElements": 11,
                "totalPages": 6,
                "number": 0,
                "size": 2,
                "numberOfElements": 1,
                "sort": {"sorted": true, "unsorted": false, "empty": false},
                "first": true,
                "last": false,
                "empty": false,
                "pageable": {"offset": 0}
            }"#,
        )
        .unwrap();

        assert_eq!(page.total_elements, 11);
        assert_eq!(page.number_of_elements, 1);
        assert!(page.sort.sorted);
        assert_eq!(page.next_page(), Some(1));
    }
}
