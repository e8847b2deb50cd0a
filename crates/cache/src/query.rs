//! Search, sort and paging parameters for reporting queries.

use std::cmp::Ordering;

use crate::payload::{Asn, Prefix};

/// Filter applied to reported ROA prefixes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchTerm {
    /// Exact origin ASN.
    Asn(Asn),
    /// ROA prefixes covering this prefix.
    Prefix(Prefix),
    /// Case-insensitive substring of the trust anchor name.
    Text(String),
}

impl SearchTerm {
    /// Interprets `input` as a prefix, then an ASN, else as free text.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if let Ok(prefix) = trimmed.parse::<Prefix>() {
            return SearchTerm::Prefix(prefix);
        }
        if let Ok(addr) = trimmed.parse::<std::net::IpAddr>() {
            let width = if addr.is_ipv4() { 32 } else { 128 };
            if let Ok(prefix) = Prefix::new(addr, width) {
                return SearchTerm::Prefix(prefix);
            }
        }
        if let Ok(asn) = trimmed.parse::<Asn>() {
            return SearchTerm::Asn(asn);
        }
        SearchTerm::Text(trimmed.to_lowercase())
    }

    pub(crate) fn matches(&self, trust_anchor: &str, asn: Asn, prefix: &Prefix) -> bool {
        match self {
            SearchTerm::Asn(wanted) => *wanted == asn,
            SearchTerm::Prefix(wanted) => prefix.covers(wanted),
            SearchTerm::Text(text) => trust_anchor.to_lowercase().contains(text.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    TrustAnchor,
    Asn,
    Prefix,
    MaxLength,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sorting {
    pub by: SortBy,
    pub direction: SortDirection,
}

impl Sorting {
    pub fn new(by: SortBy, direction: SortDirection) -> Self {
        Self { by, direction }
    }

    pub(crate) fn apply(&self, ordering: Ordering) -> Ordering {
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Window into a sorted result list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paging {
    pub start_from: usize,
    pub page_size: usize,
}

impl Paging {
    pub fn new(start_from: usize, page_size: usize) -> Self {
        Self {
            start_from,
            page_size: page_size.max(1),
        }
    }

    pub(crate) fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.start_from)
            .take(self.page_size.max(1))
            .collect()
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            start_from: 0,
            page_size: usize::MAX,
        }
    }
}

/// One page of a query result plus the size of the unpaged result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedObjects<T> {
    pub total_count: usize,
    pub objects: Vec<T>,
}
