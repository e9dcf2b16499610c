//! Search: a closed, typed AST (`ast`), the compiler that lowers it to the
//! index-engine form (`compile`, `ir`), index field naming (`fields`) and the
//! mandatory authorization filter (`security`).

pub mod ast;
pub mod compile;
pub mod fields;
pub mod ir;
pub mod security;

use serde::{Deserialize, Serialize};

pub use ast::{PropSelector, Query, SortField, SortKey, SortOrder, Sorting, TermOperator};
pub use compile::{compile, compile_search, compile_sorting, CompileCtx, IndexLookup};
pub use ir::{CompiledSearch, FieldValue, IndexQuery, IndexSort, SortKind};
pub use security::{authorization_filter, published_filter, security_filter};

/// One search request as callers hand it over. The flags opt into extra
/// result filtering; the authorization filter is never optional and is added
/// during compilation regardless of what the query says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Search {
    pub query: Query,
    pub sorting: Option<Sorting>,
    pub limit: usize,
    pub offset: usize,
    pub only_published: bool,
    pub exclude_unpublished_collections: bool,
}

impl Search {
    pub fn new(query: Query) -> Self {
        Search {
            query,
            sorting: None,
            limit: usize::MAX,
            offset: 0,
            only_published: false,
            exclude_unpublished_collections: false,
        }
    }

    pub fn with_sorting(mut self, sorting: Sorting) -> Self {
        self.sorting = Some(sorting);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn published_only(mut self) -> Self {
        self.only_published = true;
        self
    }

    pub fn without_unpublished_collections(mut self) -> Self {
        self.exclude_unpublished_collections = true;
        self
    }
}
