//! Assertions gate the descent through the primary type tree: a candidate
//! type applies only when all of its assertions hold for the resource being
//! evaluated.

use regex::Regex;

use crate::error::{RepoError, RepoResult};
use crate::path::Uri;

/// What an assertion may look at. `content_type` is the already-guessed or
/// stored media type, None for collections.
#[derive(Debug, Clone, Copy)]
pub struct AssertionCtx<'a> {
    pub uri: &'a Uri,
    pub name: &'a str,
    pub is_collection: bool,
    pub content_type: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum Assertion {
    IsCollection(bool),
    ContentTypeMatches(Regex),
    NameMatches(Regex),
    UriPrefix(String),
}

impl Assertion {
    pub fn content_type_matches(pattern: &str) -> RepoResult<Self> {
        Ok(Assertion::ContentTypeMatches(compile(pattern)?))
    }

    pub fn name_matches(pattern: &str) -> RepoResult<Self> {
        Ok(Assertion::NameMatches(compile(pattern)?))
    }

    pub fn matches(&self, ctx: &AssertionCtx<'_>) -> bool {
        match self {
            Assertion::IsCollection(want) => ctx.is_collection == *want,
            Assertion::ContentTypeMatches(re) => ctx.content_type.map(|ct| re.is_match(ct)).unwrap_or(false),
            Assertion::NameMatches(re) => re.is_match(ctx.name),
            Assertion::UriPrefix(prefix) => {
                ctx.uri.as_str() == prefix
                    || (ctx.uri.as_str().starts_with(prefix)
                        && ctx.uri.as_str().as_bytes().get(prefix.len()) == Some(&b'/'))
            }
        }
    }
}

fn compile(pattern: &str) -> RepoResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| RepoError::constraint("bad_assertion_pattern", format!("invalid pattern {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(uri: &'a Uri, is_collection: bool, content_type: Option<&'a str>) -> AssertionCtx<'a> {
        AssertionCtx { uri, name: uri.name(), is_collection, content_type }
    }

    #[test]
    fn test_collection_assertion() {
        let uri = Uri::parse("/a").unwrap();
        assert!(Assertion::IsCollection(true).matches(&ctx(&uri, true, None)));
        assert!(!Assertion::IsCollection(true).matches(&ctx(&uri, false, None)));
    }

    #[test]
    fn test_content_type_assertion() {
        let uri = Uri::parse("/a/doc.txt").unwrap();
        let a = Assertion::content_type_matches("^text/.*$").unwrap();
        assert!(a.matches(&ctx(&uri, false, Some("text/plain"))));
        assert!(!a.matches(&ctx(&uri, false, Some("application/json"))));
        assert!(!a.matches(&ctx(&uri, false, None)));
    }

    #[test]
    fn test_name_assertion() {
        let a = Assertion::name_matches(r"\.(jpe?g|png)$").unwrap();
        let photo = Uri::parse("/img/photo.jpeg").unwrap();
        let notes = Uri::parse("/img/notes.txt").unwrap();
        assert!(a.matches(&ctx(&photo, false, None)));
        assert!(!a.matches(&ctx(&notes, false, None)));
    }

    #[test]
    fn test_uri_prefix_assertion_respects_boundaries() {
        let a = Assertion::UriPrefix("/docs".to_string());
        let inside = Uri::parse("/docs/report").unwrap();
        let outside = Uri::parse("/docsearch").unwrap();
        assert!(a.matches(&ctx(&inside, false, None)));
        assert!(!a.matches(&ctx(&outside, false, None)));
    }

    #[test]
    fn test_bad_pattern_is_a_constraint_error() {
        assert!(Assertion::content_type_matches("([").unwrap_err().is_constraint());
    }
}
