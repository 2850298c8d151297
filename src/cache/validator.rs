//! Entity tags and `If-None-Match` evaluation.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::products::Product;

/// Digest bytes kept in a payload validator.
const VALIDATOR_BYTES: usize = 8;

/// Opaque validator for one representation of a product query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityTag {
    opaque: String,
    weak: bool,
}

impl EntityTag {
    pub fn strong(opaque: impl Into<String>) -> Self {
        Self {
            opaque: opaque.into(),
            weak: false,
        }
    }

    pub fn weak(opaque: impl Into<String>) -> Self {
        Self {
            opaque: opaque.into(),
            weak: true,
        }
    }

    /// Content hash of an ordered product payload.
    ///
    /// Any change to an id, name, description, price or category of any
    /// product, or to their order, yields a different tag.
    pub fn for_payload(products: &[Product]) -> Self {
        let mut hasher = Sha256::new();
        for product in products {
            hasher.update(product.id.to_be_bytes());
            hasher.update(product.name.as_bytes());
            hasher.update([0u8]);
            match &product.description {
                Some(description) => {
                    hasher.update([1u8]);
                    hasher.update(description.as_bytes());
                }
                None => hasher.update([0u8]),
            }
            hasher.update([0u8]);
            hasher.update(product.price.normalize().to_string().as_bytes());
            hasher.update([0u8]);
            hasher.update(product.category.as_bytes());
            hasher.update([0xffu8]);
        }
        let digest = hasher.finalize().to_vec();
        Self::strong(hex::encode(&digest[..VALIDATOR_BYTES]))
    }

    pub fn opaque(&self) -> &str {
        &self.opaque
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Weak comparison: opaque values are equal, whatever the weakness flags.
    pub fn weak_eq(&self, other: &EntityTag) -> bool {
        self.opaque == other.opaque
    }

    /// Parse a single `ETag` header value.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut cursor = Cursor::new(raw.trim());
        let tag = cursor.entity_tag()?;
        cursor.at_end().then_some(tag)
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.opaque)
        } else {
            write!(f, "\"{}\"", self.opaque)
        }
    }
}

/// Parsed `If-None-Match` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfNoneMatch {
    Any,
    Tags(Vec<EntityTag>),
}

impl IfNoneMatch {
    /// Parse `*` or a comma separated list of entity tags.
    ///
    /// Returns `None` for a malformed or empty header, which callers treat as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed == "*" {
            return Some(Self::Any);
        }

        let mut cursor = Cursor::new(trimmed);
        let mut tags = Vec::new();
        loop {
            cursor.skip_separators();
            if cursor.at_end() {
                break;
            }
            tags.push(cursor.entity_tag()?);
        }

        (!tags.is_empty()).then_some(Self::Tags(tags))
    }

    pub fn matches(&self, current: &EntityTag) -> bool {
        match self {
            Self::Any => true,
            Self::Tags(tags) => tags.iter().any(|tag| tag.weak_eq(current)),
        }
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn skip_separators(&mut self) {
        self.rest = self.rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
    }

    fn entity_tag(&mut self) -> Option<EntityTag> {
        let (weak, rest) = match self.rest.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, self.rest),
        };
        let body = rest.strip_prefix('"')?;
        let end = body.find('"')?;
        let opaque = &body[..end];
        if opaque.chars().any(|c| c.is_control()) {
            return None;
        }
        self.rest = &body[end + 1..];
        Some(if weak {
            EntityTag::weak(opaque)
        } else {
            EntityTag::strong(opaque)
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn widget(price: Decimal) -> Product {
        Product {
            id: 7,
            name: "Widget".to_string(),
            description: None,
            price,
            category: "Tools".to_string(),
        }
    }

    #[test]
    fn payload_hash_tracks_content() {
        let before = EntityTag::for_payload(&[widget(Decimal::new(999, 2))]);
        let same = EntityTag::for_payload(&[widget(Decimal::new(999, 2))]);
        let after = EntityTag::for_payload(&[widget(Decimal::new(1250, 2))]);

        assert_eq!(before, same);
        assert_ne!(before, after);
        assert_eq!(before.opaque().len(), VALIDATOR_BYTES * 2);
    }

    #[test]
    fn payload_hash_ignores_price_trailing_zeros() {
        let a = EntityTag::for_payload(&[widget(Decimal::new(1250, 2))]);
        let b = EntityTag::for_payload(&[widget(Decimal::new(125, 1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn display_quotes_and_marks_weakness() {
        assert_eq!(EntityTag::strong("abc").to_string(), "\"abc\"");
        assert_eq!(EntityTag::weak("abc").to_string(), "W/\"abc\"");
    }

    #[test]
    fn parses_single_tag() {
        assert_eq!(EntityTag::parse("\"abc\""), Some(EntityTag::strong("abc")));
        assert_eq!(EntityTag::parse(" W/\"abc\" "), Some(EntityTag::weak("abc")));
        assert_eq!(EntityTag::parse("abc"), None);
        assert_eq!(EntityTag::parse("\"abc\" junk"), None);
    }

    #[test]
    fn if_none_match_lists_and_wildcard() {
        let current = EntityTag::strong("abc");

        let any = IfNoneMatch::parse("*").unwrap();
        assert!(any.matches(&current));

        let list = IfNoneMatch::parse("\"xyz\", W/\"abc\"").unwrap();
        assert!(list.matches(&current));

        let miss = IfNoneMatch::parse("\"xyz\"").unwrap();
        assert!(!miss.matches(&current));
    }

    #[test]
    fn malformed_if_none_match_is_ignored() {
        assert_eq!(IfNoneMatch::parse(""), None);
        assert_eq!(IfNoneMatch::parse("abc"), None);
        assert_eq!(IfNoneMatch::parse("\"unterminated"), None);
    }
}
