//! Product catalogue records and the write-side validation rules.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub const NAME_MAX_LEN: usize = 100;
pub const DESCRIPTION_MAX_LEN: usize = 500;
pub const CATEGORY_MAX_LEN: usize = 50;
pub const PRICE_SCALE: u32 = 2;

/// Read-only projection of a catalogue row, as cached and served.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: String,
}

/// Body of `PUT /products/update/{id}` before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductUpdateInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub category: String,
}

/// A product update that satisfies the column constraints of the catalogue table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductUpdate {
    name: String,
    description: Option<String>,
    price: Decimal,
    category: String,
}

impl ProductUpdate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Apply the update to an existing record, keeping its identity.
    pub fn apply_to(&self, id: i64) -> Product {
        Product {
            id,
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            category: self.category.clone(),
        }
    }
}

impl TryFrom<ProductUpdateInput> for ProductUpdate {
    type Error = DomainError;

    fn try_from(input: ProductUpdateInput) -> Result<Self, Self::Error> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name", "must not be empty"));
        }
        if name.chars().count() > NAME_MAX_LEN {
            return Err(DomainError::validation(
                "name",
                format!("must be at most {NAME_MAX_LEN} characters"),
            ));
        }

        let description = input
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if description
            .as_ref()
            .is_some_and(|value| value.chars().count() > DESCRIPTION_MAX_LEN)
        {
            return Err(DomainError::validation(
                "description",
                format!("must be at most {DESCRIPTION_MAX_LEN} characters"),
            ));
        }

        // Category is matched case-sensitively by prefix, so only surrounding whitespace is dropped.
        let category = input.category.trim().to_string();
        if category.is_empty() {
            return Err(DomainError::validation("category", "must not be empty"));
        }
        if category.chars().count() > CATEGORY_MAX_LEN {
            return Err(DomainError::validation(
                "category",
                format!("must be at most {CATEGORY_MAX_LEN} characters"),
            ));
        }

        if input.price.is_sign_negative() {
            return Err(DomainError::validation("price", "must not be negative"));
        }
        if input.price.scale() > PRICE_SCALE && input.price.normalize().scale() > PRICE_SCALE {
            return Err(DomainError::validation(
                "price",
                format!("must have at most {PRICE_SCALE} decimal places"),
            ));
        }

        Ok(Self {
            name,
            description,
            price: input.price,
            category,
        })
    }
}
