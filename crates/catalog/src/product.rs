use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult, Money, ProductId, ValueObject, VariantId};

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    OnSale,
    OffShelf,
}

/// List price plus the (possibly promotional) price actually charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub list: Money,
    pub sale: Money,
}

impl ValueObject for Price {}

impl Price {
    pub fn new(list: Money, sale: Money) -> DomainResult<Self> {
        if sale > list {
            return Err(DomainError::validation("sale price cannot exceed list price"));
        }
        Ok(Self { list, sale })
    }

    pub fn fixed(amount: Money) -> Self {
        Self {
            list: amount,
            sale: amount,
        }
    }

    /// Promotional reduction per unit.
    pub fn markdown(&self) -> Money {
        self.list.saturating_sub(self.sale)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub name: String,
    pub price: Price,
}

/// Catalog product as read by checkout.
///
/// Stock is deliberately not held here: it is owned by the stock store and only
/// ever changed through its atomic primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub status: ProductStatus,
    pub price: Price,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

/// Prices and names copied onto an order line at creation time.
///
/// Later catalog edits never touch an existing snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub list_price: Money,
    pub sale_price: Money,
}

impl ValueObject for PriceSnapshot {}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: Price) -> Self {
        Self {
            id,
            name: name.into(),
            status: ProductStatus::OnSale,
            price,
            variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, id: VariantId, name: impl Into<String>, price: Price) -> Self {
        self.variants.push(ProductVariant {
            id,
            name: name.into(),
            price,
        });
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::OnSale
    }

    pub fn variant(&self, id: VariantId) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Capture the current price for one (product, variant) pair.
    ///
    /// A product with variants must be ordered by variant; one without must not be.
    pub fn snapshot(&self, variant_id: Option<VariantId>) -> DomainResult<PriceSnapshot> {
        if !self.can_be_sold() {
            return Err(DomainError::validation(format!(
                "product {} is not on sale",
                self.id
            )));
        }

        match (variant_id, self.variants.is_empty()) {
            (None, true) => Ok(PriceSnapshot {
                product_id: self.id,
                variant_id: None,
                product_name: self.name.clone(),
                variant_name: None,
                list_price: self.price.list,
                sale_price: self.price.sale,
            }),
            (None, false) => Err(DomainError::validation(format!(
                "product {} requires a variant",
                self.id
            ))),
            (Some(vid), true) => Err(DomainError::validation(format!(
                "product {} has no variant {vid}",
                self.id
            ))),
            (Some(vid), false) => {
                let variant = self.variant(vid).ok_or_else(|| {
                    DomainError::validation(format!("product {} has no variant {vid}", self.id))
                })?;
                Ok(PriceSnapshot {
                    product_id: self.id,
                    variant_id: Some(vid),
                    product_name: self.name.clone(),
                    variant_name: Some(variant.name.clone()),
                    list_price: variant.price.list,
                    sale_price: variant.price.sale,
                })
            }
        }
    }
}
