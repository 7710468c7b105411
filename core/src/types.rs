//! Typed rows and inputs for reviews and returns.
//!
//! # Design
//! Field names are the snake_case column names of the storage schema, so
//! serde's defaults line up with PostgREST without renames. Generated ids are
//! `Option<RowId>`: a parent representation without an id is a case the
//! orchestrator must handle, not a parse failure. `RowId` is opaque: whatever
//! the table generates (uuid, bigserial, text key) is read as-is and written
//! back verbatim on child rows and filters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// A star rating, always within `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, StoreError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(StoreError::Validation(format!(
                "rating must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// Return status. An open set of strings; only `pending` is ever assigned by
/// this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnStatus(String);

impl ReturnStatus {
    pub const PENDING: &'static str = "pending";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn pending() -> Self {
        Self::new(Self::PENDING)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReturnStatus {
    fn from(status: &str) -> Self {
        Self::new(status)
    }
}

/// A generated primary key, kept in the JSON form the store returned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(id) => write!(f, "{id}"),
            RowId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Int(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId::Text(id.to_string())
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        RowId::Text(id)
    }
}

impl From<Uuid> for RowId {
    fn from(id: Uuid) -> Self {
        RowId::Text(id.to_string())
    }
}

/// Pagination window for review listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 10, offset: 0 }
    }
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

/// Everything needed to create a review and attach its images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    pub product_id: String,
    pub product_handle: String,
    pub rating: Rating,
    pub title: String,
    pub description: String,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl ReviewInput {
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("product_id", &self.product_id)?;
        require_non_empty("product_handle", &self.product_handle)
    }
}

/// A row of `product_reviews`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RowId>,
    pub product_id: String,
    pub product_handle: String,
    pub rating: Rating,
    pub title: String,
    pub description: String,
    pub customer_name: String,
    pub customer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// An image attached to a review or a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RowId>,
    pub image_url: String,
}

/// A row of the `reviews_with_images` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewWithImages {
    #[serde(flatten)]
    pub review: ReviewRow,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<ImageRow>,
}

/// Rating aggregate for one product, computed from its review rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub total: u64,
    pub average: f64,
    /// Count per rating; always has the keys 1 through 5.
    pub ratings: BTreeMap<u8, u64>,
}

impl ReviewStats {
    pub fn from_ratings(ratings: impl IntoIterator<Item = Rating>) -> Self {
        let mut histogram: BTreeMap<u8, u64> = (Rating::MIN..=Rating::MAX).map(|r| (r, 0)).collect();
        let mut total = 0u64;
        let mut sum = 0u64;
        for rating in ratings {
            total += 1;
            sum += u64::from(rating.get());
            *histogram.entry(rating.get()).or_insert(0) += 1;
        }
        let average = if total == 0 { 0.0 } else { sum as f64 / total as f64 };
        Self {
            total,
            average,
            ratings: histogram,
        }
    }

    pub fn count(&self, rating: u8) -> u64 {
        self.ratings.get(&rating).copied().unwrap_or(0)
    }
}

/// The `select=rating` projection used for statistics.
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct RatingOnly {
    pub rating: Rating,
}

// ---------------------------------------------------------------------------
// Returns
// ---------------------------------------------------------------------------

/// One order line being sent back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemInput {
    pub line_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_title: Option<String>,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything needed to open a return request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnInput {
    pub order_id: String,
    pub order_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub items: Vec<ReturnItemInput>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl ReturnInput {
    pub fn validate(&self) -> Result<(), StoreError> {
        require_non_empty("order_id", &self.order_id)?;
        for item in &self.items {
            require_non_empty("line_item_id", &item.line_item_id)?;
            if item.quantity == 0 {
                return Err(StoreError::Validation(format!(
                    "quantity for line item {} must be at least 1",
                    item.line_item_id
                )));
            }
        }
        Ok(())
    }
}

/// A row of `returns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RowId>,
    pub order_id: String,
    pub order_name: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: ReturnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A row of `return_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RowId>,
    pub return_id: RowId,
    #[serde(flatten)]
    pub item: ReturnItemInput,
}

/// A row of the `returns_with_details` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDetail {
    #[serde(flatten)]
    pub record: ReturnRow,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<ReturnItemRow>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<ImageRow>,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Aggregating views emit `null` rather than `[]` when nothing is attached.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
