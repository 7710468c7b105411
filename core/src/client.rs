//! Stateless HTTP request builder and response parser for PostgREST.
//!
//! # Design
//! `PostgrestClient` holds only a normalized `base_url` and an optional
//! bearer credential, and carries no mutable state between calls. Each
//! operation is split into a `build_*` method that produces an `HttpRequest`
//! and a `parse_*` method that consumes an `HttpResponse`. Executing the
//! round-trip is the job of a `Transport`; sequencing several round-trips
//! into one logical write is the job of `CommerceStore`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::http::{merge_headers, HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    Page, Rating, RatingOnly, ReturnDetail, ReturnInput, ReturnItemInput, ReturnRow,
    ReturnStatus, ReviewInput, ReviewRow, ReviewStats, ReviewWithImages, RowId,
};

const PREFER_REPRESENTATION: (&str, &str) = ("prefer", "return=representation");

/// Request builder and response parser for the review and return resources.
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct NewReview<'a> {
    product_id: &'a str,
    product_handle: &'a str,
    rating: Rating,
    title: &'a str,
    description: &'a str,
    customer_name: &'a str,
    customer_email: &'a str,
}

#[derive(Serialize)]
struct NewReviewImage<'a> {
    review_id: &'a RowId,
    image_url: &'a str,
}

#[derive(Serialize)]
struct NewReturn<'a> {
    order_id: &'a str,
    order_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    status: ReturnStatus,
}

#[derive(Serialize)]
struct NewReturnItem<'a> {
    return_id: &'a RowId,
    #[serde(flatten)]
    item: &'a ReturnItemInput,
}

#[derive(Serialize)]
struct NewReturnImage<'a> {
    return_id: &'a RowId,
    image_url: &'a str,
}

#[derive(Serialize)]
struct StatusPatch<'a> {
    status: &'a ReturnStatus,
}

impl PostgrestClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Reviews
    // -----------------------------------------------------------------------

    pub fn build_create_review(&self, input: &ReviewInput) -> Result<HttpRequest, StoreError> {
        let body = NewReview {
            product_id: &input.product_id,
            product_handle: &input.product_handle,
            rating: input.rating,
            title: &input.title,
            description: &input.description,
            customer_name: &input.customer_name,
            customer_email: &input.customer_email,
        };
        self.write(HttpMethod::Post, "/product_reviews", &body, true)
    }

    pub fn build_create_review_images(
        &self,
        review_id: &RowId,
        images: &[String],
    ) -> Result<HttpRequest, StoreError> {
        let rows: Vec<NewReviewImage<'_>> = images
            .iter()
            .map(|url| NewReviewImage {
                review_id,
                image_url: url,
            })
            .collect();
        self.write(HttpMethod::Post, "/review_images", &rows, false)
    }

    pub fn build_list_reviews(&self, product_handle: &str, page: Page) -> HttpRequest {
        let query = encode_query(&[
            ("product_handle", format!("eq.{product_handle}")),
            ("order", "created_at.desc".to_string()),
            ("limit", page.limit.to_string()),
            ("offset", page.offset.to_string()),
        ]);
        self.read(&format!("/reviews_with_images?{query}"))
    }

    pub fn build_review_ratings(&self, product_handle: &str) -> HttpRequest {
        let query = encode_query(&[
            ("product_handle", format!("eq.{product_handle}")),
            ("select", "rating".to_string()),
        ]);
        self.read(&format!("/product_reviews?{query}"))
    }

    /// First row of the representation. The id may still be absent; the
    /// caller decides whether that is fatal.
    pub fn parse_create_review(&self, response: HttpResponse) -> Result<ReviewRow, StoreError> {
        first_row(parse_written(response, "review")?, "review")
    }

    pub fn parse_list_reviews(
        &self,
        response: HttpResponse,
    ) -> Result<Vec<ReviewWithImages>, StoreError> {
        parse_rows(response)
    }

    pub fn parse_review_stats(&self, response: HttpResponse) -> Result<ReviewStats, StoreError> {
        let rows: Vec<RatingOnly> = parse_rows(response)?;
        Ok(ReviewStats::from_ratings(rows.into_iter().map(|r| r.rating)))
    }

    // -----------------------------------------------------------------------
    // Returns
    // -----------------------------------------------------------------------

    pub fn build_create_return(&self, input: &ReturnInput) -> Result<HttpRequest, StoreError> {
        let body = NewReturn {
            order_id: &input.order_id,
            order_name: &input.order_name,
            customer_email: input.customer_email.as_deref(),
            customer_name: input.customer_name.as_deref(),
            reason: input.reason.as_deref(),
            status: ReturnStatus::pending(),
        };
        self.write(HttpMethod::Post, "/returns", &body, true)
    }

    pub fn build_create_return_items(
        &self,
        return_id: &RowId,
        items: &[ReturnItemInput],
    ) -> Result<HttpRequest, StoreError> {
        let rows: Vec<NewReturnItem<'_>> = items
            .iter()
            .map(|item| NewReturnItem { return_id, item })
            .collect();
        self.write(HttpMethod::Post, "/return_items", &rows, false)
    }

    pub fn build_create_return_images(
        &self,
        return_id: &RowId,
        images: &[String],
    ) -> Result<HttpRequest, StoreError> {
        let rows: Vec<NewReturnImage<'_>> = images
            .iter()
            .map(|url| NewReturnImage {
                return_id,
                image_url: url,
            })
            .collect();
        self.write(HttpMethod::Post, "/return_images", &rows, false)
    }

    pub fn build_get_return(&self, return_id: &RowId) -> HttpRequest {
        let query = encode_query(&[("id", format!("eq.{return_id}"))]);
        self.read(&format!("/returns_with_details?{query}"))
    }

    pub fn build_returns_by_order(&self, order_id: &str) -> HttpRequest {
        let query = encode_query(&[("order_id", format!("eq.{order_id}"))]);
        self.read(&format!("/returns_with_details?{query}"))
    }

    pub fn build_update_return_status(
        &self,
        return_id: &RowId,
        status: &ReturnStatus,
    ) -> Result<HttpRequest, StoreError> {
        let query = encode_query(&[("id", format!("eq.{return_id}"))]);
        self.write(
            HttpMethod::Patch,
            &format!("/returns?{query}"),
            &StatusPatch { status },
            true,
        )
    }

    pub fn parse_create_return(&self, response: HttpResponse) -> Result<ReturnRow, StoreError> {
        first_row(parse_written(response, "return")?, "return")
    }

    pub fn parse_get_return(
        &self,
        response: HttpResponse,
    ) -> Result<Option<ReturnDetail>, StoreError> {
        let rows: Vec<ReturnDetail> = parse_rows(response)?;
        Ok(rows.into_iter().next())
    }

    pub fn parse_returns_by_order(
        &self,
        response: HttpResponse,
    ) -> Result<Vec<ReturnDetail>, StoreError> {
        parse_rows(response)
    }

    pub fn parse_update_return_status(
        &self,
        response: HttpResponse,
    ) -> Result<Vec<ReturnRow>, StoreError> {
        parse_written(response, "return")
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    /// Accept any 2xx for a batched child write. The body is not inspected:
    /// without `Prefer: return=representation` PostgREST sends none.
    pub fn parse_batch(&self, response: HttpResponse) -> Result<(), StoreError> {
        check_status(&response)
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            headers.push(("authorization".to_string(), format!("Bearer {key}")));
        }
        headers
    }

    fn read(&self, endpoint: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: format!("{}{endpoint}", self.base_url),
            headers: self.default_headers(),
            body: None,
        }
    }

    fn write<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: &B,
        representation: bool,
    ) -> Result<HttpRequest, StoreError> {
        let body = serde_json::to_string(body).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let extra = if representation {
            vec![(PREFER_REPRESENTATION.0.to_string(), PREFER_REPRESENTATION.1.to_string())]
        } else {
            Vec::new()
        };
        Ok(HttpRequest {
            method,
            path: format!("{}{endpoint}", self.base_url),
            headers: merge_headers(self.default_headers(), extra),
            body: Some(body),
        })
    }
}

/// Any status outside 2xx becomes `StoreError::Http` with the raw body.
fn check_status(response: &HttpResponse) -> Result<(), StoreError> {
    if response.is_success() {
        return Ok(());
    }
    Err(StoreError::Http {
        status: response.status,
        body: response.body.clone(),
    })
}

fn parse_rows<T: DeserializeOwned>(response: HttpResponse) -> Result<Vec<T>, StoreError> {
    check_status(&response)?;
    serde_json::from_str(&response.body).map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// Like `parse_rows`, but for a write that already took effect.
fn parse_written<T: DeserializeOwned>(
    response: HttpResponse,
    resource: &'static str,
) -> Result<Vec<T>, StoreError> {
    check_status(&response)?;
    serde_json::from_str(&response.body).map_err(|e| StoreError::UnreadableRepresentation {
        resource,
        reason: e.to_string(),
        body: response.body.clone(),
    })
}

fn first_row<T>(rows: Vec<T>, resource: &'static str) -> Result<T, StoreError> {
    rows.into_iter().next().ok_or(StoreError::MissingId { resource })
}

fn encode_query(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}
