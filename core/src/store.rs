//! Write and read orchestration over a `Transport`.
//!
//! # Design
//! PostgREST has no multi-resource transaction, so a review or a return is
//! written as a sequence of independently committing calls: the parent row
//! first, then one batched call per child collection, each carrying the
//! parent's generated id. Calls run strictly in order because every child
//! batch needs that id.
//!
//! The outcome of a composite write has three shapes:
//! - `Err(_)`: nothing usable was committed (validation failed, the parent
//!   call failed, or a return came back without an id). The exception is
//!   `StoreError::UnreadableRepresentation`: the parent call was accepted,
//!   so the row may exist even though no id could be read back.
//! - `Ok(WriteOutcome::Committed(_))`: every call succeeded.
//! - `Ok(WriteOutcome::PartiallyCommitted { .. })`: the parent exists but a
//!   child batch failed. Nothing is rolled back; the failure is logged with
//!   the parent id so it can be reconciled by hand.

use tracing::{error, info, warn};

use crate::client::PostgrestClient;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    Page, ReturnDetail, ReturnInput, ReturnRow, ReturnStatus, ReviewInput, ReviewRow,
    ReviewStats, ReviewWithImages, RowId,
};

/// The child collection whose batched write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildBatch {
    ReviewImages,
    ReturnItems,
    ReturnImages,
}

impl ChildBatch {
    pub fn resource(&self) -> &'static str {
        match self {
            ChildBatch::ReviewImages => "review_images",
            ChildBatch::ReturnItems => "return_items",
            ChildBatch::ReturnImages => "return_images",
        }
    }
}

/// Result of a parent-plus-children write that got past the parent call.
#[derive(Debug)]
pub enum WriteOutcome<T> {
    Committed(T),
    PartiallyCommitted {
        parent: T,
        failed: ChildBatch,
        error: StoreError,
    },
}

impl<T> WriteOutcome<T> {
    /// The parent row, which is persisted in both cases.
    pub fn parent(&self) -> &T {
        match self {
            WriteOutcome::Committed(parent) => parent,
            WriteOutcome::PartiallyCommitted { parent, .. } => parent,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }

    /// Treat a partial commit as a plain failure, surfacing the child error.
    pub fn into_result(self) -> Result<T, StoreError> {
        match self {
            WriteOutcome::Committed(parent) => Ok(parent),
            WriteOutcome::PartiallyCommitted { error, .. } => Err(error),
        }
    }
}

/// Reviews and returns persisted through PostgREST.
#[derive(Debug, Clone)]
pub struct CommerceStore<T = UreqTransport> {
    client: PostgrestClient,
    transport: T,
}

impl CommerceStore<UreqTransport> {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_transport(config, UreqTransport::new())
    }

    /// Build from `POSTGREST_URL` / `POSTGREST_API_KEY`.
    pub fn from_env() -> Self {
        Self::from_config(&StoreConfig::from_env())
    }
}

impl<T: Transport> CommerceStore<T> {
    pub fn with_transport(config: &StoreConfig, transport: T) -> Self {
        Self {
            client: PostgrestClient::new(&config.base_url, config.api_key.clone()),
            transport,
        }
    }

    pub fn client(&self) -> &PostgrestClient {
        &self.client
    }

    /// Create a review, then attach its images in one batch.
    ///
    /// Images are only written when the parent representation carries an id.
    /// Without one the images are dropped and the parent is still returned.
    pub fn create_review(&self, input: &ReviewInput) -> Result<WriteOutcome<ReviewRow>, StoreError> {
        input.validate()?;

        let request = self.client.build_create_review(input)?;
        let review = self.client.parse_create_review(self.transport.execute(request)?)?;
        info!(review_id = ?review.id, product_handle = %review.product_handle, "created review");

        if input.images.is_empty() {
            return Ok(WriteOutcome::Committed(review));
        }
        let Some(review_id) = review.id.clone() else {
            warn!(
                product_handle = %review.product_handle,
                images = input.images.len(),
                "review created without id, skipping image attachment"
            );
            return Ok(WriteOutcome::Committed(review));
        };

        let written = self
            .client
            .build_create_review_images(&review_id, &input.images)
            .and_then(|request| self.transport.execute(request))
            .and_then(|response| self.client.parse_batch(response));
        Ok(settle(review, &review_id, ChildBatch::ReviewImages, written))
    }

    /// Create a return with status `pending`, then its items, then its images.
    pub fn create_return(&self, input: &ReturnInput) -> Result<WriteOutcome<ReturnRow>, StoreError> {
        input.validate()?;

        let request = self.client.build_create_return(input)?;
        let record = self.client.parse_create_return(self.transport.execute(request)?)?;
        let return_id = record
            .id
            .clone()
            .ok_or(StoreError::MissingId { resource: "return" })?;
        info!(%return_id, order_id = %record.order_id, "created return");

        if !input.items.is_empty() {
            let written = self
                .client
                .build_create_return_items(&return_id, &input.items)
                .and_then(|request| self.transport.execute(request))
                .and_then(|response| self.client.parse_batch(response));
            if written.is_err() {
                return Ok(settle(record, &return_id, ChildBatch::ReturnItems, written));
            }
        }

        if !input.images.is_empty() {
            let written = self
                .client
                .build_create_return_images(&return_id, &input.images)
                .and_then(|request| self.transport.execute(request))
                .and_then(|response| self.client.parse_batch(response));
            return Ok(settle(record, &return_id, ChildBatch::ReturnImages, written));
        }

        Ok(WriteOutcome::Committed(record))
    }

    /// Newest first, one page at a time.
    pub fn list_reviews(
        &self,
        product_handle: &str,
        page: Page,
    ) -> Result<Vec<ReviewWithImages>, StoreError> {
        let request = self.client.build_list_reviews(product_handle, page);
        self.client.parse_list_reviews(self.transport.execute(request)?)
    }

    /// Aggregate over every review of the product; not paginated.
    pub fn review_stats(&self, product_handle: &str) -> Result<ReviewStats, StoreError> {
        let request = self.client.build_review_ratings(product_handle);
        self.client.parse_review_stats(self.transport.execute(request)?)
    }

    /// `Ok(None)` when no return has this id.
    pub fn get_return(&self, return_id: &RowId) -> Result<Option<ReturnDetail>, StoreError> {
        let request = self.client.build_get_return(return_id);
        self.client.parse_get_return(self.transport.execute(request)?)
    }

    pub fn returns_by_order(&self, order_id: &str) -> Result<Vec<ReturnDetail>, StoreError> {
        let request = self.client.build_returns_by_order(order_id);
        self.client.parse_returns_by_order(self.transport.execute(request)?)
    }

    /// Write any status string; transitions are not checked here.
    pub fn update_return_status(
        &self,
        return_id: &RowId,
        status: &ReturnStatus,
    ) -> Result<Vec<ReturnRow>, StoreError> {
        let request = self.client.build_update_return_status(return_id, status)?;
        let rows = self
            .client
            .parse_update_return_status(self.transport.execute(request)?)?;
        info!(%return_id, %status, updated = rows.len(), "updated return status");
        Ok(rows)
    }
}

fn settle<R>(
    parent: R,
    parent_id: &RowId,
    batch: ChildBatch,
    written: Result<(), StoreError>,
) -> WriteOutcome<R> {
    match written {
        Ok(()) => WriteOutcome::Committed(parent),
        Err(err) => {
            error!(
                %parent_id,
                resource = batch.resource(),
                error = %err,
                "child batch failed after parent was committed"
            );
            WriteOutcome::PartiallyCommitted {
                parent,
                failed: batch,
                error: err,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use tracing_test::traced_test;

    use super::*;
    use crate::http::{HttpMethod, HttpRequest, HttpResponse};
    use crate::types::{Rating, ReturnItemInput};

    /// Replays canned responses in order and records every request.
    #[derive(Default)]
    struct RecordingTransport {
        responses: RefCell<VecDeque<HttpResponse>>,
        requests: RefCell<Vec<HttpRequest>>,
    }

    impl RecordingTransport {
        fn replying(responses: Vec<(u16, &str)>) -> Self {
            let transport = Self::default();
            for (status, body) in responses {
                transport.responses.borrow_mut().push_back(HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: body.to_string(),
                });
            }
            transport
        }

        fn writes(&self) -> Vec<HttpRequest> {
            self.requests
                .borrow()
                .iter()
                .filter(|r| r.method != HttpMethod::Get)
                .cloned()
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse, StoreError> {
            self.requests.borrow_mut().push(request);
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| StoreError::Network("no canned response left".to_string()))
        }
    }

    const REVIEW_ID: &str = "00000000-0000-0000-0000-0000000000aa";
    const RETURN_ID: &str = "00000000-0000-0000-0000-0000000000bb";

    fn store(transport: &RecordingTransport) -> CommerceStore<&RecordingTransport> {
        CommerceStore::with_transport(&StoreConfig::new("http://db.test/", None), transport)
    }

    fn review_input(images: &[&str]) -> ReviewInput {
        ReviewInput {
            product_id: "p-1".to_string(),
            product_handle: "mug".to_string(),
            rating: Rating::new(5).unwrap(),
            title: "Great".to_string(),
            description: "Love it".to_string(),
            customer_name: "Ann".to_string(),
            customer_email: "ann@example.com".to_string(),
            images: images.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn review_row(id: Option<&str>) -> String {
        let id = id.map(|i| format!(r#""id":"{i}","#)).unwrap_or_default();
        format!(
            r#"[{{{id}"product_id":"p-1","product_handle":"mug","rating":5,"title":"Great",
                "description":"Love it","customer_name":"Ann","customer_email":"ann@example.com"}}]"#
        )
    }

    fn return_input(items: usize, images: &[&str]) -> ReturnInput {
        ReturnInput {
            order_id: "o-1".to_string(),
            order_name: "#1001".to_string(),
            customer_email: None,
            customer_name: Some("Bo".to_string()),
            reason: Some("wrong size".to_string()),
            items: (0..items)
                .map(|i| ReturnItemInput {
                    line_item_id: format!("li-{i}"),
                    product_id: None,
                    product_title: None,
                    variant_id: None,
                    variant_title: None,
                    quantity: 1,
                    reason: None,
                })
                .collect(),
            images: images.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn return_row(id: Option<&str>) -> String {
        let id = id.map(|i| format!(r#""id":"{i}","#)).unwrap_or_default();
        format!(
            r##"[{{{id}"order_id":"o-1","order_name":"#1001","customer_name":"Bo",
                "reason":"wrong size","status":"pending"}}]"##
        )
    }

    #[test]
    fn review_without_images_is_a_single_write() {
        let transport = RecordingTransport::replying(vec![(201, review_row(Some(REVIEW_ID)).as_str())]);
        let outcome = store(&transport).create_review(&review_input(&[])).unwrap();

        assert!(outcome.is_committed());
        assert_eq!(outcome.parent().id, Some(RowId::from(REVIEW_ID)));
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].path, "http://db.test/product_reviews");
    }

    #[test]
    fn review_images_are_one_batch_referencing_parent() {
        let transport = RecordingTransport::replying(vec![
            (201, review_row(Some(REVIEW_ID)).as_str()),
            (201, ""),
        ]);
        let outcome = store(&transport)
            .create_review(&review_input(&["a.jpg", "b.jpg", "c.jpg"]))
            .unwrap();

        assert!(outcome.is_committed());
        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].path, "http://db.test/review_images");
        let rows: serde_json::Value = serde_json::from_str(writes[1].body.as_deref().unwrap()).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r["review_id"] == REVIEW_ID));
    }

    #[test]
    fn review_without_generated_id_skips_images() {
        let transport = RecordingTransport::replying(vec![(201, review_row(None).as_str())]);
        let outcome = store(&transport)
            .create_review(&review_input(&["a.jpg", "b.jpg"]))
            .unwrap();

        assert!(outcome.is_committed());
        assert!(outcome.parent().id.is_none());
        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn review_parent_failure_is_an_error() {
        let transport = RecordingTransport::replying(vec![(400, r#"{"code":"23514"}"#)]);
        let err = store(&transport)
            .create_review(&review_input(&["a.jpg"]))
            .unwrap_err();

        assert!(matches!(err, StoreError::Http { status: 400, .. }));
        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn review_image_failure_leaves_parent_committed() {
        let transport = RecordingTransport::replying(vec![
            (201, review_row(Some(REVIEW_ID)).as_str()),
            (503, "unavailable"),
        ]);
        let outcome = store(&transport)
            .create_review(&review_input(&["a.jpg"]))
            .unwrap();

        match &outcome {
            WriteOutcome::PartiallyCommitted { parent, failed, error } => {
                assert_eq!(parent.id, Some(RowId::from(REVIEW_ID)));
                assert_eq!(*failed, ChildBatch::ReviewImages);
                assert_eq!(error.status(), Some(503));
            }
            other => panic!("expected partial commit, got {other:?}"),
        }
        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 503, .. }));
    }

    #[test]
    fn invalid_review_is_rejected_before_any_write() {
        let transport = RecordingTransport::default();
        let mut input = review_input(&[]);
        input.product_handle = "  ".to_string();
        let err = store(&transport).create_review(&input).unwrap_err();

        assert!(matches!(err, StoreError::Validation(_)));
        assert!(transport.requests.borrow().is_empty());
    }

    #[test]
    fn return_without_generated_id_fails_even_without_children() {
        let transport = RecordingTransport::replying(vec![(201, return_row(None).as_str())]);
        let err = store(&transport).create_return(&return_input(0, &[])).unwrap_err();

        assert!(matches!(err, StoreError::MissingId { resource: "return" }));
        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn return_writes_items_then_images_with_same_parent() {
        let transport = RecordingTransport::replying(vec![
            (201, return_row(Some(RETURN_ID)).as_str()),
            (201, ""),
            (201, ""),
        ]);
        let outcome = store(&transport)
            .create_return(&return_input(2, &["x.jpg"]))
            .unwrap();

        assert!(outcome.is_committed());
        assert_eq!(outcome.parent().status.as_str(), "pending");
        let writes = transport.writes();
        let paths: Vec<&str> = writes.iter().map(|w| w.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "http://db.test/returns",
                "http://db.test/return_items",
                "http://db.test/return_images",
            ]
        );
        for write in &writes[1..] {
            let rows: serde_json::Value = serde_json::from_str(write.body.as_deref().unwrap()).unwrap();
            assert!(rows.as_array().unwrap().iter().all(|r| r["return_id"] == RETURN_ID));
        }
    }

    #[test]
    fn return_item_failure_stops_before_images() {
        let transport = RecordingTransport::replying(vec![
            (201, return_row(Some(RETURN_ID)).as_str()),
            (409, "fk violation"),
        ]);
        let outcome = store(&transport)
            .create_return(&return_input(1, &["x.jpg"]))
            .unwrap();

        assert!(matches!(
            outcome,
            WriteOutcome::PartiallyCommitted {
                failed: ChildBatch::ReturnItems,
                ..
            }
        ));
        assert_eq!(transport.writes().len(), 2);
    }

    #[test]
    fn numeric_return_id_is_carried_verbatim() {
        let transport = RecordingTransport::replying(vec![
            (
                201,
                r##"[{"id":17,"order_id":"o-1","order_name":"#1001","customer_name":"Bo",
                    "reason":"wrong size","status":"pending"}]"##,
            ),
            (201, ""),
            (201, ""),
        ]);
        let outcome = store(&transport)
            .create_return(&return_input(2, &["x.jpg"]))
            .unwrap();

        assert!(outcome.is_committed());
        assert_eq!(outcome.parent().id, Some(RowId::Int(17)));
        let writes = transport.writes();
        assert_eq!(writes.len(), 3);
        for write in &writes[1..] {
            let rows: serde_json::Value = serde_json::from_str(write.body.as_deref().unwrap()).unwrap();
            assert!(rows.as_array().unwrap().iter().all(|r| r["return_id"] == 17));
        }
    }

    #[test]
    fn unreadable_parent_representation_is_not_a_plain_parse_error() {
        let body = r#"{"message":"created"}"#;
        let transport = RecordingTransport::replying(vec![(201, body)]);
        let err = store(&transport)
            .create_return(&return_input(1, &["x.jpg"]))
            .unwrap_err();

        match err {
            StoreError::UnreadableRepresentation { resource, body: text, .. } => {
                assert_eq!(resource, "return");
                assert_eq!(text, body);
            }
            other => panic!("expected UnreadableRepresentation, got {other:?}"),
        }
        assert_eq!(transport.writes().len(), 1);
    }

    #[traced_test]
    #[test]
    fn child_failure_is_logged_with_parent_id() {
        let transport = RecordingTransport::replying(vec![
            (201, return_row(Some(RETURN_ID)).as_str()),
            (201, ""),
            (503, "unavailable"),
        ]);
        let outcome = store(&transport)
            .create_return(&return_input(1, &["x.jpg"]))
            .unwrap();

        assert!(!outcome.is_committed());
        assert!(logs_contain("child batch failed after parent was committed"));
        assert!(logs_contain(&format!("parent_id={RETURN_ID}")));
        assert!(logs_contain("return_images"));
    }

    #[test]
    fn return_with_only_images_skips_items_batch() {
        let transport = RecordingTransport::replying(vec![
            (201, return_row(Some(RETURN_ID)).as_str()),
            (201, ""),
        ]);
        store(&transport)
            .create_return(&return_input(0, &["x.jpg"]))
            .unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].path, "http://db.test/return_images");
    }

    #[test]
    fn get_return_absent_is_none() {
        let transport = RecordingTransport::replying(vec![(200, "[]")]);
        let found = store(&transport).get_return(&RowId::from("none")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn review_stats_from_rows() {
        let transport = RecordingTransport::replying(vec![(
            200,
            r#"[{"rating":5},{"rating":5},{"rating":4},{"rating":3},{"rating":3},{"rating":1}]"#,
        )]);
        let stats = store(&transport).review_stats("mug").unwrap();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.average, 3.5);
        assert_eq!(stats.count(2), 0);
        assert_eq!(stats.count(3), 2);
    }

    #[test]
    fn network_failure_propagates() {
        let transport = RecordingTransport::default();
        let err = store(&transport).returns_by_order("o-1").unwrap_err();
        assert!(matches!(err, StoreError::Network(_)));
    }
}
