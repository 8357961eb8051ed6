use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Bson},
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, Database, IndexModel,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::PaymentStore;
use crate::errors::{AppError, Result};
use crate::models::payment::{
    PaymentAttempt, PaymentFilter, PaymentStats, PaymentStatus, TerminalUpdate, TransitionOutcome,
};

pub const PAYMENTS_COLLECTION: &str = "mpesa_payments";

const DUPLICATE_KEY_CODE: i32 = 11000;

pub async fn get_db_client(database_url: &str, db_name: &str) -> Result<Database> {
    let client = Client::with_uri_str(database_url).await?;
    let db = client.database(db_name);

    db.run_command(doc! { "ping": 1 }).await?;
    info!("✅ Connected to database: {}", db_name);

    Ok(db)
}

/// Stored shape of a payment attempt. Timestamps are kept as native BSON
/// dates so the collection sorts and indexes on them correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    checkout_request_id: String,
    merchant_request_id: Option<String>,
    phone_number: String,
    amount: Decimal,
    reference: String,
    status: PaymentStatus,
    result_code: Option<i64>,
    result_description: Option<String>,
    receipt_number: Option<String>,
    callback_metadata: Option<serde_json::Value>,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
    callback_received_at: Option<bson::DateTime>,
}

impl From<PaymentAttempt> for PaymentDocument {
    fn from(attempt: PaymentAttempt) -> Self {
        PaymentDocument {
            id: None,
            checkout_request_id: attempt.checkout_request_id,
            merchant_request_id: attempt.merchant_request_id,
            phone_number: attempt.phone_number,
            amount: attempt.amount,
            reference: attempt.reference,
            status: attempt.status,
            result_code: attempt.result_code,
            result_description: attempt.result_description,
            receipt_number: attempt.receipt_number,
            callback_metadata: attempt.callback_metadata,
            created_at: bson::DateTime::from_chrono(attempt.created_at),
            updated_at: bson::DateTime::from_chrono(attempt.updated_at),
            callback_received_at: attempt.callback_received_at.map(bson::DateTime::from_chrono),
        }
    }
}

impl From<PaymentDocument> for PaymentAttempt {
    fn from(document: PaymentDocument) -> Self {
        PaymentAttempt {
            checkout_request_id: document.checkout_request_id,
            merchant_request_id: document.merchant_request_id,
            phone_number: document.phone_number,
            amount: document.amount,
            reference: document.reference,
            status: document.status,
            result_code: document.result_code,
            result_description: document.result_description,
            receipt_number: document.receipt_number,
            callback_metadata: document.callback_metadata,
            created_at: document.created_at.to_chrono(),
            updated_at: document.updated_at.to_chrono(),
            callback_received_at: document.callback_received_at.map(|dt| dt.to_chrono()),
        }
    }
}

#[derive(Clone)]
pub struct MongoPaymentStore {
    collection: Collection<PaymentDocument>,
}

impl MongoPaymentStore {
    /// Opens the payments collection and makes sure the unique index on
    /// `checkout_request_id` exists.
    pub async fn new(db: &Database) -> Result<Self> {
        let collection: Collection<PaymentDocument> = db.collection(PAYMENTS_COLLECTION);

        let unique_checkout = IndexModel::builder()
            .keys(doc! { "checkout_request_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_created = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .build();

        collection.create_index(unique_checkout).await?;
        collection.create_index(by_created).await?;

        Ok(Self { collection })
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn terminal_update_document(update: &TerminalUpdate) -> Result<bson::Document> {
    let received_at = bson::DateTime::from_chrono(update.received_at);
    Ok(doc! {
        "$set": {
            "status": update.status.as_str(),
            "result_code": update.result_code,
            "result_description": update.result_description.clone(),
            "receipt_number": update.receipt_number.clone(),
            "callback_metadata": bson::to_bson(&update.callback_metadata)?,
            "updated_at": received_at,
            "callback_received_at": received_at,
        }
    })
}

/// Fields searched by `PaymentFilter::search`.
const SEARCH_FIELDS: [&str; 3] = ["phone_number", "checkout_request_id", "receipt_number"];

/// Escapes regex metacharacters so user input matches literally.
fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn list_filter_document(filter: &PaymentFilter) -> bson::Document {
    let mut query = doc! {};
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = escape_regex(search);
        let clauses: Vec<bson::Document> = SEARCH_FIELDS
            .iter()
            .map(|field| {
                let mut clause = bson::Document::new();
                clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
                clause
            })
            .collect();
        query.insert("$or", clauses);
    }
    query
}

#[async_trait]
impl PaymentStore for MongoPaymentStore {
    fn name(&self) -> &'static str {
        "mongo"
    }

    async fn insert(&self, attempt: PaymentAttempt) -> Result<()> {
        let checkout_request_id = attempt.checkout_request_id.clone();
        let document = PaymentDocument::from(attempt);

        match self.collection.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::DuplicateKey(checkout_request_id)),
            Err(e) => Err(AppError::MongoDB(e)),
        }
    }

    async fn find(&self, checkout_request_id: &str) -> Result<Option<PaymentAttempt>> {
        let document = self
            .collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?;
        Ok(document.map(PaymentAttempt::from))
    }

    async fn complete(
        &self,
        checkout_request_id: &str,
        update: TerminalUpdate,
    ) -> Result<TransitionOutcome> {
        // The status filter makes this a single-document compare-and-set.
        let filter = doc! {
            "checkout_request_id": checkout_request_id,
            "status": PaymentStatus::Pending.as_str(),
        };

        let updated = self
            .collection
            .find_one_and_update(filter, terminal_update_document(&update)?)
            .return_document(ReturnDocument::After)
            .await?;

        if let Some(document) = updated {
            return Ok(TransitionOutcome::Applied(document.into()));
        }

        match self.find(checkout_request_id).await? {
            Some(existing) => Ok(TransitionOutcome::AlreadyTerminal(existing)),
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    async fn list_recent(&self, filter: &PaymentFilter, limit: usize) -> Result<Vec<PaymentAttempt>> {
        let cursor = self
            .collection
            .find(list_filter_document(filter))
            .sort(doc! { "created_at": -1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await?;
        let documents: Vec<PaymentDocument> = cursor.try_collect().await?;

        Ok(documents.into_iter().map(PaymentAttempt::from).collect())
    }

    async fn stats(&self) -> Result<PaymentStats> {
        let mut stats = PaymentStats::default();
        for status in PaymentStatus::ALL {
            let count = self
                .collection
                .count_documents(doc! { "status": Bson::String(status.as_str().to_string()) })
                .await?;
            stats.record(status, count);
        }
        Ok(stats)
    }
}
