//! Synchronized ledger records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch milliseconds. Doubles as the per-record logical clock and the sync cursor.
pub type Timestamp = i64;

/// Stable record identifier.
///
/// Assigned once at creation and never reused. On the wire it is a plain
/// JSON string.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// The capability the sync engine needs from a record.
///
/// The reconciler, the stores and the remote endpoint are generic over this
/// trait; everything beyond `id`, `updated_at` and `is_deleted` is payload
/// they never look at.
pub trait SyncableRecord:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable identifier.
    fn id(&self) -> &RecordId;

    /// Timestamp of the last mutation.
    fn updated_at(&self) -> Timestamp;

    /// Returns true if this version is a tombstone.
    fn is_deleted(&self) -> bool;

    /// Overwrites the mutation timestamp.
    fn set_updated_at(&mut self, updated_at: Timestamp);

    /// Turns this version into a tombstone.
    fn mark_deleted(&mut self);
}

/// Whether a category collects income or expenses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryDirection {
    /// Money going out.
    #[default]
    Expense,
    /// Money coming in.
    Income,
}

/// A single ledger entry.
///
/// Payload fields default when absent so that bare tombstones
/// (`{"kind":"transaction","id":..,"updatedAt":..,"isDeleted":true}`) decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Record ID.
    pub id: RecordId,
    /// Last mutation timestamp.
    pub updated_at: Timestamp,
    /// Tombstone flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Owning ledger.
    #[serde(default)]
    pub ledger_id: RecordId,
    /// Amount in minor currency units; negative for outflows.
    #[serde(default)]
    pub amount: i64,
    /// Category, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<RecordId>,
    /// Free-form note.
    #[serde(default)]
    pub note: String,
    /// When the transaction happened (epoch millis).
    #[serde(default)]
    pub occurred_at: Timestamp,
}

/// A ledger (account book).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    /// Record ID.
    pub id: RecordId,
    /// Last mutation timestamp.
    pub updated_at: Timestamp,
    /// Tombstone flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// ISO 4217 currency code.
    #[serde(default)]
    pub currency: String,
}

/// A spending or income category scoped to a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Record ID.
    pub id: RecordId,
    /// Last mutation timestamp.
    pub updated_at: Timestamp,
    /// Tombstone flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Owning ledger.
    #[serde(default)]
    pub ledger_id: RecordId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Income or expense.
    #[serde(default)]
    pub direction: CategoryDirection,
}

macro_rules! impl_syncable {
    ($($ty:ty),+) => {
        $(
            impl SyncableRecord for $ty {
                fn id(&self) -> &RecordId {
                    &self.id
                }

                fn updated_at(&self) -> Timestamp {
                    self.updated_at
                }

                fn is_deleted(&self) -> bool {
                    self.is_deleted
                }

                fn set_updated_at(&mut self, updated_at: Timestamp) {
                    self.updated_at = updated_at;
                }

                fn mark_deleted(&mut self) {
                    self.is_deleted = true;
                }
            }
        )+
    };
}

impl_syncable!(Transaction, Ledger, Category);

/// Discriminant of a [`LedgerRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// [`Transaction`].
    Transaction,
    /// [`Ledger`].
    Ledger,
    /// [`Category`].
    Category,
}

impl RecordKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Transaction => "transaction",
            RecordKind::Ledger => "ledger",
            RecordKind::Category => "category",
        }
    }
}

/// Any record the finance ledger synchronizes.
///
/// All kinds share one id space and one sync stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LedgerRecord {
    /// A transaction.
    Transaction(Transaction),
    /// A ledger.
    Ledger(Ledger),
    /// A category.
    Category(Category),
}

impl LedgerRecord {
    /// Returns the record kind.
    pub fn kind(&self) -> RecordKind {
        match self {
            LedgerRecord::Transaction(_) => RecordKind::Transaction,
            LedgerRecord::Ledger(_) => RecordKind::Ledger,
            LedgerRecord::Category(_) => RecordKind::Category,
        }
    }

    /// Returns the owning ledger for transactions and categories.
    pub fn ledger_id(&self) -> Option<&RecordId> {
        match self {
            LedgerRecord::Transaction(t) => Some(&t.ledger_id),
            LedgerRecord::Category(c) => Some(&c.ledger_id),
            LedgerRecord::Ledger(_) => None,
        }
    }

    fn as_syncable(&self) -> &dyn SyncableFields {
        match self {
            LedgerRecord::Transaction(t) => t,
            LedgerRecord::Ledger(l) => l,
            LedgerRecord::Category(c) => c,
        }
    }

    fn as_syncable_mut(&mut self) -> &mut dyn SyncableFields {
        match self {
            LedgerRecord::Transaction(t) => t,
            LedgerRecord::Ledger(l) => l,
            LedgerRecord::Category(c) => c,
        }
    }
}

/// Object-safe view of the sync fields, used to dispatch through the enum.
trait SyncableFields {
    fn id(&self) -> &RecordId;
    fn updated_at(&self) -> Timestamp;
    fn is_deleted(&self) -> bool;
    fn set_updated_at(&mut self, updated_at: Timestamp);
    fn mark_deleted(&mut self);
}

impl<T: SyncableRecord> SyncableFields for T {
    fn id(&self) -> &RecordId {
        SyncableRecord::id(self)
    }

    fn updated_at(&self) -> Timestamp {
        SyncableRecord::updated_at(self)
    }

    fn is_deleted(&self) -> bool {
        SyncableRecord::is_deleted(self)
    }

    fn set_updated_at(&mut self, updated_at: Timestamp) {
        SyncableRecord::set_updated_at(self, updated_at);
    }

    fn mark_deleted(&mut self) {
        SyncableRecord::mark_deleted(self);
    }
}

impl SyncableRecord for LedgerRecord {
    fn id(&self) -> &RecordId {
        self.as_syncable().id()
    }

    fn updated_at(&self) -> Timestamp {
        self.as_syncable().updated_at()
    }

    fn is_deleted(&self) -> bool {
        self.as_syncable().is_deleted()
    }

    fn set_updated_at(&mut self, updated_at: Timestamp) {
        self.as_syncable_mut().set_updated_at(updated_at);
    }

    fn mark_deleted(&mut self) {
        self.as_syncable_mut().mark_deleted();
    }
}

impl From<Transaction> for LedgerRecord {
    fn from(record: Transaction) -> Self {
        LedgerRecord::Transaction(record)
    }
}

impl From<Ledger> for LedgerRecord {
    fn from(record: Ledger) -> Self {
        LedgerRecord::Ledger(record)
    }
}

impl From<Category> for LedgerRecord {
    fn from(record: Category) -> Self {
        LedgerRecord::Category(record)
    }
}
