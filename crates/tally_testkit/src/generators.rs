//! Property-based test generators using proptest.
//!
//! Records built here derive their whole payload from `(id, updatedAt)`, so
//! two copies of one version are always identical. That is the assumption
//! under which last-writer-wins converges; true same-millisecond collisions
//! with different payloads are kept out of the generated data.

use proptest::prelude::*;
use tally_protocol::{
    Category, CategoryDirection, Ledger, LedgerRecord, RecordId, Timestamp, Transaction,
};

/// Builds the canonical record for `(id, updated_at)`.
///
/// The kind is chosen from the id's first letter: `l` for ledgers, `c` for
/// categories, anything else for transactions.
pub fn versioned_record(id: &str, updated_at: Timestamp, deleted: bool) -> LedgerRecord {
    let id = RecordId::new(id);
    let ledger_id = RecordId::from("household");
    match id.as_str().chars().next() {
        Some('l') => LedgerRecord::from(Ledger {
            id,
            updated_at,
            is_deleted: deleted,
            name: format!("Ledger v{updated_at}"),
            currency: if updated_at % 2 == 0 { "EUR" } else { "USD" }.into(),
        }),
        Some('c') => LedgerRecord::from(Category {
            id,
            updated_at,
            is_deleted: deleted,
            ledger_id,
            name: format!("Category v{updated_at}"),
            direction: if updated_at % 2 == 0 {
                CategoryDirection::Income
            } else {
                CategoryDirection::Expense
            },
        }),
        _ => LedgerRecord::from(Transaction {
            id,
            updated_at,
            is_deleted: deleted,
            ledger_id,
            amount: (updated_at * 37) % 100_000 - 50_000,
            category_id: None,
            note: format!("v{updated_at}"),
            occurred_at: updated_at,
        }),
    }
}

/// Strategy for ids drawn from a small pool so versions collide often.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..6).prop_map(|n| format!("t{n}")),
        (0u8..2).prop_map(|n| format!("l{n}")),
        (0u8..3).prop_map(|n| format!("c{n}")),
    ]
}

/// Strategy for one canonical record version.
///
/// Roughly one version in five is a tombstone.
pub fn versioned_record_strategy() -> impl Strategy<Value = LedgerRecord> {
    (record_id_strategy(), 1i64..1_000)
        .prop_map(|(id, ts)| versioned_record(&id, ts, ts % 5 == 0))
}

/// Strategy for a batch of remote versions, duplicates and all.
pub fn remote_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<LedgerRecord>> {
    prop::collection::vec(versioned_record_strategy(), 0..max_len)
}

/// Strategy for a local record that has not been stamped yet.
///
/// `updated_at` is left at 0; the writer assigns it.
pub fn unstamped_transaction_strategy(prefix: &'static str) -> impl Strategy<Value = LedgerRecord> {
    (0u8..8, -100_000i64..100_000, "[a-z ]{0,12}").prop_map(move |(n, amount, note)| {
        LedgerRecord::from(Transaction {
            id: RecordId::new(format!("{prefix}{n}")),
            ledger_id: RecordId::from("household"),
            amount,
            note,
            ..Default::default()
        })
    })
}

/// One step of a device's local activity.
#[derive(Debug, Clone)]
pub enum DeviceEdit {
    /// Create or overwrite a record.
    Write(LedgerRecord),
    /// Delete the record with this id, if it exists.
    Delete(RecordId),
}

/// Strategy for a sequence of edits confined to ids starting with `prefix`.
pub fn edit_script_strategy(
    prefix: &'static str,
    max_len: usize,
) -> impl Strategy<Value = Vec<DeviceEdit>> {
    let edit = prop_oneof![
        3 => unstamped_transaction_strategy(prefix).prop_map(DeviceEdit::Write),
        1 => (0u8..8).prop_map(move |n| DeviceEdit::Delete(RecordId::new(format!("{prefix}{n}")))),
    ];
    prop::collection::vec(edit, 0..max_len)
}
