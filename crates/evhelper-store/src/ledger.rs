//! The token ledger.
//!
//! Per-user balances live in `users.token_balance`; every balance-affecting
//! event also appends exactly one row to the append-only `token_history`
//! table.  Both writes happen inside a single SQLite transaction, so a
//! balance mutation without a matching history entry is never observable.
//!
//! Balances are mutated only through [`Database::debit`] and
//! [`Database::credit`]; no caller reads-then-writes a balance directly.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use evhelper_shared::types::{RequestId, TokenEntryKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::TokenEntry;

impl Database {
    /// Subtract `amount` tokens from a user's balance and append the
    /// matching (negative) history entry.  Returns the new balance.
    ///
    /// Fails with [`StoreError::InsufficientFunds`] -- and changes nothing
    /// -- when the balance is lower than `amount`.  The guard is the
    /// `token_balance >= ?` predicate of the conditional `UPDATE`, so
    /// concurrent debits can never drive the balance negative.
    pub fn debit(
        &mut self,
        user_id: UserId,
        amount: i64,
        kind: TokenEntryKind,
        description: &str,
        request_id: Option<RequestId>,
    ) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute(
            "UPDATE users
             SET token_balance = token_balance - ?1
             WHERE id = ?2 AND token_balance >= ?1",
            params![amount, user_id.to_string()],
        )?;

        if affected == 0 {
            let balance: Option<i64> = tx
                .query_row(
                    "SELECT token_balance FROM users WHERE id = ?1",
                    params![user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            // Dropping the transaction rolls it back (nothing was written).
            return match balance {
                None => Err(StoreError::NotFound),
                Some(balance) => Err(StoreError::InsufficientFunds {
                    balance,
                    required: amount,
                }),
            };
        }

        append_entry(&tx, user_id, -amount, kind, description, request_id)?;
        let new_balance = current_balance(&tx, user_id)?;
        tx.commit()?;

        tracing::debug!(
            user = %user_id,
            amount,
            kind = %kind,
            balance = new_balance,
            "ledger debit"
        );

        Ok(new_balance)
    }

    /// Add `amount` tokens to a user's balance and append the matching
    /// (positive) history entry.  Returns the new balance.
    ///
    /// Never fails for a positive amount on an existing user.
    pub fn credit(
        &mut self,
        user_id: UserId,
        amount: i64,
        kind: TokenEntryKind,
        description: &str,
        request_id: Option<RequestId>,
    ) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute(
            "UPDATE users SET token_balance = token_balance + ?1 WHERE id = ?2",
            params![amount, user_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        append_entry(&tx, user_id, amount, kind, description, request_id)?;
        let new_balance = current_balance(&tx, user_id)?;
        tx.commit()?;

        tracing::debug!(
            user = %user_id,
            amount,
            kind = %kind,
            balance = new_balance,
            "ledger credit"
        );

        Ok(new_balance)
    }

    /// Append an audit-only `payment_record` entry.  The balance is not
    /// touched: the requester already paid at creation time, this row only
    /// ties the payment to the completed request.
    pub fn record_payment(
        &mut self,
        user_id: UserId,
        amount: i64,
        description: &str,
        request_id: Option<RequestId>,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        append_entry(
            &tx,
            user_id,
            amount,
            TokenEntryKind::PaymentRecord,
            description,
            request_id,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Read a user's token history, oldest first.
    pub fn token_history(&self, user_id: UserId) -> Result<Vec<TokenEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, amount, kind, description, request_id, created_at
             FROM token_history
             WHERE user_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn append_entry(
    tx: &rusqlite::Transaction<'_>,
    user_id: UserId,
    amount: i64,
    kind: TokenEntryKind,
    description: &str,
    request_id: Option<RequestId>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO token_history (user_id, amount, kind, description, request_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id.to_string(),
            amount,
            kind.as_str(),
            description,
            request_id.map(|r| r.to_string()),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn current_balance(tx: &rusqlite::Transaction<'_>, user_id: UserId) -> Result<i64> {
    let balance = tx.query_row(
        "SELECT token_balance FROM users WHERE id = ?1",
        params![user_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(balance)
}

/// Map a `rusqlite::Row` to a [`TokenEntry`].
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenEntry> {
    let id: i64 = row.get(0)?;
    let user_str: String = row.get(1)?;
    let amount: i64 = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let description: String = row.get(4)?;
    let request_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    let user_id: UserId = user_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind: TokenEntryKind = kind_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let request_id = request_str
        .map(|s| s.parse::<RequestId>())
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(TokenEntry {
        id,
        user_id,
        amount,
        kind,
        description,
        request_id,
        created_at,
    })
}
