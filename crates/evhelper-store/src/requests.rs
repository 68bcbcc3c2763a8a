//! Charging-request records and their status transitions.
//!
//! [`Database::conditional_transition`] is the only code path that writes a
//! request's status (and the fields tied to it).  It is realized as a single
//! conditional `UPDATE ... WHERE id = ? AND status = ?` whose affected-row
//! count decides success: among any number of concurrent callers racing on
//! the same precondition, exactly one observes an affected row.

use chrono::{DateTime, Utc};
use rusqlite::params;

use evhelper_shared::rooms::room_key;
use evhelper_shared::types::{RequestId, RequestStatus, Urgency, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ChargingRequest;

/// The mutation applied by a successful conditional transition.
///
/// Each variant carries exactly the fields the target status sets; every
/// other column is immutable after creation.
#[derive(Debug, Clone, Copy)]
pub enum StatusChange {
    /// `OPEN -> ACCEPTED`: assign the helper and stamp `accepted_at`.
    /// The update additionally requires `requester_id != helper_id`, so a
    /// requester can never win a race to take their own request.
    Accept {
        helper_id: UserId,
        at: DateTime<Utc>,
    },
    /// `ACCEPTED -> COMPLETED`: stamp `completed_at`.
    Complete { at: DateTime<Utc> },
    /// `OPEN|ACCEPTED -> CANCELED`: stamp `canceled_at`.
    Cancel { at: DateTime<Utc> },
}

/// Optional constraints for listing a requester's own requests.
#[derive(Debug, Clone, Copy)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: evhelper_shared::constants::DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl Database {
    /// Insert a new request.  The normalized `city_key` must already be
    /// consistent with `city` (callers build records via the engine, which
    /// derives it with [`room_key`]).
    pub fn insert_request(&self, request: &ChargingRequest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO charging_requests
                 (id, requester_id, helper_id, city, city_key, status, location, urgency,
                  message, phone_number, estimated_time, token_cost, created_at,
                  accepted_at, completed_at, canceled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                request.id.to_string(),
                request.requester_id.to_string(),
                request.helper_id.map(|h| h.to_string()),
                request.city,
                request.city_key,
                request.status.as_str(),
                request.location,
                request.urgency.as_str(),
                request.message,
                request.phone_number,
                request.estimated_time,
                request.token_cost,
                request.created_at.to_rfc3339(),
                request.accepted_at.map(|t| t.to_rfc3339()),
                request.completed_at.map(|t| t.to_rfc3339()),
                request.canceled_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single request by id.
    pub fn get_request(&self, id: RequestId) -> Result<ChargingRequest> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM charging_requests WHERE id = ?1"),
                params![id.to_string()],
                row_to_request,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List a requester's own requests, newest first, optionally filtered
    /// by status.
    pub fn list_requests_by_requester(
        &self,
        requester_id: UserId,
        filter: &RequestFilter,
    ) -> Result<Page<ChargingRequest>> {
        let (page, limit, offset) = page_bounds(filter.page, filter.limit);
        let requester = requester_id.to_string();

        let (items, total) = match filter.status {
            Some(status) => {
                let items = self.query_requests(
                    &format!(
                        "SELECT {COLUMNS} FROM charging_requests
                         WHERE requester_id = ?1 AND status = ?2
                         ORDER BY created_at DESC
                         LIMIT ?3 OFFSET ?4"
                    ),
                    params![requester, status.as_str(), limit, offset],
                )?;
                let total = self.conn().query_row(
                    "SELECT COUNT(*) FROM charging_requests
                     WHERE requester_id = ?1 AND status = ?2",
                    params![requester, status.as_str()],
                    |row| row.get(0),
                )?;
                (items, total)
            }
            None => {
                let items = self.query_requests(
                    &format!(
                        "SELECT {COLUMNS} FROM charging_requests
                         WHERE requester_id = ?1
                         ORDER BY created_at DESC
                         LIMIT ?2 OFFSET ?3"
                    ),
                    params![requester, limit, offset],
                )?;
                let total = self.conn().query_row(
                    "SELECT COUNT(*) FROM charging_requests WHERE requester_id = ?1",
                    params![requester],
                    |row| row.get(0),
                )?;
                (items, total)
            }
        };

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// List `OPEN` requests in a city, newest first.  Matching is on the
    /// normalized city key, so spellings that share a room share a listing.
    pub fn list_open_requests_in_city(
        &self,
        city: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<ChargingRequest>> {
        let key = room_key(city);
        let (page, limit, offset) = page_bounds(page, limit);

        let items = self.query_requests(
            &format!(
                "SELECT {COLUMNS} FROM charging_requests
                 WHERE city_key = ?1 AND status = 'OPEN'
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ),
            params![key, limit, offset],
        )?;
        let total = self.conn().query_row(
            "SELECT COUNT(*) FROM charging_requests WHERE city_key = ?1 AND status = 'OPEN'",
            params![key],
            |row| row.get(0),
        )?;

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// Apply `change` if and only if the stored status equals `expected` at
    /// the moment of the update, as one indivisible operation.
    ///
    /// Fails with [`StoreError::PreconditionFailed`] (and changes nothing)
    /// when the precondition does not hold; callers re-fetch to classify
    /// the reason.  Among N concurrent calls on the same record with the
    /// same precondition, exactly one succeeds.
    pub fn conditional_transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        change: StatusChange,
    ) -> Result<ChargingRequest> {
        let affected = match change {
            StatusChange::Accept { helper_id, at } => self.conn().execute(
                "UPDATE charging_requests
                 SET helper_id = ?3, status = 'ACCEPTED', accepted_at = ?4
                 WHERE id = ?1 AND status = ?2 AND requester_id <> ?3",
                params![
                    id.to_string(),
                    expected.as_str(),
                    helper_id.to_string(),
                    at.to_rfc3339(),
                ],
            )?,
            StatusChange::Complete { at } => self.conn().execute(
                "UPDATE charging_requests
                 SET status = 'COMPLETED', completed_at = ?3
                 WHERE id = ?1 AND status = ?2",
                params![id.to_string(), expected.as_str(), at.to_rfc3339()],
            )?,
            StatusChange::Cancel { at } => self.conn().execute(
                "UPDATE charging_requests
                 SET status = 'CANCELED', canceled_at = ?3
                 WHERE id = ?1 AND status = ?2",
                params![id.to_string(), expected.as_str(), at.to_rfc3339()],
            )?,
        };

        if affected == 0 {
            return Err(StoreError::PreconditionFailed);
        }

        self.get_request(id)
    }

    fn query_requests(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ChargingRequest>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const COLUMNS: &str = "id, requester_id, helper_id, city, city_key, status, location, urgency, \
                       message, phone_number, estimated_time, token_cost, created_at, \
                       accepted_at, completed_at, canceled_at";

/// Clamp paging inputs to sane bounds (page >= 1, 1 <= limit <= 100).
/// The offset is widened to i64 before multiplying; client-supplied page
/// numbers near `u32::MAX` must not overflow.
fn page_bounds(page: u32, limit: u32) -> (u32, u32, i64) {
    let page = page.max(1);
    let limit = limit.clamp(1, evhelper_shared::constants::MAX_PAGE_SIZE);
    let offset = (i64::from(page) - 1) * i64::from(limit);
    (page, limit, offset)
}

/// Map a `rusqlite::Row` to a [`ChargingRequest`].
fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChargingRequest> {
    fn conv<E: std::error::Error + Send + Sync + 'static>(
        idx: usize,
    ) -> impl FnOnce(E) -> rusqlite::Error {
        move |e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }
    }

    fn parse_ts(s: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(conv(idx))
    }

    let id: RequestId = row.get::<_, String>(0)?.parse().map_err(conv(0))?;
    let requester_id: UserId = row.get::<_, String>(1)?.parse().map_err(conv(1))?;
    let helper_id = row
        .get::<_, Option<String>>(2)?
        .map(|s| s.parse::<UserId>())
        .transpose()
        .map_err(conv(2))?;
    let city: String = row.get(3)?;
    let city_key: String = row.get(4)?;
    let status: RequestStatus = row.get::<_, String>(5)?.parse().map_err(conv(5))?;
    let location: String = row.get(6)?;
    let urgency: Urgency = row.get::<_, String>(7)?.parse().map_err(conv(7))?;
    let message: String = row.get(8)?;
    let phone_number: String = row.get(9)?;
    let estimated_time: Option<u32> = row.get(10)?;
    let token_cost: i64 = row.get(11)?;
    let created_at = parse_ts(row.get(12)?, 12)?;
    let accepted_at = row
        .get::<_, Option<String>>(13)?
        .map(|s| parse_ts(s, 13))
        .transpose()?;
    let completed_at = row
        .get::<_, Option<String>>(14)?
        .map(|s| parse_ts(s, 14))
        .transpose()?;
    let canceled_at = row
        .get::<_, Option<String>>(15)?
        .map(|s| parse_ts(s, 15))
        .transpose()?;

    Ok(ChargingRequest {
        id,
        requester_id,
        helper_id,
        city,
        city_key,
        status,
        location,
        urgency,
        message,
        phone_number,
        estimated_time,
        token_cost,
        created_at,
        accepted_at,
        completed_at,
        canceled_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use evhelper_shared::constants::TOKEN_COST;

    fn seed_user(db: &Database, city: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            name: "Request Tester".into(),
            email: format!("{}@example.com", UserId::new()),
            city: city.into(),
            token_balance: 10,
            created_at: Utc::now(),
        };
        db.create_user(&user).unwrap();
        user.id
    }

    fn open_request(requester: UserId, city: &str) -> ChargingRequest {
        ChargingRequest {
            id: RequestId::new(),
            requester_id: requester,
            helper_id: None,
            city: city.into(),
            city_key: room_key(city),
            status: RequestStatus::Open,
            location: "123 Main St".into(),
            urgency: Urgency::Medium,
            message: String::new(),
            phone_number: "555-0100".into(),
            estimated_time: Some(30),
            token_cost: TOKEN_COST,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            canceled_at: None,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let request = open_request(requester, "Austin");
        db.insert_request(&request).unwrap();

        let got = db.get_request(request.id).unwrap();
        assert_eq!(got, request);
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_request(RequestId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn accept_transition_assigns_helper_once() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let helper = seed_user(&db, "Austin");
        let request = open_request(requester, "Austin");
        db.insert_request(&request).unwrap();

        let updated = db
            .conditional_transition(
                request.id,
                RequestStatus::Open,
                StatusChange::Accept {
                    helper_id: helper,
                    at: Utc::now(),
                },
            )
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Accepted);
        assert_eq!(updated.helper_id, Some(helper));
        assert!(updated.accepted_at.is_some());

        // Second accept loses the precondition.
        let other = seed_user(&db, "Austin");
        let err = db
            .conditional_transition(
                request.id,
                RequestStatus::Open,
                StatusChange::Accept {
                    helper_id: other,
                    at: Utc::now(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed));

        // The original helper assignment is untouched.
        assert_eq!(db.get_request(request.id).unwrap().helper_id, Some(helper));
    }

    #[test]
    fn accept_refuses_own_request() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let request = open_request(requester, "Austin");
        db.insert_request(&request).unwrap();

        let err = db
            .conditional_transition(
                request.id,
                RequestStatus::Open,
                StatusChange::Accept {
                    helper_id: requester,
                    at: Utc::now(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed));
        assert_eq!(db.get_request(request.id).unwrap().status, RequestStatus::Open);
    }

    #[test]
    fn complete_requires_accepted_status() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let request = open_request(requester, "Austin");
        db.insert_request(&request).unwrap();

        let err = db
            .conditional_transition(
                request.id,
                RequestStatus::Accepted,
                StatusChange::Complete { at: Utc::now() },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed));
    }

    #[test]
    fn cancel_from_open_stamps_canceled_at() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let request = open_request(requester, "Austin");
        db.insert_request(&request).unwrap();

        let updated = db
            .conditional_transition(
                request.id,
                RequestStatus::Open,
                StatusChange::Cancel { at: Utc::now() },
            )
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Canceled);
        assert!(updated.canceled_at.is_some());
        assert!(updated.completed_at.is_none());
    }

    #[test]
    fn list_by_requester_filters_and_pages() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let other = seed_user(&db, "Austin");

        for _ in 0..3 {
            db.insert_request(&open_request(requester, "Austin")).unwrap();
        }
        db.insert_request(&open_request(other, "Austin")).unwrap();

        let mine = db
            .list_requests_by_requester(requester, &RequestFilter::default())
            .unwrap();
        assert_eq!(mine.total, 3);
        assert!(mine.items.iter().all(|r| r.requester_id == requester));

        let canceled = db
            .list_requests_by_requester(
                requester,
                &RequestFilter {
                    status: Some(RequestStatus::Canceled),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(canceled.total, 0);

        let first_page = db
            .list_requests_by_requester(
                requester,
                &RequestFilter {
                    status: None,
                    page: 1,
                    limit: 2,
                },
            )
            .unwrap();
        assert_eq!(first_page.items.len(), 2);
        assert_eq!(first_page.total, 3);
    }

    #[test]
    fn paging_survives_extreme_page_numbers() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        db.insert_request(&open_request(requester, "Austin")).unwrap();

        let mine = db
            .list_requests_by_requester(
                requester,
                &RequestFilter {
                    status: None,
                    page: u32::MAX,
                    limit: 100,
                },
            )
            .unwrap();
        assert!(mine.items.is_empty());
        assert_eq!(mine.total, 1);

        let city = db
            .list_open_requests_in_city("Austin", u32::MAX, u32::MAX)
            .unwrap();
        assert!(city.items.is_empty());
        assert_eq!(city.total, 1);
        assert_eq!(city.limit, evhelper_shared::constants::MAX_PAGE_SIZE);
    }

    #[test]
    fn city_listing_matches_normalized_spellings() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "New York");
        db.insert_request(&open_request(requester, "New York")).unwrap();

        let listed = db.list_open_requests_in_city("  new  york ", 1, 10).unwrap();
        assert_eq!(listed.total, 1);

        let elsewhere = db.list_open_requests_in_city("Boston", 1, 10).unwrap();
        assert_eq!(elsewhere.total, 0);
    }

    #[test]
    fn city_listing_excludes_non_open() {
        let db = Database::open_in_memory().unwrap();
        let requester = seed_user(&db, "Austin");
        let helper = seed_user(&db, "Austin");

        let taken = open_request(requester, "Austin");
        db.insert_request(&taken).unwrap();
        db.conditional_transition(
            taken.id,
            RequestStatus::Open,
            StatusChange::Accept {
                helper_id: helper,
                at: Utc::now(),
            },
        )
        .unwrap();

        let open = open_request(requester, "Austin");
        db.insert_request(&open).unwrap();

        let listed = db.list_open_requests_in_city("Austin", 1, 10).unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].id, open.id);
    }
}
