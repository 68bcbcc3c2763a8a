//! The request lifecycle engine.
//!
//! Orchestrates creation, acceptance, completion, and cancellation of
//! charging requests, composing the request store and the token ledger into
//! one logical transaction per operation and emitting the resulting events
//! through the [`CityRouter`].
//!
//! The two entities (request record, user balance) are each internally
//! atomic, so cross-entity atomicity uses the compensating-action protocol:
//! apply the ledger change, attempt the conditional status transition, and
//! undo the ledger change if the transition loses a race.  A precondition
//! failure is never retried here; it is classified and surfaced to the
//! caller as a specific outcome.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use evhelper_shared::constants::TOKEN_COST;
use evhelper_shared::events::{
    AcceptConfirmed, RequestAccepted, RequestCanceled, RequestCompleted, RequestCreated,
    RequestNotice, RequestTaken, ServerEvent,
};
use evhelper_shared::rooms::room_key;
use evhelper_shared::types::{RequestId, RequestStatus, TokenEntryKind, Urgency, UserId};
use evhelper_store::{ChargingRequest, Database, Page, RequestFilter, StatusChange, StoreError};

use crate::rooms::CityRouter;

/// Typed outcomes for every rejected lifecycle operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing input; the caller's fault, never retried.
    #[error("{0}")]
    Validation(String),

    /// The requester cannot afford the request.  Nothing was mutated.
    #[error("Insufficient tokens: you have {balance}, but {required} are required")]
    InsufficientFunds { balance: i64, required: i64 },

    /// Another helper won the race for this request.
    #[error("Request already accepted by someone else")]
    AlreadyTaken,

    /// A requester tried to accept their own request.
    #[error("Cannot accept your own request")]
    SelfAccept,

    #[error("Charging request not found")]
    NotFound,

    /// The caller is neither the requester nor the assigned helper.
    #[error("Not authorized for this request")]
    NotAuthorized,

    /// The request is not in a status that allows this operation.
    #[error("Cannot perform this operation on a {0} request")]
    WrongStatus(RequestStatus),

    /// Durable-store fault; fatal for the current call.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound,
            StoreError::InsufficientFunds { balance, required } => {
                EngineError::InsufficientFunds { balance, required }
            }
            other => EngineError::Store(other),
        }
    }
}

type Result<T> = std::result::Result<T, EngineError>;

/// Creation payload, as received from the outside.  Urgency arrives as raw
/// text so the engine owns the fixed-set validation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateRequest {
    pub location: String,
    pub urgency: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<u32>,
}

/// A freshly created request together with the requester's new balance.
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub request: ChargingRequest,
    pub remaining_tokens: i64,
}

/// The lifecycle engine.  Cheap to share; all state lives in the store and
/// the router.
pub struct LifecycleEngine {
    db: Arc<Mutex<Database>>,
    router: CityRouter,
}

impl LifecycleEngine {
    pub fn new(db: Arc<Mutex<Database>>, router: CityRouter) -> Self {
        Self { db, router }
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Validate, debit the requester, insert the request, and broadcast
    /// `request.created` to the requester's city room.
    pub async fn create_request(
        &self,
        requester_id: UserId,
        payload: CreateRequest,
    ) -> Result<CreatedRequest> {
        let location = payload.location.trim().to_string();
        if location.is_empty() {
            return Err(EngineError::Validation(
                "Location and urgency are required fields".into(),
            ));
        }
        let urgency: Urgency = payload
            .urgency
            .trim()
            .parse()
            .map_err(|_| EngineError::Validation(
                "Invalid urgency level. Must be: low, medium, or high".into(),
            ))?;
        if payload.estimated_time == Some(0) {
            return Err(EngineError::Validation(
                "Estimated time must be a positive number of minutes".into(),
            ));
        }

        let requester = {
            let db = self.db.lock().await;
            db.get_user(requester_id)?
        };
        if requester.city.trim().is_empty() {
            return Err(EngineError::Validation(
                "Your profile has no city; matching is city-scoped".into(),
            ));
        }

        let request = ChargingRequest {
            id: RequestId::new(),
            requester_id,
            helper_id: None,
            city: requester.city.clone(),
            city_key: room_key(&requester.city),
            status: RequestStatus::Open,
            location,
            urgency,
            message: payload.message.map(|m| m.trim().to_string()).unwrap_or_default(),
            phone_number: payload
                .phone_number
                .map(|p| p.trim().to_string())
                .unwrap_or_default(),
            estimated_time: payload.estimated_time,
            token_cost: TOKEN_COST,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
            canceled_at: None,
        };

        // Ledger first, then insert; the debit is compensated if the insert
        // fails, so tokens are never spent on a request that does not exist.
        let remaining_tokens = {
            let mut db = self.db.lock().await;
            let remaining = db.debit(
                requester_id,
                TOKEN_COST,
                TokenEntryKind::RequestDebit,
                "Created charging request",
                Some(request.id),
            )?;

            if let Err(e) = db.insert_request(&request) {
                warn!(request = %request.id, error = %e, "insert failed, reversing debit");
                if let Err(undo) = db.credit(
                    requester_id,
                    TOKEN_COST,
                    TokenEntryKind::RequestDebit,
                    "Reversal: request creation failed",
                    Some(request.id),
                ) {
                    error!(
                        request = %request.id,
                        user = %requester_id,
                        error = %undo,
                        "failed to reverse creation debit"
                    );
                }
                return Err(e.into());
            }
            remaining
        };

        info!(
            request = %request.id,
            requester = %requester_id,
            city = %request.city_key,
            "charging request created"
        );

        self.router
            .broadcast(
                &request.city_key,
                &ServerEvent::RequestCreated(RequestCreated {
                    request_id: request.id,
                    requester_id,
                    requester_name: requester.name,
                    city: request.city.clone(),
                    location: request.location.clone(),
                    urgency: request.urgency,
                    message: request.message.clone(),
                    phone_number: request.phone_number.clone(),
                    estimated_time: request.estimated_time,
                    token_cost: request.token_cost,
                    created_at: request.created_at,
                }),
            )
            .await;

        Ok(CreatedRequest {
            request,
            remaining_tokens,
        })
    }

    // ------------------------------------------------------------------
    // Accept
    // ------------------------------------------------------------------

    /// Race-protected `OPEN -> ACCEPTED`.  Among concurrent accepts on the
    /// same request exactly one succeeds; losers get a distinct reason.
    pub async fn accept_request(
        &self,
        request_id: RequestId,
        helper_id: UserId,
    ) -> Result<ChargingRequest> {
        let transition = {
            let db = self.db.lock().await;
            db.conditional_transition(
                request_id,
                RequestStatus::Open,
                StatusChange::Accept {
                    helper_id,
                    at: Utc::now(),
                },
            )
        };

        let request = match transition {
            Ok(request) => request,
            Err(StoreError::PreconditionFailed) => {
                // Re-fetch to report a specific reason.
                let db = self.db.lock().await;
                return match db.get_request(request_id) {
                    Err(StoreError::NotFound) => Err(EngineError::NotFound),
                    Err(e) => Err(e.into()),
                    Ok(current) if current.requester_id == helper_id => {
                        Err(EngineError::SelfAccept)
                    }
                    Ok(_) => Err(EngineError::AlreadyTaken),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let (requester, helper) = {
            let db = self.db.lock().await;
            (db.get_user(request.requester_id)?, db.get_user(helper_id)?)
        };

        info!(
            request = %request_id,
            helper = %helper_id,
            requester = %request.requester_id,
            "charging request accepted"
        );

        // accepted_at was just stamped by the transition.
        let accepted_at = request.accepted_at.unwrap_or(request.created_at);

        self.router
            .send_to_user(
                request.requester_id,
                &ServerEvent::RequestAccepted(RequestAccepted {
                    request_id,
                    helper_id,
                    helper_name: helper.name.clone(),
                    status: request.status,
                    accepted_at,
                }),
            )
            .await;

        self.router
            .send_to_user(
                helper_id,
                &ServerEvent::AcceptConfirmed(AcceptConfirmed {
                    request_id,
                    requester_id: request.requester_id,
                    requester_name: requester.name,
                    city: request.city.clone(),
                    location: request.location.clone(),
                    phone_number: request.phone_number.clone(),
                    status: request.status,
                    accepted_at,
                }),
            )
            .await;

        self.router
            .broadcast(
                &request.city_key,
                &ServerEvent::RequestTaken(RequestTaken {
                    request_id,
                    status: request.status,
                    accepted_at,
                }),
            )
            .await;

        Ok(request)
    }

    // ------------------------------------------------------------------
    // Complete
    // ------------------------------------------------------------------

    /// `ACCEPTED -> COMPLETED` by the requester or the assigned helper.
    /// Credits the helper and records the payment on the requester side;
    /// both are reversed if a concurrent cancellation wins the transition.
    pub async fn complete_request(
        &self,
        request_id: RequestId,
        caller_id: UserId,
    ) -> Result<ChargingRequest> {
        let current = {
            let db = self.db.lock().await;
            db.get_request(request_id)?
        };

        let is_party =
            caller_id == current.requester_id || current.helper_id == Some(caller_id);
        if !is_party {
            return Err(EngineError::NotAuthorized);
        }
        if current.status != RequestStatus::Accepted {
            return Err(EngineError::WrongStatus(current.status));
        }
        let Some(helper_id) = current.helper_id else {
            // Accepted requests always carry a helper; treat a violation as
            // a store fault rather than guessing.
            return Err(EngineError::Store(StoreError::PreconditionFailed));
        };

        let (requester, helper) = {
            let db = self.db.lock().await;
            (db.get_user(current.requester_id)?, db.get_user(helper_id)?)
        };

        // Ledger first (reward + audit record), then the transition; undo
        // both ledger writes if the transition loses to a concurrent cancel.
        let helper_balance = {
            let mut db = self.db.lock().await;
            db.credit(
                helper_id,
                current.token_cost,
                TokenEntryKind::Reward,
                &format!("Completed charging request for {}", requester.name),
                Some(request_id),
            )?
        };
        {
            let mut db = self.db.lock().await;
            if let Err(e) = db.record_payment(
                current.requester_id,
                -current.token_cost,
                &format!("Payment to {} for charging service", helper.name),
                Some(request_id),
            ) {
                self.reverse_completion(&current, helper_id, false).await;
                return Err(e.into());
            }
        }

        let transition = {
            let db = self.db.lock().await;
            db.conditional_transition(
                request_id,
                RequestStatus::Accepted,
                StatusChange::Complete { at: Utc::now() },
            )
        };

        let request = match transition {
            Ok(request) => request,
            Err(StoreError::PreconditionFailed) => {
                self.reverse_completion(&current, helper_id, true).await;
                let db = self.db.lock().await;
                return match db.get_request(request_id) {
                    Err(StoreError::NotFound) => Err(EngineError::NotFound),
                    Err(e) => Err(e.into()),
                    Ok(now) => Err(EngineError::WrongStatus(now.status)),
                };
            }
            Err(e) => {
                self.reverse_completion(&current, helper_id, true).await;
                return Err(e.into());
            }
        };

        info!(
            request = %request_id,
            requester = %current.requester_id,
            helper = %helper_id,
            amount = current.token_cost,
            "charging request completed, tokens transferred"
        );

        let completed_at = request.completed_at.unwrap_or(request.created_at);

        self.router
            .send_to_user(
                current.requester_id,
                &ServerEvent::RequestCompleted(RequestCompleted {
                    request_id,
                    counterparty_id: helper_id,
                    counterparty_name: helper.name.clone(),
                    status: request.status,
                    completed_at,
                    token_amount: current.token_cost,
                    new_balance: requester.token_balance,
                }),
            )
            .await;

        self.router
            .send_to_user(
                helper_id,
                &ServerEvent::RequestCompleted(RequestCompleted {
                    request_id,
                    counterparty_id: current.requester_id,
                    counterparty_name: requester.name.clone(),
                    status: request.status,
                    completed_at,
                    token_amount: current.token_cost,
                    new_balance: helper_balance,
                }),
            )
            .await;

        self.router
            .broadcast(
                &request.city_key,
                &ServerEvent::RequestCompletedNotice(RequestNotice {
                    request_id,
                    city: request.city.clone(),
                    status: request.status,
                    timestamp: completed_at,
                }),
            )
            .await;

        Ok(request)
    }

    /// Undo the ledger effects of a completion whose transition failed.
    async fn reverse_completion(
        &self,
        request: &ChargingRequest,
        helper_id: UserId,
        undo_payment_record: bool,
    ) {
        let mut db = self.db.lock().await;
        if let Err(e) = db.debit(
            helper_id,
            request.token_cost,
            TokenEntryKind::Reward,
            "Reversal: completion lost to a concurrent transition",
            Some(request.id),
        ) {
            error!(
                request = %request.id,
                helper = %helper_id,
                error = %e,
                "failed to reverse completion reward"
            );
        }
        if undo_payment_record {
            if let Err(e) = db.record_payment(
                request.requester_id,
                request.token_cost,
                "Reversal: completion lost to a concurrent transition",
                Some(request.id),
            ) {
                error!(
                    request = %request.id,
                    requester = %request.requester_id,
                    error = %e,
                    "failed to reverse payment record"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------

    /// `OPEN|ACCEPTED -> CANCELED` by the requester only.  Refunds the
    /// creation debit; the refund is reversed if the transition loses a
    /// race (e.g. the helper completed first).
    pub async fn cancel_request(
        &self,
        request_id: RequestId,
        caller_id: UserId,
    ) -> Result<ChargingRequest> {
        let current = {
            let db = self.db.lock().await;
            db.get_request(request_id)?
        };

        if caller_id != current.requester_id {
            return Err(EngineError::NotAuthorized);
        }
        if current.status.is_terminal() {
            return Err(EngineError::WrongStatus(current.status));
        }

        let new_balance = {
            let mut db = self.db.lock().await;
            db.credit(
                current.requester_id,
                current.token_cost,
                TokenEntryKind::Refund,
                "Refunded canceled charging request",
                Some(request_id),
            )?
        };

        let transition = {
            let db = self.db.lock().await;
            db.conditional_transition(
                request_id,
                current.status,
                StatusChange::Cancel { at: Utc::now() },
            )
        };

        let request = match transition {
            Ok(request) => request,
            Err(StoreError::PreconditionFailed) => {
                self.reverse_refund(&current).await;
                let db = self.db.lock().await;
                return match db.get_request(request_id) {
                    Err(StoreError::NotFound) => Err(EngineError::NotFound),
                    Err(e) => Err(e.into()),
                    Ok(now) => Err(EngineError::WrongStatus(now.status)),
                };
            }
            Err(e) => {
                self.reverse_refund(&current).await;
                return Err(e.into());
            }
        };

        info!(
            request = %request_id,
            requester = %current.requester_id,
            "charging request canceled, tokens refunded"
        );

        let canceled_at = request.canceled_at.unwrap_or(request.created_at);

        self.router
            .send_to_user(
                current.requester_id,
                &ServerEvent::RequestCanceled(RequestCanceled {
                    request_id,
                    status: request.status,
                    canceled_at,
                    token_amount: current.token_cost,
                    new_balance: Some(new_balance),
                }),
            )
            .await;

        if let Some(helper_id) = request.helper_id {
            self.router
                .send_to_user(
                    helper_id,
                    &ServerEvent::RequestCanceled(RequestCanceled {
                        request_id,
                        status: request.status,
                        canceled_at,
                        token_amount: current.token_cost,
                        new_balance: None,
                    }),
                )
                .await;
        }

        self.router
            .broadcast(
                &request.city_key,
                &ServerEvent::RequestCanceledNotice(RequestNotice {
                    request_id,
                    city: request.city.clone(),
                    status: request.status,
                    timestamp: canceled_at,
                }),
            )
            .await;

        Ok(request)
    }

    /// Undo a refund whose cancellation transition failed.
    async fn reverse_refund(&self, request: &ChargingRequest) {
        let mut db = self.db.lock().await;
        if let Err(e) = db.debit(
            request.requester_id,
            request.token_cost,
            TokenEntryKind::Refund,
            "Reversal: cancellation lost to a concurrent transition",
            Some(request.id),
        ) {
            error!(
                request = %request.id,
                requester = %request.requester_id,
                error = %e,
                "failed to reverse cancellation refund"
            );
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// A requester's own requests, newest first.
    pub async fn list_mine(
        &self,
        requester_id: UserId,
        filter: RequestFilter,
    ) -> Result<Page<ChargingRequest>> {
        let db = self.db.lock().await;
        Ok(db.list_requests_by_requester(requester_id, &filter)?)
    }

    /// Open requests in a city, newest first.
    pub async fn list_open_in_city(
        &self,
        city: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<ChargingRequest>> {
        let db = self.db.lock().await;
        Ok(db.list_open_requests_in_city(city, page, limit)?)
    }

    /// Shared access to the store for adjacent layers (auth, profile reads).
    pub fn db(&self) -> &Arc<Mutex<Database>> {
        &self.db
    }

    /// The fanout router this engine emits through.
    pub fn router(&self) -> &CityRouter {
        &self.router
    }
}
