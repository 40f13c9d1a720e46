//! Bet/Cashout API (C7): the external request surface and the WebSocket
//! event fan-out endpoint.
//!
//! Grounded on the teacher's REST+WebSocket split (`axum` with `ws`
//! features, `tower-http` tracing/CORS layers) — only the payload shapes
//! differ. Every mutating endpoint is idempotent on a caller-supplied
//! `client_id`, matching [`crate::ledger::Ledger`] and
//! [`crate::engine::RoundEngine`]'s own idempotency keys.
//!
//! There is no session authentication layer: per the data model, the
//! canonical account key is always the wallet address supplied in the
//! request body, never a session or socket id. Verifying that the caller
//! actually controls that address (a signed request, a JWT, ...) is outside
//! this crate's scope and is left to a reverse proxy or a future layer.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::engine::{CashoutAccepted, PlacementOutcome, RoundEngine};
use crate::error::{ApiError, AppError, DomainError};
use crate::ledger::Ledger;
use crate::ports::{BetStore, Cache, ChainClient, Clock, EventBus, LedgerStore, RoundStore};
use crate::rng;
use crate::types::entities::Round;
use crate::types::enums::RoundPhase;
use crate::types::events::{EventEnvelope, GameEvent};
use crate::types::primitives::{ClientId, EthAddress, Ppm, Wei};

/// A withdrawal approved by the ledger, handed off to the payout dispatcher.
/// `payout.rs` owns the receiving end of the channel this is sent over.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    /// Recipient wallet address.
    pub user_id: EthAddress,
    /// Amount to transfer, in wei.
    pub amount: Wei,
    /// The withdrawal's idempotency key, threaded through so a retried
    /// on-chain submission can be matched back to the originating request.
    pub client_id: ClientId,
}

/// Multiplier bounds accepted for `auto_cashout_ppm` and `verify_round`,
/// per the input-validation rules in the external interface.
const MIN_MULTIPLIER: f64 = 1.01;
const MAX_MULTIPLIER: f64 = 1000.00;

/// Shared application state behind every handler, constructed once in
/// `main.rs` and cheaply cloned (every field is an `Arc` or a pool handle).
pub struct AppState<RS, BS, LS, LC, CC, EB, CL> {
    pub engine: Arc<RoundEngine<RS, BS, LS, LC, CC, EB, CL>>,
    pub ledger: Arc<Ledger<LS, LC>>,
    pub round_store: RS,
    pub events: Arc<EB>,
    pub payouts: mpsc::Sender<PayoutRequest>,
    pub house_edge_divisor: u64,
    pub max_crash: f64,
    /// Same handle as [`crate::ledger::Ledger`]'s own cache; reused here only
    /// for the per-wallet rate limiter, keyed independently of the account
    /// cache entries.
    pub cache: LC,
    pub rate_limit_burst: u32,
}

impl<RS, BS, LS, LC, CC, EB, CL> Clone for AppState<RS, BS, LS, LC, CC, EB, CL>
where
    RS: Clone,
    LC: Clone,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            ledger: Arc::clone(&self.ledger),
            round_store: self.round_store.clone(),
            events: Arc::clone(&self.events),
            payouts: self.payouts.clone(),
            house_edge_divisor: self.house_edge_divisor,
            max_crash: self.max_crash,
            cache: self.cache.clone(),
            rate_limit_burst: self.rate_limit_burst,
        }
    }
}

/// Reject the request with [`ApiError::RateLimited`] once a wallet exceeds
/// `state.rate_limit_burst` mutating calls within a one-second window.
fn enforce_rate_limit<LC: Cache>(cache: &LC, user_id: EthAddress, endpoint: &str, limit: u32) -> Result<(), ApiError> {
    let key = format!("{endpoint}:{user_id}");
    if cache.check_rate_limit(&key, limit, 1) {
        Ok(())
    } else {
        Err(ApiError::RateLimited { retry_after_secs: 1 })
    }
}

/// Build the router. Generic over every port so integration tests can wire
/// mocks in place of the production `Postgres`/`RpcChainClient`/`EventFanout`
/// stack.
pub fn router<RS, BS, LS, LC, CC, EB, CL>(state: AppState<RS, BS, LS, LC, CC, EB, CL>) -> Router
where
    RS: RoundStore + Clone + 'static,
    BS: BetStore + 'static,
    LS: LedgerStore + 'static,
    LC: Cache + 'static,
    CC: ChainClient + 'static,
    EB: EventBus + 'static,
    CL: Clock + 'static,
{
    Router::new()
        .route("/bets", post(place_bet))
        .route("/cashout", post(cash_out))
        .route("/game-state", get(get_game_state))
        .route("/verify-round", post(verify_round))
        .route("/withdrawals", post(withdraw))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLACE BET
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub user: String,
    pub stake: String,
    #[serde(default)]
    pub auto_cashout_ppm: Option<u64>,
    pub client_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PlaceBetResponse {
    Immediate { round_id: u64 },
    Queued { round_id: u64 },
}

async fn place_bet<RS, BS, LS, LC, CC, EB, CL>(
    State(state): State<AppState<RS, BS, LS, LC, CC, EB, CL>>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<Json<PlaceBetResponse>, ApiError>
where
    RS: RoundStore,
    BS: BetStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
    CL: Clock,
{
    let user_id = parse_address(&req.user)?;
    let stake = parse_amount(&req.stake)?;
    let client_id = parse_client_id(&req.client_id)?;
    enforce_rate_limit(&state.cache, user_id, "bets", state.rate_limit_burst)?;

    if let Some(ppm) = req.auto_cashout_ppm {
        validate_multiplier_ppm(ppm)?;
    }

    let outcome = state
        .engine
        .place_bet(user_id, stake, req.auto_cashout_ppm, client_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(match outcome {
        PlacementOutcome::Active { round_id } => PlaceBetResponse::Immediate { round_id },
        PlacementOutcome::Queued { round_id } => PlaceBetResponse::Queued { round_id },
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CASH OUT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CashOutRequest {
    pub user: String,
}

#[derive(Debug, Serialize)]
pub struct CashOutResponse {
    pub round_id: u64,
    pub multiplier_ppm: u64,
    pub payout: String,
}

async fn cash_out<RS, BS, LS, LC, CC, EB, CL>(
    State(state): State<AppState<RS, BS, LS, LC, CC, EB, CL>>,
    Json(req): Json<CashOutRequest>,
) -> Result<Json<CashOutResponse>, ApiError>
where
    RS: RoundStore,
    BS: BetStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
    CL: Clock,
{
    let user_id = parse_address(&req.user)?;
    enforce_rate_limit(&state.cache, user_id, "cashouts", state.rate_limit_burst)?;

    let CashoutAccepted { round_id, cashout_ppm, payout } =
        state.engine.cash_out(user_id).await.map_err(ApiError::from)?;

    Ok(Json(CashOutResponse {
        round_id,
        multiplier_ppm: cashout_ppm,
        payout: payout.to_string(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// GAME STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct GameStateResponse {
    pub phase: &'static str,
    pub round_id: u64,
    pub commit_hash: String,
    pub client_seed: String,
    pub crash_history: Vec<u64>,
}

async fn get_game_state<RS, BS, LS, LC, CC, EB, CL>(
    State(state): State<AppState<RS, BS, LS, LC, CC, EB, CL>>,
) -> Result<Json<GameStateResponse>, ApiError>
where
    RS: RoundStore,
    BS: BetStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
    CL: Clock,
{
    let phase = state.engine.current_phase().await;
    let round = state.engine.current_round().await;
    let recent = state.round_store.get_recent_rounds(25).await.map_err(ApiError::from)?;

    Ok(Json(GameStateResponse {
        phase: phase_name(phase),
        round_id: round.id,
        commit_hash: hex::encode(round.commit_hash),
        client_seed: round.client_seed,
        crash_history: recent.iter().map(Round::crash_point).map(|p| p.raw()).collect(),
    }))
}

const fn phase_name(phase: RoundPhase) -> &'static str {
    match phase {
        RoundPhase::CashoutPhase => "cashout_phase",
        RoundPhase::BettingPhase => "betting_phase",
        RoundPhase::RunningPhase => "running_phase",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VERIFY ROUND
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct VerifyRoundRequest {
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    pub expected_crash_ppm: u64,
}

#[derive(Debug, Serialize)]
pub struct VerifyRoundResponse {
    pub valid: bool,
    pub computed_crash_ppm: u64,
}

async fn verify_round<RS, BS, LS, LC, CC, EB, CL>(
    State(state): State<AppState<RS, BS, LS, LC, CC, EB, CL>>,
    Json(req): Json<VerifyRoundRequest>,
) -> Json<VerifyRoundResponse> {
    let result = rng::verify_round(
        &req.server_seed,
        &req.client_seed,
        req.nonce,
        state.house_edge_divisor,
        req.expected_crash_ppm,
        state.max_crash,
    );
    Json(VerifyRoundResponse {
        valid: result.valid,
        computed_crash_ppm: result.computed_crash_ppm,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// WITHDRAW
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub user: String,
    pub amount: String,
    pub client_id: String,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub status: &'static str,
    pub available: String,
}

async fn withdraw<RS, BS, LS, LC, CC, EB, CL>(
    State(state): State<AppState<RS, BS, LS, LC, CC, EB, CL>>,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<WithdrawResponse>, ApiError>
where
    RS: RoundStore,
    BS: BetStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
    CL: Clock,
{
    let user_id = parse_address(&req.user)?;
    enforce_rate_limit(&state.cache, user_id, "withdrawals", state.rate_limit_burst)?;
    let amount = parse_amount(&req.amount)?;
    if amount.is_zero() {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }
    let client_id = parse_client_id(&req.client_id)?;

    let account = state
        .ledger
        .withdraw(user_id, amount, &client_id)
        .await
        .map_err(ApiError::from)?;

    let request = PayoutRequest { user_id, amount, client_id };
    if state.payouts.send(request).await.is_err() {
        warn!(user = %user_id, "payout dispatcher queue closed, withdrawal debited but not yet paid out");
    }

    Ok(Json(WithdrawResponse {
        status: "pending",
        available: account.available.to_string(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBSOCKET EVENT STREAM
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// The wallet address whose private events (`balance_update`,
    /// `bet_accepted`, `cashout_success`, ...) should also be delivered on
    /// this socket, alongside the public broadcast stream.
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Hello { last_event_id: Option<u64> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Event(&'a EventEnvelope),
    Snapshot {
        phase: &'static str,
        round_id: u64,
        commit_hash: String,
        client_seed: String,
        crash_history: Vec<u64>,
        last_event_id: u64,
    },
}

async fn ws_handler<RS, BS, LS, LC, CC, EB, CL>(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState<RS, BS, LS, LC, CC, EB, CL>>,
) -> impl IntoResponse
where
    RS: RoundStore + Clone + 'static,
    BS: BetStore + 'static,
    LS: LedgerStore + 'static,
    LC: Cache + 'static,
    CC: ChainClient + 'static,
    EB: EventBus + 'static,
    CL: Clock + 'static,
{
    let user_filter = query.user.and_then(|raw| EthAddress::from_hex(&raw).ok());
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_filter))
}

async fn handle_socket<RS, BS, LS, LC, CC, EB, CL>(
    mut socket: WebSocket,
    state: AppState<RS, BS, LS, LC, CC, EB, CL>,
    user_filter: Option<EthAddress>,
) where
    RS: RoundStore,
    BS: BetStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
    CL: Clock,
{
    let mut receiver = state.events.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Hello { last_event_id }) => {
                                if let Err(err) = handle_hello(&mut socket, &state, last_event_id).await {
                                    debug!(error = %err, "failed to send hello response, closing socket");
                                    break;
                                }
                            }
                            Err(err) => debug!(error = %err, "ignoring malformed client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error, closing socket");
                        break;
                    }
                }
            }
            event = receiver.recv() => {
                match event {
                    Ok(envelope) => {
                        if envelope.event.is_private() && !is_for(&envelope.event, user_filter) {
                            continue;
                        }
                        if send_envelope(&mut socket, &envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket session lagged behind the event bus, forcing resync");
                        if handle_hello(&mut socket, &state, None).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Whether a private event belongs to the session's filtered user.
fn is_for(event: &GameEvent, user_filter: Option<EthAddress>) -> bool {
    let Some(filter) = user_filter else { return false };
    match event {
        GameEvent::BalanceUpdate(e) => e.user_id == filter,
        GameEvent::BetAccepted(e) => e.user_id == filter,
        GameEvent::BetRejected(e) => e.user_id == filter,
        GameEvent::CashoutSuccess(e) => e.user_id == filter,
        GameEvent::CashoutError(e) => e.user_id == filter,
        GameEvent::PayoutSuccess(e) => e.user_id == filter,
        GameEvent::PayoutFailed(e) => e.user_id == filter,
        _ => false,
    }
}

async fn handle_hello<RS, BS, LS, LC, CC, EB, CL>(
    socket: &mut WebSocket,
    state: &AppState<RS, BS, LS, LC, CC, EB, CL>,
    last_event_id: Option<u64>,
) -> Result<(), axum::Error>
where
    RS: RoundStore,
    BS: BetStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
    CL: Clock,
{
    let replay = last_event_id.and_then(|id| state.events.resume_since(id));

    match replay {
        Some(events) => {
            for envelope in &events {
                send_envelope(socket, envelope).await?;
            }
            Ok(())
        }
        None => {
            let phase = state.engine.current_phase().await;
            let round = state.engine.current_round().await;
            let recent = state.round_store.get_recent_rounds(25).await.unwrap_or_default();

            let snapshot = ServerMessage::Snapshot {
                phase: phase_name(phase),
                round_id: round.id,
                commit_hash: hex::encode(round.commit_hash),
                client_seed: round.client_seed,
                crash_history: recent.iter().map(Round::crash_point).map(|p| p.raw()).collect(),
                last_event_id: state.events.current_seq(),
            };
            let payload = serde_json::to_string(&snapshot).unwrap_or_default();
            socket.send(Message::Text(payload.into())).await
        }
    }
}

async fn send_envelope(socket: &mut WebSocket, envelope: &EventEnvelope) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(&ServerMessage::Event(envelope)).unwrap_or_default();
    socket.send(Message::Text(payload.into())).await
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_address(raw: &str) -> Result<EthAddress, ApiError> {
    EthAddress::from_hex(raw).map_err(|err| ApiError::BadRequest(format!("invalid address: {err}")))
}

fn parse_amount(raw: &str) -> Result<Wei, ApiError> {
    Wei::parse(raw).map_err(|err| ApiError::BadRequest(format!("invalid amount: {err}")))
}

fn parse_client_id(raw: &str) -> Result<ClientId, ApiError> {
    ClientId::new(raw).map_err(|err| ApiError::App(AppError::Domain(err.into())))
}

fn validate_multiplier_ppm(ppm: u64) -> Result<(), ApiError> {
    let multiplier = Ppm::new(ppm).as_f64();
    if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&multiplier) {
        return Err(ApiError::App(AppError::Domain(DomainError::InvalidInput {
            field: "auto_cashout_ppm".to_string(),
            reason: format!("must be between {MIN_MULTIPLIER} and {MAX_MULTIPLIER}"),
        })));
    }
    Ok(())
}
