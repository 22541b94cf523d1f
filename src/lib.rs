//! Escrow Arbiter: a 2-of-3 multisig USDT-on-TRON escrow coordination service.
//!
//! This library implements the backend for an escrow deal between a buyer
//! and a seller, arbitrated by a third party, where funds are held in a TRON
//! multisig wallet requiring two of the three parties' signatures to move.
//!
//! # Features
//!
//! - **Deal State Machine**: a transactional, optimistic-concurrency store
//!   over the deal lifecycle (`Created` -> `AwaitingDeposit` -> `Funded` ->
//!   a terminal outcome), with a full audit trail of every transition.
//! - **Deposit & Deadline Monitors**: periodic, re-entrancy-safe background
//!   tasks that watch the chain for inbound deposits and sweep expired
//!   deadlines, opening key-validation sessions for the winning party.
//! - **Dispute Engine**: opening, resolving and cancelling arbiter disputes.
//! - **Payout Pipeline**: resource provisioning, recipient payout, commission
//!   transfer, TRX sweep and terminal transition, run to completion once a
//!   party's signing key is validated.
//! - **Admin HTTP API**: a read-mostly surface over deals, transactions and
//!   the audit trail, documented with `utoipa`/`utoipa-swagger-ui` and
//!   guarded by a bearer-token middleware.
//! - **SQLite Database**: all state stored locally via `rusqlite`/`r2d2`
//!   with automatic migrations.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`api`]: admin HTTP API (deals, disputes, alerts, key validation, OpenAPI docs)
//! - [`chain`]: TRON chain client, circuit breaker and TRX/USD price feed
//! - [`config`]: configuration file loading and environment overrides
//! - [`daemon`]: background daemon mode orchestrating monitors, worker and API
//! - [`db`]: database layer with SQLite queries per aggregate
//! - [`deadline_monitor`]: sweeps `Funded` deals past their deadline
//! - [`deposit_monitor`]: watches multisig addresses for inbound deposits
//! - [`dispute`]: dispute lifecycle (open, resolve, cancel)
//! - [`key_validation`]: TRON address derivation and candidate-key validation
//! - [`log`]: structured logging setup
//! - [`models`]: data model types (Deal, MultisigWallet, TransactionRecord, ...)
//! - [`notifier`]: queue-backed notification delivery
//! - [`payout`]: payout pipeline (resource rental, payout, commission, sweep)
//! - [`state_machine`]: the pure deal transition table

pub mod api;
pub mod chain;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod db;
pub mod deadline_monitor;
pub mod deposit_monitor;
pub mod dispute;
pub mod key_validation;
pub mod log;
pub mod models;
pub mod notifier;
pub mod payout;
pub mod state_machine;

pub use crate::api::ApiDoc;
pub use crate::db::init_db;
