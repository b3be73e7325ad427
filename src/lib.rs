//! # API Model Management Plane
//!
//! A decision and dispatch engine that sits between agent workloads and a
//! fleet of remote text-generation model providers. For each incoming
//! agent task it picks the best model subject to capability, cost,
//! rate-limit, health and historical-performance constraints; dispatches
//! the request through the matching provider adapter; retries and fails
//! over on transient failure; meters cost and quality; and keeps serving
//! — in a reduced mode — when individual providers, the cache, or the
//! telemetry store misbehave.
//!
//! ## Governing principle : "Thin engine, pluggable edges"
//!
//! This crate owns the interlocking decision/dispatch subsystems only.
//! Concrete vendor HTTP clients, the credential backing store, the
//! on-disk telemetry schema, response quality evaluation and
//! configuration hot-reload plumbing are external collaborators with a
//! trait or data shape, not a bundled implementation.
//!
//! ## Putting it together
//!
//! [`plane::ModelPlane`] is the composition root : build one from a
//! [`config::ConfigDocument`], an [`adapter::AdapterRegistry`] of
//! provider adapters, and a [`credentials::CredentialStore`], then call
//! [`plane::ModelPlane::submit`] for every incoming `(task, agent_kind)`.
//!
//! ## State management policy
//!
//! **Runtime-stateful, process-stateless.** Health state, rate-limit
//! windows, performance/cost ledgers and the degradation controller's
//! mode all live only as long as the process; nothing here coordinates
//! across processes. Persisting telemetry to disk ([`storage`]) is
//! opt-in and append-only, never a source of truth the engine itself
//! reads back from at decision time.

#![ doc( html_root_url = "https://docs.rs/api_model_plane/latest/api_model_plane/" ) ]
#![ cfg_attr( doc, doc = include_str!( concat!( env!( "CARGO_MANIFEST_DIR" ), "/", "readme.md" ) ) ) ]

/// In-memory catalog of model descriptors, queryable by id / provider /
/// capability.
pub mod registry;

/// Per-model liveness tracking with exponential probe backoff.
pub mod health;

/// Per-model sliding-window request/token accounting.
pub mod rate_limit;

/// Append-only per-request latency/success/quality records and rolling
/// aggregates.
pub mod performance;

/// Append-only per-request cost records, daily budgets and attribution
/// breakdowns.
pub mod cost;

/// Scores eligible models against a task and returns a ranked selection.
pub mod selector;

/// Bounded-concurrency request execution with per-call retry.
pub mod dispatcher;

/// Cross-model retry when a dispatch's own retry budget is exhausted.
pub mod failover;

/// Derives the plane's operating mode from tracked provider/cache/
/// telemetry signals and queues requests during total outage.
pub mod degradation;

/// The provider adapter contract and an in-memory registry of them.
pub mod adapter;

/// Round-robin API credential sourcing per provider.
pub mod credentials;

/// Append-only on-disk telemetry tables, behind the `persistence` feature.
#[ cfg( feature = "persistence" ) ]
pub mod storage;

/// The incoming task data model.
pub mod task;

/// Crate-wide error type and the §7 error-category taxonomy.
pub mod error;

/// Configuration document parsing and mtime-poll hot reload.
pub mod config;

/// The composition root every embedder builds once and submits tasks to.
pub mod plane;

pub use adapter::{ AdapterRegistry, AdapterResponse, ProviderAdapter };
pub use config::{ ConfigDocument, ConfigWatcher, OperationalConfig };
pub use cost::{ calculate_cost, BudgetDecision, BudgetLimits, BudgetStatus, CostLedger, CostRecord };
pub use credentials::{ CredentialStore, EnvCredentialStore };
pub use degradation::{ DegradationController, DegradationMode };
pub use dispatcher::{ DispatchOutcome, Dispatcher, RetryPolicy };
pub use error::{ categorize, Error, ErrorCategory };
pub use failover::{ FailoverCoordinator, FailoverEvent, FailoverReason };
pub use health::{ HealthSnapshot, HealthState, HealthTracker };
pub use performance::{ PerformanceAggregate, PerformanceRecord, PerformanceStore };
pub use plane::{ ModelPlane, SubmitOutcome };
pub use rate_limit::{ Admission, RateLimitTracker };
pub use registry::{ ModelDescriptor, ModelRegistry, RejectedDescriptor };
pub use selector::{ AvailabilityGap, Selection, Selector, WeightProfile };
pub use task::{ AgentKind, SelectionConstraints, Task, TaskPriority };

#[ cfg( feature = "persistence" ) ]
pub use storage::{ JsonlTable, TelemetryStore };
