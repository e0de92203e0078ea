//! Relational store boundary.
//!
//! Formula and run data come from upstream scheduling; audit records, sheet
//! registry and boundary resolutions are owned by the engine. Each port has an
//! in-memory implementation (tests/dev) and a Postgres one.

pub mod in_memory;
pub mod ports;
pub mod postgres;

pub use in_memory::{
    InMemoryAuditStore, InMemoryBoundaryStore, InMemoryRecipeStore, InMemoryRunStore,
    InMemorySheetStore,
};
pub use ports::{
    AuditStore, BoundaryStore, RecipeStore, RunStore, SheetStore, StorageSlot, StoreError,
};
pub use postgres::PostgresStores;
