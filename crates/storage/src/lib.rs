pub mod conformance;
mod counterpart;
mod error;
mod memory;
mod record;
mod traits;

pub use counterpart::StaticCounterparts;
pub use error::StorageError;
pub use memory::{MemoryStorage, MemoryTransaction, StoreLock};
pub use record::{
    ConfigurationScriptAttrs, ConfiguredSystemAttrs, CounterpartRef, CredentialAttrs,
    CredentialKind, EntityAttributes, EntityKind, EntityRecord, InventoryGroupAttrs, LocalId,
    ParentLink, PayloadDraft, PayloadKind, RefreshStatusUpdate, RetireMode, ScriptPayloadAttrs,
    ScriptSourceAttrs, TargetRecord, UpsertAction, UpsertOutcome,
};
pub use traits::{CounterpartLookup, InventoryStorage};
