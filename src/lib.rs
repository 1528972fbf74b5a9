pub mod amount;
pub mod broadcast;
pub mod config;
pub mod csv;
pub mod instant;
pub mod mirror;
pub mod model;
pub mod store;
pub mod sync;
pub mod validate;

pub use amount::Amount;
pub use broadcast::{Broadcaster, Bus, ChangeNotice, LocalBus};
pub use config::Config;
pub use mirror::Mirror;
pub use model::{PendingPayment, Record, RecordKind, Transaction, UserRecord};
pub use store::{DurableStore, SaveOutcome, WriteOutcome};
pub use sync::{Origin, SyncEngine, SyncEvent, SyncEventType, SyncListener, SyncStats};
pub use validate::Validation;
