mod supervisor;

pub use supervisor::{BackupSupervisor, SlotStatus, TriggerError};
