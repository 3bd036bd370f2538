// Asynchronous transfers over the authenticated session

mod coordinator;
mod engine;
mod handle;
mod options;
mod outcome;
mod reply;

pub use coordinator::{TransferCoordinator, UploadSource};
pub use engine::{SuccessCallback, TransferEngine, MAX_REDIRECTS};
pub use handle::TransferHandle;
pub use options::{ErrorCallback, ProgressCallback, ReadyReadCallback, TransferOptions};
pub use outcome::OutcomeSlot;
pub use reply::Reply;
