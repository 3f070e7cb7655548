//! File upload: request model, part planning, credential recovery and the
//! upload controller

mod controller;
mod credentials;
#[cfg(test)]
mod fake;
mod plan;
mod request;
mod session;

pub use controller::{TransferProgress, UploadController};
pub use credentials::CredentialCoordinator;
pub use plan::{
    ByteRange, MAX_PART_SIZE_BYTES, MAX_PARTS_PER_UPLOAD, PartSizePolicy, PartStatus,
    PartUploadTask, plan_parts,
};
pub use request::{
    AttemptOutcome, TransferAttempt, TransferOutcome, TransferRequest, TransferRequestBuilder,
};
pub use session::{SessionState, UploadSession};
