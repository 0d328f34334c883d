//! Domain layer containing core business types, traits, and error definitions.

pub mod commitment;
pub mod encoding;
pub mod error;
pub mod registry;
pub mod tracker;
pub mod traits;
pub mod types;

pub use commitment::{OtpEncoding, commit_hash_for, compute_commit_hash, encode_one_time_secret};
pub use error::{AppError, BlockchainError, ConfigError, ValidationError};
pub use registry::CurrencyRegistry;
pub use tracker::{EvmLogRule, MoveEventRule, SolanaInstructionRule, TransactionLifecycleTracker};
pub use traits::{ChainAdapter, CompletionRule};
pub use types::{
    AssetId, ChainTxRef, CommitHash, CompletionAmount, CompletionEvidence, ComputeHashRequest,
    ComputeHashResponse, ConfirmationOutcome, ConfirmationWait, ConfirmedTransaction,
    CurrencyValidationResponse, ErrorDetail, ErrorResponse, EvmLog, HealthResponse, HealthStatus,
    LedgerEvent, LedgerKind, NetworkDescriptor, NetworkSummary, PaymentIntent, PaymentSubmission,
    PrecommitRequest, PrecommitResponse, RateLimitResponse, SimulationResult, SolanaInstruction,
    SubmitPaymentRequest, Symbol, TransactionRecord, UNKNOWN_CURRENCY, UnsignedTransaction,
    UserLimits,
};
