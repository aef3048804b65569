//! Record operation validator for a `did:v1` cryptonym DID ledger.
//!
//! The validator is the gatekeeper a ledger node consults before a
//! `CreateWebLedgerRecord` or `UpdateWebLedgerRecord` operation is admitted
//! to the ledger. For each candidate operation it decides, deterministically,
//! whether the operation is well-formed, cryptographically authorized via an
//! object-capability invocation proof, and consistent with the ledger's
//! current view of the named DID.
//!
//! The entry point is [`validate`]. It is a pure function of its inputs plus
//! an injected read-only [`LedgerView`]; it holds no state, performs no I/O
//! of its own, and never returns an error across the boundary. Every
//! failure is folded into the [`ValidationResult`] envelope.

pub mod canon;
pub mod did;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod jws;
pub mod loader;
pub mod one_or_many;
pub mod patch;
pub mod policy;
pub mod proof;
pub mod validator;

pub use did::{Did, Env};
pub use document::{DidDocument, ServiceDescriptor, VerificationMethod};
pub use error::{
    ErrorDetails, ErrorName, ProofVerifyError, ProofVerifyResult, ValidationResult, ValidatorError,
};
pub use loader::{DocumentLoader, LedgerError, LedgerView};
pub use one_or_many::OneOrMany;
pub use patch::RecordPatch;
pub use policy::ValidatorParameterSet;
pub use proof::Proof;
pub use validator::{validate, Operation, ValidatorConfig};

#[macro_use]
extern crate lazy_static;
