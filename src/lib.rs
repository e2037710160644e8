//! Macaroons: bearer tokens whose holders can narrow, but never broaden,
//! their own authority.
//!
//! A macaroon is a chain of keyed hashes. It starts from a secret root key
//! and an identifier, and every caveat appended to it folds the caveat bytes
//! into the running HMAC signature. Anyone holding a macaroon can append
//! further caveats; nobody can remove one without knowing the root key.
//!
//! This crate provides:
//!
//! - the [`Macaroon`] value itself, stored in a single compact buffer so that
//!   cloning is one copy and attenuation is one copy plus one HMAC;
//! - a pluggable [`Scheme`] binding the HMAC, encryption, and
//!   bind-for-request algorithms, with sensible defaults
//!   (HMAC-SHA-256, AES-256-GCM) in [`crypto::sensible`];
//! - stack verification with exact-once discharge accounting and a
//!   constant-time final comparison ([`Scheme::verify`]);
//! - third-party caveat tooling: [`thirdparty::Attenuator`],
//!   [`thirdparty::Discharger`], and a discharge collector;
//! - the caveat-id exchange envelope in [`exchange`];
//! - the four libmacaroon wire formats (v1, v1-json, v2, v2-json) with
//!   format auto-detection in [`serialization`];
//! - optional verification [`trace::Traces`] for post-mortem debugging.
//!
//! ```
//! use bearclaw::crypto::sensible;
//! use bearclaw::verify::AllowAll;
//!
//! # fn main() -> Result<(), bearclaw::Error> {
//! let scheme = sensible::scheme();
//! let key = sensible::derive_root_key(b"my secret");
//! let m = scheme.new_macaroon("https://example.org/", b"keyid", &key, &[b"user = alice"])?;
//! let m = scheme.add_first_party_caveat(&m, b"account = 42")?;
//! let stack = scheme.prepare_stack(&m, &[])?;
//! let verified = scheme.verify(&key, stack)?;
//! verified.clear(&AllowAll)?;
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod error;
pub mod exchange;
pub mod macaroon;
pub mod scheme;
pub mod serialization;
pub mod thirdparty;
pub mod trace;
pub mod verify;

pub use error::Error;
pub use macaroon::{Caveat, Macaroon, Raw, RawCaveat};
pub use scheme::{Scheme, SchemeConfig};
pub use serialization::Format;
pub use trace::{Trace, TraceOp, TraceOpKind, Traces};
pub use verify::{AllowAll, Predicate, PredicateChecker, PredicateSet, Stack, VerifiedStack};

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque error type carried by pluggable capabilities (predicate checkers,
/// caveat-id issuers, third-party clients, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
