//! Stack verification and post-verification predicate clearing.
//!
//! Verification walks the authorizing macaroon's chain, recomputing every
//! HMAC step. Third-party caveats decrypt their sealed caveat key under the
//! running signature and recurse into the matching discharge macaroon, whose
//! bound signature must check out under bind-for-request. Every discharge
//! must be consumed exactly once. The final comparison is constant-time.
//!
//! A successful verification yields a [`VerifiedStack`], the only gateway to
//! [`VerifiedStack::clear`], which evaluates first-party predicates through
//! a caller-supplied [`PredicateChecker`].

use std::fmt;

use log::debug;

use crate::crypto::constant_time_eq;
use crate::error::Error;
use crate::macaroon::{printable_bytes, Macaroon};
use crate::scheme::Scheme;
use crate::trace::{TraceOpKind, Traces};
use crate::{BoxError, Result};

/// Discharge-counter spill threshold; stacks at most this deep stay on the
/// stack frame.
const SMALL_STACK: usize = 32;

/// An ordered stack of macaroons: the authorizing macaroon first, followed
/// by the discharge macaroons bound to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stack(Vec<Macaroon>);

impl Stack {
    /// The authorizing macaroon.
    ///
    /// # Panics
    /// Panics if the stack is empty.
    pub fn target(&self) -> &Macaroon {
        &self.0[0]
    }

    /// The bound discharge macaroons.
    ///
    /// # Panics
    /// Panics if the stack is empty.
    pub fn discharges(&self) -> &[Macaroon] {
        &self.0[1..]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Macaroon] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Macaroon> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Macaroon> {
        self.0
    }

    /// Wraps the stack in a [`VerifiedStack`] without running any
    /// cryptography. For callers that cached a previous successful
    /// verification; the result reports `verified() == false`.
    pub fn insecure_verified(self) -> VerifiedStack {
        VerifiedStack {
            stack: self,
            verified: false,
        }
    }
}

impl From<Vec<Macaroon>> for Stack {
    fn from(macaroons: Vec<Macaroon>) -> Stack {
        Stack(macaroons)
    }
}

impl<'a> IntoIterator for &'a Stack {
    type Item = &'a Macaroon;
    type IntoIter = std::slice::Iter<'a, Macaroon>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Scheme {
    /// Verifies the cryptographic signatures of the entire stack under the
    /// given root key.
    pub fn verify(&self, root_key: &[u8], stack: Stack) -> Result<VerifiedStack> {
        self.verify_stack(root_key, stack, None)
    }

    /// Like [`Scheme::verify`], recording every HMAC, decrypt, and bind
    /// step into `traces` for post-mortem inspection. Tracing copies every
    /// operand, so it is opt-in.
    pub fn verify_with_trace(
        &self,
        root_key: &[u8],
        stack: Stack,
        traces: &mut Traces,
    ) -> Result<VerifiedStack> {
        self.verify_stack(root_key, stack, Some(traces))
    }

    fn verify_stack(
        &self,
        root_key: &[u8],
        stack: Stack,
        mut rec: Option<&mut Traces>,
    ) -> Result<VerifiedStack> {
        if stack.is_empty() {
            return Err(Error::InvalidArgument("empty macaroon stack".to_string()));
        }
        if let Some(r) = rec.as_deref_mut() {
            r.reset(stack.len());
        }
        if root_key.len() != self.key_size {
            return Err(Error::InvalidArgument(format!(
                "invalid key size: need={}, got={}",
                self.key_size,
                root_key.len()
            )));
        }
        let n_discharges = stack.len() - 1;
        let mut small = [0u8; SMALL_STACK];
        let mut spill: Vec<u8>;
        let discharged: &mut [u8] = if n_discharges <= SMALL_STACK {
            &mut small[..n_discharges]
        } else {
            spill = vec![0u8; n_discharges];
            &mut spill
        };
        {
            let mut sig = self.acquire_key();
            sig.copy_from_slice(root_key);
            self.verify_macaroon(stack.target(), &stack, &mut sig, 0, discharged, &mut rec)?;
        }
        for (i, &uses) in discharged.iter().enumerate() {
            if uses == 1 {
                continue;
            }
            let err = if uses == 0 {
                Error::VerificationFailed(format!("discharge macaroon {i} was unused"))
            } else {
                Error::VerificationFailed(format!("discharge macaroon {i} was used more than once"))
            };
            if let Some(r) = rec.as_deref_mut() {
                r.fail(0, &err);
            }
            return Err(err);
        }
        Ok(VerifiedStack {
            stack,
            verified: true,
        })
    }

    fn verify_macaroon(
        &self,
        m: &Macaroon,
        stack: &Stack,
        sig: &mut [u8],
        vi: usize,
        discharged: &mut [u8],
        rec: &mut Option<&mut Traces>,
    ) -> Result<()> {
        let res = self.verify_macaroon_inner(m, stack, sig, vi, discharged, rec);
        if let Err(err) = &res {
            if let Some(r) = rec.as_deref_mut() {
                r.fail(vi, err);
            }
        }
        res
    }

    // `sig` holds the macaroon's chain key on entry and the recomputed
    // signature on exit.
    fn verify_macaroon_inner(
        &self,
        m: &Macaroon,
        stack: &Stack,
        sig: &mut [u8],
        vi: usize,
        discharged: &mut [u8],
        rec: &mut Option<&mut Traces>,
    ) -> Result<()> {
        if sig.len() != self.key_size {
            return Err(Error::InvalidArgument(format!(
                "invalid key size: need={}, got={}",
                self.key_size,
                sig.len()
            )));
        }
        if let Some(r) = rec.as_deref_mut() {
            r.set_root_key(vi, sig);
        }
        let pre = rec.as_ref().map(|_| sig.to_vec());
        self.hmac.hmac(sig, m.id())?;
        if let Some(r) = rec.as_deref_mut() {
            r.record(vi, TraceOpKind::Hmac, pre.unwrap_or_default(), m.id(), &*sig);
        }
        for c in m.caveats() {
            if !c.is_third_party() {
                let pre = rec.as_ref().map(|_| sig.to_vec());
                self.hmac.hmac(sig, c.chain_data())?;
                if let Some(r) = rec.as_deref_mut() {
                    r.record(vi, TraceOpKind::Hmac, pre.unwrap_or_default(), c.chain_data(), &*sig);
                }
                continue;
            }
            {
                let mut caveat_key = self.acquire_key();
                if let Err(e) = self.decrypt_key(&mut caveat_key, c.vid(), sig) {
                    return Err(Error::VerificationFailed(format!(
                        "failed to decrypt third-party caveat key: {e}"
                    )));
                }
                if let Some(r) = rec.as_deref_mut() {
                    r.record(vi, TraceOpKind::Decrypt, &sig[..], c.vid(), &caveat_key[..]);
                }
                let found = stack
                    .discharges()
                    .iter()
                    .enumerate()
                    .find(|(_, d)| d.id() == c.id());
                let Some((di, d)) = found else {
                    return Err(Error::VerificationFailed(format!(
                        "missing discharge for caveat: {}",
                        printable_bytes(c.id())
                    )));
                };
                discharged[di] = discharged[di].saturating_add(1);
                self.verify_macaroon(d, stack, &mut caveat_key, di + 1, discharged, rec)?;
            }
            let pre = rec.as_ref().map(|_| sig.to_vec());
            self.hmac.hmac(sig, c.chain_data())?;
            if let Some(r) = rec.as_deref_mut() {
                r.record(vi, TraceOpKind::Hmac, pre.unwrap_or_default(), c.chain_data(), &*sig);
            }
        }
        if vi != 0 {
            let pre = rec.as_ref().map(|_| sig.to_vec());
            self.bfr
                .bind_for_request(stack.target(), sig)
                .map_err(|e| {
                    Error::VerificationFailed(format!("could not get request signature: {e}"))
                })?;
            if let Some(r) = rec.as_deref_mut() {
                r.record(
                    vi,
                    TraceOpKind::Bind,
                    stack.target().signature(),
                    pre.unwrap_or_default(),
                    &*sig,
                );
            }
        }
        if !constant_time_eq(sig, m.signature()) {
            debug!("macaroon {vi}: signature mismatch");
            return Err(Error::VerificationFailed(format!(
                "signatures did not match: want={}, got={}",
                hex::encode(&*sig),
                hex::encode(m.signature())
            )));
        }
        Ok(())
    }
}

/// A stack whose cryptographic signatures have been checked. Required for
/// predicate clearing.
#[derive(Clone, Debug)]
pub struct VerifiedStack {
    stack: Stack,
    verified: bool,
}

impl VerifiedStack {
    /// The authorizing macaroon's id.
    pub fn id(&self) -> &[u8] {
        self.stack.target().id()
    }

    /// False for stacks produced by [`Stack::insecure_verified`].
    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// All first-party predicates in the stack, with their positions.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();
        for m in self.stack.iter() {
            for (i, c) in m.caveats().enumerate() {
                if c.is_third_party() {
                    continue;
                }
                out.push(Predicate {
                    macaroon_id: m.id().to_vec(),
                    caveat_id: c.id().to_vec(),
                    index: i,
                });
            }
        }
        out
    }

    /// Evaluates every first-party predicate in the stack through `checker`.
    ///
    /// A checker verdict of `Ok(false)` fails with
    /// [`Error::PredicateNotSatisfied`]; a checker error fails with
    /// [`Error::PredicateCheck`], which callers may treat as retryable.
    pub fn clear(&self, checker: &dyn PredicateChecker) -> Result<()> {
        for m in self.stack.iter() {
            clear_macaroon(m, checker)?;
        }
        Ok(())
    }
}

fn clear_macaroon(m: &Macaroon, checker: &dyn PredicateChecker) -> Result<()> {
    for (i, c) in m.caveats().enumerate() {
        if c.is_third_party() {
            continue;
        }
        match checker.check_predicate(c.id()) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::PredicateNotSatisfied(Predicate {
                    macaroon_id: m.id().to_vec(),
                    caveat_id: c.id().to_vec(),
                    index: i,
                }))
            }
            Err(source) => {
                return Err(Error::PredicateCheck {
                    predicate: Predicate {
                        macaroon_id: m.id().to_vec(),
                        caveat_id: c.id().to_vec(),
                        index: i,
                    },
                    source,
                })
            }
        }
    }
    Ok(())
}

/// A first-party predicate's position within a verified stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    pub macaroon_id: Vec<u8>,
    pub caveat_id: Vec<u8>,
    pub index: usize,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/macaroon/{}/caveat/{}: {}",
            printable_bytes(&self.macaroon_id),
            self.index,
            printable_bytes(&self.caveat_id)
        )
    }
}

/// Evaluates first-party predicates.
///
/// An `Err` return does not mean the predicate is false, only that it cannot
/// be evaluated right now; the two outcomes surface as different error
/// kinds from [`VerifiedStack::clear`].
pub trait PredicateChecker {
    fn check_predicate(&self, predicate: &[u8]) -> std::result::Result<bool, BoxError>;
}

impl<F> PredicateChecker for F
where
    F: Fn(&[u8]) -> std::result::Result<bool, BoxError>,
{
    fn check_predicate(&self, predicate: &[u8]) -> std::result::Result<bool, BoxError> {
        self(predicate)
    }
}

/// Checker that satisfies every predicate. Useful in tests and for
/// macaroons whose predicates are enforced elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PredicateChecker for AllowAll {
    fn check_predicate(&self, _predicate: &[u8]) -> std::result::Result<bool, BoxError> {
        Ok(true)
    }
}

/// Checker that satisfies exactly a fixed set of predicates.
#[derive(Clone, Debug, Default)]
pub struct PredicateSet(Vec<Vec<u8>>);

impl PredicateSet {
    pub fn new() -> PredicateSet {
        PredicateSet::default()
    }

    /// Adds a predicate to the satisfied set.
    pub fn satisfy(&mut self, predicate: impl Into<Vec<u8>>) -> &mut PredicateSet {
        self.0.push(predicate.into());
        self
    }
}

impl PredicateChecker for PredicateSet {
    fn check_predicate(&self, predicate: &[u8]) -> std::result::Result<bool, BoxError> {
        Ok(self.0.iter().any(|p| p == predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sensible;

    fn fixture() -> (Scheme, [u8; 32], Macaroon) {
        let s = sensible::scheme();
        let key = sensible::derive_root_key(b"this is the key");
        let m = s
            .new_macaroon("http://example.org/", b"keyid", &key, &[b"a > 1", b"b > 2"])
            .unwrap();
        (s, key, m)
    }

    #[test]
    fn verify_first_party_only() {
        let (s, key, m) = fixture();
        let stack = s.prepare_stack(&m, &[]).unwrap();
        let v = s.verify(&key, stack).unwrap();
        assert!(v.verified());
        assert_eq!(v.id(), b"keyid");
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let (s, _, m) = fixture();
        let wrong = sensible::derive_root_key(b"this is not the key");
        let stack = s.prepare_stack(&m, &[]).unwrap();
        let err = s.verify(&wrong, stack).unwrap_err();
        assert!(err.is_verification_failed());
    }

    #[test]
    fn verify_rejects_tampered_caveat() {
        let (s, key, m) = fixture();
        let mut raw = m.to_raw();
        raw.caveats[0].cid = b"a > 0".to_vec();
        let forged = Macaroon::from_raw(&raw).unwrap();
        let stack = s.prepare_stack(&forged, &[]).unwrap();
        assert!(s.verify(&key, stack).unwrap_err().is_verification_failed());
    }

    #[test]
    fn verify_rejects_empty_stack() {
        let (s, key, _) = fixture();
        let err = s.verify(&key, Stack::default()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn clear_distinguishes_denied_from_uncheckable() {
        let (s, key, m) = fixture();
        let stack = s.prepare_stack(&m, &[]).unwrap();
        let v = s.verify(&key, stack).unwrap();

        v.clear(&AllowAll).unwrap();

        let mut some = PredicateSet::new();
        some.satisfy(&b"a > 1"[..]);
        let err = v.clear(&some).unwrap_err();
        assert!(err.is_predicate_not_satisfied());
        assert_eq!(err.predicate().unwrap().caveat_id, b"b > 2".to_vec());

        struct Broken;
        impl PredicateChecker for Broken {
            fn check_predicate(&self, _p: &[u8]) -> std::result::Result<bool, BoxError> {
                Err("clock unavailable".into())
            }
        }
        let err = v.clear(&Broken).unwrap_err();
        assert!(!err.is_predicate_not_satisfied());
        assert!(matches!(err, Error::PredicateCheck { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn insecure_verified_is_marked() {
        let (s, _, m) = fixture();
        let stack = s.prepare_stack(&m, &[]).unwrap();
        let v = stack.insecure_verified();
        assert!(!v.verified());
        v.clear(&AllowAll).unwrap();
    }

    #[test]
    fn predicates_lists_first_party_only() {
        let s = sensible::scheme();
        let key = [1u8; 32];
        let ckey = [2u8; 32];
        let m = s.new_macaroon("loc", b"id", &key, &[b"a > 1"]).unwrap();
        let m = s
            .add_third_party_caveat(&m, &ckey, b"tp", "https://other.example.org")
            .unwrap();
        let m = s.add_first_party_caveat(&m, b"b > 2").unwrap();
        let preds = Stack::from(vec![m]).insecure_verified().predicates();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].caveat_id, b"a > 1".to_vec());
        assert_eq!(preds[0].index, 0);
        assert_eq!(preds[1].caveat_id, b"b > 2".to_vec());
        assert_eq!(preds[1].index, 2);
        assert_eq!(
            preds[0].to_string(),
            "/macaroon/id/caveat/0: a > 1".to_string()
        );
    }

    #[test]
    fn chain_matches_naive_recomputation() {
        // Step-by-step HMAC chain recomputed by hand must equal the
        // incrementally built signature.
        let s = sensible::scheme();
        let key = sensible::derive_root_key(b"chain");
        let m = s
            .new_macaroon("loc", b"chain-id", &key, &[b"one"])
            .unwrap();
        let m = s.add_first_party_caveat(&m, b"two").unwrap();
        let ckey = [9u8; 32];
        let m = s
            .add_third_party_caveat(&m, &ckey, b"three", "https://3p.example.org")
            .unwrap();

        let mut sig = [0u8; 32];
        sig.copy_from_slice(&key);
        use crate::crypto::HmacScheme;
        let h = crate::crypto::sensible::Sensible;
        h.hmac(&mut sig, b"chain-id").unwrap();
        for c in m.caveats() {
            h.hmac(&mut sig, c.chain_data()).unwrap();
        }
        assert_eq!(&sig[..], m.signature());
    }
}
