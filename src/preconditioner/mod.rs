//! Preconditioner contract for the Krylov variant.
//!
//! A [`Preconditioner`] owns its data and work storage. The Krylov context
//! calls `setup` with a `jok` hint: `true` means the caller believes any
//! saved Jacobian data is still good enough to reuse; `false` means it must
//! be recomputed. `setup` answers whether Jacobian data was actually
//! recomputed (`jcur`). `solve` applies the left or right preconditioner.
//!
//! [`ReuseGuard`] enforces that reuse is only requested after a successful
//! recomputing setup, and maps callback failures to solver flags.

use crate::error::{CallbackError, LsError};
use crate::solver::Workspace;
use bitflags::bitflags;

pub mod bbd;

pub use bbd::{BandBlockDiagonal, BbdBlock, BlockBands, CommFn, LocalFn};

bitflags! {
    /// Side(s) on which the Krylov method applies the preconditioner.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct PrecType: u8 {
        const LEFT  = 0b01;
        const RIGHT = 0b10;
        const BOTH  = Self::LEFT.bits() | Self::RIGHT.bits();
    }
}

/// Which preconditioner a single solve call applies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrecSide {
    Left,
    Right,
}

/// Integrator state handed to the preconditioner callbacks.
#[derive(Debug, Clone, Copy)]
pub struct PrecInput<'a> {
    pub t: f64,
    pub y: &'a [f64],
    /// Derivative of `y`, DAE systems only.
    pub yp: Option<&'a [f64]>,
    /// `f(t, y)` for ODEs, the residual `F(t, y, y')` for DAEs.
    pub fy: &'a [f64],
    /// `gamma` (ODE) or `cj` (DAE).
    pub coef: f64,
}

/// A preconditioner `P ≈ A`, with `A` the Newton system matrix.
pub trait Preconditioner {
    /// Prepare `P`. Returns `true` when Jacobian data was recomputed.
    fn setup(&mut self, input: &PrecInput<'_>, jok: bool) -> Result<bool, CallbackError>;

    /// Solve `P z = r` (approximately, to within `delta` when iterative).
    fn solve(
        &mut self,
        input: &PrecInput<'_>,
        r: &[f64],
        z: &mut [f64],
        delta: f64,
        side: PrecSide,
    ) -> Result<(), CallbackError>;

    fn workspace(&self) -> Workspace {
        Workspace::default()
    }
}

impl<P: Preconditioner + ?Sized> Preconditioner for Box<P> {
    fn setup(&mut self, input: &PrecInput<'_>, jok: bool) -> Result<bool, CallbackError> {
        (**self).setup(input, jok)
    }

    fn solve(
        &mut self,
        input: &PrecInput<'_>,
        r: &[f64],
        z: &mut [f64],
        delta: f64,
        side: PrecSide,
    ) -> Result<(), CallbackError> {
        (**self).solve(input, r, z, delta, side)
    }

    fn workspace(&self) -> Workspace {
        (**self).workspace()
    }
}

/// Runtime check of the `jok` protocol around a user preconditioner.
#[derive(Debug)]
pub struct ReuseGuard<P> {
    inner: P,
    ready: bool,
}

impl<P: Preconditioner> ReuseGuard<P> {
    pub fn new(inner: P) -> Self {
        Self { inner, ready: false }
    }

    /// Forget any earlier setup; the next call must recompute.
    pub fn reset(&mut self) {
        self.ready = false;
    }

    /// True once a recomputing setup has succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn setup(&mut self, input: &PrecInput<'_>, jok: bool) -> Result<bool, LsError> {
        if jok && !self.ready {
            log::warn!("preconditioner reuse requested before any setup");
            return Err(LsError::PackageFailUnrec(
                "preconditioner reuse requested before any setup".into(),
            ));
        }
        match self.inner.setup(input, jok) {
            Ok(jcur) => {
                self.ready |= !jok || jcur;
                Ok(jcur)
            }
            Err(e) => {
                self.ready = false;
                log::debug!("preconditioner setup failed: {e}");
                Err(if e.is_recoverable() {
                    LsError::PsetFailRec
                } else {
                    LsError::PsetFailUnrec
                })
            }
        }
    }

    pub fn solve(
        &mut self,
        input: &PrecInput<'_>,
        r: &[f64],
        z: &mut [f64],
        delta: f64,
        side: PrecSide,
    ) -> Result<(), LsError> {
        self.inner.solve(input, r, z, delta, side).map_err(|e| {
            if e.is_recoverable() {
                LsError::PsolveFailRec
            } else {
                LsError::PsolveFailUnrec
            }
        })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Diagonal preconditioner that counts recomputations.
    struct Diag {
        d: Vec<f64>,
        computed: usize,
        fail: Option<CallbackError>,
    }

    impl Preconditioner for Diag {
        fn setup(&mut self, input: &PrecInput<'_>, jok: bool) -> Result<bool, CallbackError> {
            if let Some(e) = self.fail.clone() {
                return Err(e);
            }
            if jok {
                return Ok(false);
            }
            self.computed += 1;
            self.d = input.y.iter().map(|_| 1.0 - input.coef).collect();
            Ok(true)
        }

        fn solve(
            &mut self,
            _input: &PrecInput<'_>,
            r: &[f64],
            z: &mut [f64],
            _delta: f64,
            _side: PrecSide,
        ) -> Result<(), CallbackError> {
            for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.d) {
                *zi = ri / di;
            }
            Ok(())
        }
    }

    fn input(y: &[f64]) -> PrecInput<'_> {
        PrecInput { t: 0.0, y, yp: None, fy: y, coef: 0.5 }
    }

    #[test]
    fn reuse_before_setup_is_rejected() {
        let y = [1.0, 2.0];
        let mut g = ReuseGuard::new(Diag { d: vec![], computed: 0, fail: None });
        let err = g.setup(&input(&y), true).unwrap_err();
        assert!(matches!(err, LsError::PackageFailUnrec(_)));
        assert_eq!(g.inner().computed, 0);

        assert!(g.setup(&input(&y), false).unwrap());
        assert!(!g.setup(&input(&y), true).unwrap());
        g.reset();
        assert!(g.setup(&input(&y), true).is_err());
    }

    #[test]
    fn callback_failures_map_to_flags() {
        let y = [1.0];
        let mut g = ReuseGuard::new(Diag {
            d: vec![],
            computed: 0,
            fail: Some(CallbackError::Recoverable("retry".into())),
        });
        assert_eq!(g.setup(&input(&y), false), Err(LsError::PsetFailRec));
        g.inner_mut().fail = Some(CallbackError::Unrecoverable("broken".into()));
        assert_eq!(g.setup(&input(&y), false), Err(LsError::PsetFailUnrec));
        assert!(!g.is_ready());
    }

    #[test]
    fn both_sides_flag() {
        assert!(PrecType::BOTH.contains(PrecType::LEFT));
        assert!(PrecType::BOTH.contains(PrecType::RIGHT));
        assert!(!PrecType::empty().intersects(PrecType::BOTH));
    }
}
