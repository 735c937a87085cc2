//! Error taxonomy shared by every operation in the crate.
//!
//! Every failure is either *recoverable* (positive flag: the caller may retry
//! with a fresh Jacobian, a different coefficient or a smaller step) or
//! *unrecoverable* (negative flag: the caller must abort). Success is flag 0.

use thiserror::Error;

/// Unified error type for the linear-solver layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LsError {
    #[error("solver memory is not available (freed or never allocated)")]
    MemNull,
    #[error("illegal input: {0}")]
    IllInput(String),
    #[error("system operator product failed unrecoverably")]
    AtimesFailUnrec,
    #[error("preconditioner setup failed unrecoverably")]
    PsetFailUnrec,
    #[error("preconditioner solve failed unrecoverably")]
    PsolveFailUnrec,
    #[error("unrecoverable package failure: {0}")]
    PackageFailUnrec(String),
    #[error("Gram-Schmidt orthogonalization failed")]
    GsFailed,
    #[error("singular Hessenberg least-squares problem")]
    QrSolFailed,

    #[error("residual reduced but not below tolerance")]
    ResidualReduced,
    #[error("no convergence after {0} linear iterations")]
    ConvFailed(usize),
    #[error("system operator product failed recoverably")]
    AtimesFailRec,
    #[error("preconditioner setup failed recoverably")]
    PsetFailRec,
    #[error("preconditioner solve failed recoverably")]
    PsolveFailRec,
    #[error("recoverable package failure: {0}")]
    PackageFailRec(String),
    #[error("singular Hessenberg factor at column {0}")]
    QrFactFailed(usize),
    #[error("zero pivot at column {0}")]
    ZeroPivot(usize),
}

impl LsError {
    /// Integer status flag: positive for recoverable, negative for unrecoverable.
    pub fn flag(&self) -> i32 {
        match self {
            LsError::MemNull => -1,
            LsError::IllInput(_) => -2,
            LsError::AtimesFailUnrec => -4,
            LsError::PsetFailUnrec => -5,
            LsError::PsolveFailUnrec => -6,
            LsError::PackageFailUnrec(_) => -7,
            LsError::GsFailed => -8,
            LsError::QrSolFailed => -9,
            LsError::ResidualReduced => 1,
            LsError::ConvFailed(_) => 2,
            LsError::AtimesFailRec => 3,
            LsError::PsetFailRec => 4,
            LsError::PsolveFailRec => 5,
            LsError::PackageFailRec(_) => 6,
            LsError::QrFactFailed(_) => 7,
            LsError::ZeroPivot(_) => 8,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.flag() > 0
    }

    pub fn status(&self) -> Status {
        if self.is_recoverable() {
            Status::Recoverable
        } else {
            Status::Unrecoverable
        }
    }
}

/// Tri-state outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Recoverable,
    Unrecoverable,
}

impl Status {
    pub fn of<T>(res: &Result<T, LsError>) -> Self {
        match res {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

/// Flag recorded for the outcome of an operation (0 on success).
pub fn flag_of<T>(res: &Result<T, LsError>) -> i32 {
    match res {
        Ok(_) => 0,
        Err(e) => e.flag(),
    }
}

/// Failure reported by a user callback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallbackError {
    #[error("recoverable callback failure: {0}")]
    Recoverable(String),
    #[error("unrecoverable callback failure: {0}")]
    Unrecoverable(String),
}

impl CallbackError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CallbackError::Recoverable(_))
    }

    /// Lift into the package-failure pair.
    pub fn into_package(self) -> LsError {
        match self {
            CallbackError::Recoverable(msg) => LsError::PackageFailRec(msg),
            CallbackError::Unrecoverable(msg) => LsError::PackageFailUnrec(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_carry_severity() {
        assert!(LsError::ZeroPivot(3).is_recoverable());
        assert!(!LsError::PackageFailUnrec("x".into()).is_recoverable());
        assert_eq!(LsError::MemNull.flag(), -1);
        assert_eq!(Status::of::<()>(&Ok(())), Status::Success);
        assert_eq!(Status::of::<()>(&Err(LsError::ConvFailed(5))), Status::Recoverable);
        assert_eq!(flag_of::<()>(&Err(LsError::GsFailed)), -8);
    }

    #[test]
    fn callback_errors_map_to_package_failures() {
        let rec = CallbackError::Recoverable("step too big".into()).into_package();
        assert_eq!(rec.flag(), 6);
        let unrec = CallbackError::Unrecoverable("nan".into()).into_package();
        assert_eq!(unrec.flag(), -7);
    }
}
