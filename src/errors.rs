//! Utilities dealing with error handling in this crate.

use failure::Fail;

/// Errors produced by this crate.
#[derive(Debug, Fail)]
pub enum Error {
    /// Errors originating from calls to `std::io::*`.
    #[fail(display = "IO Error - {}", _0)]
    IO(#[cause] std::io::Error),
    /// Errors originating from calls to `regex::*`.
    #[fail(display = "Regex Error - {}", _0)]
    Regex(#[cause] regex::Error),
    /// Errors parsing Glob patterns.
    #[fail(display = "Glob Error - {}", _0)]
    GlobPattern(#[cause] glob::PatternError),
    /// Errors interating over entries in a glob.
    #[fail(display = "Glob Error - {}", _0)]
    GlobIter(#[cause] glob::GlobError),
    /// Errors caused by parsing integers from strings.
    #[fail(display = "Parse Error - {}", _0)]
    ParseInt(#[cause] std::num::ParseIntError),
    /// Errors caused by parsing floats from strings.
    #[fail(display = "Parse Error - {}", _0)]
    ParseFloat(#[cause] std::num::ParseFloatError),
    /// Errors caused by failing to read a `&[u8]` to a `str`.
    #[fail(display = "Parse Error - {}", _0)]
    ParseUtf8(#[cause] std::str::Utf8Error),
    /// Malformed contents of a sysfs file.
    #[fail(display = "Parse Error - unexpected contents `{}`", _0)]
    ParseSysfs(String),
    /// Errors originating from calls to `libc` or other system utilties.
    #[fail(display = "System Error - {}", _0)]
    System(#[cause] nix::Error),
    /// Caused when a `None` value is read.
    #[fail(display = "Tried to read a None value")]
    NoneError,
    /// Errors caused by capability checks on the kernel.
    #[fail(display = "Not allowed by kernel")]
    PerfNotCapable,
    /// The named PMU is not exported by the kernel.
    #[fail(display = "PMU `{}` not found", _0)]
    PmuNotFound(String),
    /// The named event is not exported by a PMU.
    #[fail(display = "Event `{}` not found on PMU `{}`", _1, _0)]
    EventNotFound(String, String),
    /// No energy counters could be opened.
    #[fail(display = "Energy counters unavailable")]
    EnergyUnavailable,
    /// An operation was attempted before the monitor was initialized.
    #[fail(display = "Monitor not initialized")]
    NotInitialized,
    /// A core index is out of range.
    #[fail(display = "Core {} exceeds available cores {}", _0, _1)]
    CoreOutOfRange(u32, u32),
    /// A socket index is out of range.
    #[fail(display = "Socket {} exceeds available sockets {}", _0, _1)]
    SocketOutOfRange(u32, u32),
    /// Counters were queried without a completed measurement.
    #[fail(display = "No completed measurement")]
    NoMeasurement,
    /// The measurement window is not usable for rate calculations.
    #[fail(display = "Invalid elapsed time {:.3} sec", _0)]
    InvalidElapsed(f64),
}

impl Error {
    /// Create a new instance of error from the `errno` variable.
    #[inline]
    pub fn from_errno() -> Self {
        Error::System(nix::errno::Errno::last())
    }

    /// Check if this error was caused by a lack of permissions.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::System(e) => *e == nix::errno::Errno::EACCES || *e == nix::errno::Errno::EPERM,
            Error::IO(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            Error::PerfNotCapable => true,
            _ => false,
        }
    }
}

macro_rules! error_from {
    ($et: ty => $cet: expr) => {
        impl From<$et> for Error {
            #[inline]
            fn from(err: $et) -> Self {
                $cet(err)
            }
        }
    };
}

error_from!(std::io::Error => Error::IO);
error_from!(regex::Error => Error::Regex);
error_from!(glob::PatternError => Error::GlobPattern);
error_from!(glob::GlobError => Error::GlobIter);
error_from!(std::num::ParseIntError => Error::ParseInt);
error_from!(std::num::ParseFloatError => Error::ParseFloat);
error_from!(std::str::Utf8Error => Error::ParseUtf8);
error_from!(nix::Error => Error::System);

/// Result type used in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_classification() {
        assert!(Error::System(nix::errno::Errno::EACCES).is_permission_denied());
        assert!(Error::System(nix::errno::Errno::EPERM).is_permission_denied());
        assert!(!Error::System(nix::errno::Errno::ENOENT).is_permission_denied());
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(Error::from(io).is_permission_denied());
        assert!(!Error::NoMeasurement.is_permission_denied());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            format!("{}", Error::CoreOutOfRange(9, 4)),
            "Core 9 exceeds available cores 4"
        );
        assert_eq!(
            format!("{}", Error::EventNotFound("uncore_imc_0".into(), "cas_count_read".into())),
            "Event `cas_count_read` not found on PMU `uncore_imc_0`"
        );
    }
}
